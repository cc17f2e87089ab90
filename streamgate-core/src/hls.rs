//! Line-oriented HLS playlist rewriting.
//!
//! Each media URI in an upstream playlist is replaced with a proxy URL
//! signed for the requesting token, so a rewritten manifest is only usable
//! by the viewer it was rendered for. Tags, comments and blank lines pass
//! through verbatim; line endings are normalized to `\n`.

use crate::models::StreamId;
use crate::signer::UrlSigner;

/// Directory component of an HLS path, with trailing slash.
///
/// `0/stream.m3u8` -> `0/`; a root-level path yields `""`.
#[must_use]
pub fn base_dir_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

// A line is a media URI iff it does not start with '#' and, ignoring any
// query string, ends in .ts, .m4s or .m3u8.
fn media_path(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let path = line.split_once('?').map_or(line, |(path, _)| path);
    if path.ends_with(".ts") || path.ends_with(".m4s") || path.ends_with(".m3u8") {
        Some(path)
    } else {
        None
    }
}

/// Rewrite an upstream playlist so every media URI becomes a signed proxy
/// URL bound to `token`.
///
/// `base_dir` is the directory component of the requested playlist path, so
/// relative entries in variant playlists resolve into the correct upstream
/// subdirectory. URIs with a leading `/` are already rooted at the upstream
/// HLS base; fully qualified external URLs are left untouched.
#[must_use]
pub fn rewrite_playlist(
    input: &str,
    stream_id: &StreamId,
    token: &str,
    base_dir: &str,
    signer: &UrlSigner,
) -> String {
    let mut output = String::with_capacity(input.len() * 2);

    for raw_line in input.split('\n') {
        let line = raw_line.trim_end_matches('\r');

        match media_path(line) {
            Some(path) if !is_external(path) => {
                let resolved = if let Some(rooted) = path.strip_prefix('/') {
                    rooted.to_string()
                } else {
                    format!("{base_dir}{path}")
                };
                let proxy_path = format!("/stream/{stream_id}/hls/{resolved}");
                output.push_str(&signer.sign(stream_id, token, &proxy_path));
            }
            _ => output.push_str(line),
        }
        output.push('\n');
    }

    // split('\n') yields a trailing empty element when the input ends with
    // a newline; drop the extra blank line it would produce.
    if input.ends_with('\n') {
        output.pop();
    }

    output
}

fn is_external(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn signer() -> UrlSigner {
        UrlSigner::new(b"0123456789abcdef0123456789abcdef", Duration::from_secs(60)).unwrap()
    }

    fn stream_id() -> StreamId {
        StreamId::from_string("s1".to_string())
    }

    #[test]
    fn base_dir_of_splits_directories() {
        assert_eq!(base_dir_of("stream.m3u8"), "");
        assert_eq!(base_dir_of("0/stream.m3u8"), "0/");
        assert_eq!(base_dir_of("a/b/seg-1.ts"), "a/b/");
    }

    #[test]
    fn media_playlist_segments_get_signed() {
        let input = "#EXTM3U\n#EXTINF:4,\nseg-0.ts\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXTINF:4,");
        assert!(lines[2].starts_with("/stream/s1/hls/seg-0.ts?token=tok&expires="));
        assert!(lines[2].contains("&sig="));
        let sig = lines[2].rsplit_once("&sig=").unwrap().1;
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tags_comments_and_blanks_pass_through_in_order() {
        let input = "#EXTM3U\n\n#EXT-X-VERSION:3\n# a comment\nseg-0.ts\n#EXT-X-ENDLIST\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        let lines: Vec<&str> = out.split('\n').collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "#EXT-X-VERSION:3");
        assert_eq!(lines[3], "# a comment");
        assert_eq!(lines[5], "#EXT-X-ENDLIST");
    }

    #[test]
    fn every_rewritten_line_is_a_signed_proxy_url() {
        let input = "#EXTM3U\nseg-0.ts\nseg-1.m4s\nsub/variant.m3u8\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());

        for line in out.lines().filter(|l| !l.starts_with('#') && !l.is_empty()) {
            assert!(
                line.starts_with("/stream/s1/hls/"),
                "unexpected line: {line}"
            );
            assert!(line.contains("?token=tok&expires="));
            assert!(line.contains("&sig="));
        }
    }

    #[test]
    fn master_playlist_variants_keep_their_directory() {
        let input = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\n0/stream.m3u8\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        assert!(out.contains("/stream/s1/hls/0/stream.m3u8?token="));
    }

    #[test]
    fn variant_segments_resolve_into_their_directory() {
        let input = "#EXTM3U\n#EXTINF:4,\nseg-1.ts\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "0/", &signer());
        assert!(out.contains("/stream/s1/hls/0/seg-1.ts?token="));
    }

    #[test]
    fn rooted_uris_skip_base_dir() {
        let input = "/alt/seg-9.ts\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "0/", &signer());
        assert!(out.starts_with("/stream/s1/hls/alt/seg-9.ts?token="));
    }

    #[test]
    fn external_urls_pass_through() {
        let input = "#EXTM3U\nhttps://cdn.example.com/ad/spot.ts\nseg-0.ts\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "https://cdn.example.com/ad/spot.ts");
        assert!(lines[2].starts_with("/stream/s1/hls/seg-0.ts?"));
    }

    #[test]
    fn existing_query_strings_are_stripped() {
        let input = "seg-0.ts?stale=1\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        assert!(out.starts_with("/stream/s1/hls/seg-0.ts?token="));
        assert!(!out.contains("stale"));
    }

    #[test]
    fn crlf_input_is_normalized() {
        let input = "#EXTM3U\r\nseg-0.ts\r\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        assert!(!out.contains('\r'));
        assert!(out.starts_with("#EXTM3U\n/stream/s1/hls/seg-0.ts?"));
    }

    #[test]
    fn non_media_lines_without_hash_are_untouched() {
        // e.g. a stray name the origin emits; it is not a media URI
        let input = "poster.jpg\n";
        let out = rewrite_playlist(input, &stream_id(), "tok", "", &signer());
        assert_eq!(out, "poster.jpg\n");
    }
}
