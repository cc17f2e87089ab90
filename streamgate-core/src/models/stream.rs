use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamId;

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Scheduled,
    Live,
    Ended,
}

impl StreamStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown stream status: {other}"
            ))),
        }
    }
}

/// A paywall-protected stream.
///
/// `origin_base_url` and `stream_key` are operational secrets; they are
/// never serialized, so no client-facing response body can carry them.
#[derive(Debug, Clone, Serialize)]
pub struct Stream {
    pub id: StreamId,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub status: StreamStatus,
    #[serde(skip_serializing)]
    pub origin_base_url: String,
    #[serde(skip_serializing)]
    pub stream_key: String,
    pub price_cents: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Stream {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == StreamStatus::Live
    }

    /// Upstream URL for an HLS path under this stream's private origin.
    #[must_use]
    pub fn upstream_hls_url(&self, hls_path: &str) -> String {
        format!(
            "{}/hls/{}",
            self.origin_base_url.trim_end_matches('/'),
            hls_path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with_origin(origin: &str) -> Stream {
        Stream {
            id: StreamId::from_string("abc123def456".to_string()),
            slug: "launch".to_string(),
            title: "Launch".to_string(),
            description: String::new(),
            status: StreamStatus::Live,
            origin_base_url: origin.to_string(),
            stream_key: "key".to_string(),
            price_cents: 990,
            starts_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips() {
        for s in [StreamStatus::Scheduled, StreamStatus::Live, StreamStatus::Ended] {
            assert_eq!(StreamStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(StreamStatus::parse("paused").is_err());
    }

    #[test]
    fn upstream_url_handles_trailing_slash() {
        let stream = stream_with_origin("http://origin.internal:8080/");
        assert_eq!(
            stream.upstream_hls_url("stream.m3u8"),
            "http://origin.internal:8080/hls/stream.m3u8"
        );
        let stream = stream_with_origin("http://origin.internal:8080");
        assert_eq!(
            stream.upstream_hls_url("0/seg-1.ts"),
            "http://origin.internal:8080/hls/0/seg-1.ts"
        );
    }

    #[test]
    fn secrets_never_serialized() {
        let stream = stream_with_origin("http://origin.internal:8080");
        let json = serde_json::to_string(&stream).unwrap();
        assert!(!json.contains("origin.internal"));
        assert!(!json.contains("origin_base_url"));
        assert!(!json.contains("stream_key"));
    }
}
