//! HMAC signing and verification of proxy URLs.
//!
//! A signed URL binds `(stream_id, token, path, expiry)` into one MAC, so
//! substituting any component invalidates the signature. Segment requests
//! are authorized by the signature alone, which keeps the hot path free of
//! store lookups.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::StreamId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing or malformed signature parameters")]
    Malformed,
    #[error("signature expired")]
    Expired,
    #[error("invalid signature")]
    Invalid,
}

/// Query parameters carried by a signed URL.
#[derive(Debug, Clone)]
pub struct SignedParams {
    pub token: String,
    pub expires: i64,
    pub sig: String,
}

impl SignedParams {
    /// Extract `token`, `expires` and `sig` from a parsed query string.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, SignatureError> {
        let token = query.get("token").filter(|t| !t.is_empty());
        let expires = query.get("expires").filter(|e| !e.is_empty());
        let sig = query.get("sig").filter(|s| !s.is_empty());

        let (Some(token), Some(expires), Some(sig)) = (token, expires, sig) else {
            return Err(SignatureError::Malformed);
        };

        let expires: i64 = expires.parse().map_err(|_| SignatureError::Malformed)?;

        Ok(Self {
            token: token.clone(),
            expires,
            sig: sig.clone(),
        })
    }
}

/// Signs and verifies stream URLs.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    validity: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("validity", &self.validity)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: &[u8], validity: Duration) -> crate::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| crate::Error::Internal(format!("Invalid signing secret: {e}")))?;
        Ok(Self { mac, validity })
    }

    /// Sign a proxy path for a token, valid for the configured window.
    ///
    /// Returns `{path}?token={t}&expires={e}&sig={hex}`.
    #[must_use]
    pub fn sign(&self, stream_id: &StreamId, token: &str, path: &str) -> String {
        let expires = Utc::now().timestamp() + self.validity.as_secs() as i64;
        self.sign_with_expiry(stream_id, token, path, expires)
    }

    /// Sign with an explicit expiry timestamp.
    #[must_use]
    pub fn sign_with_expiry(
        &self,
        stream_id: &StreamId,
        token: &str,
        path: &str,
        expires: i64,
    ) -> String {
        let sig = self.compute(stream_id, token, path, expires);
        format!("{path}?token={token}&expires={expires}&sig={sig}")
    }

    /// Verify a signed URL against the request path.
    ///
    /// Expiry is checked first; the MAC comparison is constant-time.
    pub fn verify(
        &self,
        stream_id: &StreamId,
        path: &str,
        params: &SignedParams,
    ) -> Result<(), SignatureError> {
        if Utc::now().timestamp() > params.expires {
            return Err(SignatureError::Expired);
        }

        let expected = self.compute(stream_id, &params.token, path, params.expires);
        if expected.as_bytes().ct_eq(params.sig.as_bytes()).into() {
            Ok(())
        } else {
            Err(SignatureError::Invalid)
        }
    }

    /// Parse the query parameters and verify in one step.
    pub fn verify_query(
        &self,
        stream_id: &StreamId,
        path: &str,
        query: &HashMap<String, String>,
    ) -> Result<SignedParams, SignatureError> {
        let params = SignedParams::from_query(query)?;
        self.verify(stream_id, path, &params)?;
        Ok(params)
    }

    // Signing string: {stream_id}:{token}:{path}:{expires}, literal ASCII,
    // path verbatim (not URL-decoded), colon as a fixed separator.
    fn compute(&self, stream_id: &StreamId, token: &str, path: &str, expires: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{stream_id}:{token}:{path}:{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new(b"0123456789abcdef0123456789abcdef", Duration::from_secs(3600)).unwrap()
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = signer();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/stream.m3u8";

        let url = signer.sign(&stream_id, "tok", path);
        assert!(url.starts_with(path));

        let params = SignedParams::from_query(&query_of(&url)).unwrap();
        assert_eq!(params.sig.len(), 64);
        assert!(signer.verify(&stream_id, path, &params).is_ok());
    }

    #[test]
    fn verify_rejects_after_expiry() {
        let signer = signer();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/seg-0.ts";

        let expired = Utc::now().timestamp() - 10;
        let url = signer.sign_with_expiry(&stream_id, "tok", path, expired);
        let params = SignedParams::from_query(&query_of(&url)).unwrap();

        assert_eq!(
            signer.verify(&stream_id, path, &params),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn verify_binds_every_component() {
        let signer = signer();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/stream.m3u8";

        let url = signer.sign(&stream_id, "tok", path);
        let params = SignedParams::from_query(&query_of(&url)).unwrap();

        // Different stream
        assert_eq!(
            signer.verify(&StreamId::from_string("s2".to_string()), path, &params),
            Err(SignatureError::Invalid)
        );

        // Different path
        assert_eq!(
            signer.verify(&stream_id, "/stream/s1/hls/secret.m3u8", &params),
            Err(SignatureError::Invalid)
        );

        // Different token
        let mut tampered = params.clone();
        tampered.token = "other".to_string();
        assert_eq!(
            signer.verify(&stream_id, path, &tampered),
            Err(SignatureError::Invalid)
        );

        // Different expiry
        let mut tampered = params.clone();
        tampered.expires += 1;
        assert_eq!(
            signer.verify(&stream_id, path, &tampered),
            Err(SignatureError::Invalid)
        );

        // Single flipped signature nibble
        let mut tampered = params.clone();
        let flipped = if tampered.sig.ends_with('0') { '1' } else { '0' };
        tampered.sig.pop();
        tampered.sig.push(flipped);
        assert_eq!(
            signer.verify(&stream_id, path, &tampered),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn missing_parameters_are_malformed() {
        let signer = signer();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/stream.m3u8";

        for missing in ["token", "expires", "sig"] {
            let url = signer.sign(&stream_id, "tok", path);
            let mut query = query_of(&url);
            query.remove(missing);
            assert_eq!(
                signer.verify_query(&stream_id, path, &query).unwrap_err(),
                SignatureError::Malformed
            );
        }

        let mut query = query_of(&signer.sign(&stream_id, "tok", path));
        query.insert("expires".to_string(), "not-a-number".to_string());
        assert_eq!(
            signer.verify_query(&stream_id, path, &query).unwrap_err(),
            SignatureError::Malformed
        );
    }

    #[test]
    fn different_secrets_disagree() {
        let a = signer();
        let b = UrlSigner::new(b"another-secret-another-secret-32", Duration::from_secs(3600))
            .unwrap();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/stream.m3u8";

        let url = a.sign(&stream_id, "tok", path);
        let params = SignedParams::from_query(&query_of(&url)).unwrap();
        assert_eq!(
            b.verify(&stream_id, path, &params),
            Err(SignatureError::Invalid)
        );
    }

    // Statistical sanity check, not a proof: verification time on wrong
    // signatures should not differ measurably from correct ones.
    #[test]
    #[ignore = "timing-sensitive; run manually"]
    fn verification_timing_is_flat() {
        use std::time::Instant;

        let signer = signer();
        let stream_id = StreamId::from_string("s1".to_string());
        let path = "/stream/s1/hls/stream.m3u8";
        let url = signer.sign(&stream_id, "tok", path);
        let good = SignedParams::from_query(&query_of(&url)).unwrap();
        let mut bad = good.clone();
        bad.sig = "0".repeat(64);

        let time = |params: &SignedParams| {
            let start = Instant::now();
            for _ in 0..10_000 {
                let _ = signer.verify(&stream_id, path, params);
            }
            start.elapsed().as_secs_f64()
        };

        // Warm up, then measure
        time(&good);
        let good_elapsed = time(&good);
        let bad_elapsed = time(&bad);

        let ratio = good_elapsed / bad_elapsed;
        assert!(
            (0.5..2.0).contains(&ratio),
            "verification time diverged: good={good_elapsed}s bad={bad_elapsed}s"
        );
    }
}
