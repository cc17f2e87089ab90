//! Coalesced, cached fetches against the private origin.
//!
//! For a live stream with N concurrent viewers a new segment appears every
//! few seconds; proxying naively would issue N origin fetches per segment.
//! Grouping concurrent requests per upstream URL and keeping a short-TTL
//! cache reduces that to one fetch per segment, independent of N.

use std::time::Duration;

use async_singleflight::Group;
use bytes::Bytes;
use moka::future::Cache;
use thiserror::Error;

use crate::config::{CacheConfig, UpstreamConfig};

/// Content type assumed for segments when the origin does not report one.
pub const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Content type for HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Errors are shared between all coalesced waiters, so they are cloneable.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    BadStatus(u16),
    #[error("upstream fetch abandoned before completion")]
    Abandoned,
}

/// Bytes plus content type, as fetched from the origin.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Shared HTTP client with per-kind caches and in-flight coalescing.
pub struct UpstreamClient {
    client: reqwest::Client,
    playlists: Cache<String, FetchedBody>,
    segments: Cache<String, FetchedBody>,
    playlist_flight: Group<FetchedBody, UpstreamError>,
    segment_flight: Group<FetchedBody, UpstreamError>,
    segment_size_limit: u64,
}

impl UpstreamClient {
    pub fn new(upstream: &UpstreamConfig, cache: &CacheConfig) -> crate::Result<Self> {
        // Compression stays off: segments are already compressed media.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.http_timeout_seconds))
            .pool_max_idle_per_host(upstream.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(upstream.pool_idle_timeout_seconds))
            .build()
            .map_err(|e| crate::Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            playlists: Cache::builder()
                .time_to_live(Duration::from_secs(cache.playlist_ttl_seconds))
                .build(),
            segments: Cache::builder()
                .time_to_live(Duration::from_secs(cache.segment_ttl_seconds))
                .build(),
            playlist_flight: Group::new(),
            segment_flight: Group::new(),
            segment_size_limit: cache.segment_size_limit_bytes,
        })
    }

    /// Fetch a playlist, serving from cache or attaching to an in-flight
    /// fetch for the same URL.
    pub async fn fetch_playlist(&self, url: &str) -> Result<FetchedBody, UpstreamError> {
        let client = self.client.clone();
        let fetch_url = url.to_string();
        coalesced(
            &self.playlists,
            &self.playlist_flight,
            url,
            None,
            async move { fetch(&client, &fetch_url, PLAYLIST_CONTENT_TYPE).await },
        )
        .await
    }

    /// Fetch a segment; bodies above the size ceiling are served but not
    /// cached.
    pub async fn fetch_segment(&self, url: &str) -> Result<FetchedBody, UpstreamError> {
        let client = self.client.clone();
        let fetch_url = url.to_string();
        coalesced(
            &self.segments,
            &self.segment_flight,
            url,
            Some(self.segment_size_limit),
            async move { fetch(&client, &fetch_url, DEFAULT_SEGMENT_CONTENT_TYPE).await },
        )
        .await
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("segment_size_limit", &self.segment_size_limit)
            .finish()
    }
}

/// Cache-then-coalesce discipline shared by both fetch paths.
///
/// Exactly one fetch runs per key; every concurrent caller for that key
/// receives the same bytes or the same error. Successful results are cached
/// (subject to `size_limit`); failures cache nothing, so the next request
/// cycle retries naturally.
async fn coalesced<F>(
    cache: &Cache<String, FetchedBody>,
    flight: &Group<FetchedBody, UpstreamError>,
    url: &str,
    size_limit: Option<u64>,
    fetch: F,
) -> Result<FetchedBody, UpstreamError>
where
    F: std::future::Future<Output = Result<FetchedBody, UpstreamError>> + Send,
{
    if let Some(hit) = cache.get(url).await {
        return Ok(hit);
    }

    let key = url.to_string();
    let task_key = key.clone();
    let inner_cache = cache.clone();
    let (val, err, _is_leader) = flight
        .work(&key, async move {
            // Another waiter may have populated the cache while this task
            // queued behind the previous flight.
            if let Some(hit) = inner_cache.get(&task_key).await {
                return Ok(hit);
            }

            let body = fetch.await?;
            if size_limit.is_none_or(|limit| body.bytes.len() as u64 <= limit) {
                inner_cache.insert(task_key, body.clone()).await;
            }
            Ok(body)
        })
        .await;

    // None value with no error means the leading task was dropped before completing.
    match val {
        Some(body) => Ok(body),
        None => Err(err.unwrap_or(UpstreamError::Abandoned)),
    }
}

async fn fetch(
    client: &reqwest::Client,
    url: &str,
    default_content_type: &str,
) -> Result<FetchedBody, UpstreamError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(UpstreamError::BadStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| !ct.is_empty())
        .unwrap_or(default_content_type)
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    Ok(FetchedBody {
        bytes,
        content_type,
    })
}
