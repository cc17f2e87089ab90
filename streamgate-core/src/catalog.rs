//! Time-bounded in-process cache over the stream table.
//!
//! The hot path resolves a stream on every playlist and segment request;
//! caching for a short window keeps the durable store out of that path.
//! Entries are eventually consistent with admin edits, which is acceptable
//! because the only edited field the hot path consumes (`status`) is
//! advisory; requests still require a valid signature and session.

use std::time::Duration;

use moka::future::Cache;

use crate::models::{Stream, StreamId};
use crate::repository::StreamRepository;
use crate::Result;

#[derive(Clone)]
pub struct StreamCatalog {
    streams: StreamRepository,
    by_id: Cache<StreamId, Stream>,
    by_slug: Cache<String, Stream>,
}

impl StreamCatalog {
    #[must_use]
    pub fn new(streams: StreamRepository, ttl: Duration) -> Self {
        Self {
            streams,
            by_id: Cache::builder().time_to_live(ttl).build(),
            by_slug: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub async fn get_by_id(&self, stream_id: &StreamId) -> Result<Option<Stream>> {
        if let Some(stream) = self.by_id.get(stream_id).await {
            return Ok(Some(stream));
        }

        let Some(stream) = self.streams.get_by_id(stream_id).await? else {
            return Ok(None);
        };
        self.by_id.insert(stream.id.clone(), stream.clone()).await;
        Ok(Some(stream))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Stream>> {
        if let Some(stream) = self.by_slug.get(slug).await {
            return Ok(Some(stream));
        }

        let Some(stream) = self.streams.get_by_slug(slug).await? else {
            return Ok(None);
        };
        self.by_slug.insert(stream.slug.clone(), stream.clone()).await;
        Ok(Some(stream))
    }
}

impl std::fmt::Debug for StreamCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCatalog").finish_non_exhaustive()
    }
}
