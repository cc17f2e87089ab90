use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{Stream, StreamId, StreamStatus},
    Result,
};

const STREAM_COLUMNS: &str = "id, slug, title, description, status, origin_base_url, \
                              stream_key, price_cents, starts_at, created_at";

/// Stream repository for database operations.
///
/// Stream rows are written by the admin component; this service only reads
/// them.
#[derive(Clone)]
pub struct StreamRepository {
    pool: PgPool,
}

impl StreamRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, stream_id: &StreamId) -> Result<Option<Stream>> {
        let row = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM streams WHERE id = $1"
        ))
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_stream).transpose()
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Stream>> {
        let row = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM streams WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_stream).transpose()
    }

    /// Streams visible in the public catalog (anything not yet ended).
    pub async fn list_public(&self) -> Result<Vec<Stream>> {
        let rows = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM streams
             WHERE status <> 'ended'
             ORDER BY starts_at NULLS LAST, created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_stream).collect()
    }
}

fn row_to_stream(row: PgRow) -> Result<Stream> {
    let status: String = row.try_get("status")?;
    Ok(Stream {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: StreamStatus::parse(status.trim())?,
        origin_base_url: row.try_get("origin_base_url")?,
        stream_key: row.try_get("stream_key")?,
        price_cents: row.try_get("price_cents")?,
        starts_at: row.try_get("starts_at")?,
        created_at: row.try_get("created_at")?,
    })
}
