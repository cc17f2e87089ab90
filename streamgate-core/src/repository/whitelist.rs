use sqlx::PgPool;

use crate::{models::StreamId, Result};

/// Read access to the per-stream email whitelist, maintained by the admin
/// component.
#[derive(Clone)]
pub struct WhitelistRepository {
    pool: PgPool,
}

impl WhitelistRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn contains(&self, stream_id: &StreamId, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM stream_whitelist WHERE stream_id = $1 AND email = $2
             )",
        )
        .bind(stream_id.as_str())
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
