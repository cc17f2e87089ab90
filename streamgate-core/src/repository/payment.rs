use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{Payment, PaymentId, PaymentStatus, StreamId},
    Result,
};

const PAYMENT_COLUMNS: &str = "id, stream_id, email, amount_cents, status, provider_ref, \
                               access_token, token_expiry, created_at";

/// Payment repository.
///
/// The payment gateway collaborator creates pending rows; this service owns
/// the transition to `completed` and the access-token columns.
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments (id, stream_id, email, amount_cents, status, provider_ref,
                                   access_token, token_expiry, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(payment.id.as_str())
        .bind(payment.stream_id.as_str())
        .bind(&payment.email)
        .bind(payment.amount_cents)
        .bind(payment.status.as_str())
        .bind(&payment.provider_ref)
        .bind(payment.access_token.as_deref())
        .bind(payment.token_expiry)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_ref = $1"
        ))
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_payment).transpose()
    }

    pub async fn get_by_access_token(&self, token: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE access_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_payment).transpose()
    }

    /// Most recent completed payment for an email on one stream.
    pub async fn latest_completed(
        &self,
        email: &str,
        stream_id: &StreamId,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE email = $1 AND stream_id = $2 AND status = 'completed'
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(email)
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_payment).transpose()
    }

    /// Transition a pending payment to completed, issuing its token.
    pub async fn complete(
        &self,
        payment_id: &PaymentId,
        access_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE payments
             SET status = 'completed', access_token = $2, token_expiry = $3
             WHERE id = $1",
        )
        .bind(payment_id.as_str())
        .bind(access_token)
        .bind(token_expiry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the access token on an already-completed payment (recovery).
    pub async fn replace_access_token(
        &self,
        payment_id: &PaymentId,
        access_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE payments
             SET access_token = $2, token_expiry = $3
             WHERE id = $1",
        )
        .bind(payment_id.as_str())
        .bind(access_token)
        .bind(token_expiry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        stream_id: row.try_get("stream_id")?,
        email: row.try_get("email")?,
        amount_cents: row.try_get("amount_cents")?,
        status: PaymentStatus::parse(status.trim())?,
        provider_ref: row.try_get("provider_ref")?,
        access_token: row.try_get("access_token")?,
        token_expiry: row.try_get("token_expiry")?,
        created_at: row.try_get("created_at")?,
    })
}
