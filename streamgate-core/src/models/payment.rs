use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PaymentId, StreamId};

/// Provider reference recorded on synthetic payments created for
/// whitelisted emails.
pub const WHITELIST_PROVIDER_REF: &str = "whitelist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown payment status: {other}"
            ))),
        }
    }
}

/// A purchase of stream access.
///
/// `access_token` is the bearer credential; it is set exactly once when the
/// payment transitions to `completed` and re-rolled on recovery. It is never
/// serialized.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub stream_id: StreamId,
    pub email: String,
    pub amount_cents: i32,
    pub status: PaymentStatus,
    /// Gateway "stamp" identifying this payment to the provider, or
    /// [`WHITELIST_PROVIDER_REF`] for synthetic free-access records.
    pub provider_ref: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// A token is valid only while the owning payment is completed and
    /// its expiry has not passed.
    #[must_use]
    pub fn is_token_valid(&self) -> bool {
        self.status == PaymentStatus::Completed
            && self.token_expiry.is_some_and(|expiry| Utc::now() < expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn payment(status: PaymentStatus, expiry: Option<DateTime<Utc>>) -> Payment {
        Payment {
            id: PaymentId::new(),
            stream_id: StreamId::new(),
            email: "x@y".to_string(),
            amount_cents: 990,
            status,
            provider_ref: "stamp-1".to_string(),
            access_token: Some("deadbeef".to_string()),
            token_expiry: expiry,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_valid_requires_completed_and_unexpired() {
        let future = Some(Utc::now() + Duration::hours(1));
        let past = Some(Utc::now() - Duration::hours(1));

        assert!(payment(PaymentStatus::Completed, future).is_token_valid());
        assert!(!payment(PaymentStatus::Completed, past).is_token_valid());
        assert!(!payment(PaymentStatus::Completed, None).is_token_valid());
        assert!(!payment(PaymentStatus::Pending, future).is_token_valid());
        assert!(!payment(PaymentStatus::Refunded, future).is_token_valid());
    }

    #[test]
    fn access_token_never_serialized() {
        let p = payment(PaymentStatus::Completed, None);
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("deadbeef"));
        assert!(!json.contains("access_token"));
    }
}
