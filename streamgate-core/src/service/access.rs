//! Token issuance and recovery.
//!
//! An access token is a 256-bit random value, hex-encoded, minted when a
//! payment completes (or a whitelisted email claims access) and re-rolled on
//! recovery. The durable payment row is the source of truth; the session
//! store mirrors it for the hot path.

use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::models::{
    payment::WHITELIST_PROVIDER_REF, Payment, PaymentId, PaymentStatus, Session, Stream, StreamId,
};
use crate::repository::{PaymentRepository, WhitelistRepository};
use crate::session::SessionStore;
use crate::Result;

/// A minted (or re-issued) access credential.
#[derive(Debug, Clone)]
pub struct GrantedAccess {
    pub token: String,
    pub stream_id: StreamId,
    pub payment_id: PaymentId,
}

/// Outcome of a payment-completed signal.
#[derive(Debug, Clone)]
pub enum PaymentConfirmation {
    /// Payment transitioned to completed; a fresh token was issued.
    Completed(GrantedAccess),
    /// Signal replayed after completion; the existing token still stands.
    AlreadyCompleted(GrantedAccess),
    /// No payable payment carries this reference.
    Unknown,
}

/// Outcome of a recovery request.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Recovered(GrantedAccess),
    /// No completed payment and no whitelist entry. Deliberately the same
    /// answer for unknown emails and unknown streams.
    NoPurchase,
    /// A purchase exists but its access window has closed.
    Expired,
}

#[derive(Clone)]
pub struct AccessService {
    payments: PaymentRepository,
    whitelist: WhitelistRepository,
    sessions: SessionStore,
    session_duration: Duration,
}

impl AccessService {
    #[must_use]
    pub const fn new(
        payments: PaymentRepository,
        whitelist: WhitelistRepository,
        sessions: SessionStore,
        session_duration: Duration,
    ) -> Self {
        Self {
            payments,
            whitelist,
            sessions,
            session_duration,
        }
    }

    /// Handle a payment-completed signal from the gateway collaborator,
    /// identified by the unique payment reference ("stamp").
    ///
    /// Idempotent: a replayed signal for a completed payment returns the
    /// already-issued token instead of re-rolling it.
    pub async fn confirm_payment(&self, provider_ref: &str) -> Result<PaymentConfirmation> {
        let Some(payment) = self.payments.get_by_provider_ref(provider_ref).await? else {
            return Ok(PaymentConfirmation::Unknown);
        };

        match (payment.status, payment.access_token.as_deref()) {
            (PaymentStatus::Completed, Some(token)) => {
                tracing::info!(payment_id = %payment.id, "Payment already completed");
                Ok(PaymentConfirmation::AlreadyCompleted(GrantedAccess {
                    token: token.to_string(),
                    stream_id: payment.stream_id,
                    payment_id: payment.id,
                }))
            }
            (PaymentStatus::Pending, _) | (PaymentStatus::Completed, None) => {
                let granted = self.issue_for(&payment).await?;
                tracing::info!(
                    payment_id = %granted.payment_id,
                    stream_id = %granted.stream_id,
                    "Payment completed, access token issued"
                );
                Ok(PaymentConfirmation::Completed(granted))
            }
            _ => Ok(PaymentConfirmation::Unknown),
        }
    }

    /// Mint a token for a payment and mirror it into the session store.
    async fn issue_for(&self, payment: &Payment) -> Result<GrantedAccess> {
        let token = generate_access_token();
        let expiry = Utc::now() + self.session_duration;

        self.payments.complete(&payment.id, &token, expiry).await?;
        self.create_session(&token, payment, expiry).await?;

        Ok(GrantedAccess {
            token,
            stream_id: payment.stream_id.clone(),
            payment_id: payment.id.clone(),
        })
    }

    /// Create a synthetic completed payment for a whitelisted email and
    /// issue its token.
    pub async fn grant_whitelisted(&self, stream: &Stream, email: &str) -> Result<GrantedAccess> {
        let token = generate_access_token();
        let expiry = Utc::now() + self.session_duration;

        let payment = Payment {
            id: PaymentId::new(),
            stream_id: stream.id.clone(),
            email: email.to_string(),
            amount_cents: 0,
            status: PaymentStatus::Completed,
            provider_ref: WHITELIST_PROVIDER_REF.to_string(),
            access_token: Some(token.clone()),
            token_expiry: Some(expiry),
            created_at: Utc::now(),
        };
        self.payments.create(&payment).await?;
        self.create_session(&token, &payment, expiry).await?;

        tracing::info!(
            stream_id = %stream.id,
            payment_id = %payment.id,
            "Whitelisted access granted"
        );

        Ok(GrantedAccess {
            token,
            stream_id: payment.stream_id,
            payment_id: payment.id,
        })
    }

    /// Recover access for `(stream, email)`: re-rolls the token (killing
    /// the previous one) and extends the expiry.
    pub async fn recover(&self, stream: &Stream, email: &str) -> Result<RecoveryOutcome> {
        let payment = match self.payments.latest_completed(email, &stream.id).await? {
            Some(payment) => payment,
            None => {
                if self.whitelist.contains(&stream.id, email).await? {
                    let granted = self.grant_whitelisted(stream, email).await?;
                    return Ok(RecoveryOutcome::Recovered(granted));
                }
                return Ok(RecoveryOutcome::NoPurchase);
            }
        };

        if payment
            .token_expiry
            .is_some_and(|expiry| Utc::now() > expiry)
        {
            return Ok(RecoveryOutcome::Expired);
        }

        let token = generate_access_token();
        let expiry = Utc::now() + self.session_duration;
        self.payments
            .replace_access_token(&payment.id, &token, expiry)
            .await?;

        // The previous token stops working everywhere: session, device
        // binding and presence entry all go.
        if let Some(old_token) = payment.access_token.as_deref() {
            self.sessions.revoke(old_token).await?;
            self.sessions
                .remove_presence(&payment.stream_id, old_token)
                .await?;
        }

        self.create_session(&token, &payment, expiry).await?;

        tracing::info!(
            payment_id = %payment.id,
            stream_id = %payment.stream_id,
            "Access token recovered"
        );

        Ok(RecoveryOutcome::Recovered(GrantedAccess {
            token,
            stream_id: payment.stream_id,
            payment_id: payment.id,
        }))
    }

    async fn create_session(
        &self,
        token: &str,
        payment: &Payment,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let session = Session {
            token: token.to_string(),
            stream_id: payment.stream_id.clone(),
            email: payment.email.clone(),
            payment_id: payment.id.clone(),
            expires_at,
        };
        self.sessions
            .put_session(&session, self.session_duration)
            .await
    }
}

impl std::fmt::Debug for AccessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessService")
            .field("session_duration", &self.session_duration)
            .finish()
    }
}

/// 256 bits from the OS RNG, hex-encoded.
#[must_use]
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
