//! Single-device enforcement for access tokens.
//!
//! A token is bound to the first device that heartbeats with it. A second
//! device is turned away while the first is still heartbeating, and may
//! take over once the binding has been silent for `heartbeat_timeout`.
//! The binding is advisory: playback authorization is the signature plus
//! session, so a client that stops heartbeating only loses takeover
//! protection.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::DeviceBinding;
use crate::session::SessionStore;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDecision {
    /// First device seen for this token.
    AcceptedNew,
    /// The bound device checking in again.
    AcceptedSame,
    /// Previous binding timed out; this device takes over.
    AcceptedTakeover,
    /// Another device is still active; retry after `wait`.
    Rejected { wait: Duration },
}

impl DeviceDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Pure device-binding decision.
pub fn evaluate_device(
    existing: Option<&DeviceBinding>,
    device_id: &str,
    now: DateTime<Utc>,
    heartbeat_timeout: Duration,
) -> DeviceDecision {
    let Some(binding) = existing else {
        return DeviceDecision::AcceptedNew;
    };

    if binding.device_id == device_id {
        return DeviceDecision::AcceptedSame;
    }

    let elapsed = (now - binding.last_seen)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if elapsed > heartbeat_timeout {
        DeviceDecision::AcceptedTakeover
    } else {
        DeviceDecision::Rejected {
            wait: heartbeat_timeout - elapsed,
        }
    }
}

/// Applies device decisions against the session store.
#[derive(Clone, Debug)]
pub struct DeviceGate {
    sessions: SessionStore,
    session_duration: Duration,
    heartbeat_timeout: Duration,
}

impl DeviceGate {
    #[must_use]
    pub const fn new(
        sessions: SessionStore,
        session_duration: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            session_duration,
            heartbeat_timeout,
        }
    }

    /// Validate a heartbeat's device claim and, when accepted, refresh the
    /// binding's `last_seen`.
    pub async fn validate(
        &self,
        token: &str,
        device_id: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<DeviceDecision> {
        let existing = self.sessions.device(token).await?;
        let now = Utc::now();
        let decision = evaluate_device(existing.as_ref(), device_id, now, self.heartbeat_timeout);

        if decision.is_allowed() {
            let binding = DeviceBinding {
                device_id: device_id.to_string(),
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                last_seen: now,
            };
            self.sessions
                .put_device(token, &binding, self.session_duration)
                .await?;
        }

        Ok(decision)
    }
}
