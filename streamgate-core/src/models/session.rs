use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PaymentId, StreamId};

/// Ephemeral viewing session, keyed by access token in the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub stream_id: StreamId,
    pub email: String,
    pub payment_id: PaymentId,
    pub expires_at: DateTime<Utc>,
}

/// The device currently bound to an access token.
///
/// At most one device is bound per token; a competitor may take over only
/// after the binding has gone `heartbeat_timeout` without a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_id: String,
    pub ip: String,
    pub user_agent: String,
    pub last_seen: DateTime<Utc>,
}
