//! Redis-backed ephemeral state: sessions, device bindings, rate-limit
//! counters and per-stream presence.
//!
//! Key namespaces: `session:{token}`, `device:{token}`,
//! `ratelimit:{kind}:{id}`, `active_sessions:{stream_id}` (all under the
//! configured prefix). Redis applies TTLs authoritatively; in-process
//! caches elsewhere are reconstructable from here and the durable store.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use sha2::{Digest, Sha256};

use crate::models::{DeviceBinding, Session, StreamId};
use crate::Result;

// Atomic check-then-increment: a counter at or above the limit denies the
// request without incrementing; the first increment sets the window TTL.
static RATE_LIMIT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1])
        if current and tonumber(current) >= tonumber(ARGV[1]) then
            return 0
        end
        local result = redis.call('INCR', KEYS[1])
        if result == 1 then
            redis.call('EXPIRE', KEYS[1], ARGV[2])
        end
        return 1
        ",
    )
});

const RECOVERY_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct SessionStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl SessionStore {
    pub async fn connect(url: &str, key_prefix: String) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, key_prefix })
    }

    fn session_key(&self, token: &str) -> String {
        format!("{}session:{token}", self.key_prefix)
    }

    fn device_key(&self, token: &str) -> String {
        format!("{}device:{token}", self.key_prefix)
    }

    fn rate_limit_key(&self, kind: &str, identifier: &str) -> String {
        format!("{}ratelimit:{kind}:{identifier}", self.key_prefix)
    }

    fn presence_key(&self, stream_id: &StreamId) -> String {
        format!("{}active_sessions:{stream_id}", self.key_prefix)
    }

    // --- Sessions ---

    pub async fn put_session(&self, session: &Session, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(session)?;
        let _: () = conn
            .set_ex(self.session_key(&session.token), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn session(&self, token: &str) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.session_key(token)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn refresh_session(&self, token: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(self.session_key(token), ttl.as_secs() as i64).await?;
        Ok(())
    }

    /// Remove a token's session and device binding together, as done when a
    /// token is re-rolled.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[self.session_key(token), self.device_key(token)])
            .await?;
        Ok(())
    }

    // --- Device bindings ---

    pub async fn put_device(
        &self,
        token: &str,
        binding: &DeviceBinding,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(binding)?;
        let _: () = conn
            .set_ex(self.device_key(token), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn device(&self, token: &str) -> Result<Option<DeviceBinding>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.device_key(token)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // --- Rate limiting ---

    /// Returns whether the request is allowed; allowed requests consume one
    /// unit of the `(kind, identifier)` counter.
    pub async fn check_and_increment(
        &self,
        kind: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let allowed: i32 = RATE_LIMIT_SCRIPT
            .key(self.rate_limit_key(kind, identifier))
            .arg(limit)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }

    /// Combined recovery limit: per-email first, then per-IP, both within a
    /// one-hour window. The email is hashed so addresses never appear in
    /// store keys.
    pub async fn allow_recovery(
        &self,
        email: &str,
        ip: &str,
        per_email: u32,
        per_ip: u32,
    ) -> Result<bool> {
        let email_ok = self
            .check_and_increment("recover:email", &hash_email(email), per_email, RECOVERY_WINDOW)
            .await?;
        if !email_ok {
            return Ok(false);
        }
        self.check_and_increment("recover:ip", ip, per_ip, RECOVERY_WINDOW)
            .await
    }

    // --- Presence ---

    /// Record a heartbeat: the token counts as an active viewer until
    /// `now + ttl`.
    pub async fn touch_presence(
        &self,
        stream_id: &StreamId,
        token: &str,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let score = Utc::now().timestamp() + ttl.as_secs() as i64;
        let _: () = conn.zadd(self.presence_key(stream_id), token, score).await?;
        Ok(())
    }

    /// Current viewer count; members whose window has passed are evicted
    /// lazily on read.
    pub async fn active_viewers(&self, stream_id: &StreamId) -> Result<i64> {
        let mut conn = self.conn.clone();
        let key = self.presence_key(stream_id);
        let now = Utc::now().timestamp();
        let _: () = conn.zrembyscore(&key, "-inf", now).await?;
        let count: i64 = conn.zcard(&key).await?;
        Ok(count)
    }

    pub async fn remove_presence(&self, stream_id: &StreamId, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(self.presence_key(stream_id), token).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// SHA-256 of the email, first 16 bytes hex-encoded.
fn hash_email(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentId;

    #[test]
    fn email_hash_is_stable_and_opaque() {
        let a = hash_email("x@y");
        let b = hash_email("x@y");
        let c = hash_email("x@z");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(!a.contains('@'));
    }

    async fn store() -> SessionStore {
        SessionStore::connect("redis://127.0.0.1:6379", "streamgate-test:".to_string())
            .await
            .unwrap()
    }

    fn session(token: &str) -> Session {
        Session {
            token: token.to_string(),
            stream_id: StreamId::from_string("s1".to_string()),
            email: "x@y".to_string(),
            payment_id: PaymentId::new(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn session_round_trip_and_revoke() {
        let store = store().await;
        let s = session("tok-round-trip");

        store.put_session(&s, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.session(&s.token).await.unwrap(), Some(s.clone()));

        store.revoke(&s.token).await.unwrap();
        assert_eq!(store.session(&s.token).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn rate_limit_denies_over_limit() {
        let store = store().await;
        let id = crate::models::generate_id();

        for _ in 0..5 {
            assert!(store
                .check_and_increment("test", &id, 5, Duration::from_secs(60))
                .await
                .unwrap());
        }
        assert!(!store
            .check_and_increment("test", &id, 5, Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn presence_counts_and_expires() {
        let store = store().await;
        let stream_id = StreamId::new();

        store
            .touch_presence(&stream_id, "tok-a", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .touch_presence(&stream_id, "tok-b", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.active_viewers(&stream_id).await.unwrap(), 2);

        store.remove_presence(&stream_id, "tok-a").await.unwrap();
        assert_eq!(store.active_viewers(&stream_id).await.unwrap(), 1);
    }
}
