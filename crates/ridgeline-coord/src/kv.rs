//! Typed key-value and session operations
//!
//! [`KvStore`] is the seam between the lock protocol and the store transport.
//! Implementations must not retry on their own: retry policy belongs to the
//! caller (the lock's polling loop, or the orchestrator).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::error::{CoordError, Result};

/// Smallest session TTL the store accepts
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(10);

/// One stored key-value record
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvEntry {
    pub key: String,
    /// Raw value bytes; base64-encoded on the wire
    #[serde(default, deserialize_with = "deserialize_base64")]
    pub value: Option<Vec<u8>>,
    /// Session currently holding the acquire flag, if any
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub modify_index: u64,
}

fn deserialize_base64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<u8>>, D::Error> {
    use base64::Engine;
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
}

/// A session record as reported by the store
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default, rename = "Name")]
    pub name: String,
}

/// What the store does with held locks when a session is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Locks are released, keys are kept
    Release,
    /// Keys held by the session are deleted
    Delete,
}

impl SessionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }
}

/// Parameters for session creation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub lock_delay: Option<Duration>,
    pub name: String,
    pub behavior: Option<SessionBehavior>,
}

impl SessionConfig {
    pub fn new(ttl: Duration) -> SessionConfig {
        SessionConfig { ttl, lock_delay: None, name: String::new(), behavior: None }
    }

    /// Reject invalid parameters before they reach the network.
    pub fn validate(&self) -> Result<()> {
        if self.ttl < MIN_SESSION_TTL {
            return Err(CoordError::SessionTtlTooShort { ttl: self.ttl });
        }
        if self.lock_delay.is_some_and(|delay| delay.is_zero()) {
            return Err(CoordError::InvalidLockDelay);
        }
        Ok(())
    }
}

/// Session qualification for a conditional write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub acquire: Option<String>,
    pub release: Option<String>,
}

impl PutOptions {
    pub fn acquire(session_id: impl Into<String>) -> PutOptions {
        PutOptions { acquire: Some(session_id.into()), release: None }
    }

    pub fn release(session_id: impl Into<String>) -> PutOptions {
        PutOptions { acquire: None, release: Some(session_id.into()) }
    }
}

/// Key-value coordination store operations
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key, or all keys under a prefix when `recurse` is set.
    /// Fails with [`CoordError::KeyNotFound`] when nothing matches.
    async fn get(&self, key: &str, recurse: bool) -> Result<Vec<KvEntry>>;

    /// Read the raw value bytes of a single key.
    async fn get_raw(&self, key: &str) -> Result<Vec<u8>>;

    /// Write a value. With `acquire`/`release` set this is a conditional
    /// write tied to the session; the returned bool reports whether the
    /// write succeeded under the requested session semantics.
    async fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<bool>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Create a session. The session's lifetime bounds the validity of any
    /// lock acquired through it.
    async fn create_session(&self, config: &SessionConfig) -> Result<String>;

    /// Destroy a session, releasing any locks it holds.
    async fn destroy_session(&self, session_id: &str) -> Result<bool>;

    /// List live sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>>;

    /// Wait until the store is able to serve session requests. Unbounded;
    /// callers bound it with their own timeout.
    async fn wait_ready(&self, poll_interval: Duration) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_rejects_short_ttl() {
        let config = SessionConfig::new(Duration::from_secs(9));
        assert!(matches!(config.validate(), Err(CoordError::SessionTtlTooShort { .. })));

        let config = SessionConfig::new(Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn session_config_rejects_zero_lock_delay() {
        let mut config = SessionConfig::new(Duration::from_secs(30));
        config.lock_delay = Some(Duration::ZERO);
        assert!(matches!(config.validate(), Err(CoordError::InvalidLockDelay)));

        config.lock_delay = Some(Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn kv_entry_decodes_base64_value() {
        let entry: KvEntry = serde_json::from_value(serde_json::json!({
            "Key": "platform",
            "Value": "cGxhdGZvcm0tb3BlcmF0b3ItMg==",
            "Session": "session-1",
            "ModifyIndex": 42,
        }))
        .unwrap();

        assert_eq!(entry.key, "platform");
        assert_eq!(entry.value.as_deref(), Some(b"platform-operator-2".as_slice()));
        assert_eq!(entry.session.as_deref(), Some("session-1"));
        assert_eq!(entry.modify_index, 42);
    }

    #[test]
    fn kv_entry_tolerates_null_value() {
        let entry: KvEntry = serde_json::from_value(serde_json::json!({
            "Key": "platform",
            "Value": null,
        }))
        .unwrap();

        assert!(entry.value.is_none());
        assert!(entry.session.is_none());
    }
}
