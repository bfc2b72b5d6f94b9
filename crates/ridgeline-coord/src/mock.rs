//! Mock coordination store for testing
//!
//! Stores keys and sessions in memory, useful for unit tests without a
//! running store. Session TTLs and lock-delay windows are enforced against
//! the tokio clock, so tests can drive expiry with a paused runtime.
//!
//! Semantics mirror the real store where the lock protocol depends on them:
//! a clean `release=` put frees the key immediately, while session
//! invalidation (TTL expiry, or destruction while still holding) blocks
//! re-acquisition for the session's lock delay. Sessions created without a
//! lock delay get none here; the real store applies its own default.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{CoordError, Result};
use crate::kv::{KvEntry, KvStore, PutOptions, SessionConfig, SessionInfo};

/// Counts of store calls for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub puts: usize,
    pub deletes: usize,
    pub sessions_created: usize,
    pub sessions_destroyed: usize,
}

#[derive(Debug, Clone)]
struct KeyRecord {
    value: Vec<u8>,
    session: Option<String>,
    modify_index: u64,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    name: String,
    expires_at: Instant,
    lock_delay: Duration,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, KeyRecord>,
    sessions: HashMap<String, SessionRecord>,
    /// Keys blocked from acquisition until the instant, by lock delay
    blocked_until: HashMap<String, Instant>,
    counts: OperationCounts,
    fail_gets: usize,
    fail_puts: usize,
    fail_session_creations: usize,
    fail_session_destroys: usize,
    next_session: u64,
    next_index: u64,
    unreachable: bool,
}

impl Inner {
    /// Invalidate expired sessions and release the keys they held.
    fn prune(&mut self, now: Instant) {
        let expired: Vec<(String, SessionRecord)> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.expires_at <= now)
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();
        for (id, session) in expired {
            self.sessions.remove(&id);
            self.invalidate_holder(&id, session.expires_at + session.lock_delay);
        }
    }

    fn invalidate_holder(&mut self, session_id: &str, blocked_until: Instant) {
        let held: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, record)| record.session.as_deref() == Some(session_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in held {
            if let Some(record) = self.keys.get_mut(&key) {
                record.session = None;
            }
            self.blocked_until.insert(key, blocked_until);
        }
    }

    fn entry(&self, key: &str, record: &KeyRecord) -> KvEntry {
        KvEntry {
            key: key.to_string(),
            value: Some(record.value.clone()),
            session: record.session.clone(),
            modify_index: record.modify_index,
        }
    }
}

/// In-memory coordination store for testing
#[derive(Clone, Default)]
pub struct MockKvStore {
    inner: Arc<RwLock<Inner>>,
}

impl MockKvStore {
    /// Create a new empty store
    pub fn new() -> MockKvStore {
        MockKvStore::default()
    }

    /// Seed a plain (unlocked) key
    pub fn insert(&self, key: &str, value: &[u8]) {
        let mut inner = self.inner.write().unwrap();
        inner.next_index += 1;
        let record = KeyRecord {
            value: value.to_vec(),
            session: None,
            modify_index: inner.next_index,
        };
        inner.keys.insert(key.to_string(), record);
    }

    /// Get call counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.inner.read().unwrap().counts.clone()
    }

    /// Number of currently live sessions
    pub fn session_count(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        inner.prune(Instant::now());
        inner.sessions.len()
    }

    /// Make the next `n` get calls fail with a transport error
    pub fn fail_gets(&self, n: usize) {
        self.inner.write().unwrap().fail_gets = n;
    }

    /// Make the next `n` put calls fail with a transport error
    pub fn fail_puts(&self, n: usize) {
        self.inner.write().unwrap().fail_puts = n;
    }

    /// Make the next `n` session creations fail with a transport error
    pub fn fail_session_creations(&self, n: usize) {
        self.inner.write().unwrap().fail_session_creations = n;
    }

    /// Make the next `n` session destroys fail with a transport error
    pub fn fail_session_destroys(&self, n: usize) {
        self.inner.write().unwrap().fail_session_destroys = n;
    }

    /// Make `wait_ready` hang forever, as an unreachable store would
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.write().unwrap().unreachable = unreachable;
    }
}

fn check_faults(counter: &mut usize) -> Result<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(CoordError::Transport("injected failure".to_string()));
    }
    Ok(())
}

#[async_trait]
impl KvStore for MockKvStore {
    async fn get(&self, key: &str, recurse: bool) -> Result<Vec<KvEntry>> {
        let mut inner = self.inner.write().unwrap();
        inner.prune(Instant::now());
        inner.counts.gets += 1;
        check_faults(&mut inner.fail_gets)?;

        if recurse {
            let mut entries: Vec<KvEntry> = inner
                .keys
                .iter()
                .filter(|(stored, _)| stored.starts_with(key))
                .map(|(stored, record)| inner.entry(stored, record))
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            if entries.is_empty() {
                return Err(CoordError::KeyNotFound { key: key.to_string() });
            }
            return Ok(entries);
        }

        match inner.keys.get(key) {
            Some(record) => Ok(vec![inner.entry(key, record)]),
            None => Err(CoordError::KeyNotFound { key: key.to_string() }),
        }
    }

    async fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.write().unwrap();
        inner.prune(Instant::now());
        inner.counts.gets += 1;
        check_faults(&mut inner.fail_gets)?;
        inner
            .keys
            .get(key)
            .map(|record| record.value.clone())
            .ok_or_else(|| CoordError::KeyNotFound { key: key.to_string() })
    }

    async fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().unwrap();
        inner.prune(now);
        inner.counts.puts += 1;
        check_faults(&mut inner.fail_puts)?;

        if let Some(session_id) = &options.acquire {
            if !inner.sessions.contains_key(session_id) {
                return Err(CoordError::Status {
                    status: 500,
                    message: format!("invalid session '{session_id}'"),
                });
            }
            if inner.blocked_until.get(key).is_some_and(|blocked| now < *blocked) {
                return Ok(false);
            }
            let held_by_other = inner
                .keys
                .get(key)
                .and_then(|record| record.session.as_deref())
                .is_some_and(|holder| holder != session_id);
            if held_by_other {
                return Ok(false);
            }
            inner.next_index += 1;
            let record = KeyRecord {
                value: value.to_vec(),
                session: Some(session_id.clone()),
                modify_index: inner.next_index,
            };
            inner.keys.insert(key.to_string(), record);
            return Ok(true);
        }

        if let Some(session_id) = &options.release {
            if !inner.sessions.contains_key(session_id) {
                return Err(CoordError::Status {
                    status: 500,
                    message: format!("invalid session '{session_id}'"),
                });
            }
            let holds = inner
                .keys
                .get(key)
                .is_some_and(|record| record.session.as_deref() == Some(session_id));
            if !holds {
                return Ok(false);
            }
            inner.next_index += 1;
            let record = KeyRecord {
                value: value.to_vec(),
                session: None,
                modify_index: inner.next_index,
            };
            inner.keys.insert(key.to_string(), record);
            return Ok(true);
        }

        inner.next_index += 1;
        let session = inner.keys.get(key).and_then(|record| record.session.clone());
        let record =
            KeyRecord { value: value.to_vec(), session, modify_index: inner.next_index };
        inner.keys.insert(key.to_string(), record);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        inner.counts.deletes += 1;
        inner.keys.remove(key);
        Ok(true)
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<String> {
        config.validate()?;
        let now = Instant::now();
        let mut inner = self.inner.write().unwrap();
        inner.prune(now);
        inner.counts.sessions_created += 1;
        check_faults(&mut inner.fail_session_creations)?;

        inner.next_session += 1;
        let session_id = format!("session-{}", inner.next_session);
        let record = SessionRecord {
            name: config.name.clone(),
            expires_at: now + config.ttl,
            lock_delay: config.lock_delay.unwrap_or(Duration::ZERO),
        };
        inner.sessions.insert(session_id.clone(), record);
        Ok(session_id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().unwrap();
        inner.prune(now);
        inner.counts.sessions_destroyed += 1;
        check_faults(&mut inner.fail_session_destroys)?;

        match inner.sessions.remove(session_id) {
            Some(session) => {
                inner.invalidate_holder(session_id, now + session.lock_delay);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let mut inner = self.inner.write().unwrap();
        inner.prune(Instant::now());
        let mut sessions: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .map(|(id, record)| SessionInfo { id: id.clone(), name: record.name.clone() })
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    async fn wait_ready(&self, _poll_interval: Duration) -> Result<()> {
        let unreachable = self.inner.read().unwrap().unreachable;
        if unreachable {
            return std::future::pending().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let store = MockKvStore::new();

        assert!(store.put("key/1", b"value1", PutOptions::default()).await.unwrap());
        let entries = store.get("key/1", false).await.unwrap();
        assert_eq!(entries[0].value.as_deref(), Some(b"value1".as_slice()));

        assert!(store.put("key/2", b"value2", PutOptions::default()).await.unwrap());
        let entries = store.get("key", true).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "key/1");
        assert_eq!(entries[1].key, "key/2");

        assert_eq!(store.get_raw("key/2").await.unwrap(), b"value2");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MockKvStore::new();
        assert!(store.get("missing", false).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn acquire_is_exclusive_between_sessions() {
        let store = MockKvStore::new();
        let first = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();
        let second = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();

        assert!(store.put("lock", b"a", PutOptions::acquire(&first)).await.unwrap());
        assert!(!store.put("lock", b"b", PutOptions::acquire(&second)).await.unwrap());
        // Re-acquire by the holder is allowed.
        assert!(store.put("lock", b"a", PutOptions::acquire(&first)).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_holding_session() {
        let store = MockKvStore::new();
        let holder = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();
        let other = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();

        assert!(store.put("lock", b"v", PutOptions::acquire(&holder)).await.unwrap());
        assert!(!store.put("lock", b"v", PutOptions::release(&other)).await.unwrap());
        assert!(store.put("lock", b"v", PutOptions::release(&holder)).await.unwrap());

        let entries = store.get("lock", false).await.unwrap();
        assert!(entries[0].session.is_none());
    }

    #[tokio::test]
    async fn invalid_session_is_a_store_error() {
        let store = MockKvStore::new();
        let error = store.put("lock", b"v", PutOptions::acquire("ghost")).await.unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn session_expiry_releases_keys_after_lock_delay() {
        let store = MockKvStore::new();
        let mut config = SessionConfig::new(Duration::from_secs(10));
        config.lock_delay = Some(Duration::from_secs(2));
        let holder = store.create_session(&config).await.unwrap();
        assert!(store.put("lock", b"v", PutOptions::acquire(&holder)).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.session_count(), 0);
        let entries = store.get("lock", false).await.unwrap();
        assert!(entries[0].session.is_none());

        // Still inside the lock-delay window (expiry at 10s + 2s delay).
        let second = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();
        assert!(!store.put("lock", b"v", PutOptions::acquire(&second)).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.put("lock", b"v", PutOptions::acquire(&second)).await.unwrap());
    }

    #[tokio::test]
    async fn destroying_holder_applies_lock_delay() {
        let store = MockKvStore::new();
        let mut config = SessionConfig::new(Duration::from_secs(10));
        config.lock_delay = Some(Duration::from_secs(5));
        let holder = store.create_session(&config).await.unwrap();
        assert!(store.put("lock", b"v", PutOptions::acquire(&holder)).await.unwrap());

        assert!(store.destroy_session(&holder).await.unwrap());

        let second = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();
        assert!(!store.put("lock", b"v", PutOptions::acquire(&second)).await.unwrap());
    }

    #[tokio::test]
    async fn clean_release_frees_key_immediately() {
        let store = MockKvStore::new();
        let mut config = SessionConfig::new(Duration::from_secs(10));
        config.lock_delay = Some(Duration::from_secs(5));
        let holder = store.create_session(&config).await.unwrap();
        assert!(store.put("lock", b"v", PutOptions::acquire(&holder)).await.unwrap());

        assert!(store.put("lock", b"v", PutOptions::release(&holder)).await.unwrap());
        assert!(store.destroy_session(&holder).await.unwrap());

        let second = store.create_session(&SessionConfig::new(Duration::from_secs(10))).await.unwrap();
        assert!(store.put("lock", b"v", PutOptions::acquire(&second)).await.unwrap());
    }

    #[tokio::test]
    async fn fault_injection_and_counts() {
        let store = MockKvStore::new();
        store.fail_puts(1);

        assert!(store.put("key", b"v", PutOptions::default()).await.unwrap_err().is_transient());
        assert!(store.put("key", b"v", PutOptions::default()).await.unwrap());

        let counts = store.operation_counts();
        assert_eq!(counts.puts, 2);
    }

    #[tokio::test]
    async fn list_sessions_reports_live_sessions() {
        let store = MockKvStore::new();
        let mut config = SessionConfig::new(Duration::from_secs(10));
        config.name = "test".to_string();
        let session_id = store.create_session(&config).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert!(sessions.iter().any(|s| s.id == session_id && s.name == "test"));

        assert!(store.destroy_session(&session_id).await.unwrap());
        assert!(!store.destroy_session(&session_id).await.unwrap());
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
