//! Distributed locking on top of the coordination store
//!
//! A lock is a KV key plus a session holding the acquire flag on it; the
//! store guarantees at most one holder per key. [`DistributedLock`] adds the
//! protocol around that primitive: polling acquisition with a deadline,
//! expiry accounting for the critical section, and cleanup that never masks
//! the section's own error.
//!
//! Sessions are not renewed mid-section. Critical sections must be
//! time-bounded by design; a section that outlives its TTL surfaces
//! [`CoordError::SessionExpired`] because its work is no longer guaranteed
//! exclusive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::{CoordError, Result};
use crate::kv::{KvStore, PutOptions, SessionConfig};

/// Pause between retries of non-polling store calls
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Parameters for one lock acquisition
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Session TTL; bounds how long the critical section may run
    pub ttl: Duration,
    /// Store-enforced grace period after session invalidation before the key
    /// becomes acquirable again
    pub lock_delay: Option<Duration>,
    /// Pause between acquisition attempts
    pub poll_interval: Duration,
    /// Overall acquisition deadline; `None` polls forever
    pub timeout: Option<Duration>,
}

impl LockOptions {
    pub fn new(ttl: Duration) -> LockOptions {
        LockOptions {
            ttl,
            lock_delay: None,
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

/// A successfully acquired lock
#[derive(Debug, Clone)]
pub struct HeldLock {
    pub session_id: String,
    pub acquired_at: Instant,
}

/// Scoped mutual exclusion across every process sharing the same store
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>) -> DistributedLock {
        DistributedLock { store }
    }

    /// Acquire the lock on `key`, polling until the deadline.
    ///
    /// Transport errors on session creation or the conditional put are
    /// transient: the attempt is repeated on the next poll, still within the
    /// overall deadline. The returned session stays alive until destroyed or
    /// until its TTL elapses.
    pub async fn acquire(&self, key: &str, value: &[u8], options: &LockOptions) -> Result<HeldLock> {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut session: Option<String> = None;

        let result = loop {
            if session.is_none() {
                let config = SessionConfig {
                    ttl: options.ttl,
                    lock_delay: options.lock_delay,
                    name: String::new(),
                    behavior: None,
                };
                match self.store.create_session(&config).await {
                    Ok(session_id) => {
                        debug!("session '{session_id}' created");
                        session = Some(session_id);
                    }
                    Err(error) if error.is_transient() => {
                        warn!("session creation failed, retrying: {error}");
                        if !pause(deadline, options.poll_interval).await {
                            break Err(CoordError::LockAcquisition { key: key.to_string() });
                        }
                        continue;
                    }
                    Err(error) => break Err(error),
                }
            }

            if let Some(session_id) = &session {
                match self.store.put(key, value, PutOptions::acquire(session_id)).await {
                    Ok(true) => {
                        info!("lock ('{session_id}', '{key}') acquired");
                        break Ok(HeldLock {
                            session_id: session_id.clone(),
                            acquired_at: Instant::now(),
                        });
                    }
                    Ok(false) => debug!("lock ('{session_id}', '{key}') was not acquired"),
                    Err(error) if error.is_transient() => {
                        warn!("lock attempt on '{key}' failed, retrying: {error}")
                    }
                    Err(error) => break Err(error),
                }
            }

            if !pause(deadline, options.poll_interval).await {
                break Err(CoordError::LockAcquisition { key: key.to_string() });
            }
        };

        if result.is_err()
            && let Some(session_id) = session
        {
            let _ = self.store.destroy_session(&session_id).await;
        }
        result
    }

    /// Run `section` under the lock on `key`.
    ///
    /// The session is always destroyed afterwards, whatever the section did.
    /// Error precedence: the section's own error, then
    /// [`CoordError::SessionExpired`] when the section outlived the TTL, then
    /// [`CoordError::LockRelease`] when cleanup itself failed.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        value: &[u8],
        options: &LockOptions,
        section: F,
    ) -> std::result::Result<T, E>
    where
        E: From<CoordError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let held = self.acquire(key, value, options).await?;
        let outcome = section().await;

        let elapsed = held.acquired_at.elapsed();
        let expired = elapsed >= options.ttl;
        if expired {
            warn!(
                "lock ('{}', '{key}') expired: held for {elapsed:?} with a {:?} ttl",
                held.session_id, options.ttl
            );
        }

        let cleanup = self.cleanup(key, value, &held.session_id).await;

        match outcome {
            Err(error) => Err(error),
            Ok(_) if expired => Err(E::from(CoordError::SessionExpired {
                key: key.to_string(),
                session: held.session_id,
            })),
            Ok(value) => {
                cleanup?;
                Ok(value)
            }
        }
    }

    /// Release the key and destroy the session.
    ///
    /// The release put keeps the key immediately acquirable (no lock-delay);
    /// its failure is logged but only a failed session destroy is an error.
    async fn cleanup(&self, key: &str, value: &[u8], session_id: &str) -> std::result::Result<(), CoordError> {
        match self.store.put(key, value, PutOptions::release(session_id)).await {
            Ok(true) => debug!("lock ('{session_id}', '{key}') released"),
            Ok(false) => warn!("lock ('{session_id}', '{key}') was not released cleanly"),
            Err(error) => warn!("failed to release lock ('{session_id}', '{key}'): {error}"),
        }
        match self.store.destroy_session(session_id).await {
            Ok(true) => {
                debug!("session '{session_id}' destroyed");
                Ok(())
            }
            Ok(false) => {
                warn!("failed to destroy session '{session_id}'");
                Err(CoordError::LockRelease {
                    key: key.to_string(),
                    session: session_id.to_string(),
                })
            }
            Err(error) => {
                warn!("failed to destroy session '{session_id}': {error}");
                Err(CoordError::LockRelease {
                    key: key.to_string(),
                    session: session_id.to_string(),
                })
            }
        }
    }

    /// Verify-and-release: release the lock on `key` only while it still
    /// carries `expected` as its value.
    ///
    /// A differing value means a newer deployment took the key over after
    /// this holder's session expired; releasing it would destroy someone
    /// else's lock, so the call is a no-op. An absent key means the lock was
    /// already cleaned up and counts as success.
    pub async fn release_expected(
        &self,
        key: &str,
        expected: &[u8],
        session_id: &str,
    ) -> Result<()> {
        let entry = loop {
            match self.store.get(key, false).await {
                Ok(mut entries) => {
                    break if entries.is_empty() { None } else { Some(entries.swap_remove(0)) };
                }
                Err(error) if error.is_not_found() => break None,
                Err(error) if error.is_transient() => {
                    warn!("failed to read lock key '{key}', retrying: {error}");
                    sleep(RETRY_INTERVAL).await;
                }
                Err(error) => return Err(error),
            }
        };
        let Some(entry) = entry else {
            return self.forget_session(key, session_id).await;
        };

        if entry.value.as_deref() != Some(expected) {
            info!("lock '{key}' is held by another deployment, leaving it");
            return Ok(());
        }

        let holder = match entry.session.as_deref().filter(|holder| !holder.is_empty()) {
            Some(holder) => holder.to_string(),
            // The holding session already went away; only ours is left over.
            None => return self.forget_session(key, session_id).await,
        };

        match self.store.put(key, expected, PutOptions::release(&holder)).await {
            Ok(true) => info!("lock ('{holder}', '{key}') released"),
            Ok(false) => warn!("failed to release lock ('{holder}', '{key}')"),
            Err(error) => warn!("failed to release lock ('{holder}', '{key}'): {error}"),
        }
        match self.store.destroy_session(&holder).await {
            Ok(true) => info!("session '{holder}' destroyed"),
            Ok(false) => warn!("failed to destroy session '{holder}'"),
            Err(error) => warn!("failed to destroy session '{holder}': {error}"),
        }
        Ok(())
    }

    async fn forget_session(&self, key: &str, session_id: &str) -> Result<()> {
        debug!("lock '{key}' is already released");
        let _ = self.store.destroy_session(session_id).await;
        Ok(())
    }
}

/// Sleep one poll interval, unless that would overshoot the deadline.
async fn pause(deadline: Option<Instant>, poll_interval: Duration) -> bool {
    if let Some(deadline) = deadline
        && Instant::now() + poll_interval > deadline
    {
        return false;
    }
    sleep(poll_interval).await;
    true
}
