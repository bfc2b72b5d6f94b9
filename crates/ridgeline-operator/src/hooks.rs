//! Deployment lock hooks bracketing operator chart upgrades
//!
//! The package manager can upgrade the operator chart while a previous
//! replica is still reconciling. These hooks run as the chart's pre- and
//! post-upgrade jobs and serialize through the same coordination lock the
//! reconciler uses, so an externally triggered upgrade cannot race in-flight
//! mutations. They deliberately do not touch the status manager: the lock is
//! the only shared state they coordinate on.
//!
//! The lock value encodes the deployment attempt (`"<release>-<revision>"`).
//! The post-upgrade hook releases by value, never by key alone: if the
//! session expired mid-upgrade and a newer deployment took the key over, the
//! stored value no longer matches and the stale hook leaves the lock alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use ridgeline_coord::{DistributedLock, KvStore, LockOptions};

use crate::error::Result;

/// Key the operator's own deployment lock lives under
pub const OPERATOR_LOCK_KEY: &str = "platform";
/// Release name encoded into the lock value
pub const OPERATOR_RELEASE_NAME: &str = "platform-operator";

/// How long to wait for the store before concluding it is not deployed yet
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Upgrade lock session TTL; bounds a wedged upgrade
const LOCK_TTL: Duration = Duration::from_secs(15 * 60);
/// How long an upgrade waits for its turn
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pre-upgrade hook: take the operator deployment lock.
///
/// Revision 1 means `install` rather than `upgrade`: the coordination store
/// ships with this chart and is not running yet, so there is nothing to
/// coordinate. The same applies while the store is unreachable; the package
/// manager already refuses to run two upgrades of one release in parallel,
/// so proceeding unlocked is safe there.
///
/// The acquired session is intentionally left alive when this process
/// exits; the post-upgrade hook releases it by value.
pub async fn start_operator_deployment(kv: Arc<dyn KvStore>, release_revision: u64) -> Result<()> {
    if release_revision <= 1 {
        return Ok(());
    }
    if !store_ready(&kv).await {
        return Ok(());
    }

    let mut options = LockOptions::new(LOCK_TTL);
    options.poll_interval = ACQUIRE_POLL_INTERVAL;
    options.timeout = Some(ACQUIRE_TIMEOUT);

    let lock = DistributedLock::new(kv);
    lock.acquire(OPERATOR_LOCK_KEY, &lock_value(release_revision), &options).await?;
    info!("operator deployment lock taken for revision {release_revision}");
    Ok(())
}

/// Post-upgrade hook: release the operator deployment lock.
///
/// The lock is released only while it still carries this revision's value;
/// an absent key, an already-released lock, or a value from another
/// deployment all count as success.
pub async fn end_operator_deployment(kv: Arc<dyn KvStore>, release_revision: u64) -> Result<()> {
    if release_revision <= 1 {
        return Ok(());
    }
    if !store_ready(&kv).await {
        return Ok(());
    }

    let expected = lock_value(release_revision);
    let entry = loop {
        match kv.get(OPERATOR_LOCK_KEY, false).await {
            Ok(mut entries) => {
                if entries.is_empty() {
                    return Ok(());
                }
                break entries.swap_remove(0);
            }
            Err(error) if error.is_not_found() => {
                info!("operator deployment lock is already gone");
                return Ok(());
            }
            Err(error) if error.is_transient() => {
                warn!("failed to read the operator deployment lock, retrying: {error}");
                sleep(READY_POLL_INTERVAL).await;
            }
            Err(error) => return Err(error.into()),
        }
    };

    if entry.value.as_deref() != Some(expected.as_slice()) {
        info!("operator deployment lock belongs to another deployment, leaving it");
        return Ok(());
    }
    let Some(session_id) = entry.session.filter(|id| !id.is_empty()) else {
        info!("operator deployment lock has already been released");
        return Ok(());
    };

    let lock = DistributedLock::new(kv);
    lock.release_expected(OPERATOR_LOCK_KEY, &expected, &session_id).await?;
    Ok(())
}

async fn store_ready(kv: &Arc<dyn KvStore>) -> bool {
    match timeout(READY_TIMEOUT, kv.wait_ready(READY_POLL_INTERVAL)).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            warn!("coordination store readiness check failed: {error}");
            false
        }
        Err(_) => {
            // Either the operator has not been deployed yet or the previous
            // deployment failed before the store came up.
            info!("coordination store is not reachable, nothing to coordinate");
            false
        }
    }
}

fn lock_value(release_revision: u64) -> Vec<u8> {
    format!("{OPERATOR_RELEASE_NAME}-{release_revision}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgeline_coord::{MockKvStore, PutOptions, SessionConfig};

    async fn hold_lock(store: &Arc<MockKvStore>, value: &[u8]) -> String {
        let session = store
            .create_session(&SessionConfig::new(Duration::from_secs(900)))
            .await
            .unwrap();
        assert!(store.put(OPERATOR_LOCK_KEY, value, PutOptions::acquire(&session)).await.unwrap());
        session
    }

    #[tokio::test(start_paused = true)]
    async fn first_install_is_a_noop() {
        let store = Arc::new(MockKvStore::new());

        start_operator_deployment(store.clone(), 1).await.unwrap();
        end_operator_deployment(store.clone(), 1).await.unwrap();

        let counts = store.operation_counts();
        assert_eq!(counts.sessions_created, 0);
        assert_eq!(counts.puts, 0);
        assert_eq!(counts.gets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_takes_the_lock() {
        let store = Arc::new(MockKvStore::new());

        start_operator_deployment(store.clone(), 2).await.unwrap();

        let entry = store.get(OPERATOR_LOCK_KEY, false).await.unwrap().remove(0);
        assert_eq!(entry.value.as_deref(), Some(b"platform-operator-2".as_slice()));
        assert!(entry.session.is_some());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_is_tolerated() {
        let store = Arc::new(MockKvStore::new());
        store.set_unreachable(true);

        start_operator_deployment(store.clone(), 2).await.unwrap();
        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.operation_counts().sessions_created, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn end_releases_matching_lock() {
        let store = Arc::new(MockKvStore::new());
        hold_lock(&store, b"platform-operator-2").await;

        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.session_count(), 0);
        let entry = store.get(OPERATOR_LOCK_KEY, false).await.unwrap().remove(0);
        assert!(entry.session.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn end_leaves_foreign_lock() {
        let store = Arc::new(MockKvStore::new());
        hold_lock(&store, b"cluster-config-updated").await;

        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.operation_counts().sessions_destroyed, 0);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn end_with_absent_key_succeeds() {
        let store = Arc::new(MockKvStore::new());

        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.operation_counts().sessions_destroyed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn end_with_released_lock_destroys_nothing() {
        let store = Arc::new(MockKvStore::new());
        let session = hold_lock(&store, b"platform-operator-2").await;
        assert!(
            store
                .put(OPERATOR_LOCK_KEY, b"platform-operator-2", PutOptions::release(&session))
                .await
                .unwrap()
        );

        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.operation_counts().sessions_destroyed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn end_retries_transient_reads() {
        let store = Arc::new(MockKvStore::new());
        hold_lock(&store, b"platform-operator-2").await;
        store.fail_gets(1);

        end_operator_deployment(store.clone(), 2).await.unwrap();

        assert_eq!(store.session_count(), 0);
    }
}
