//! Ridgeline Coord - coordination store client and distributed locking
//!
//! This crate provides:
//! - **KV/session client**: Typed operations against the consistent key-value
//!   store that backs cluster-level coordination (keys, sessions, conditional
//!   writes)
//! - **Distributed lock**: Session-scoped mutual exclusion with polling
//!   acquisition, expiry detection, and guaranteed cleanup
//! - **Mock store**: In-memory store with session TTLs and fault injection
//!   for tests
//!
//! The store enforces at most one session holding the acquire flag on a key;
//! everything above that (polling, timeouts, lock-delay handling, expiry
//! accounting) lives in [`DistributedLock`].

pub mod error;
pub mod http;
pub mod kv;
pub mod lock;
pub mod mock;

pub use error::{CoordError, Result};
pub use http::HttpKvStore;
pub use kv::{
    KvEntry, KvStore, MIN_SESSION_TTL, PutOptions, SessionBehavior, SessionConfig, SessionInfo,
};
pub use lock::{DistributedLock, HeldLock, LockOptions};
pub use mock::{MockKvStore, OperationCounts};
