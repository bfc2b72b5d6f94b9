//! Ridgeline Kube - Kubernetes integration for the platform operator
//!
//! This crate provides:
//! - **Cluster client**: Services, secrets, service accounts, pod draining,
//!   and the platform custom resource's status subresource
//! - **Status manager**: The platform deployment state machine persisted as
//!   the resource's externally visible status
//! - **Mocks**: In-memory status store and cluster operations for tests

pub mod client;
pub mod error;
pub mod mock;
pub mod status;

pub use client::{ClusterClient, ClusterOps, PLATFORM_GROUP, PLATFORM_PLURAL, PLATFORM_VERSION};
pub use error::{KubeError, Result};
pub use mock::{MockClusterOps, MockStatusStore, ServiceAccountUpdate, StatusCounts};
pub use status::{
    Condition, ConditionType, PlatformPhase, PlatformStatus, StatusManager, StatusStore,
};
