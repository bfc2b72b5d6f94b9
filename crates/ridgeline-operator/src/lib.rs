//! Ridgeline Operator - reconcile orchestration for platform clusters
//!
//! This crate contains the deployment control flow and the collaborators it
//! drives:
//! - [`Reconciler`]: the deploy/delete/watch state machine, serialized
//!   through the coordination store's distributed lock
//! - [`hooks`]: pre/post-upgrade lock hooks so external chart upgrades of
//!   the operator itself cannot race in-flight reconciles
//! - [`ChartInstaller`]: the chart install seam with its helm CLI
//!   implementation
//! - [`ConfigService`]: cluster records, DNS registration, and lifecycle
//!   notifications
//! - [`CertificateStore`]: polls the coordination store for the first
//!   issued ingress certificate

pub mod certificates;
pub mod config_service;
pub mod error;
pub mod helm;
pub mod hooks;
pub mod installer;
pub mod lb;
pub mod mock;
pub mod reconciler;
pub mod values;

pub use certificates::{Certificate, CertificateStore};
pub use config_service::{ConfigService, HttpConfigService, NotificationType};
pub use error::{OperatorError, Result};
pub use helm::{HelmClient, HelmRelease, ReleaseStatus, RepoAuth};
pub use hooks::{end_operator_deployment, start_operator_deployment};
pub use installer::{ChartInstaller, InstalledRelease};
pub use lb::{LoadBalancerLookup, NoLoadBalancerLookup};
pub use reconciler::Reconciler;
