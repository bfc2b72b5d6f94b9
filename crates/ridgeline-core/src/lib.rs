//! Ridgeline Core - Core types and configuration for the platform operator
//!
//! This crate provides the foundational types used throughout Ridgeline:
//! - `Config`: Operator configuration loaded from the environment
//! - `PlatformSpec`: The platform custom resource specification
//! - `PlatformConfig`: The validated, fully resolved deployment configuration
//! - `ClusterDescriptor`: The cluster record served by the config service

pub mod config;
pub mod error;
pub mod platform;

pub use config::{ChartNames, ChartVersions, Config, ReleaseNames};
pub use error::{CoreError, Result};
pub use platform::{
    ClusterDescriptor, DnsConfig, DnsRecord, DockerConfig, HelmRepo, IngressEndpoint,
    IngressServiceType, LoadBalancerDescriptor, Metadata, PlatformBody, PlatformConfig,
    PlatformSpec, StorageConfig, StorageDriverConfig,
};
