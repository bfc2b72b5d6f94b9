//! The chart installer collaborator
//!
//! The reconciler drives chart installs through this trait; the production
//! implementation shells out to the package manager CLI (see [`crate::helm`]).

use std::time::Duration;

use async_trait::async_trait;
use semver::Version;

use crate::error::Result;

/// A currently installed release, as observed on the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledRelease {
    /// Chart identifier in `<name>-<version>` form
    pub chart: String,
    /// The values the release was installed with
    pub values: serde_json::Value,
}

/// Chart install/uninstall operations
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install the chart, or upgrade it in place when the release exists.
    async fn install_or_upgrade(
        &self,
        release_name: &str,
        chart: &str,
        values: &serde_json::Value,
        version: &Version,
        timeout: Duration,
    ) -> Result<()>;

    /// Uninstall a release; a release that does not exist counts as success.
    async fn uninstall(&self, release_name: &str) -> Result<()>;

    /// Look up an installed release with its values, `None` when absent.
    async fn get_installed(&self, release_name: &str) -> Result<Option<InstalledRelease>>;
}
