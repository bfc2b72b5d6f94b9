//! Helm CLI implementation of the chart installer
//!
//! Releases are managed by shelling out to `helm`; values are piped in as
//! YAML on stdin so credentials never land in the argument list, and the
//! repository password is masked whenever a command line is logged.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{OperatorError, Result};
use crate::installer::{ChartInstaller, InstalledRelease};

/// Status of a helm release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

/// One release as reported by `helm list`
#[derive(Debug, Clone, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    pub status: ReleaseStatus,
}

/// Repository credentials passed to install commands
#[derive(Debug, Clone, Default)]
pub struct RepoAuth {
    pub username: String,
    pub password: String,
}

/// Accumulates helm command-line options with password masking for logs
#[derive(Debug, Clone, Default)]
struct HelmOptions {
    args: Vec<String>,
}

impl HelmOptions {
    fn value(mut self, name: &str, value: &str) -> HelmOptions {
        if !value.is_empty() {
            self.args.push(format!("--{name}"));
            self.args.push(value.to_string());
        }
        self
    }

    fn flag(mut self, name: &str, enabled: bool) -> HelmOptions {
        if enabled {
            self.args.push(format!("--{name}"));
        }
        self
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn masked(&self) -> String {
        let mut masked = Vec::with_capacity(self.args.len());
        let mut hide_next = false;
        for arg in &self.args {
            if hide_next {
                masked.push("*****".to_string());
                hide_next = false;
                continue;
            }
            hide_next = arg == "--password";
            masked.push(arg.clone());
        }
        masked.join(" ")
    }
}

/// Chart installer backed by the helm CLI
pub struct HelmClient {
    kube_context: String,
    namespace: String,
    repo_auth: RepoAuth,
}

impl HelmClient {
    pub fn new(namespace: impl Into<String>) -> HelmClient {
        HelmClient {
            kube_context: String::new(),
            namespace: namespace.into(),
            repo_auth: RepoAuth::default(),
        }
    }

    pub fn with_kube_context(mut self, kube_context: impl Into<String>) -> HelmClient {
        self.kube_context = kube_context.into();
        self
    }

    pub fn with_repo_auth(mut self, auth: RepoAuth) -> HelmClient {
        self.repo_auth = auth;
        self
    }

    fn global_options(&self) -> HelmOptions {
        HelmOptions::default()
            .value("kube-context", &self.kube_context)
            .value("namespace", &self.namespace)
    }

    async fn run(
        &self,
        subcommand: &[&str],
        options: &HelmOptions,
        input: Option<String>,
    ) -> Result<std::process::Output> {
        let mut command = Command::new("helm");
        command
            .args(subcommand)
            .args(options.args())
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| OperatorError::Helm(format!("failed to spawn helm: {e}")))?;
        if let Some(input) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| OperatorError::Helm(format!("failed to write values: {e}")))?;
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| OperatorError::Helm(format!("helm did not exit cleanly: {e}")))
    }

    /// Look up a release by exact name.
    pub async fn get_release(&self, release_name: &str) -> Result<Option<HelmRelease>> {
        let options = self
            .global_options()
            .value("filter", &format!("^{release_name}$"))
            .value("output", "json");
        debug!("running helm list {}", options.masked());

        let output = self.run(&["list"], &options, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("failed to list releases: {}", stderr.trim());
            return Err(OperatorError::Helm("failed to list releases".to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let releases: Vec<HelmRelease> = serde_json::from_str(stdout.trim())
            .map_err(|e| OperatorError::Helm(format!("unexpected helm list output: {e}")))?;
        Ok(releases.into_iter().next())
    }

    /// Read the values a release was installed with.
    pub async fn get_release_values(&self, release_name: &str) -> Result<Option<serde_json::Value>> {
        let options = self.global_options().value("output", "json");
        debug!("running helm get values {release_name} {}", options.masked());

        let output = self.run(&["get", "values", release_name], &options, None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            if stdout.contains("not found") {
                info!("release {release_name} not found");
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("failed to get values: {}", stderr.trim());
            return Err(OperatorError::Helm("failed to get values".to_string()));
        }
        let values = serde_json::from_str(stdout.trim())
            .map_err(|e| OperatorError::Helm(format!("unexpected helm values output: {e}")))?;
        Ok(Some(values))
    }

    /// Upgrade a release, installing it when missing.
    pub async fn upgrade(
        &self,
        release_name: &str,
        chart: &str,
        values: &serde_json::Value,
        version: Option<&Version>,
        install: bool,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let options = self
            .global_options()
            .value("version", &version.map(Version::to_string).unwrap_or_default())
            .value("values", "-")
            .flag("install", install)
            .flag("wait", wait)
            .value("timeout", &timeout.map(|t| format!("{}s", t.as_secs())).unwrap_or_default())
            .value("username", &self.repo_auth.username)
            .value("password", &self.repo_auth.password);
        info!("running helm upgrade {release_name} {chart} {}", options.masked());

        let values_yaml = serde_yaml::to_string(values)
            .map_err(|e| OperatorError::Helm(format!("failed to render values: {e}")))?;
        let output = self.run(&["upgrade", release_name, chart], &options, Some(values_yaml)).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("failed to upgrade release {release_name}: {}", stderr.trim());
            return Err(OperatorError::Helm(format!("failed to upgrade release {release_name}")));
        }
        info!("upgraded helm release {release_name}");
        Ok(())
    }

    /// Delete a release; already-deleted releases count as success.
    pub async fn delete(&self, release_name: &str, wait: bool) -> Result<()> {
        let options = self.global_options().flag("wait", wait);
        info!("running helm delete {release_name} {}", options.masked());

        let output = self.run(&["delete", release_name], &options, None).await?;
        if output.status.success() {
            info!("deleted helm release {release_name}");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") {
            info!("helm release {release_name} has already been deleted");
            return Ok(());
        }
        warn!("failed to delete helm release {release_name}: {}", stderr.trim());
        Err(OperatorError::Helm(format!("failed to delete release {release_name}")))
    }
}

#[async_trait]
impl ChartInstaller for HelmClient {
    async fn install_or_upgrade(
        &self,
        release_name: &str,
        chart: &str,
        values: &serde_json::Value,
        version: &Version,
        timeout: Duration,
    ) -> Result<()> {
        self.upgrade(release_name, chart, values, Some(version), true, true, Some(timeout)).await
    }

    async fn uninstall(&self, release_name: &str) -> Result<()> {
        self.delete(release_name, true).await
    }

    async fn get_installed(&self, release_name: &str) -> Result<Option<InstalledRelease>> {
        let Some(release) = self.get_release(release_name).await? else {
            return Ok(None);
        };
        let values = self
            .get_release_values(release_name)
            .await?
            .unwrap_or(serde_json::Value::Null);
        Ok(Some(InstalledRelease { chart: release.chart, values }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_skip_empty_values() {
        let options = HelmOptions::default()
            .value("kube-context", "")
            .value("namespace", "platform")
            .flag("install", true)
            .flag("wait", false);

        assert_eq!(options.args(), ["--namespace", "platform", "--install"]);
    }

    #[test]
    fn masked_hides_password() {
        let options = HelmOptions::default()
            .value("username", "helm")
            .value("password", "secret");

        assert_eq!(options.masked(), "--username helm --password *****");
        assert!(options.args().contains(&"secret".to_string()));
    }

    #[test]
    fn release_list_parsing() {
        let payload = r#"[{
            "name": "platform",
            "namespace": "platform",
            "chart": "platform-1.2.3",
            "status": "deployed"
        }]"#;
        let releases: Vec<HelmRelease> = serde_json::from_str(payload).unwrap();

        assert_eq!(releases[0].chart, "platform-1.2.3");
        assert_eq!(releases[0].status, ReleaseStatus::Deployed);
    }

    #[test]
    fn pending_statuses_parse() {
        let status: ReleaseStatus = serde_json::from_str("\"pending-install\"").unwrap();
        assert_eq!(status, ReleaseStatus::PendingInstall);
        let status: ReleaseStatus = serde_json::from_str("\"pending-rollback\"").unwrap();
        assert_eq!(status, ReleaseStatus::PendingRollback);
    }
}
