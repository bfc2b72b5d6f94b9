//! In-memory collaborators for testing the reconciler

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;

use ridgeline_core::{ClusterDescriptor, LoadBalancerDescriptor};

use crate::config_service::{ConfigService, NotificationType};
use crate::error::{OperatorError, Result};
use crate::installer::{ChartInstaller, InstalledRelease};
use crate::lb::LoadBalancerLookup;

/// A recorded chart install
#[derive(Debug, Clone, PartialEq)]
pub struct InstallCall {
    pub release_name: String,
    pub chart: String,
    pub values: serde_json::Value,
    pub version: Version,
}

/// In-memory chart installer
#[derive(Clone, Default)]
pub struct MockInstaller {
    installed: Arc<RwLock<HashMap<String, InstalledRelease>>>,
    installs: Arc<RwLock<Vec<InstallCall>>>,
    uninstalls: Arc<RwLock<Vec<String>>>,
    fail_installs: Arc<RwLock<usize>>,
}

impl MockInstaller {
    pub fn new() -> MockInstaller {
        MockInstaller::default()
    }

    /// Pre-register an installed release
    pub fn set_installed(&self, release_name: &str, chart: &str, values: serde_json::Value) {
        self.installed.write().unwrap().insert(
            release_name.to_string(),
            InstalledRelease { chart: chart.to_string(), values },
        );
    }

    /// Installs performed, in order
    pub fn installs(&self) -> Vec<InstallCall> {
        self.installs.read().unwrap().clone()
    }

    /// Uninstalls performed, in order
    pub fn uninstalls(&self) -> Vec<String> {
        self.uninstalls.read().unwrap().clone()
    }

    /// Make the next `n` installs fail
    pub fn fail_installs(&self, n: usize) {
        *self.fail_installs.write().unwrap() = n;
    }
}

#[async_trait]
impl ChartInstaller for MockInstaller {
    async fn install_or_upgrade(
        &self,
        release_name: &str,
        chart: &str,
        values: &serde_json::Value,
        version: &Version,
        _timeout: Duration,
    ) -> Result<()> {
        {
            let mut fail = self.fail_installs.write().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(OperatorError::Helm(format!(
                    "failed to upgrade release {release_name}"
                )));
            }
        }
        self.installs.write().unwrap().push(InstallCall {
            release_name: release_name.to_string(),
            chart: chart.to_string(),
            values: values.clone(),
            version: version.clone(),
        });
        let chart_name = chart.rsplit('/').next().unwrap_or(chart);
        self.installed.write().unwrap().insert(
            release_name.to_string(),
            InstalledRelease {
                chart: format!("{chart_name}-{version}"),
                values: values.clone(),
            },
        );
        Ok(())
    }

    async fn uninstall(&self, release_name: &str) -> Result<()> {
        self.uninstalls.write().unwrap().push(release_name.to_string());
        // Not installed is success.
        self.installed.write().unwrap().remove(release_name);
        Ok(())
    }

    async fn get_installed(&self, release_name: &str) -> Result<Option<InstalledRelease>> {
        Ok(self.installed.read().unwrap().get(release_name).cloned())
    }
}

/// In-memory config service
#[derive(Clone)]
pub struct MockConfigService {
    cluster: Arc<RwLock<ClusterDescriptor>>,
    patches: Arc<RwLock<Vec<serde_json::Value>>>,
    notifications: Arc<RwLock<Vec<NotificationType>>>,
    fail_get_cluster: Arc<RwLock<usize>>,
}

impl MockConfigService {
    pub fn new(cluster: ClusterDescriptor) -> MockConfigService {
        MockConfigService {
            cluster: Arc::new(RwLock::new(cluster)),
            patches: Arc::new(RwLock::new(Vec::new())),
            notifications: Arc::new(RwLock::new(Vec::new())),
            fail_get_cluster: Arc::new(RwLock::new(0)),
        }
    }

    /// Cluster patches received, in order
    pub fn patches(&self) -> Vec<serde_json::Value> {
        self.patches.read().unwrap().clone()
    }

    /// Notifications received, in order
    pub fn notifications(&self) -> Vec<NotificationType> {
        self.notifications.read().unwrap().clone()
    }

    /// Make the next `n` cluster reads fail
    pub fn fail_get_cluster(&self, n: usize) {
        *self.fail_get_cluster.write().unwrap() = n;
    }
}

#[async_trait]
impl ConfigService for MockConfigService {
    async fn get_cluster(&self, _cluster_name: &str, _token: &str) -> Result<ClusterDescriptor> {
        {
            let mut fail = self.fail_get_cluster.write().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(OperatorError::ConfigService("injected failure".to_string()));
            }
        }
        Ok(self.cluster.read().unwrap().clone())
    }

    async fn patch_cluster(
        &self,
        _cluster_name: &str,
        _token: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.patches.write().unwrap().push(payload.clone());
        Ok(())
    }

    async fn send_notification(
        &self,
        _cluster_name: &str,
        _token: &str,
        notification: NotificationType,
    ) -> Result<()> {
        self.notifications.write().unwrap().push(notification);
        Ok(())
    }
}

/// Lookup over a fixed set of load balancers
#[derive(Clone, Default)]
pub struct StaticLoadBalancerLookup {
    descriptors: Arc<RwLock<HashMap<String, LoadBalancerDescriptor>>>,
}

impl StaticLoadBalancerLookup {
    pub fn new() -> StaticLoadBalancerLookup {
        StaticLoadBalancerLookup::default()
    }

    pub fn add(&self, descriptor: LoadBalancerDescriptor) {
        self.descriptors
            .write()
            .unwrap()
            .insert(descriptor.dns_name.clone(), descriptor);
    }
}

#[async_trait]
impl LoadBalancerLookup for StaticLoadBalancerLookup {
    async fn find_by_dns_name(&self, dns_name: &str) -> Result<Option<LoadBalancerDescriptor>> {
        Ok(self.descriptors.read().unwrap().get(dns_name).cloned())
    }
}
