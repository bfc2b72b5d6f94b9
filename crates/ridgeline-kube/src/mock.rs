//! In-memory mocks for testing without a Kubernetes cluster

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;

use crate::client::ClusterOps;
use crate::error::Result;
use crate::status::{PlatformStatus, StatusStore};

/// Counts of status store calls for testing assertions
#[derive(Debug, Default, Clone)]
pub struct StatusCounts {
    pub gets: usize,
    pub updates: usize,
}

/// In-memory status store
#[derive(Clone, Default)]
pub struct MockStatusStore {
    statuses: Arc<RwLock<HashMap<String, PlatformStatus>>>,
    counts: Arc<RwLock<StatusCounts>>,
}

impl MockStatusStore {
    pub fn new() -> MockStatusStore {
        MockStatusStore::default()
    }

    /// Create with a pre-existing status
    pub fn with_status(name: &str, status: PlatformStatus) -> MockStatusStore {
        let store = MockStatusStore::new();
        store.statuses.write().unwrap().insert(name.to_string(), status);
        store
    }

    /// Read the stored status directly (for assertions)
    pub fn status(&self, name: &str) -> Option<PlatformStatus> {
        self.statuses.read().unwrap().get(name).cloned()
    }

    pub fn operation_counts(&self) -> StatusCounts {
        self.counts.read().unwrap().clone()
    }
}

#[async_trait]
impl StatusStore for MockStatusStore {
    async fn get_status(&self, name: &str) -> Result<Option<PlatformStatus>> {
        self.counts.write().unwrap().gets += 1;
        Ok(self.statuses.read().unwrap().get(name).cloned())
    }

    async fn update_status(&self, name: &str, status: &PlatformStatus) -> Result<()> {
        self.counts.write().unwrap().updates += 1;
        self.statuses.write().unwrap().insert(name.to_string(), status.clone());
        Ok(())
    }
}

/// A recorded service account update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountUpdate {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub image_pull_secrets: Vec<String>,
}

/// In-memory cluster operations
#[derive(Clone, Default)]
pub struct MockClusterOps {
    services: Arc<RwLock<HashMap<String, Service>>>,
    secrets: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
    service_account_updates: Arc<RwLock<Vec<ServiceAccountUpdate>>>,
    pods_gone_waits: Arc<RwLock<usize>>,
}

impl MockClusterOps {
    pub fn new() -> MockClusterOps {
        MockClusterOps::default()
    }

    /// Register a service under `namespace/name`
    pub fn add_service(&self, namespace: &str, name: &str, service: Service) {
        self.services.write().unwrap().insert(format!("{namespace}/{name}"), service);
    }

    /// Register a secret under `namespace/name`
    pub fn add_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.secrets.write().unwrap().insert(format!("{namespace}/{name}"), data);
    }

    /// Service account updates performed, in order
    pub fn service_account_updates(&self) -> Vec<ServiceAccountUpdate> {
        self.service_account_updates.read().unwrap().clone()
    }

    /// Number of pod-drain waits performed
    pub fn pods_gone_waits(&self) -> usize {
        *self.pods_gone_waits.read().unwrap()
    }
}

#[async_trait]
impl ClusterOps for MockClusterOps {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.services.read().unwrap().get(&format!("{namespace}/{name}")).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .secrets
            .read()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_service_account(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        image_pull_secrets: &[String],
    ) -> Result<()> {
        self.service_account_updates.write().unwrap().push(ServiceAccountUpdate {
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations: annotations.clone(),
            image_pull_secrets: image_pull_secrets.to_vec(),
        });
        Ok(())
    }

    async fn wait_until_pods_gone(
        &self,
        _namespace: &str,
        _label_selector: Option<&str>,
        _poll_interval: Duration,
    ) -> Result<()> {
        *self.pods_gone_waits.write().unwrap() += 1;
        Ok(())
    }
}
