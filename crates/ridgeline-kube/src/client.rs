//! High-level cluster client for platform operations
//!
//! Wraps a `kube::Client` with the handful of operations the reconciler
//! needs: ingress service lookup, secret reads, service account updates,
//! pod draining, and the platform custom resource's status subresource.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service, ServiceAccount};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use serde_json::json;
use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;
use crate::status::{PlatformStatus, StatusStore};

pub const PLATFORM_GROUP: &str = "ridgeline.io";
pub const PLATFORM_VERSION: &str = "v1";
pub const PLATFORM_PLURAL: &str = "platforms";

/// Cluster operations the reconciler depends on
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Read a service; absent services are `None`, not an error.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Read a secret with its data decoded to strings.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Merge annotations and image pull secrets into a service account.
    async fn update_service_account(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        image_pull_secrets: &[String],
    ) -> Result<()>;

    /// Poll until no pods matching the selector remain in the namespace.
    async fn wait_until_pods_gone(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        poll_interval: Duration,
    ) -> Result<()>;
}

/// Cluster client backed by the Kubernetes API
pub struct ClusterClient {
    client: kube::Client,
    namespace: String,
    platform_resource: ApiResource,
}

impl ClusterClient {
    /// Create a client scoped to the operator's platform namespace.
    pub fn new(client: kube::Client, namespace: impl Into<String>) -> ClusterClient {
        let gvk = GroupVersionKind::gvk(PLATFORM_GROUP, PLATFORM_VERSION, "Platform");
        ClusterClient {
            client,
            namespace: namespace.into(),
            platform_resource: ApiResource::from_gvk_with_plural(&gvk, PLATFORM_PLURAL),
        }
    }

    fn platforms(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.platform_resource)
    }
}

#[async_trait]
impl ClusterOps for ClusterClient {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api = Api::<Service>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        let mut decoded = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(value.0).map_err(|e| crate::error::KubeError::SecretData {
                name: name.to_string(),
                message: format!("key '{key}': {e}"),
            })?;
            decoded.insert(key, value);
        }
        Ok(decoded)
    }

    async fn update_service_account(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        image_pull_secrets: &[String],
    ) -> Result<()> {
        let api = Api::<ServiceAccount>::namespaced(self.client.clone(), namespace);
        let secrets: Vec<_> =
            image_pull_secrets.iter().map(|secret| json!({"name": secret})).collect();
        let patch = json!({
            "metadata": {"annotations": annotations},
            "imagePullSecrets": secrets,
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn wait_until_pods_gone(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        poll_interval: Duration,
    ) -> Result<()> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default().limit(1);
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        loop {
            let pods = api.list(&params).await?;
            if pods.items.is_empty() {
                return Ok(());
            }
            debug!("pods still present in '{namespace}', waiting");
            sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl StatusStore for ClusterClient {
    async fn get_status(&self, name: &str) -> Result<Option<PlatformStatus>> {
        let Some(object) = self.platforms().get_opt(name).await? else {
            return Ok(None);
        };
        match object.data.get("status") {
            Some(status) if !status.is_null() => Ok(Some(serde_json::from_value(status.clone())?)),
            _ => Ok(None),
        }
    }

    async fn update_status(&self, name: &str, status: &PlatformStatus) -> Result<()> {
        let payload = json!({"status": status});
        self.platforms()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&payload))
            .await?;
        Ok(())
    }
}
