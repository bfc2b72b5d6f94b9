//! Client for the central configuration service
//!
//! The config service is the source of truth for cluster records (DNS name,
//! chart repository credentials) and the sink for DNS registration patches
//! and lifecycle notifications.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use url::Url;

use ridgeline_core::ClusterDescriptor;

use crate::error::{OperatorError, Result};

/// Lifecycle notifications emitted while a cluster converges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ClusterUpdating,
    ClusterUpdateSucceeded,
    ClusterUpdateFailed,
}

/// Config service operations used by the reconciler
#[async_trait]
pub trait ConfigService: Send + Sync {
    /// Fetch the cluster record.
    async fn get_cluster(&self, cluster_name: &str, token: &str) -> Result<ClusterDescriptor>;

    /// Patch the cluster record (DNS registration and the like).
    async fn patch_cluster(
        &self,
        cluster_name: &str,
        token: &str,
        payload: &serde_json::Value,
    ) -> Result<()>;

    /// Emit a lifecycle notification for the cluster.
    async fn send_notification(
        &self,
        cluster_name: &str,
        token: &str,
        notification: NotificationType,
    ) -> Result<()>;
}

/// Config service client over HTTP
#[derive(Debug, Clone)]
pub struct HttpConfigService {
    base: Url,
    client: reqwest::Client,
}

impl HttpConfigService {
    pub fn new(url: Url) -> Result<HttpConfigService> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, mut url: Url) -> HttpConfigService {
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        HttpConfigService { base: url, client }
    }

    fn cluster_url(&self, cluster_name: &str) -> Result<Url> {
        self.base
            .join(&format!("api/v1/clusters/{cluster_name}"))
            .map_err(|e| OperatorError::ConfigService(format!("invalid cluster url: {e}")))
    }

    async fn error_for_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!("config service rejected credentials: {status}");
        }
        Err(OperatorError::ConfigService(format!("{status}: {message}")))
    }
}

#[async_trait]
impl ConfigService for HttpConfigService {
    async fn get_cluster(&self, cluster_name: &str, token: &str) -> Result<ClusterDescriptor> {
        let mut url = self.cluster_url(cluster_name)?;
        url.query_pairs_mut().append_pair("include", "all");
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let response = Self::error_for_status(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| OperatorError::ConfigService(format!("invalid cluster record: {e}")))
    }

    async fn patch_cluster(
        &self,
        cluster_name: &str,
        token: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let url = self.cluster_url(cluster_name)?;
        let response = self.client.patch(url).bearer_auth(token).json(payload).send().await?;
        Self::error_for_status(response).await?;
        Ok(())
    }

    async fn send_notification(
        &self,
        cluster_name: &str,
        token: &str,
        notification: NotificationType,
    ) -> Result<()> {
        let url = self
            .base
            .join(&format!("api/v1/clusters/{cluster_name}/notifications"))
            .map_err(|e| OperatorError::ConfigService(format!("invalid notification url: {e}")))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({"notification_type": notification}))
            .send()
            .await?;
        Self::error_for_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer) -> HttpConfigService {
        HttpConfigService::new(Url::parse(&server.uri()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_cluster_decodes_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/clusters/test-cluster"))
            .and(query_param("include", "all"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "test-cluster",
                "dns": {"name": "test-cluster.example.io"},
                "credentials": {
                    "helm": {"url": "https://charts.example.io"},
                    "registry": {"url": "https://registry.example.io"},
                },
            })))
            .mount(&server)
            .await;

        let cluster = service(&server).await.get_cluster("test-cluster", "token").await.unwrap();
        assert_eq!(cluster.name, "test-cluster");
        assert_eq!(cluster.dns.name, "test-cluster.example.io");
    }

    #[tokio::test]
    async fn get_cluster_surfaces_auth_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/clusters/test-cluster"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let error = service(&server).await.get_cluster("test-cluster", "bad").await.unwrap_err();
        assert!(matches!(error, OperatorError::ConfigService(_)));
        assert!(!error.is_permanent());
    }

    #[tokio::test]
    async fn patch_cluster_sends_payload() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/clusters/test-cluster"))
            .and(body_json(json!({"dns": {"name": "test-cluster.example.io", "aRecords": []}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        service(&server)
            .await
            .patch_cluster(
                "test-cluster",
                "token",
                &json!({"dns": {"name": "test-cluster.example.io", "aRecords": []}}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notification_payload_uses_snake_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/clusters/test-cluster/notifications"))
            .and(body_json(json!({"notification_type": "cluster_update_succeeded"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        service(&server)
            .await
            .send_notification("test-cluster", "token", NotificationType::ClusterUpdateSucceeded)
            .await
            .unwrap();
    }
}
