//! HTTP implementation of the coordination store client
//!
//! Wire format notes: values travel base64-encoded inside JSON entry lists
//! (or raw with `?raw=true`), session durations are `"<seconds>s"` strings,
//! and conditional writes answer with the literal text `true`/`false`.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use url::Url;

use async_trait::async_trait;

use crate::error::{CoordError, Result};
use crate::kv::{KvEntry, KvStore, MIN_SESSION_TTL, PutOptions, SessionConfig, SessionInfo};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Coordination store client over HTTP
#[derive(Debug, Clone)]
pub struct HttpKvStore {
    base: Url,
    client: reqwest::Client,
}

impl HttpKvStore {
    /// Create a client for the store at `url`.
    pub fn new(url: Url) -> Result<HttpKvStore> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    /// Create with an existing reqwest client.
    pub fn with_client(client: reqwest::Client, mut url: Url) -> HttpKvStore {
        // Url::join drops the last path segment unless the base ends in '/'.
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        HttpKvStore { base: url, client }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| CoordError::UnexpectedResponse(format!("invalid endpoint '{path}': {e}")))
    }

    async fn error_for_status(key: Option<&str>, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND
            && let Some(key) = key
        {
            return Err(CoordError::KeyNotFound { key: key.to_string() });
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!("coordination store returned {status}: {message}");
        Err(CoordError::Status { status: status.as_u16(), message })
    }

    async fn read_flag(response: Response) -> Result<bool> {
        let text = response.text().await?;
        match text.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CoordError::UnexpectedResponse(format!(
                "expected boolean body, got '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    async fn get(&self, key: &str, recurse: bool) -> Result<Vec<KvEntry>> {
        let mut url = self.endpoint(&format!("v1/kv/{key}"))?;
        if recurse {
            url.query_pairs_mut().append_pair("recurse", "true");
        }
        let response = self.client.get(url).send().await?;
        let response = Self::error_for_status(Some(key), response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let mut url = self.endpoint(&format!("v1/kv/{key}"))?;
        url.query_pairs_mut().append_pair("raw", "true");
        let response = self.client.get(url).send().await?;
        let response = Self::error_for_status(Some(key), response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<bool> {
        let mut url = self.endpoint(&format!("v1/kv/{key}"))?;
        if let Some(session_id) = &options.acquire {
            url.query_pairs_mut().append_pair("acquire", session_id);
        }
        if let Some(session_id) = &options.release {
            url.query_pairs_mut().append_pair("release", session_id);
        }
        let response = self.client.put(url).body(value.to_vec()).send().await?;
        let response = Self::error_for_status(Some(key), response).await?;
        Self::read_flag(response).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let url = self.endpoint(&format!("v1/kv/{key}"))?;
        let response = self.client.delete(url).send().await?;
        let response = Self::error_for_status(Some(key), response).await?;
        Self::read_flag(response).await
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<String> {
        config.validate()?;
        let mut payload = json!({"TTL": format!("{}s", config.ttl.as_secs())});
        if !config.name.is_empty() {
            payload["Name"] = json!(config.name);
        }
        if let Some(behavior) = config.behavior {
            payload["Behavior"] = json!(behavior.as_str());
        }
        if let Some(delay) = config.lock_delay {
            payload["LockDelay"] = json!(format!("{}s", delay.as_secs()));
        }

        #[derive(Deserialize)]
        struct CreatedSession {
            #[serde(rename = "ID")]
            id: String,
        }

        let url = self.endpoint("v1/session/create")?;
        let response = self.client.put(url).json(&payload).send().await?;
        let response = Self::error_for_status(None, response).await?;
        let body = response.bytes().await?;
        let created: CreatedSession = serde_json::from_slice(&body)?;
        Ok(created.id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<bool> {
        let url = self.endpoint(&format!("v1/session/destroy/{session_id}"))?;
        let response = self.client.put(url).send().await?;
        let response = Self::error_for_status(None, response).await?;
        Self::read_flag(response).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let url = self.endpoint("v1/session/list")?;
        let response = self.client.get(url).send().await?;
        let response = Self::error_for_status(None, response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn wait_ready(&self, poll_interval: Duration) -> Result<()> {
        tracing::info!("waiting until the coordination store is healthy");
        let url = self.endpoint("v1/status/leader")?;
        loop {
            if let Ok(response) = self.client.get(url.clone()).send().await
                && response.status().is_success()
                && let Ok(text) = response.text().await
                && !text.trim().trim_matches('"').is_empty()
            {
                break;
            }
            sleep(poll_interval).await;
        }
        // The store requires the node to be registered before sessions can be
        // created; creating one forces registration.
        loop {
            match self.create_session(&SessionConfig::new(MIN_SESSION_TTL)).await {
                Ok(session_id) => {
                    let _ = self.destroy_session(&session_id).await;
                    break;
                }
                Err(_) => sleep(poll_interval).await,
            }
        }
        tracing::info!("coordination store is healthy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> HttpKvStore {
        HttpKvStore::new(Url::parse(&server.uri()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_decodes_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/platform"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Key": "platform", "Value": "dmFsdWU=", "Session": "s1", "ModifyIndex": 7},
            ])))
            .mount(&server)
            .await;

        let entries = store(&server).await.get("platform", false).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value.as_deref(), Some(b"value".as_slice()));
        assert_eq!(entries[0].session.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let error = store(&server).await.get("missing", false).await.unwrap_err();
        assert!(error.is_not_found());
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn get_recurse_sets_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/prefix"))
            .and(query_param("recurse", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Key": "prefix/1", "Value": null},
                {"Key": "prefix/2", "Value": null},
            ])))
            .mount(&server)
            .await;

        let entries = store(&server).await.get("prefix", true).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn get_raw_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/blob"))
            .and(query_param("raw", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw-bytes".to_vec()))
            .mount(&server)
            .await;

        let value = store(&server).await.get_raw("blob").await.unwrap();
        assert_eq!(value, b"raw-bytes");
    }

    #[tokio::test]
    async fn put_acquire_reports_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/lock"))
            .and(query_param("acquire", "session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true\n"))
            .mount(&server)
            .await;

        let acquired = store(&server)
            .await
            .put("lock", b"value", PutOptions::acquire("session-1"))
            .await
            .unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn put_conflicting_session_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/lock"))
            .and(query_param("release", "session-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("false"))
            .mount(&server)
            .await;

        let released = store(&server)
            .await
            .put("lock", b"value", PutOptions::release("session-2"))
            .await
            .unwrap();
        assert!(!released);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/lock"))
            .respond_with(ResponseTemplate::new(500).set_body_string("rpc error"))
            .mount(&server)
            .await;

        let error = store(&server)
            .await
            .put("lock", b"value", PutOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn create_session_serializes_durations() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/create"))
            .and(body_json(json!({"TTL": "30s", "Name": "deploy", "LockDelay": "2s"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": "session-1"})))
            .mount(&server)
            .await;

        let mut config = SessionConfig::new(Duration::from_secs(30));
        config.name = "deploy".to_string();
        config.lock_delay = Some(Duration::from_secs(2));

        let session_id = store(&server).await.create_session(&config).await.unwrap();
        assert_eq!(session_id, "session-1");
    }

    #[tokio::test]
    async fn create_session_rejects_short_ttl_without_network() {
        let server = MockServer::start().await;
        // No mock mounted: a request would fail the test with a 404 panic from
        // wiremock's verification instead of the typed error below.
        let error = store(&server)
            .await
            .create_session(&SessionConfig::new(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(error, CoordError::SessionTtlTooShort { .. }));
    }

    #[tokio::test]
    async fn destroy_session_reports_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/destroy/session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .mount(&server)
            .await;

        assert!(store(&server).await.destroy_session("session-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_sessions_decodes_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/session/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ID": "session-1", "Name": "deploy"},
                {"ID": "session-2"},
            ])))
            .mount(&server)
            .await;

        let sessions = store(&server).await.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "session-1");
        assert_eq!(sessions[0].name, "deploy");
        assert_eq!(sessions[1].name, "");
    }

    #[tokio::test]
    async fn wait_ready_polls_until_leader_elected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"\""))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"10.0.0.1:8300\""))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": "probe"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/destroy/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .mount(&server)
            .await;

        store(&server).await.wait_ready(Duration::from_millis(10)).await.unwrap();
    }
}
