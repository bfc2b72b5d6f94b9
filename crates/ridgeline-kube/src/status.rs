//! Platform deployment status with phase and condition state machine
//!
//! The status document is the resource's externally visible record of how
//! far a deployment has converged. Conditions are kept in an ordered map
//! keyed by type: updates happen in place, new conditions are prepended, and
//! serialization walks the map in that order (most recent first).
//!
//! [`StatusManager`] always does read-modify-write against the latest
//! persisted value; concurrent writers are excluded by the reconciler's
//! deployment lock, not here.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KubeError, Result};

/// Deployment phase of a platform resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformPhase {
    Pending,
    Deploying,
    Deployed,
    Deleting,
    Failed,
}

impl std::fmt::Display for PlatformPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            PlatformPhase::Pending => "Pending",
            PlatformPhase::Deploying => "Deploying",
            PlatformPhase::Deployed => "Deployed",
            PlatformPhase::Deleting => "Deleting",
            PlatformPhase::Failed => "Failed",
        };
        f.write_str(phase)
    }
}

/// Steps of a platform deployment tracked as status conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    StorageDriverDeployed,
    PlatformDeployed,
    CertificateCreated,
    ClusterConfigured,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ConditionType::StorageDriverDeployed => "StorageDriverDeployed",
            ConditionType::PlatformDeployed => "PlatformDeployed",
            ConditionType::CertificateCreated => "CertificateCreated",
            ConditionType::ClusterConfigured => "ClusterConfigured",
        };
        f.write_str(kind)
    }
}

/// One condition entry; `status` follows the Kubernetes `"True"`/`"False"`
/// string convention on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(with = "condition_status")]
    pub status: bool,
    #[serde(with = "transition_time")]
    pub last_transition_time: DateTime<Utc>,
}

mod condition_status {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *status { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw == "True")
    }
}

mod transition_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The status subresource of a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub phase: PlatformPhase,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, with = "condition_list")]
    pub conditions: IndexMap<ConditionType, Condition>,
}

mod condition_list {
    use super::{Condition, ConditionType};
    use indexmap::IndexMap;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Record {
        #[serde(rename = "type")]
        kind: ConditionType,
        #[serde(flatten)]
        condition: Condition,
    }

    pub fn serialize<S: Serializer>(
        conditions: &IndexMap<ConditionType, Condition>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(conditions.len()))?;
        for (kind, condition) in conditions {
            seq.serialize_element(&Record { kind: *kind, condition: condition.clone() })?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<ConditionType, Condition>, D::Error> {
        let records = Vec::<Record>::deserialize(deserializer)?;
        Ok(records.into_iter().map(|record| (record.kind, record.condition)).collect())
    }
}

impl PlatformStatus {
    /// Fresh status for a resource that has never been deployed
    pub fn new() -> PlatformStatus {
        PlatformStatus { phase: PlatformPhase::Pending, retries: 0, conditions: IndexMap::new() }
    }

    /// Update the condition in place, or prepend it when new.
    pub fn upsert_condition(&mut self, kind: ConditionType, status: bool, at: DateTime<Utc>) {
        match self.conditions.get_mut(&kind) {
            Some(condition) => {
                condition.status = status;
                condition.last_transition_time = at;
            }
            None => {
                self.conditions.shift_insert(0, kind, Condition { status, last_transition_time: at });
            }
        }
    }

    /// Whether the condition is present and true.
    pub fn is_condition_satisfied(&self, kind: ConditionType) -> bool {
        self.conditions.get(&kind).map(|condition| condition.status).unwrap_or(false)
    }
}

impl Default for PlatformStatus {
    fn default() -> Self {
        PlatformStatus::new()
    }
}

/// Persistence of the platform status subresource
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read the latest persisted status, `None` when the resource carries
    /// none yet.
    async fn get_status(&self, name: &str) -> Result<Option<PlatformStatus>>;

    /// Persist the status.
    async fn update_status(&self, name: &str, status: &PlatformStatus) -> Result<()>;
}

/// The platform deployment state machine
pub struct StatusManager {
    store: Arc<dyn StatusStore>,
}

impl StatusManager {
    pub fn new(store: Arc<dyn StatusStore>) -> StatusManager {
        StatusManager { store }
    }

    async fn load(&self, name: &str) -> Result<PlatformStatus> {
        Ok(self.store.get_status(name).await?.unwrap_or_default())
    }

    pub async fn get_phase(&self, name: &str) -> Result<PlatformPhase> {
        Ok(self.load(name).await?.phase)
    }

    /// Move the resource into Deploying and record the retry count.
    /// Conditions already reached on a previous attempt are kept so the
    /// reconciler can skip completed steps.
    pub async fn start_deployment(&self, name: &str, retry: u32) -> Result<()> {
        let mut status = self.load(name).await?;
        status.phase = PlatformPhase::Deploying;
        status.retries = retry;
        self.store.update_status(name, &status).await
    }

    pub async fn complete_deployment(&self, name: &str) -> Result<()> {
        let mut status = self.load(name).await?;
        status.phase = PlatformPhase::Deployed;
        self.store.update_status(name, &status).await
    }

    /// Mark the deployment Failed. `remove_conditions` clears the condition
    /// list; used when the failure came from invalid input rather than a
    /// partial deployment, so stale in-progress markers don't linger.
    pub async fn fail_deployment(&self, name: &str, remove_conditions: bool) -> Result<()> {
        let mut status = self.load(name).await?;
        status.phase = PlatformPhase::Failed;
        if remove_conditions {
            status.conditions.clear();
        }
        self.store.update_status(name, &status).await
    }

    pub async fn start_deletion(&self, name: &str) -> Result<()> {
        let mut status = self.load(name).await?;
        status.phase = PlatformPhase::Deleting;
        self.store.update_status(name, &status).await
    }

    pub async fn is_condition_satisfied(&self, name: &str, kind: ConditionType) -> Result<bool> {
        Ok(self.load(name).await?.is_condition_satisfied(kind))
    }

    /// Bracket a unit of work with the named condition.
    ///
    /// The condition is persisted as false before the work runs and flipped
    /// to true after it succeeds. When the work fails the false record is
    /// left as the durable mark of an incomplete step and the error is
    /// propagated unchanged.
    pub async fn transition<T, E, F, Fut>(
        &self,
        name: &str,
        kind: ConditionType,
        work: F,
    ) -> std::result::Result<T, E>
    where
        E: From<KubeError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        info!("started transition to {kind} condition");
        let mut status = self.load(name).await.map_err(E::from)?;
        status.upsert_condition(kind, false, now());
        self.store.update_status(name, &status).await.map_err(E::from)?;

        let value = match work().await {
            Ok(value) => value,
            Err(error) => {
                warn!("transition to {kind} failed");
                return Err(error);
            }
        };

        let mut status = self.load(name).await.map_err(E::from)?;
        status.upsert_condition(kind, true, now());
        self.store.update_status(name, &status).await.map_err(E::from)?;
        info!("transition to {kind} succeeded");
        Ok(value)
    }
}

fn now() -> DateTime<Utc> {
    use chrono::SubsecRound;
    // Transition times are serialized at second precision.
    Utc::now().trunc_subsecs(0)
}
