//! The platform resource model
//!
//! A platform custom resource arrives as loosely structured JSON. It is
//! deserialized into a [`PlatformSpec`], then validated together with the
//! operator [`Config`] and the cluster record from the config service into a
//! [`PlatformConfig`] - the fully resolved input the reconciler works from.
//! Validation failures here are permanent: retrying will not make an invalid
//! spec valid.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::{CoreError, Result};

/// Resource metadata, as delivered by the watch event
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub name: String,
}

/// The raw platform resource body
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformBody {
    pub metadata: Metadata,
    pub spec: serde_json::Value,
}

/// The `spec` section of a platform resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    #[serde(default)]
    pub token: String,
    pub kubernetes: KubernetesSpec,
    #[serde(default)]
    pub ingress_controller: IngressControllerSpec,
    #[serde(default)]
    pub storages: Vec<StorageSpec>,
}

impl PlatformSpec {
    /// Deserialize the raw `spec` value of a platform resource.
    pub fn parse(spec: &serde_json::Value) -> Result<PlatformSpec> {
        serde_json::from_value(spec.clone()).map_err(|e| CoreError::invalid_spec(e.to_string()))
    }

    /// Whether the spec declares a storage that needs the CSI driver chart.
    pub fn wants_storage_driver(&self) -> bool {
        self.storages.iter().any(|s| s.gcs.is_some())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    pub provider: String,
    #[serde(default)]
    pub standard_storage_class_name: String,
    #[serde(default)]
    pub kubelet_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub service_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub load_balancer_source_ranges: Vec<String>,
    #[serde(default, rename = "publicIPs")]
    pub public_ips: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ssl: SslSpec,
}

impl Default for IngressControllerSpec {
    fn default() -> Self {
        IngressControllerSpec {
            enabled: true,
            replicas: None,
            service_type: None,
            service_annotations: BTreeMap::new(),
            load_balancer_source_ranges: Vec::new(),
            public_ips: Vec::new(),
            ssl: SslSpec::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslSpec {
    #[serde(default)]
    pub certificate_data: String,
    #[serde(default)]
    pub certificate_key_data: String,
}

/// One storage entry; the storage kind is detected by which section is present
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kubernetes: Option<KubernetesStorageSpec>,
    #[serde(default)]
    pub nfs: Option<NfsStorageSpec>,
    #[serde(default)]
    pub smb: Option<SmbStorageSpec>,
    #[serde(default)]
    pub gcs: Option<GcsStorageSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesStorageSpec {
    #[serde(default)]
    pub persistence: PersistenceSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub storage_class_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsStorageSpec {
    pub server: String,
    #[serde(default = "default_nfs_export_path")]
    pub path: String,
}

fn default_nfs_export_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmbStorageSpec {
    pub server: String,
    pub share_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsStorageSpec {
    pub bucket: String,
}

// ========== Cluster record from the config service ==========

/// Cluster record returned by the config service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescriptor {
    pub name: String,
    pub dns: DnsInfo,
    #[serde(default)]
    pub ingress: IngressInfo,
    pub credentials: CredentialsInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressInfo {
    #[serde(default)]
    pub acme_environment: Option<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsInfo {
    pub helm: RepoCredentials,
    pub registry: RegistryCredentials,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCredentials {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// ========== Validated configuration ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressServiceType {
    LoadBalancer,
    NodePort,
}

impl IngressServiceType {
    fn parse(raw: &str) -> Result<IngressServiceType> {
        match raw {
            "" | "LoadBalancer" => Ok(IngressServiceType::LoadBalancer),
            "NodePort" => Ok(IngressServiceType::NodePort),
            other => Err(CoreError::invalid_spec(format!(
                "ingress service type '{other}' is not supported"
            ))),
        }
    }
}

/// Validated storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Kubernetes {
        path: String,
        size: String,
        storage_class_name: String,
    },
    Nfs {
        path: String,
        server: String,
        export_path: String,
    },
    Smb {
        path: String,
        server: String,
        share_name: String,
        username: String,
        password: String,
    },
    Gcs {
        bucket: String,
    },
}

/// Configuration of the optional object-storage CSI driver component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDriverConfig {
    pub buckets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRepo {
    pub url: Url,
    pub name: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerConfig {
    pub url: Url,
    pub email: String,
    pub username: String,
    pub password: String,
    pub secret_name: String,
    pub create_secret: bool,
}

/// The fully resolved deployment configuration for one platform resource
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub cluster_name: String,
    pub namespace: String,
    pub release_name: String,
    pub token: String,
    pub kubernetes_provider: String,
    pub standard_storage_class_name: Option<String>,
    pub kubelet_port: u16,
    pub ingress_dns_name: String,
    pub ingress_url: Url,
    pub ingress_registry_url: Url,
    pub ingress_acme_enabled: bool,
    pub ingress_acme_environment: String,
    pub ingress_controller_install: bool,
    pub ingress_controller_replicas: u32,
    pub ingress_public_ips: Vec<Ipv4Addr>,
    pub ingress_cors_origins: Vec<String>,
    pub ingress_service_type: IngressServiceType,
    pub ingress_service_name: String,
    pub ingress_service_annotations: BTreeMap<String, String>,
    pub ingress_load_balancer_source_ranges: Vec<String>,
    pub ingress_ssl_cert_data: String,
    pub ingress_ssl_cert_key_data: String,
    pub service_account_name: String,
    pub image_pull_secret_names: Vec<String>,
    pub storages: Vec<StorageConfig>,
    pub storage_driver: Option<StorageDriverConfig>,
    pub helm_repo: HelmRepo,
    pub docker_config: DockerConfig,
}

impl PlatformConfig {
    /// Validate a platform spec against the operator configuration and the
    /// cluster record.
    pub fn new(
        config: &Config,
        name: &str,
        spec: &PlatformSpec,
        cluster: &ClusterDescriptor,
    ) -> Result<PlatformConfig> {
        if spec.token.is_empty() {
            return Err(CoreError::invalid_spec("token is required"));
        }
        if spec.kubernetes.provider.is_empty() {
            return Err(CoreError::invalid_spec("kubernetes provider is required"));
        }
        if spec.storages.is_empty() {
            return Err(CoreError::invalid_spec("at least one storage is required"));
        }

        let storages = spec
            .storages
            .iter()
            .map(validate_storage)
            .collect::<Result<Vec<_>>>()?;
        let storage_driver = create_storage_driver(&storages);

        let dns_name = cluster.dns.name.clone();
        let release_name = config.release_names.platform.clone();
        let docker_config = create_docker_config(&cluster.credentials.registry, &release_name)?;
        let image_pull_secret_names = match &docker_config.secret_name {
            name if name.is_empty() => Vec::new(),
            name => vec![name.clone()],
        };
        let ssl = &spec.ingress_controller.ssl;

        Ok(PlatformConfig {
            cluster_name: name.to_string(),
            namespace: config.platform_namespace.clone(),
            release_name,
            token: spec.token.clone(),
            kubernetes_provider: spec.kubernetes.provider.clone(),
            standard_storage_class_name: match spec.kubernetes.standard_storage_class_name.as_str()
            {
                "" => None,
                class => Some(class.to_string()),
            },
            kubelet_port: spec.kubernetes.kubelet_port.unwrap_or(10250),
            ingress_url: parse_spec_url(&format!("https://{dns_name}"))?,
            ingress_registry_url: parse_spec_url(&format!("https://registry.{dns_name}"))?,
            ingress_dns_name: dns_name,
            ingress_acme_enabled: ssl.certificate_data.is_empty()
                || ssl.certificate_key_data.is_empty(),
            ingress_acme_environment: cluster
                .ingress
                .acme_environment
                .clone()
                .unwrap_or_else(|| "production".to_string()),
            ingress_controller_install: spec.ingress_controller.enabled,
            ingress_controller_replicas: spec.ingress_controller.replicas.unwrap_or(2),
            ingress_public_ips: spec.ingress_controller.public_ips.clone(),
            ingress_cors_origins: cluster.ingress.cors_origins.clone(),
            ingress_service_type: IngressServiceType::parse(
                spec.ingress_controller.service_type.as_deref().unwrap_or(""),
            )?,
            ingress_service_name: "traefik".to_string(),
            ingress_service_annotations: spec.ingress_controller.service_annotations.clone(),
            ingress_load_balancer_source_ranges: spec
                .ingress_controller
                .load_balancer_source_ranges
                .clone(),
            ingress_ssl_cert_data: ssl.certificate_data.clone(),
            ingress_ssl_cert_key_data: ssl.certificate_key_data.clone(),
            service_account_name: "default".to_string(),
            image_pull_secret_names,
            storages,
            storage_driver,
            helm_repo: create_helm_repo(&cluster.credentials.helm)?,
            docker_config,
        })
    }

    /// Build the DNS registration payload for this platform.
    ///
    /// Resolution order follows the ingress exposure: static public IPs win,
    /// then a cloud load balancer fronting the ingress service, then the
    /// service's own LoadBalancer IP. Returns `None` when the ingress is not
    /// externally reachable yet.
    pub fn create_dns_config(
        &self,
        ingress: Option<&IngressEndpoint>,
        load_balancer: Option<&LoadBalancerDescriptor>,
    ) -> Option<DnsConfig> {
        let records = if !self.ingress_public_ips.is_empty() {
            let ips: Vec<String> = self.ingress_public_ips.iter().map(|ip| ip.to_string()).collect();
            self.record_names()
                .into_iter()
                .map(|name| DnsRecord::with_ips(name, ips.clone()))
                .collect()
        } else if let (Some(lb), Some(ingress)) = (load_balancer, ingress) {
            let host = ingress.hostname.as_deref()?;
            self.record_names()
                .into_iter()
                .map(|name| {
                    DnsRecord::with_alias(name, host.to_string(), lb.canonical_hosted_zone_id.clone())
                })
                .collect()
        } else if let Some(ip) = ingress.and_then(|i| i.ip.as_deref()) {
            self.record_names()
                .into_iter()
                .map(|name| DnsRecord::with_ips(name, vec![ip.to_string()]))
                .collect()
        } else {
            return None;
        };
        Some(DnsConfig { name: self.ingress_dns_name.clone(), a_records: records })
    }

    fn record_names(&self) -> Vec<String> {
        let dns_name = &self.ingress_dns_name;
        vec![
            format!("{dns_name}."),
            format!("*.jobs.{dns_name}."),
            format!("*.apps.{dns_name}."),
            format!("registry.{dns_name}."),
            format!("metrics.{dns_name}."),
        ]
    }
}

fn parse_spec_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CoreError::invalid_spec(format!("invalid url '{raw}': {e}")))
}

fn validate_storage(spec: &StorageSpec) -> Result<StorageConfig> {
    if let Some(kubernetes) = &spec.kubernetes {
        return Ok(StorageConfig::Kubernetes {
            path: spec.path.clone(),
            size: match kubernetes.persistence.size.as_str() {
                "" => "10Gi".to_string(),
                size => size.to_string(),
            },
            storage_class_name: kubernetes.persistence.storage_class_name.clone(),
        });
    }
    if let Some(nfs) = &spec.nfs {
        return Ok(StorageConfig::Nfs {
            path: spec.path.clone(),
            server: nfs.server.clone(),
            export_path: nfs.path.clone(),
        });
    }
    if let Some(smb) = &spec.smb {
        return Ok(StorageConfig::Smb {
            path: spec.path.clone(),
            server: smb.server.clone(),
            share_name: smb.share_name.clone(),
            username: smb.username.clone(),
            password: smb.password.clone(),
        });
    }
    if let Some(gcs) = &spec.gcs {
        return Ok(StorageConfig::Gcs { bucket: gcs.bucket.clone() });
    }
    Err(CoreError::invalid_spec("storage type is not supported"))
}

fn create_storage_driver(storages: &[StorageConfig]) -> Option<StorageDriverConfig> {
    let buckets: Vec<String> = storages
        .iter()
        .filter_map(|storage| match storage {
            StorageConfig::Gcs { bucket } => Some(bucket.clone()),
            _ => None,
        })
        .collect();
    if buckets.is_empty() { None } else { Some(StorageDriverConfig { buckets }) }
}

fn create_helm_repo(credentials: &RepoCredentials) -> Result<HelmRepo> {
    Ok(HelmRepo {
        url: parse_spec_url(&credentials.url)?,
        name: "platform".to_string(),
        username: credentials.username.clone(),
        password: credentials.password.clone(),
    })
}

fn create_docker_config(
    registry: &RegistryCredentials,
    release_name: &str,
) -> Result<DockerConfig> {
    // Anonymous registries get no pull secret.
    let with_credentials = !registry.username.is_empty() && !registry.password.is_empty();
    Ok(DockerConfig {
        url: parse_spec_url(&registry.url)?,
        email: registry.email.clone(),
        username: registry.username.clone(),
        password: registry.password.clone(),
        secret_name: if with_credentials {
            format!("{release_name}-docker-config")
        } else {
            String::new()
        },
        create_secret: with_credentials,
    })
}

// ========== DNS registration payload ==========

/// The endpoint a LoadBalancer ingress service is published on
#[derive(Debug, Clone, Default)]
pub struct IngressEndpoint {
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

/// A cloud load balancer fronting the ingress service
#[derive(Debug, Clone)]
pub struct LoadBalancerDescriptor {
    pub dns_name: String,
    pub canonical_hosted_zone_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    pub name: String,
    pub a_records: Vec<DnsRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
}

impl DnsRecord {
    fn with_ips(name: String, ips: Vec<String>) -> DnsRecord {
        DnsRecord { name, ips, dns_name: None, zone_id: None }
    }

    fn with_alias(name: String, dns_name: String, zone_id: String) -> DnsRecord {
        DnsRecord { name, ips: Vec::new(), dns_name: Some(dns_name), zone_id: Some(zone_id) }
    }
}
