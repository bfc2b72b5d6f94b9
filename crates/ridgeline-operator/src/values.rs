//! Chart values assembly
//!
//! Desired values are compared verbatim against the values of the installed
//! release, so the output here must be deterministic: maps come from
//! `BTreeMap`s and lists keep their spec order.

use serde_json::{Value, json};

use ridgeline_core::{IngressServiceType, PlatformConfig, StorageConfig, StorageDriverConfig};

/// Values for the main platform chart
pub fn platform_values(platform: &PlatformConfig) -> Value {
    let storages: Vec<Value> = platform.storages.iter().map(storage_values).collect();
    let service_type = match platform.ingress_service_type {
        IngressServiceType::LoadBalancer => "LoadBalancer",
        IngressServiceType::NodePort => "NodePort",
    };

    let mut values = json!({
        "clusterName": platform.cluster_name,
        "serviceToken": platform.token,
        "kubernetes": {
            "provider": platform.kubernetes_provider,
            "kubeletPort": platform.kubelet_port,
        },
        "imagePullSecrets": platform.image_pull_secret_names,
        "serviceAccount": {"name": platform.service_account_name},
        "ingress": {
            "dnsName": platform.ingress_dns_name,
            "url": platform.ingress_url.as_str(),
            "registryUrl": platform.ingress_registry_url.as_str(),
            "cors": {"originList": platform.ingress_cors_origins},
        },
        "ingressController": {
            "install": platform.ingress_controller_install,
            "replicas": platform.ingress_controller_replicas,
            "serviceType": service_type,
            "serviceAnnotations": platform.ingress_service_annotations,
            "loadBalancerSourceRanges": platform.ingress_load_balancer_source_ranges,
            "publicIPs": platform.ingress_public_ips,
        },
        "acme": {
            "enabled": platform.ingress_acme_enabled,
            "environment": platform.ingress_acme_environment,
        },
        "storages": storages,
    });

    if let Some(class) = &platform.standard_storage_class_name {
        values["kubernetes"]["standardStorageClassName"] = json!(class);
    }
    if !platform.ingress_acme_enabled {
        values["ssl"] = json!({
            "certificateData": platform.ingress_ssl_cert_data,
            "certificateKeyData": platform.ingress_ssl_cert_key_data,
        });
    }
    if platform.docker_config.create_secret {
        values["dockerConfig"] = json!({
            "registry": platform.docker_config.url.as_str(),
            "email": platform.docker_config.email,
            "username": platform.docker_config.username,
            "password": platform.docker_config.password,
            "secretName": platform.docker_config.secret_name,
        });
    }
    values
}

/// Values for the object-storage CSI driver chart
pub fn storage_driver_values(platform: &PlatformConfig, driver: &StorageDriverConfig) -> Value {
    json!({
        "clusterName": platform.cluster_name,
        "buckets": driver.buckets,
        "imagePullSecrets": platform.image_pull_secret_names,
    })
}

fn storage_values(storage: &StorageConfig) -> Value {
    match storage {
        StorageConfig::Kubernetes { path, size, storage_class_name } => json!({
            "type": "kubernetes",
            "path": path,
            "size": size,
            "storageClassName": storage_class_name,
        }),
        StorageConfig::Nfs { path, server, export_path } => json!({
            "type": "nfs",
            "path": path,
            "server": server,
            "exportPath": export_path,
        }),
        StorageConfig::Smb { path, server, share_name, username, password } => json!({
            "type": "smb",
            "path": path,
            "server": server,
            "shareName": share_name,
            "username": username,
            "password": password,
        }),
        StorageConfig::Gcs { bucket } => json!({
            "type": "gcs",
            "bucket": bucket,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgeline_core::{ClusterDescriptor, Config, PlatformSpec};
    use serde_json::json;

    fn platform(spec: serde_json::Value) -> PlatformConfig {
        let env = std::collections::HashMap::from([
            ("RL_NODE_NAME", "node-1"),
            ("RL_PLATFORM_CHART_VERSION", "1.2.3"),
            ("RL_STORAGE_DRIVER_CHART_VERSION", "0.4.0"),
            ("RL_PLATFORM_NAMESPACE", "platform"),
            ("RL_PLATFORM_AUTH_URL", "https://auth.example.io"),
            ("RL_PLATFORM_CONFIG_URL", "https://config.example.io"),
            ("RL_PLATFORM_API_URL", "https://api.example.io"),
            ("RL_COORDINATION_URL", "http://platform-consul:8500"),
        ]);
        let config = Config::load(|name| env.get(name).map(|v| v.to_string())).unwrap();
        let cluster: ClusterDescriptor = serde_json::from_value(json!({
            "name": "test-cluster",
            "dns": {"name": "test-cluster.example.io"},
            "credentials": {
                "helm": {"url": "https://charts.example.io"},
                "registry": {"url": "https://registry.example.io", "username": "pull", "password": "secret"},
            },
        }))
        .unwrap();
        let spec = PlatformSpec::parse(&spec).unwrap();
        PlatformConfig::new(&config, "test-cluster", &spec, &cluster).unwrap()
    }

    #[test]
    fn platform_values_shape() {
        let values = platform_values(&platform(json!({
            "token": "token",
            "kubernetes": {"provider": "onPrem", "standardStorageClassName": "standard"},
            "storages": [
                {"path": "/extra", "nfs": {"server": "nfs.example.io", "path": "/exports"}},
            ],
        })));

        assert_eq!(values["clusterName"], json!("test-cluster"));
        assert_eq!(values["kubernetes"]["provider"], json!("onPrem"));
        assert_eq!(values["kubernetes"]["standardStorageClassName"], json!("standard"));
        assert_eq!(values["ingress"]["dnsName"], json!("test-cluster.example.io"));
        assert_eq!(values["acme"]["enabled"], json!(true));
        assert_eq!(
            values["storages"],
            json!([{
                "type": "nfs",
                "path": "/extra",
                "server": "nfs.example.io",
                "exportPath": "/exports",
            }])
        );
        assert_eq!(values["dockerConfig"]["secretName"], json!("platform-docker-config"));
        assert!(values.get("ssl").is_none());
    }

    #[test]
    fn custom_ssl_included_when_acme_disabled() {
        let values = platform_values(&platform(json!({
            "token": "token",
            "kubernetes": {"provider": "aws"},
            "ingressController": {"ssl": {"certificateData": "cert", "certificateKeyData": "key"}},
            "storages": [{"kubernetes": {"persistence": {"size": "100Gi"}}}],
        })));

        assert_eq!(values["acme"]["enabled"], json!(false));
        assert_eq!(values["ssl"]["certificateData"], json!("cert"));
        assert_eq!(values["storages"][0]["size"], json!("100Gi"));
    }

    #[test]
    fn values_are_deterministic() {
        let spec = json!({
            "token": "token",
            "kubernetes": {"provider": "gcp"},
            "ingressController": {"serviceAnnotations": {"b": "2", "a": "1"}},
            "storages": [{"gcs": {"bucket": "bucket-1"}}],
        });

        assert_eq!(platform_values(&platform(spec.clone())), platform_values(&platform(spec)));
    }

    #[test]
    fn storage_driver_values_shape() {
        let platform = platform(json!({
            "token": "token",
            "kubernetes": {"provider": "gcp"},
            "storages": [{"gcs": {"bucket": "bucket-1"}}],
        }));
        let driver = platform.storage_driver.clone().unwrap();

        let values = storage_driver_values(&platform, &driver);
        assert_eq!(values["buckets"], json!(["bucket-1"]));
    }
}
