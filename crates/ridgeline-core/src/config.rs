//! Operator configuration loaded from the environment
//!
//! All settings come in through `RL_`-prefixed environment variables so the
//! operator can run unchanged inside a deployment manifest. The resulting
//! `Config` is an explicit value passed into every component; nothing reads
//! the environment after startup.

use std::time::Duration;

use semver::Version;
use url::Url;

use crate::error::{CoreError, Result};

/// Helm release names managed by the operator
#[derive(Debug, Clone)]
pub struct ReleaseNames {
    pub platform: String,
    pub storage_driver: String,
}

/// Chart names as published in the platform chart repository
#[derive(Debug, Clone)]
pub struct ChartNames {
    pub platform: String,
    pub storage_driver: String,
}

/// Pinned chart versions the operator deploys
#[derive(Debug, Clone)]
pub struct ChartVersions {
    pub platform: Version,
    pub storage_driver: Version,
}

/// Operator configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub log_level: String,
    /// Retry budget for a single platform deployment
    pub retries: u32,
    /// Delay the scheduler applies between retries
    pub backoff: Duration,
    pub release_names: ReleaseNames,
    pub chart_names: ChartNames,
    pub chart_versions: ChartVersions,
    pub platform_namespace: String,
    pub platform_auth_url: Url,
    pub platform_config_url: Url,
    pub platform_api_url: Url,
    pub coordination_url: Url,
    pub config_watch_interval: Duration,
    /// How long a reconcile waits for the coordination store before
    /// proceeding optimistically
    pub coordination_ready_timeout: Duration,
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Config> {
        Self::load(|name| std::env::var(name).ok())
    }

    /// Load the configuration through an explicit lookup function.
    pub fn load(get: impl Fn(&str) -> Option<String>) -> Result<Config> {
        Ok(Config {
            node_name: require(&get, "RL_NODE_NAME")?,
            log_level: get("RL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            retries: parse_or(&get, "RL_RETRIES", 3)?,
            backoff: Duration::from_secs(parse_or(&get, "RL_BACKOFF_S", 60)?),
            release_names: ReleaseNames {
                platform: "platform".to_string(),
                storage_driver: "platform-storage-driver".to_string(),
            },
            chart_names: ChartNames {
                platform: "platform".to_string(),
                storage_driver: "storage-csi-driver".to_string(),
            },
            chart_versions: ChartVersions {
                platform: parse_version(&get, "RL_PLATFORM_CHART_VERSION")?,
                storage_driver: parse_version(&get, "RL_STORAGE_DRIVER_CHART_VERSION")?,
            },
            platform_namespace: require(&get, "RL_PLATFORM_NAMESPACE")?,
            platform_auth_url: parse_url(&get, "RL_PLATFORM_AUTH_URL")?,
            platform_config_url: parse_url(&get, "RL_PLATFORM_CONFIG_URL")?,
            platform_api_url: parse_url(&get, "RL_PLATFORM_API_URL")?,
            coordination_url: parse_url(&get, "RL_COORDINATION_URL")?,
            config_watch_interval: Duration::from_secs_f64(parse_or(
                &get,
                "RL_CONFIG_WATCH_INTERVAL_S",
                15.0,
            )?),
            coordination_ready_timeout: Duration::from_secs(parse_or(
                &get,
                "RL_COORDINATION_READY_TIMEOUT_S",
                5,
            )?),
        })
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    get(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CoreError::MissingEnv { name: name.to_string() })
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| CoreError::InvalidEnv {
            name: name.to_string(),
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn parse_version(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Version> {
    let raw = require(get, name)?;
    Version::parse(raw.trim_start_matches('v')).map_err(|e| CoreError::InvalidEnv {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn parse_url(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Url> {
    let raw = require(get, name)?;
    Url::parse(&raw).map_err(|e| CoreError::InvalidEnv {
        name: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("RL_NODE_NAME", "node-1"),
            ("RL_PLATFORM_CHART_VERSION", "1.2.3"),
            ("RL_STORAGE_DRIVER_CHART_VERSION", "0.4.0"),
            ("RL_PLATFORM_NAMESPACE", "platform"),
            ("RL_PLATFORM_AUTH_URL", "https://auth.example.io"),
            ("RL_PLATFORM_CONFIG_URL", "https://config.example.io"),
            ("RL_PLATFORM_API_URL", "https://api.example.io"),
            ("RL_COORDINATION_URL", "http://platform-consul:8500"),
        ])
    }

    fn load(env: &HashMap<&str, &str>) -> Result<Config> {
        Config::load(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn load_defaults() {
        let config = load(&env()).unwrap();

        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.retries, 3);
        assert_eq!(config.backoff, Duration::from_secs(60));
        assert_eq!(config.chart_versions.platform, Version::new(1, 2, 3));
        assert_eq!(config.config_watch_interval, Duration::from_secs(15));
        assert_eq!(config.release_names.platform, "platform");
    }

    #[test]
    fn load_overrides() {
        let mut vars = env();
        vars.insert("RL_RETRIES", "5");
        vars.insert("RL_BACKOFF_S", "10");
        vars.insert("RL_CONFIG_WATCH_INTERVAL_S", "1.5");

        let config = load(&vars).unwrap();

        assert_eq!(config.retries, 5);
        assert_eq!(config.backoff, Duration::from_secs(10));
        assert_eq!(config.config_watch_interval, Duration::from_secs_f64(1.5));
    }

    #[test]
    fn missing_variable() {
        let mut vars = env();
        vars.remove("RL_PLATFORM_NAMESPACE");

        let error = load(&vars).unwrap_err();
        assert!(matches!(error, CoreError::MissingEnv { name } if name == "RL_PLATFORM_NAMESPACE"));
    }

    #[test]
    fn invalid_chart_version() {
        let mut vars = env();
        vars.insert("RL_PLATFORM_CHART_VERSION", "not-a-version");

        let error = load(&vars).unwrap_err();
        assert!(matches!(error, CoreError::InvalidEnv { name, .. } if name == "RL_PLATFORM_CHART_VERSION"));
    }

    #[test]
    fn version_prefix_stripped() {
        let mut vars = env();
        vars.insert("RL_PLATFORM_CHART_VERSION", "v2.0.1");

        let config = load(&vars).unwrap();
        assert_eq!(config.chart_versions.platform, Version::new(2, 0, 1));
    }
}
