// TOML config for container-wecker.
//
// Lookup order: $WECKER_CONFIG, /etc/container-wecker/wecker.toml, ./wecker.toml.
// Missing files fall back to built-in defaults; environment variables override
// whatever the file says.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::WatchSettings;
use crate::providers::busy::BreakerConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/container-wecker/wecker.toml";
pub const DEV_CONFIG_PATH: &str = "wecker.toml";

/// Upper bound for the breaker's backoff window.
pub const MAX_BACKOFF_SECS: u64 = 86_400;

const DEFAULT_TRANSMISSION_URL: &str = "http://192.168.1.100:9091/transmission/rpc";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 881,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub inactivity_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 180,
            poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransmissionConfig {
    pub rpc_url: String,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_TRANSMISSION_URL.to_string(),
            request_timeout_secs: 10,
            failure_threshold: 3,
            backoff_base_secs: 30,
            backoff_max_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeckerConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub transmission: TransmissionConfig,
}

impl WeckerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }

    /// Applies overrides from `lookup`, which is `std::env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRANSMISSION_RPC_URL") {
            self.transmission.rpc_url = url;
        }
        if let Some(bind) = lookup("WECKER_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("WECKER_PORT") {
            self.server.port = parse_var("WECKER_PORT", &port)?;
        }
        if let Some(secs) = lookup("WECKER_INACTIVITY_TIMEOUT_SECS") {
            self.lifecycle.inactivity_timeout_secs =
                parse_var("WECKER_INACTIVITY_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("WECKER_POLL_INTERVAL_SECS") {
            self.lifecycle.poll_interval_secs = parse_var("WECKER_POLL_INTERVAL_SECS", &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lifecycle.inactivity_timeout_secs == 0 {
            anyhow::bail!("lifecycle.inactivity_timeout_secs must be greater than zero");
        }
        if self.lifecycle.poll_interval_secs == 0 {
            anyhow::bail!("lifecycle.poll_interval_secs must be greater than zero");
        }
        if self.transmission.request_timeout_secs == 0 {
            anyhow::bail!("transmission.request_timeout_secs must be greater than zero");
        }
        if self.transmission.failure_threshold == 0 {
            anyhow::bail!("transmission.failure_threshold must be greater than zero");
        }
        if self.transmission.backoff_base_secs > self.transmission.backoff_max_secs {
            anyhow::bail!(
                "transmission.backoff_base_secs ({}) exceeds backoff_max_secs ({})",
                self.transmission.backoff_base_secs,
                self.transmission.backoff_max_secs
            );
        }
        if self.transmission.backoff_max_secs > MAX_BACKOFF_SECS {
            anyhow::bail!(
                "transmission.backoff_max_secs ({}) exceeds {}",
                self.transmission.backoff_max_secs,
                MAX_BACKOFF_SECS
            );
        }
        reqwest::Url::parse(&self.transmission.rpc_url).map_err(|e| {
            anyhow::anyhow!(
                "transmission.rpc_url is not a valid URL ({}): {}",
                self.transmission.rpc_url,
                e
            )
        })?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            inactivity_timeout: Duration::from_secs(self.lifecycle.inactivity_timeout_secs),
            poll_interval: Duration::from_secs(self.lifecycle.poll_interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transmission.request_timeout_secs)
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.transmission.failure_threshold,
            backoff_base: Duration::from_secs(self.transmission.backoff_base_secs),
            backoff_max: Duration::from_secs(self.transmission.backoff_max_secs),
        }
    }
}

fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {} ({:?}): {}", key, value, e))
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("WECKER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    [DEFAULT_CONFIG_PATH, DEV_CONFIG_PATH]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Loads the file (if any), applies environment overrides and validates.
pub fn load_config() -> anyhow::Result<WeckerConfig> {
    let mut config = match config_path() {
        Some(path) => {
            let config = WeckerConfig::load_from_file(&path)?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => {
            tracing::info!("No config file found, using defaults");
            WeckerConfig::default()
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_classic_deployment() {
        let config = WeckerConfig::default();
        assert_eq!(config.server.port, 881);
        assert_eq!(config.lifecycle.inactivity_timeout_secs, 180);
        assert_eq!(config.lifecycle.poll_interval_secs, 30);
        assert_eq!(config.bind_addr(), "0.0.0.0:881");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
        [lifecycle]
        inactivity_timeout_secs = 600

        [transmission]
        rpc_url = "http://nas.local:9091/transmission/rpc"
        "#;

        let config: WeckerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.lifecycle.inactivity_timeout_secs, 600);
        assert_eq!(config.lifecycle.poll_interval_secs, 30);
        assert_eq!(
            config.transmission.rpc_url,
            "http://nas.local:9091/transmission/rpc"
        );
        assert_eq!(config.transmission.request_timeout_secs, 10);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(
            config.watch_settings().inactivity_timeout,
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("TRANSMISSION_RPC_URL", "http://10.0.0.5:9091/transmission/rpc"),
            ("WECKER_PORT", "8080"),
            ("WECKER_POLL_INTERVAL_SECS", " 5 "),
        ]
        .into_iter()
        .collect();

        let mut config = WeckerConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.transmission.rpc_url, "http://10.0.0.5:9091/transmission/rpc");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.lifecycle.poll_interval_secs, 5);
        assert_eq!(config.lifecycle.inactivity_timeout_secs, 180);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = WeckerConfig::default();
        let err = config
            .apply_overrides(|k| (k == "WECKER_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WECKER_PORT"));
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut config = WeckerConfig::default();
        config.lifecycle.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = WeckerConfig::default();
        config.transmission.rpc_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = WeckerConfig::default();
        config.transmission.backoff_base_secs = 900;
        assert!(config.validate().is_err());

        let mut config = WeckerConfig::default();
        config.transmission.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = WeckerConfig::default();
        config.transmission.backoff_base_secs = u64::MAX / 2;
        config.transmission.backoff_max_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_breaker_settings() {
        let breaker = WeckerConfig::default().breaker();
        assert_eq!(breaker, BreakerConfig::default());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(WeckerConfig::load_from_file("/nonexistent/wecker.toml").is_err());
    }
}
