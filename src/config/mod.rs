pub mod backend;
pub mod hot_reload;
pub mod paths;

use crate::auth::AuthenticatorOptions;
use crate::cache::CacheOptions;
use crate::rewriter::RewriteInstruction;
use crate::tracer::TracingOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use backend::{AlbOptions, BackendOptions, HealthCheckOptions, LoadBalanceStrategy};
pub use hot_reload::ConfigHotReload;
pub use paths::{MatchType, PathConfig, PathTable};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub main: MainConfig,
    /// Proxy listener configuration
    #[serde(default)]
    pub frontend: FrontendConfig,
    /// Metrics/management listener configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Map of backend name to backend configuration
    pub backends: BTreeMap<String, BackendOptions>,
    /// Named caches
    #[serde(default)]
    pub caches: HashMap<String, CacheOptions>,
    /// Named tracing pipelines
    #[serde(default)]
    pub tracing: HashMap<String, TracingOptions>,
    /// Named authenticators
    #[serde(default)]
    pub authenticators: HashMap<String, AuthenticatorOptions>,
    /// Named request rewriters
    #[serde(default)]
    pub request_rewriters: HashMap<String, Vec<RewriteInstruction>>,
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MainConfig {
    /// Prefix of the per-backend health routes on the metrics listener
    #[serde(default = "default_health_handler_path")]
    pub health_handler_path: String,
    /// Watch the configuration file and rebuild routes on change
    #[serde(default)]
    pub reload_config: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            health_handler_path: default_health_handler_path(),
            reload_config: false,
        }
    }
}

/// Proxy listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrontendConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_frontend_port")]
    pub listen_port: u16,
    /// Global timeout in seconds
    #[serde(default = "default_global_timeout")]
    pub timeout: u64,
    /// Request logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_frontend_port(),
            timeout: default_global_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Metrics listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Serve the metrics surface at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_metrics_port")]
    pub listen_port: u16,
    /// Register per-backend health routes on the metrics surface
    #[serde(default = "default_true")]
    pub health_routes: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: default_listen_address(),
            listen_port: default_metrics_port(),
            health_routes: true,
        }
    }
}

/// Request logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log headers
    #[serde(default = "default_true")]
    pub log_headers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { log_headers: true }
    }
}

fn default_health_handler_path() -> String {
    "/health".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_frontend_port() -> u16 {
    8480
}

fn default_metrics_port() -> u16 {
    8481
}

fn default_global_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, expanding `${env:...}` placeholders
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let interpolated = crate::env_interpolation::interpolate_yaml_string(content);
        let mut config: Config = serde_yaml::from_str(&interpolated)?;
        config.apply_defaults();
        Ok(config)
    }

    /// Fill in values derived from the rest of the configuration
    fn apply_defaults(&mut self) {
        for (name, backend) in self.backends.iter_mut() {
            backend.name = name.clone();
        }
        self.caches
            .entry("default".to_string())
            .or_insert_with(CacheOptions::default);
    }

    /// Validate cross references that registration does not check itself
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("configuration must define at least one backend");
        }

        for (name, backend) in &self.backends {
            if let Some(auth) = &backend.authenticator_name {
                if !self.authenticators.contains_key(auth) {
                    anyhow::bail!("Backend {} references unknown authenticator: {}", name, auth);
                }
            }
            if let Some(rewriter) = &backend.req_rewriter_name {
                if !self.request_rewriters.contains_key(rewriter) {
                    anyhow::bail!("Backend {} references unknown rewriter: {}", name, rewriter);
                }
            }
            for (key, path) in &backend.paths {
                if let Some(auth) = &path.authenticator_name {
                    if auth != paths::AUTHENTICATOR_NONE && !self.authenticators.contains_key(auth)
                    {
                        anyhow::bail!(
                            "Path {} of backend {} references unknown authenticator: {}",
                            key,
                            name,
                            auth
                        );
                    }
                }
                if let Some(rewriter) = &path.req_rewriter_name {
                    if !self.request_rewriters.contains_key(rewriter) {
                        anyhow::bail!(
                            "Path {} of backend {} references unknown rewriter: {}",
                            key,
                            name,
                            rewriter
                        );
                    }
                }
            }
            if let Some(alb) = &backend.alb {
                for member in &alb.pool {
                    if member == name {
                        anyhow::bail!("Backend {} lists itself in its alb pool", name);
                    }
                    if !self.backends.contains_key(member) {
                        anyhow::bail!(
                            "Backend {} references unknown alb pool member: {}",
                            name,
                            member
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
main:
  health_handler_path: /mgmt/health
metrics:
  listen_port: 9100
backends:
  prom1:
    provider: rpc
    origin_url: "http://prometheus:9090"
    is_default: true
    hosts: [prom.example.com]
    paths:
      "/-GET-HEAD":
        methods: [GET]
  proxy1:
    provider: rp
    origin_url: "http://app:8080"
    healthcheck:
      verb: x
"#;

        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends["prom1"].name, "prom1");
        assert!(config.backends["prom1"].is_default);
        assert_eq!(config.backends["prom1"].paths["/-GET-HEAD"].custom, vec!["methods"]);
        assert!(config.backends["proxy1"].healthcheck.is_disabled());
        assert_eq!(config.main.health_handler_path, "/mgmt/health");
        assert_eq!(config.metrics.listen_port, 9100);
        assert!(config.caches.contains_key("default"));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_interpolation_in_config() {
        std::env::set_var("PMP_TEST_ORIGIN", "http://origin:1234");
        let yaml = r#"
backends:
  api:
    provider: rp
    origin_url: "${env:PMP_TEST_ORIGIN}"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.backends["api"].origin_url, "http://origin:1234");
        std::env::remove_var("PMP_TEST_ORIGIN");
    }

    #[test]
    fn test_validate_rejects_unknown_authenticator() {
        let yaml = r#"
backends:
  api:
    provider: rp
    authenticator_name: missing
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown authenticator"));
    }

    #[test]
    fn test_validate_allows_none_authenticator_on_paths() {
        let yaml = r#"
backends:
  api:
    provider: rp
    paths:
      open:
        path: /open
        authenticator_name: none
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_pool_member() {
        let yaml = r#"
backends:
  lb:
    provider: alb
    alb:
      pool: [ghost]
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_backends() {
        let config = Config::from_yaml_str("backends: {}").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backends:\n  api:\n    provider: rp").unwrap();

        let config = Config::from_yaml_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backends["api"].provider, "rp");
    }
}
