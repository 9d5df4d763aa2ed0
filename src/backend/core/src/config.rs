//! Configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Mirroring pipeline configuration
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// External tool binaries
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Notification configuration
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            mirror: MirrorConfig::default(),
            tools: ToolsConfig::default(),
            notifications: NotificationsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Home directory holding job working directories and the package cache
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// Source registry images are pulled from
    #[serde(default = "default_source_registry")]
    pub source_registry: String,

    /// Default target registry for generated manifests
    #[serde(default = "default_final_registry")]
    pub final_registry: String,

    /// Registry auth file consulted before attempting a fresh login
    #[serde(default = "default_registry_auth_file")]
    pub registry_auth_file: PathBuf,

    /// Entitlement key used for registry login; redacted in all output
    #[serde(default)]
    pub entitlement_key: Option<String>,

    /// Minimum free disk space required by the preflight check (GB)
    #[serde(default = "default_min_disk_space_gb")]
    pub min_disk_space_gb: u64,

    /// Attempt budget for retryable pipeline stages
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Parallelism passed to the mirror tool per registry
    #[serde(default = "default_max_per_registry")]
    pub max_per_registry: u32,

    /// Timeout for short pipeline stages (auth, fetch, manifests)
    #[serde(default = "default_stage_timeout", with = "humantime_serde")]
    pub stage_timeout: Duration,

    /// Timeout for the long-running mirror stage
    #[serde(default = "default_mirror_timeout", with = "humantime_serde")]
    pub mirror_timeout: Duration,

    /// Probe public catalog hosts before fetching, falling back to the
    /// OCI repo when unreachable
    #[serde(default = "default_check_catalog_reachability")]
    pub check_catalog_reachability: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            source_registry: default_source_registry(),
            final_registry: default_final_registry(),
            registry_auth_file: default_registry_auth_file(),
            entitlement_key: None,
            min_disk_space_gb: default_min_disk_space_gb(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            max_per_registry: default_max_per_registry(),
            stage_timeout: default_stage_timeout(),
            mirror_timeout: default_mirror_timeout(),
            check_catalog_reachability: default_check_catalog_reachability(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Cluster CLI used for package fetch, manifest generation and mirroring
    #[serde(default = "default_cluster_cli")]
    pub cluster_cli: String,

    /// Registry CLI used for authentication
    #[serde(default = "default_registry_cli")]
    pub registry_cli: String,

    /// Mail command used for email notifications
    #[serde(default = "default_mail_cmd")]
    pub mail_cmd: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            cluster_cli: default_cluster_cli(),
            registry_cli: default_registry_cli(),
            mail_cmd: default_mail_cmd(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    /// Webhook URL receiving lifecycle notifications
    pub webhook_url: Option<String>,

    /// Email address receiving lifecycle notifications
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_home_dir() -> PathBuf { PathBuf::from("/opt/pakmirror") }
fn default_source_registry() -> String { "cp.icr.io".to_string() }
fn default_final_registry() -> String { "registry.example.com:5000".to_string() }
fn default_registry_auth_file() -> PathBuf { PathBuf::from("/root/.docker/config.json") }
fn default_min_disk_space_gb() -> u64 { 100 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay() -> Duration { Duration::from_secs(5) }
fn default_max_per_registry() -> u32 { 2 }
fn default_stage_timeout() -> Duration { Duration::from_secs(600) }
fn default_mirror_timeout() -> Duration { Duration::from_secs(12 * 3600) }
fn default_check_catalog_reachability() -> bool { true }
fn default_cluster_cli() -> String { "oc".to_string() }
fn default_registry_cli() -> String { "podman".to_string() }
fn default_mail_cmd() -> String { "mail".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PAKMIRROR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PAKMIRROR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// A redacted view safe to expose over the API.
    pub fn redacted_view(&self) -> RedactedConfig {
        RedactedConfig {
            home_dir: self.mirror.home_dir.display().to_string(),
            source_registry: self.mirror.source_registry.clone(),
            final_registry: self.mirror.final_registry.clone(),
            registry_auth_file: self.mirror.registry_auth_file.display().to_string(),
            entitlement_key: self.mirror.entitlement_key.as_ref().map(|_| "********".to_string()),
            min_disk_space_gb: self.mirror.min_disk_space_gb,
            max_retries: self.mirror.max_retries,
            max_per_registry: self.mirror.max_per_registry,
            webhook_configured: self.notifications.webhook_url.is_some(),
            email_configured: self.notifications.email.is_some(),
        }
    }
}

/// Configuration view with secrets replaced by placeholders.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfig {
    pub home_dir: String,
    pub source_registry: String,
    pub final_registry: String,
    pub registry_auth_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement_key: Option<String>,
    pub min_disk_space_gb: u64,
    pub max_retries: u32,
    pub max_per_registry: u32,
    pub webhook_configured: bool,
    pub email_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.mirror.min_disk_space_gb, 100);
        assert_eq!(cfg.mirror.max_retries, 3);
        assert_eq!(cfg.mirror.retry_base_delay, Duration::from_secs(5));
        assert_eq!(cfg.tools.cluster_cli, "oc");
    }

    #[test]
    fn test_redacted_view_hides_entitlement_key() {
        let mut cfg = Config::default();
        cfg.mirror.entitlement_key = Some("super-secret-key".to_string());
        let view = cfg.redacted_view();
        assert_eq!(view.entitlement_key.as_deref(), Some("********"));
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("super-secret-key"));
    }
}
