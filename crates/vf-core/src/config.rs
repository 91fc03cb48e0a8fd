use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.viewfinder/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            kv: KvConfig::default(),
            lock: LockConfig::default(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.viewfinder/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config =
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".viewfinder")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_environment() -> String {
    "dev".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// KV Client (C1) backend selection. Only an in-memory backend ships here
/// (§10.6 Non-goal note: a production DynamoDB driver is out of scope) but
/// the section is shaped to grow a `dynamodb` variant without a breaking
/// config change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "default_kv_backend")]
    pub backend: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: default_kv_backend(),
            table_prefix: default_table_prefix(),
        }
    }
}

fn default_kv_backend() -> String {
    "memory".into()
}
fn default_table_prefix() -> String {
    "vf".into()
}

/// Lock Manager (C2) timing (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_abandonment_secs")]
    pub abandonment_secs: u64,
    #[serde(default = "default_lock_renewal_secs")]
    pub lock_renewal_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            abandonment_secs: default_abandonment_secs(),
            lock_renewal_secs: default_lock_renewal_secs(),
        }
    }
}

fn default_abandonment_secs() -> u64 {
    60
}
fn default_lock_renewal_secs() -> u64 {
    20
}

/// Operation Manager / Scheduler (C4) tuning (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: u32,
    #[serde(default = "default_fairness_channel_depth")]
    pub fairness_channel_depth: usize,
    #[serde(default)]
    pub scan_ops_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: default_max_backoff_secs(),
            quarantine_threshold: default_quarantine_threshold(),
            fairness_channel_depth: default_fairness_channel_depth(),
            scan_ops_on_startup: true,
        }
    }
}

fn default_max_backoff_secs() -> u64 {
    60
}
fn default_quarantine_threshold() -> u32 {
    20
}
fn default_fairness_channel_depth() -> usize {
    256
}

/// Side-Effect Gateway (C9) backend selection (§4.9, §10.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_backend")]
    pub backend: String,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_reset_secs")]
    pub circuit_reset_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: default_gateway_backend(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_secs: default_circuit_reset_secs(),
        }
    }
}

fn default_gateway_backend() -> String {
    "logging".into()
}
fn default_circuit_failure_threshold() -> u32 {
    5
}
fn default_circuit_reset_secs() -> u64 {
    30
}

/// HTTP front door (`vf-server`) bind address and dynamic-port lockfile
/// behavior (§10.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default)]
    pub ephemeral_port: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            ephemeral_port: false,
        }
    }
}

fn default_server_host() -> String {
    "127.0.0.1".into()
}
fn default_server_port() -> u16 {
    8040
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let toml_str = cfg.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.lock.abandonment_secs, cfg.lock.abandonment_secs);
        assert_eq!(parsed.scheduler.quarantine_threshold, cfg.scheduler.quarantine_threshold);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let partial = "[server]\nport = 9999\n";
        let cfg: Config = toml::from_str(partial).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.host, default_server_host());
        assert_eq!(cfg.lock.abandonment_secs, default_abandonment_secs());
    }
}
