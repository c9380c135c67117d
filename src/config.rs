use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::lock::LockSettings;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// Store backend for accounts, transactions and locks
    #[serde(default)]
    pub backend: Backend,
    /// PostgreSQL connection URL (required for `backend: postgres`)
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Redis connection URL for the lock store (required for `backend: postgres`)
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// CAS retry budget for balance updates
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingConfig {
    pub max_retries: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Reconciliation sweep settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.backend == Backend::Postgres {
            anyhow::ensure!(
                config.postgres_url.is_some(),
                "postgres_url is required for the postgres backend"
            );
            anyhow::ensure!(
                config.redis_url.is_some(),
                "redis_url is required for the postgres backend"
            );
        }
        Ok(config)
    }
}
