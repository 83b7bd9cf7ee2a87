use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::core_types::Currency;
use crate::order::OrderSettings;
use crate::payment::PaymentSettings;
use crate::settlement::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_pg_connections")]
    pub postgres_max_connections: u32,
    #[serde(default)]
    pub shop: ShopConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "digistore.log".to_string()
}

fn default_pg_connections() -> u32 {
    20
}

fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// HS256 secret for user bearer tokens
    pub jwt_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShopConfig {
    pub currency: String,
    pub order_expire_minutes: i64,
    pub order_no_prefix: String,
    pub guest_orders_enabled: bool,
    /// Node id mixed into generated numbers
    pub machine_id: u8,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            currency: "CNY".to_string(),
            order_expire_minutes: 15,
            order_no_prefix: "DS".to_string(),
            guest_orders_enabled: true,
            machine_id: 1,
        }
    }
}

impl ShopConfig {
    pub fn order_settings(&self) -> OrderSettings {
        OrderSettings {
            currency: Currency::new(&self.currency),
            expire_minutes: self.order_expire_minutes.max(1),
            order_no_prefix: self.order_no_prefix.clone(),
            guest_orders_enabled: self.guest_orders_enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PaymentConfig {
    /// Bound on every outbound provider call
    pub http_timeout_secs: u64,
    pub notify_url: String,
    pub return_url: String,
    pub channel_cache_ttl_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        let defaults = PaymentSettings::default();
        Self {
            http_timeout_secs: 10,
            notify_url: defaults.notify_url,
            return_url: defaults.return_url,
            channel_cache_ttl_secs: 60,
        }
    }
}

impl PaymentConfig {
    pub fn settings(&self) -> PaymentSettings {
        PaymentSettings {
            notify_url: self.notify_url.clone(),
            return_url: self.return_url.clone(),
            ..PaymentSettings::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerSettings {
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl WorkerSettings {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs.max(1)),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
            batch_size: self.batch_size.max(1),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
