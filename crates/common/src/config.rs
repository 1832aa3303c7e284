use anyhow::{Context, Result};
use serde::Deserialize;
use validator::Validate;

// Default constants
pub const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SERVER_NAME: &str = "Meridian Server";

pub const DEFAULT_POOL_MAX_SIZE: usize = 10;
pub const DEFAULT_BORROW_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Top-level application configuration.
///
/// Loaded from an optional config file plus `MERIDIAN__`-prefixed
/// environment variables (e.g. `MERIDIAN_SERVER__ADMIN_ADDR` maps to
/// `server.admin_addr`).
#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSettings,
    #[serde(default)]
    pub pools: PoolSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ServerSettings {
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    #[serde(default = "default_server_name")]
    pub name: String,

    #[serde(default)]
    pub observability_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            admin_addr: default_admin_addr(),
            name: default_server_name(),
            observability_enabled: false,
        }
    }
}

fn default_admin_addr() -> String {
    DEFAULT_ADMIN_ADDR.to_string()
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

/// Defaults applied to pools created without explicit sizing.
///
/// `max_size` is fixed at pool-creation time; changing these settings
/// afterwards only affects pools created later.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PoolSettings {
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    #[serde(default = "default_borrow_timeout_ms")]
    pub borrow_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            borrow_timeout_ms: default_borrow_timeout_ms(),
        }
    }
}

fn default_pool_max_size() -> usize {
    DEFAULT_POOL_MAX_SIZE
}

fn default_borrow_timeout_ms() -> u64 {
    DEFAULT_BORROW_TIMEOUT_MS
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // Map MERIDIAN_SERVER__ADMIN_ADDR to server.admin_addr, etc.
        let builder = builder.add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}
