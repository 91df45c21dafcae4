use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the webhook listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Events older than this are acknowledged but ignored
    #[serde(default = "default_max_event_age_secs")]
    pub max_event_age_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_event_age_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,
    /// Bot API base URL (overridable for tests)
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoalescerConfig {
    /// Debounce delay after the last event of a burst, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Hard cap on how long a bucket may defer its flush, in milliseconds.
    /// Continuous arrivals re-arm the debounce; this bounds the total wait.
    #[serde(default = "default_max_defer_ms")]
    pub max_defer_ms: u64,
}

fn default_debounce_ms() -> u64 {
    3_000
}

fn default_max_defer_ms() -> u64 {
    30_000
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_defer_ms: default_max_defer_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    /// Quote endpoint base URL
    #[serde(default = "default_rates_url")]
    pub rates_url: String,
    /// Cached rate lifetime in seconds
    #[serde(default = "default_rate_ttl_secs")]
    pub rate_ttl_secs: u64,
}

fn default_rates_url() -> String {
    "https://economia.awesomeapi.com.br".to_string()
}

fn default_rate_ttl_secs() -> u64 {
    3_600
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            rates_url: default_rates_url(),
            rate_ttl_secs: default_rate_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("server.bind_addr", "0.0.0.0:8080")?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGRAM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADEGRAM_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("TRADEGRAM")
                    // Single underscore after the prefix, double between
                    // nested keys: TRADEGRAM_DATABASE__URL
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
