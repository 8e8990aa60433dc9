use config::{Config, ConfigError, Environment, File};
use retry_utils::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Helius enhanced-transactions API (transaction history)
    pub helius: HeliusConfig,

    /// BirdEye API (current and historical USD prices)
    pub birdeye: BirdEyeConfig,

    /// PNL engine behaviour
    pub engine: EngineConfig,

    /// Retry schedule for all outbound provider calls
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusConfig {
    /// Helius API key
    pub api_key: String,

    /// Helius API base URL
    pub api_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Transactions requested per page (Helius caps this at 100)
    pub page_size: u32,

    /// Stop paging after this many transactions (None = full history)
    pub max_transactions: Option<u32>,

    /// Delay between page requests in milliseconds
    pub rate_limit_ms: u64,

    /// Enable Helius as the history source
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirdEyeConfig {
    /// BirdEye API key
    pub api_key: String,

    /// BirdEye API base URL
    pub api_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Value of the x-chain header
    pub chain: String,

    /// Maximum mints per multi_price request
    pub max_batch_size: usize,

    /// Look up historical prices for legs the history provider left unpriced
    pub historical_prices: bool,
}

/// Which quantity the valuation pass trusts when the incrementally tracked
/// holding quantity disagrees with the sum of its remaining lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityReconciliation {
    /// Keep the tracked quantity
    #[default]
    Tracked,
    /// Recompute from the lot ledger
    LotSum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tie-break policy for tracked vs lot-derived quantity
    pub quantity_reconciliation: QuantityReconciliation,

    /// Whole-history fetch timeout; exceeding it aborts the computation
    pub history_timeout_seconds: u64,

    /// Current-price fetch timeout; exceeding it values open positions at zero
    pub price_timeout_seconds: u64,

    /// Wallets computed concurrently by compute_many
    pub max_concurrent_wallets: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantity_reconciliation: QuantityReconciliation::Tracked,
            history_timeout_seconds: 120,
            price_timeout_seconds: 20,
            max_concurrent_wallets: 4,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            helius: HeliusConfig {
                api_key: "".to_string(), // Must be set in config.toml or PNL__HELIUS__API_KEY
                api_base_url: "https://api.helius.xyz/v0".to_string(),
                request_timeout_seconds: 30,
                page_size: 100,
                max_transactions: None,
                rate_limit_ms: 100,
                enabled: true,
            },
            birdeye: BirdEyeConfig {
                api_key: "".to_string(), // Must be set in config.toml or PNL__BIRDEYE__API_KEY
                api_base_url: "https://public-api.birdeye.so".to_string(),
                request_timeout_seconds: 30,
                chain: "solana".to_string(),
                max_batch_size: 100,
                historical_prices: true,
            },
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl HeliusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.api_key.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "Helius API key is required when Helius is enabled".to_string(),
            ));
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Helius request timeout must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > 100 {
            return Err(ConfigurationError::InvalidValue(format!(
                "Helius page size must be between 1 and 100, got {}",
                self.page_size
            )));
        }

        Ok(())
    }
}

impl BirdEyeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "BirdEye API key is required".to_string(),
            ));
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "BirdEye request timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "BirdEye batch size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_timeout_seconds == 0 || self.price_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Engine timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_wallets == 0 {
            return Err(ConfigurationError::InvalidValue(
                "max_concurrent_wallets must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl SystemConfig {
    /// Load configuration from ./config.toml and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        // PNL__HELIUS__API_KEY, PNL__ENGINE__QUANTITY_RECONCILIATION, ...
        config_builder = config_builder.add_source(
            Environment::with_prefix("PNL")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("retry.rate_limit_delays_ms")
                .with_list_parse_key("retry.server_error_delays_ms")
                .with_list_parse_key("retry.timeout_delays_ms"),
        );

        let system_config: SystemConfig = config_builder.build()?.try_deserialize()?;

        system_config.validate()?;

        Ok(system_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.helius.validate()?;
        self.birdeye.validate()?;
        self.engine.validate()?;

        Ok(())
    }

    /// Configuration as JSON with API keys masked, for diagnostics
    pub fn to_redacted_json(&self) -> serde_json::Value {
        let mut redacted = self.clone();
        redacted.helius.api_key = mask_secret(&redacted.helius.api_key);
        redacted.birdeye.api_key = mask_secret(&redacted.birdeye.api_key);
        serde_json::to_value(redacted).unwrap_or(serde_json::Value::Null)
    }
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        let visible: String = secret.chars().take(4).collect();
        format!("{}…", visible)
    }
}
