use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::BirdEyeConfig;
use pnl_core::{CurrentPriceProvider, HistoricalPriceProvider, PnLError};
use reqwest::Client;
use retry_utils::{retry_with_backoff, RetryConfig, RetryableError};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BirdEyeError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication error")]
    Auth,
}

impl BirdEyeError {
    pub fn retry_class(&self) -> RetryableError {
        match self {
            BirdEyeError::RateLimit => RetryableError::RateLimit,
            BirdEyeError::Status(status) => RetryableError::from_status(*status),
            BirdEyeError::Http(e) if e.is_timeout() || e.is_connect() => RetryableError::Timeout,
            _ => RetryableError::Other,
        }
    }
}

/// Price entry in a multi_price response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceData {
    pub value: f64,
    #[serde(rename = "updateUnixTime")]
    pub update_unix_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPriceResponse {
    pub success: bool,
    /// Unknown mints come back as null
    #[serde(default)]
    pub data: HashMap<String, Option<PriceData>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalPriceResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<PriceData>,
}

/// Decimal for a JSON float price; non-finite or negative prices are dropped
fn price_to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Decimal::from_f64(value)
}

/// Parse a multi_price body into mint -> USD price
pub fn parse_multi_price(body: &str) -> Result<HashMap<String, Decimal>, BirdEyeError> {
    let response: MultiPriceResponse = serde_json::from_str(body)
        .map_err(|e| BirdEyeError::InvalidResponse(format!("JSON parse error: {}", e)))?;

    if !response.success {
        return Err(BirdEyeError::Api("API returned success=false".to_string()));
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(|(mint, price)| {
            price
                .and_then(|p| price_to_decimal(p.value))
                .map(|p| (mint, p))
        })
        .collect())
}

/// Parse a historical_price_unix body; a null `data` means no price
pub fn parse_historical_price(body: &str) -> Result<Option<Decimal>, BirdEyeError> {
    let response: HistoricalPriceResponse = serde_json::from_str(body)
        .map_err(|e| BirdEyeError::InvalidResponse(format!("JSON parse error: {}", e)))?;

    if !response.success {
        return Err(BirdEyeError::Api("API returned success=false".to_string()));
    }

    Ok(response.data.and_then(|p| price_to_decimal(p.value)))
}

/// BirdEye price client: current prices for valuation, historical prices for
/// legs the history source left unpriced
#[derive(Debug, Clone)]
pub struct BirdEyeClient {
    config: BirdEyeConfig,
    http_client: Client,
    retry: RetryConfig,
}

impl BirdEyeClient {
    pub fn new(config: BirdEyeConfig, retry: RetryConfig) -> Result<Self, BirdEyeError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
            retry,
        })
    }

    /// Get the BirdEye client configuration
    pub fn config(&self) -> &BirdEyeConfig {
        &self.config
    }

    async fn get(&self, path: &str, query: Vec<(&'static str, String)>) -> Result<String, BirdEyeError> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);

        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", &self.config.api_key)
            .header("x-chain", &self.config.chain)
            .query(&query)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response.text().await?),
            429 => Err(BirdEyeError::RateLimit),
            401 | 403 => Err(BirdEyeError::Auth),
            _ => Err(BirdEyeError::Status(status)),
        }
    }

    /// Current prices for one batch of mints (one multi_price request)
    pub async fn get_current_prices(&self, token_addresses: &[String]) -> Result<HashMap<String, Decimal>, BirdEyeError> {
        debug!("Fetching current prices from BirdEye for {} tokens", token_addresses.len());
        let address_list = token_addresses.join(",");

        let body = retry_with_backoff(
            || self.get("/defi/multi_price", vec![("list_address", address_list.clone())]),
            &self.retry,
            BirdEyeError::retry_class,
        )
        .await
        .map_err(|e| e.into_inner())?;

        let prices = parse_multi_price(&body)?;
        debug!(
            "Retrieved current prices from BirdEye for {}/{} tokens",
            prices.len(),
            token_addresses.len()
        );
        Ok(prices)
    }

    /// Price of `token_address` at `unix_timestamp`, if BirdEye has one
    pub async fn get_historical_price(
        &self,
        token_address: &str,
        unix_timestamp: i64,
    ) -> Result<Option<Decimal>, BirdEyeError> {
        let unix_time = unix_timestamp.to_string();

        let body = retry_with_backoff(
            || {
                self.get(
                    "/defi/historical_price_unix",
                    vec![
                        ("address", token_address.to_string()),
                        ("unix_time", unix_time.clone()),
                    ],
                )
            },
            &self.retry,
            BirdEyeError::retry_class,
        )
        .await
        .map_err(|e| e.into_inner())?;

        let price = parse_historical_price(&body)?;
        debug!(
            "Historical price for {} at {}: {:?}",
            token_address, unix_timestamp, price
        );
        Ok(price)
    }
}

#[async_trait]
impl CurrentPriceProvider for BirdEyeClient {
    /// Batches of `max_batch_size`; a failed batch leaves its mints unpriced
    /// unless every batch failed.
    async fn fetch_current_prices(&self, mints: &BTreeSet<String>) -> pnl_core::Result<HashMap<String, Decimal>> {
        let mints: Vec<String> = mints.iter().cloned().collect();
        let mut prices = HashMap::new();
        let mut last_error = None;

        for batch in mints.chunks(self.config.max_batch_size.max(1)) {
            match self.get_current_prices(batch).await {
                Ok(batch_prices) => prices.extend(batch_prices),
                Err(e) => {
                    warn!("BirdEye price batch of {} mints failed: {}", batch.len(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if prices.is_empty() => Err(PnLError::PriceUnavailable(format!("BirdEye: {}", e))),
            _ => Ok(prices),
        }
    }
}

#[async_trait]
impl HistoricalPriceProvider for BirdEyeClient {
    async fn fetch_historical_price(&self, mint: &str, at: DateTime<Utc>) -> pnl_core::Result<Option<Decimal>> {
        if !self.config.historical_prices {
            return Ok(None);
        }

        self.get_historical_price(mint, at.timestamp())
            .await
            .map_err(|e| PnLError::PriceUnavailable(format!("BirdEye historical {}: {}", mint, e)))
    }
}
