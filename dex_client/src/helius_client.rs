use async_trait::async_trait;
use config_manager::HeliusConfig;
use pnl_core::transaction::{SOL_DECIMALS, WSOL_MINT};
use pnl_core::{
    HistoricalPriceProvider, PnLError, RawBalanceChange, RawHistoryRecord, Transaction,
    TransactionHistoryProvider, TransactionNormalizer,
};
use reqwest::Client;
use retry_utils::{retry_with_backoff, RetryConfig, RetryableError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum HeliusError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsingFailed(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, HeliusError>;

impl HeliusError {
    /// How the retry loop should treat this error
    pub fn retry_class(&self) -> RetryableError {
        match self {
            HeliusError::RateLimitExceeded => RetryableError::RateLimit,
            HeliusError::ApiError { status, .. } => RetryableError::from_status(*status),
            HeliusError::RequestFailed(e) if e.is_timeout() || e.is_connect() => RetryableError::Timeout,
            HeliusError::RequestFailed(e) => e
                .status()
                .map(|s| RetryableError::from_status(s.as_u16()))
                .unwrap_or(RetryableError::Other),
            HeliusError::JsonParsingFailed(_) | HeliusError::ConfigError(_) => RetryableError::Other,
        }
    }
}

/// Helius enhanced-transactions client; the wallet history source
#[derive(Clone)]
pub struct HeliusClient {
    /// HTTP client for making requests
    http_client: Client,

    /// Helius API configuration
    config: HeliusConfig,

    /// Retry schedule shared by every request
    retry: RetryConfig,

    /// Prices legs Helius leaves unpriced (it never prices them itself)
    historical_prices: Option<Arc<dyn HistoricalPriceProvider>>,
}

impl HeliusClient {
    /// Create a new Helius client with the given configuration
    pub fn new(config: HeliusConfig, retry: RetryConfig) -> Result<Self> {
        if config.enabled && config.api_key.is_empty() {
            return Err(HeliusError::ConfigError(
                "Helius API key is required when Helius is enabled".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("wallet-pnl/0.1")
            .build()
            .map_err(|e| HeliusError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
            retry,
            historical_prices: None,
        })
    }

    /// Set the source used to price legs at transaction time
    pub fn with_historical_prices(mut self, provider: Arc<dyn HistoricalPriceProvider>) -> Self {
        self.historical_prices = Some(provider);
        self
    }

    /// Check if Helius client is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Build the Helius API URL for one page of wallet transactions
    pub fn build_transactions_url(&self, wallet_address: &str, before: Option<&str>, limit: u32) -> String {
        let mut url = format!(
            "{}/addresses/{}/transactions?api-key={}&limit={}",
            self.config.api_base_url.trim_end_matches('/'),
            wallet_address,
            self.config.api_key,
            limit
        );

        if let Some(before_signature) = before {
            url.push_str(&format!("&before={}", before_signature));
        }

        url
    }

    /// Fetch the wallet's full history (newest first, as Helius pages it),
    /// stopping early at `max_transactions` when configured.
    pub async fn fetch_wallet_transactions(&self, wallet_address: &str) -> Result<Vec<HeliusTransaction>> {
        if !self.is_enabled() {
            return Err(HeliusError::ConfigError(
                "Helius client is disabled in configuration".to_string(),
            ));
        }

        self.collect_pages(wallet_address, move |before, limit| async move {
            retry_with_backoff(
                || self.fetch_transaction_page(wallet_address, before.as_deref(), limit),
                &self.retry,
                HeliusError::retry_class,
            )
            .await
            .map_err(|e| e.into_inner())
        })
        .await
    }

    /// Walk pages backwards with the `before` cursor until Helius returns an
    /// empty page or `max_transactions` is reached. Helius may return fewer
    /// rows than requested while older history remains, so a short page does
    /// not end the walk.
    async fn collect_pages<F, Fut>(&self, wallet_address: &str, mut fetch_page: F) -> Result<Vec<HeliusTransaction>>
    where
        F: FnMut(Option<String>, u32) -> Fut,
        Fut: Future<Output = Result<Vec<HeliusTransaction>>>,
    {
        let limit_total = self.config.max_transactions.map(|n| n as usize);
        let mut all_transactions: Vec<HeliusTransaction> = Vec::new();
        let mut before_signature: Option<String> = None;
        let mut page = 0u32;

        loop {
            let page_size = match limit_total {
                Some(total) => {
                    let remaining = total.saturating_sub(all_transactions.len());
                    if remaining == 0 {
                        break;
                    }
                    remaining.min(self.config.page_size as usize) as u32
                }
                None => self.config.page_size,
            };

            page += 1;
            debug!(
                "Fetching Helius page {} for {} (limit {}, before {:?})",
                page, wallet_address, page_size, before_signature
            );

            let batch = fetch_page(before_signature.clone(), page_size).await?;
            if batch.is_empty() {
                debug!("No more transactions available");
                break;
            }

            debug!("Received {} transactions in page {}", batch.len(), page);
            before_signature = batch.last().map(|tx| tx.signature.clone());
            all_transactions.extend(batch);

            if self.config.rate_limit_ms > 0 {
                time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            }
        }

        info!(
            "Fetched {} transactions for wallet {} in {} pages",
            all_transactions.len(),
            wallet_address,
            page
        );
        Ok(all_transactions)
    }

    async fn fetch_transaction_page(
        &self,
        wallet_address: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<HeliusTransaction>> {
        let url = self.build_transactions_url(wallet_address, before, limit);
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(HeliusError::RateLimitExceeded);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(HeliusError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        parse_transactions(&body)
    }
}

/// Parse one page of the enhanced-transactions response
pub fn parse_transactions(body: &str) -> Result<Vec<HeliusTransaction>> {
    serde_json::from_str(body).map_err(|e| {
        error!("Failed to parse Helius response as JSON: {}", e);
        HeliusError::JsonParsingFailed(e)
    })
}

#[async_trait]
impl TransactionHistoryProvider for HeliusClient {
    async fn fetch_transactions(&self, wallet_address: &str) -> pnl_core::Result<Vec<Transaction>> {
        let records = self
            .fetch_wallet_transactions(wallet_address)
            .await
            .map_err(|e| PnLError::DataUnavailable(format!("Helius: {}", e)))?;

        let mut normalizer = TransactionNormalizer::new(wallet_address).newest_first(true);
        if let Some(provider) = &self.historical_prices {
            normalizer = normalizer.with_historical_prices(provider.as_ref());
        }
        normalizer.normalize(&records).await
    }
}

// Helius Enhanced Transactions API response, trimmed to what the normalizer reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusTransaction {
    pub signature: String,
    pub timestamp: i64,
    #[serde(default)]
    pub slot: u64,
    #[serde(rename = "type", default)]
    pub transaction_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub fee: u64,
    #[serde(rename = "feePayer", default)]
    pub fee_payer: String,
    #[serde(rename = "accountData", default)]
    pub account_data: Vec<HeliusAccountData>,
    #[serde(rename = "transactionError", default)]
    pub transaction_error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusAccountData {
    pub account: String,
    #[serde(rename = "nativeBalanceChange", default)]
    pub native_balance_change: i64,
    #[serde(rename = "tokenBalanceChanges", default)]
    pub token_balance_changes: Vec<HeliusTokenBalanceChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusTokenBalanceChange {
    #[serde(rename = "userAccount")]
    pub user_account: String,
    #[serde(rename = "tokenAccount", default)]
    pub token_account: String,
    pub mint: String,
    #[serde(rename = "rawTokenAmount")]
    pub raw_token_amount: HeliusRawTokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeliusRawTokenAmount {
    #[serde(rename = "tokenAmount")]
    pub token_amount: String, // Can be negative (e.g., "-100000000")
    pub decimals: u8,
}

impl HeliusTransaction {
    fn pays_fee(&self, wallet: &str) -> bool {
        self.fee > 0 && self.fee_payer == wallet
    }
}

impl RawHistoryRecord for HeliusTransaction {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn block_time(&self) -> i64 {
        self.timestamp
    }

    fn slot(&self) -> u64 {
        self.slot
    }

    fn kind_hint(&self) -> &str {
        &self.transaction_type
    }

    fn failed(&self) -> bool {
        self.transaction_error.as_ref().is_some_and(|e| !e.is_null())
    }

    fn balance_changes(&self, wallet: &str) -> pnl_core::Result<Vec<RawBalanceChange>> {
        let mut changes = Vec::new();

        for account in &self.account_data {
            // nativeBalanceChange already has the fee taken out; the fee is its own leg
            if account.account == wallet && account.native_balance_change != 0 {
                let mut lamports = i128::from(account.native_balance_change);
                if self.pays_fee(wallet) {
                    lamports += i128::from(self.fee);
                }
                if lamports != 0 {
                    changes.push(RawBalanceChange {
                        mint: WSOL_MINT.to_string(),
                        raw_amount: lamports,
                        decimals: SOL_DECIMALS,
                        price_usd: None,
                    });
                }
            }

            for token in account
                .token_balance_changes
                .iter()
                .filter(|t| t.user_account == wallet)
            {
                let raw_amount: i128 = token.raw_token_amount.token_amount.parse().map_err(|e| {
                    PnLError::DataUnavailable(format!(
                        "transaction {}: bad token amount {:?} for {}: {}",
                        self.signature, token.raw_token_amount.token_amount, token.mint, e
                    ))
                })?;
                changes.push(RawBalanceChange {
                    mint: token.mint.clone(),
                    raw_amount,
                    decimals: token.raw_token_amount.decimals,
                    price_usd: None,
                });
            }
        }

        Ok(changes)
    }

    fn fee(&self, wallet: &str) -> Option<RawBalanceChange> {
        self.pays_fee(wallet).then(|| RawBalanceChange {
            mint: WSOL_MINT.to_string(),
            raw_amount: i128::from(self.fee),
            decimals: SOL_DECIMALS,
            price_usd: None,
        })
    }
}
