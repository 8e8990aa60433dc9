use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{error, info, warn};

use config_manager::EngineConfig;

use crate::accumulator::accumulate;
use crate::address::validate_wallet_address;
use crate::valuation::{open_mints, value_holdings, PnlReport};
use crate::{CurrentPriceProvider, PnLError, Result, TransactionHistoryProvider};

/// Computes wallet PNL reports from a history provider and a price provider.
///
/// Each call is an independent computation over a freshly fetched snapshot;
/// the engine holds no per-wallet state between calls.
pub struct PnlEngine<H, P> {
    history: H,
    prices: P,
    config: EngineConfig,
}

impl<H, P> PnlEngine<H, P>
where
    H: TransactionHistoryProvider,
    P: CurrentPriceProvider,
{
    pub fn new(history: H, prices: P, config: EngineConfig) -> Self {
        Self {
            history,
            prices,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn prices(&self) -> &P {
        &self.prices
    }

    /// Full pipeline for one wallet. History failures abort with
    /// `DataUnavailable`; price failures only degrade valuation.
    pub async fn compute_pnl(&self, wallet_address: &str) -> Result<PnlReport> {
        validate_wallet_address(wallet_address)?;
        info!("Computing P&L for wallet {}", wallet_address);

        let history_timeout = Duration::from_secs(self.config.history_timeout_seconds);
        let transactions = match tokio::time::timeout(
            history_timeout,
            self.history.fetch_transactions(wallet_address),
        )
        .await
        {
            Ok(Ok(transactions)) => transactions,
            Ok(Err(e)) => {
                error!("History fetch failed for {}: {}", wallet_address, e);
                return Err(match e {
                    PnLError::DataUnavailable(_) => e,
                    other => PnLError::DataUnavailable(other.to_string()),
                });
            }
            Err(_) => {
                error!(
                    "History fetch for {} timed out after {} seconds",
                    wallet_address,
                    history_timeout.as_secs()
                );
                return Err(PnLError::DataUnavailable(format!(
                    "history fetch timed out after {} seconds",
                    history_timeout.as_secs()
                )));
            }
        };

        let policy = self.config.quantity_reconciliation;
        let accumulation = accumulate(&transactions)?;
        let open = open_mints(&accumulation, policy);
        let prices = self.fetch_current_prices(&open).await;
        let valuation = value_holdings(&accumulation, &prices, policy)?;
        let report = PnlReport::assemble(wallet_address, accumulation, valuation, policy);

        info!(
            "P&L for {}: realized ${}, unrealized ${}, total ${} ({} tokens, {} open, {} warnings)",
            wallet_address,
            report.overall.realized_pnl_usd,
            report.overall.unrealized_pnl_usd,
            report.overall.total_pnl_usd,
            report.tokens.len(),
            report.positions.len(),
            report.metadata.warnings.len()
        );
        Ok(report)
    }

    /// Compute several wallets concurrently, at most
    /// `max_concurrent_wallets` at a time. Results keep input order.
    pub async fn compute_many(&self, wallet_addresses: &[String]) -> Vec<(String, Result<PnlReport>)> {
        let limit = self.config.max_concurrent_wallets.max(1);
        info!(
            "Computing P&L for {} wallets ({} at a time)",
            wallet_addresses.len(),
            limit
        );

        let results: Vec<(String, Result<PnlReport>)> = stream::iter(wallet_addresses)
            .map(|wallet| async move { (wallet.clone(), self.compute_pnl(wallet).await) })
            .buffered(limit)
            .collect()
            .await;

        let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!("{}/{} wallets computed", succeeded, results.len());
        results
    }

    /// One batched lookup; a failure or timeout yields an empty table so every
    /// open position is valued at zero with its own warning.
    async fn fetch_current_prices(&self, mints: &BTreeSet<String>) -> HashMap<String, Decimal> {
        if mints.is_empty() {
            return HashMap::new();
        }

        let price_timeout = Duration::from_secs(self.config.price_timeout_seconds);
        match tokio::time::timeout(price_timeout, self.prices.fetch_current_prices(mints)).await {
            Ok(Ok(prices)) => prices,
            Ok(Err(e)) => {
                warn!("Current price fetch for {} mints failed: {}", mints.len(), e);
                HashMap::new()
            }
            Err(_) => {
                warn!(
                    "Current price fetch for {} mints timed out after {} seconds",
                    mints.len(),
                    price_timeout.as_secs()
                );
                HashMap::new()
            }
        }
    }
}
