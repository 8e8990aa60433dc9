pub mod accumulator;
pub mod address;
pub mod engine;
pub mod lot_inventory;
pub mod normalizer;
pub mod transaction;
pub mod valuation;
pub mod warning;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use accumulator::{accumulate, Accumulation, PnlAccumulator, PnlState};
pub use address::validate_wallet_address;
pub use engine::PnlEngine;
pub use lot_inventory::{AcquisitionLot, Disposal, LotInventory, TokenHolding};
pub use normalizer::{classify, ensure_chronological, RawBalanceChange, RawHistoryRecord, TransactionNormalizer};
pub use transaction::{LegSide, TokenLeg, Transaction, TransactionKind};
pub use valuation::{open_mints, value_holdings, PnlReport, PnlResult, PositionValuation, ReportMetadata, Valuation};
pub use warning::PnlWarning;

pub use config_manager::{EngineConfig, QuantityReconciliation};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PnLError {
    /// History could not be retrieved, parsed or ordered; nothing is computed
    #[error("Transaction history unavailable: {0}")]
    DataUnavailable(String),
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),
    #[error("Invalid wallet address: {0}")]
    InvalidWalletAddress(String),
    #[error("Invalid token leg: {0}")]
    InvalidLeg(String),
    #[error("Calculation error: {0}")]
    Calculation(String),
}

pub type Result<T> = std::result::Result<T, PnLError>;

/// Source of a wallet's transaction history.
///
/// Implementations return canonical transactions in non-decreasing timestamp
/// order, preserving the chain's order for transactions sharing a timestamp.
/// Network or parse failures are reported as [`PnLError::DataUnavailable`].
#[async_trait]
pub trait TransactionHistoryProvider: Send + Sync {
    async fn fetch_transactions(&self, wallet_address: &str) -> Result<Vec<Transaction>>;
}

/// Source of current USD unit prices.
///
/// Mints missing from the returned map are treated as priced at zero by the
/// caller; implementations should not fail just because some mints are unknown.
#[async_trait]
pub trait CurrentPriceProvider: Send + Sync {
    async fn fetch_current_prices(&self, mints: &BTreeSet<String>) -> Result<HashMap<String, Decimal>>;
}

/// Source of USD unit prices at a past point in time, used by the normalizer
/// for legs the history provider left unpriced.
#[async_trait]
pub trait HistoricalPriceProvider: Send + Sync {
    async fn fetch_historical_price(
        &self,
        mint: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>>;
}
