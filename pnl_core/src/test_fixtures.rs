//! Builders and fixed-table providers shared by unit and scenario tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::normalizer::{RawBalanceChange, RawHistoryRecord};
use crate::transaction::{TokenLeg, Transaction, TransactionKind, SOL_DECIMALS, WSOL_MINT};
use crate::{CurrentPriceProvider, HistoricalPriceProvider, PnLError, Result, TransactionHistoryProvider};

pub(crate) const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub(crate) const OTHER_WALLET: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub(crate) const TOKEN_A: &str = "TOKEN_A_MINT";
pub(crate) const TOKEN_B: &str = "TOKEN_B_MINT";
pub(crate) const TOKEN_C: &str = "TOKEN_C_MINT";

/// 2024-01-01T00:00:00Z plus `secs`
pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
}

pub(crate) fn leg(mint: &str, amount: u64, decimals: u8) -> TokenLeg {
    TokenLeg::new(mint, amount, decimals).unwrap()
}

pub(crate) fn acquire_tx(sig: &str, secs: i64, mint: &str, amount: u64, decimals: u8, price: Decimal) -> Transaction {
    Transaction::new(sig, ts(secs), TransactionKind::Buy).with_token_in(leg(mint, amount, decimals), Some(price))
}

pub(crate) fn dispose_tx(sig: &str, secs: i64, mint: &str, amount: u64, decimals: u8, price: Decimal) -> Transaction {
    Transaction::new(sig, ts(secs), TransactionKind::Sell).with_token_out(leg(mint, amount, decimals), Some(price))
}

pub(crate) fn with_sol_fee(tx: Transaction, lamports: u64, sol_price: Decimal) -> Transaction {
    tx.with_fee(leg(WSOL_MINT, lamports, SOL_DECIMALS), Some(sol_price))
}

/// In-memory provider record
#[derive(Debug, Clone)]
pub(crate) struct MockRecord {
    signature: String,
    block_time: i64,
    slot: u64,
    kind_hint: String,
    failed: bool,
    changes: Vec<RawBalanceChange>,
    fee: Option<RawBalanceChange>,
}

impl MockRecord {
    pub(crate) fn new(signature: &str, block_time: i64, slot: u64, kind_hint: &str) -> Self {
        Self {
            signature: signature.to_string(),
            block_time,
            slot,
            kind_hint: kind_hint.to_string(),
            failed: false,
            changes: Vec::new(),
            fee: None,
        }
    }

    pub(crate) fn with_change(mut self, change: RawBalanceChange) -> Self {
        self.changes.push(change);
        self
    }

    pub(crate) fn with_fee(mut self, lamports: i128, sol_price: Option<Decimal>) -> Self {
        self.fee = Some(RawBalanceChange {
            mint: WSOL_MINT.to_string(),
            raw_amount: lamports,
            decimals: SOL_DECIMALS,
            price_usd: sol_price,
        });
        self
    }

    pub(crate) fn failed(mut self) -> Self {
        self.failed = true;
        self
    }
}

impl RawHistoryRecord for MockRecord {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn block_time(&self) -> i64 {
        self.block_time
    }

    fn slot(&self) -> u64 {
        self.slot
    }

    fn kind_hint(&self) -> &str {
        &self.kind_hint
    }

    fn failed(&self) -> bool {
        self.failed
    }

    fn balance_changes(&self, _wallet: &str) -> Result<Vec<RawBalanceChange>> {
        Ok(self.changes.clone())
    }

    fn fee(&self, _wallet: &str) -> Option<RawBalanceChange> {
        self.fee.clone()
    }
}

/// History provider returning a fixed sequence per wallet
pub(crate) struct StaticHistory {
    histories: HashMap<String, Vec<Transaction>>,
    failure: Option<PnLError>,
    delay: Option<Duration>,
    pub(crate) calls: AtomicUsize,
}

impl StaticHistory {
    pub(crate) fn new(wallet: &str, transactions: Vec<Transaction>) -> Self {
        let mut histories = HashMap::new();
        histories.insert(wallet.to_string(), transactions);
        Self {
            histories,
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(error: PnLError) -> Self {
        Self {
            histories: HashMap::new(),
            failure: Some(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_wallet(mut self, wallet: &str, transactions: Vec<Transaction>) -> Self {
        self.histories.insert(wallet.to_string(), transactions);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TransactionHistoryProvider for StaticHistory {
    async fn fetch_transactions(&self, wallet_address: &str) -> Result<Vec<Transaction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.histories.get(wallet_address).cloned().unwrap_or_default())
    }
}

/// Current price provider backed by a pinned table
pub(crate) struct StaticPrices {
    prices: HashMap<String, Decimal>,
    failure: Option<PnLError>,
    delay: Option<Duration>,
    pub(crate) requests: Mutex<Vec<BTreeSet<String>>>,
}

impl StaticPrices {
    pub(crate) fn new(entries: &[(&str, Decimal)]) -> Self {
        Self {
            prices: entries.iter().map(|(m, p)| (m.to_string(), *p)).collect(),
            failure: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: PnLError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(&[])
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl CurrentPriceProvider for StaticPrices {
    async fn fetch_current_prices(&self, mints: &BTreeSet<String>) -> Result<HashMap<String, Decimal>> {
        self.requests.lock().unwrap().push(mints.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(mints
            .iter()
            .filter_map(|m| self.prices.get(m).map(|p| (m.clone(), *p)))
            .collect())
    }
}

/// Historical price table keyed by (mint, unix seconds)
pub(crate) struct StaticHistoricalPrices {
    prices: HashMap<(String, i64), Decimal>,
    pub(crate) calls: AtomicUsize,
}

impl StaticHistoricalPrices {
    pub(crate) fn new(entries: &[(&str, i64, Decimal)]) -> Self {
        Self {
            prices: entries
                .iter()
                .map(|(m, t, p)| ((m.to_string(), *t), *p))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl HistoricalPriceProvider for StaticHistoricalPrices {
    async fn fetch_historical_price(&self, mint: &str, at: DateTime<Utc>) -> Result<Option<Decimal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.prices.get(&(mint.to_string(), at.timestamp())).copied())
    }
}
