use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

use crate::transaction::{is_quote_mint, TokenLeg, Transaction, TransactionKind};
use crate::{HistoricalPriceProvider, PnLError, Result};

/// Net change of one mint in the wallet, as reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct RawBalanceChange {
    pub mint: String,
    /// Signed amount in the mint's smallest unit; positive is received
    pub raw_amount: i128,
    pub decimals: u8,
    /// USD unit price at transaction time, when the provider knows it
    pub price_usd: Option<Decimal>,
}

/// Provider-specific transaction record that can be turned into canonical
/// transactions for one wallet
pub trait RawHistoryRecord {
    fn signature(&self) -> &str;

    /// Unix seconds
    fn block_time(&self) -> i64;

    fn slot(&self) -> u64;

    /// Provider's own type label, e.g. "SWAP" or "TOKEN_MINT"
    fn kind_hint(&self) -> &str;

    /// Whether the transaction failed on chain
    fn failed(&self) -> bool;

    /// Every balance change affecting `wallet`; may repeat a mint.
    /// Unparseable amounts are `DataUnavailable`.
    fn balance_changes(&self, wallet: &str) -> Result<Vec<RawBalanceChange>>;

    /// Fee charged to `wallet`, if it was the fee payer
    fn fee(&self, wallet: &str) -> Option<RawBalanceChange>;
}

/// Check timestamps never decrease
pub fn ensure_chronological(transactions: &[Transaction]) -> Result<()> {
    for pair in transactions.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(PnLError::DataUnavailable(format!(
                "history not in chronological order: {} at {} follows {} at {}",
                pair[1].signature, pair[1].timestamp, pair[0].signature, pair[0].timestamp
            )));
        }
    }
    Ok(())
}

/// Label a transaction from the legs it carries
pub fn classify(token_in: Option<&TokenLeg>, token_out: Option<&TokenLeg>, kind_hint: &str) -> TransactionKind {
    match (token_in, token_out) {
        (Some(_), Some(out)) if is_quote_mint(out.mint()) => TransactionKind::Buy,
        (Some(inbound), Some(_)) if is_quote_mint(inbound.mint()) => TransactionKind::Sell,
        (Some(_), Some(_)) => TransactionKind::Swap,
        (Some(_), None) => {
            let hint = kind_hint.to_ascii_lowercase();
            if ["mint", "airdrop", "claim"].iter().any(|k| hint.contains(k)) {
                TransactionKind::Airdrop
            } else {
                TransactionKind::TransferIn
            }
        }
        (None, Some(_)) => TransactionKind::TransferOut,
        (None, None) => TransactionKind::Unknown,
    }
}

struct PricedLeg {
    leg: TokenLeg,
    price_usd: Option<Decimal>,
}

impl PricedLeg {
    /// Larger legs first: priced legs by USD value, then unpriced by raw amount
    fn by_size_desc(a: &PricedLeg, b: &PricedLeg) -> Ordering {
        match (a.price_usd, b.price_usd) {
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(pa), Some(pb)) => {
                // a value past the Decimal range ranks as the largest
                let value = |leg: &TokenLeg, price| leg.usd_value(Some(price)).unwrap_or(Decimal::MAX);
                value(&b.leg, pb).cmp(&value(&a.leg, pa))
            }
            (None, None) => b.leg.amount().cmp(&a.leg.amount()),
        }
        .then_with(|| a.leg.mint().cmp(b.leg.mint()))
    }
}

/// Converts provider records into the canonical, time-ordered transaction
/// sequence for one wallet
pub struct TransactionNormalizer<'a> {
    wallet_address: String,
    historical_prices: Option<&'a dyn HistoricalPriceProvider>,
    newest_first: bool,
}

impl<'a> TransactionNormalizer<'a> {
    pub fn new(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            historical_prices: None,
            newest_first: false,
        }
    }

    /// Price legs the records leave unpriced
    pub fn with_historical_prices(mut self, provider: &'a dyn HistoricalPriceProvider) -> Self {
        self.historical_prices = Some(provider);
        self
    }

    /// Records arrive newest first (as most indexers page them)
    pub fn newest_first(mut self, newest_first: bool) -> Self {
        self.newest_first = newest_first;
        self
    }

    pub async fn normalize<R: RawHistoryRecord>(&self, records: &[R]) -> Result<Vec<Transaction>> {
        let mut ordered: Vec<&R> = records.iter().collect();
        if self.newest_first {
            ordered.reverse();
        }
        // stable: equal (time, slot) keep provider order
        ordered.sort_by_key(|r| (r.block_time(), r.slot()));

        debug!(
            "Normalizing {} records for wallet {}",
            ordered.len(),
            self.wallet_address
        );

        let mut price_cache: HashMap<(String, i64), Option<Decimal>> = HashMap::new();
        let mut transactions = Vec::with_capacity(ordered.len());
        for record in ordered {
            let normalized = self.normalize_record(record, &mut price_cache).await?;
            transactions.extend(normalized);
        }

        debug!(
            "Normalized into {} transactions ({} historical price lookups)",
            transactions.len(),
            price_cache.len()
        );
        Ok(transactions)
    }

    async fn normalize_record<R: RawHistoryRecord>(
        &self,
        record: &R,
        price_cache: &mut HashMap<(String, i64), Option<Decimal>>,
    ) -> Result<Vec<Transaction>> {
        let signature = record.signature();
        let block_time = record.block_time();
        let timestamp: DateTime<Utc> = Utc.timestamp_opt(block_time, 0).single().ok_or_else(|| {
            PnLError::DataUnavailable(format!("transaction {} has invalid block time {}", signature, block_time))
        })?;

        let fee = match record.fee(&self.wallet_address) {
            Some(change) if change.raw_amount > 0 => {
                Some(self.priced_leg(signature, block_time, change, price_cache).await?)
            }
            _ => None,
        };

        if record.failed() {
            trace!("Transaction {} failed on chain; keeping fee only", signature);
            return Ok(fee
                .map(|fee| {
                    Transaction::new(signature, timestamp, TransactionKind::Unknown)
                        .with_slot(record.slot())
                        .with_fee(fee.leg, fee.price_usd)
                })
                .into_iter()
                .collect());
        }

        let mut netted: BTreeMap<String, RawBalanceChange> = BTreeMap::new();
        for change in record.balance_changes(&self.wallet_address)? {
            match netted.get_mut(&change.mint) {
                Some(existing) => {
                    if existing.decimals != change.decimals {
                        return Err(PnLError::DataUnavailable(format!(
                            "transaction {} reports {} with {} and {} decimals",
                            signature, change.mint, existing.decimals, change.decimals
                        )));
                    }
                    existing.raw_amount = existing.raw_amount.checked_add(change.raw_amount).ok_or_else(|| {
                        PnLError::DataUnavailable(format!("amount overflow for {} in {}", change.mint, signature))
                    })?;
                    existing.price_usd = existing.price_usd.or(change.price_usd);
                }
                None => {
                    netted.insert(change.mint.clone(), change);
                }
            }
        }

        let mut inbound = Vec::new();
        let mut outbound = Vec::new();
        for (_, change) in netted {
            match change.raw_amount.cmp(&0) {
                Ordering::Greater => inbound.push(self.priced_leg(signature, block_time, change, price_cache).await?),
                Ordering::Less => {
                    let raw_amount = change.raw_amount.checked_neg().ok_or_else(|| {
                        PnLError::DataUnavailable(format!(
                            "amount {} for {} in {} is out of range",
                            change.raw_amount, change.mint, signature
                        ))
                    })?;
                    let change = RawBalanceChange { raw_amount, ..change };
                    outbound.push(self.priced_leg(signature, block_time, change, price_cache).await?);
                }
                Ordering::Equal => {}
            }
        }
        inbound.sort_by(PricedLeg::by_size_desc);
        outbound.sort_by(PricedLeg::by_size_desc);

        let mut inbound = inbound.into_iter();
        let mut outbound = outbound.into_iter();
        let mut fee = fee;
        let mut transactions = Vec::new();

        loop {
            let token_in = inbound.next();
            let token_out = outbound.next();
            if token_in.is_none() && token_out.is_none() {
                // fee-only record (or a primary with no token movement)
                if transactions.is_empty() {
                    if let Some(fee) = fee.take() {
                        transactions.push(
                            Transaction::new(signature, timestamp, TransactionKind::Unknown)
                                .with_slot(record.slot())
                                .with_fee(fee.leg, fee.price_usd),
                        );
                    }
                }
                break;
            }

            let kind = classify(
                token_in.as_ref().map(|p| &p.leg),
                token_out.as_ref().map(|p| &p.leg),
                record.kind_hint(),
            );
            let mut tx = Transaction::new(signature, timestamp, kind).with_slot(record.slot());
            if let Some(p) = token_in {
                tx = tx.with_token_in(p.leg, p.price_usd);
            }
            if let Some(p) = token_out {
                tx = tx.with_token_out(p.leg, p.price_usd);
            }
            if let Some(fee) = fee.take() {
                tx = tx.with_fee(fee.leg, fee.price_usd);
            }
            transactions.push(tx);
        }

        if transactions.len() > 1 {
            debug!(
                "Record {} split into {} transactions ({} extra legs)",
                signature,
                transactions.len(),
                transactions.len() - 1
            );
        }
        Ok(transactions)
    }

    async fn priced_leg(
        &self,
        signature: &str,
        block_time: i64,
        change: RawBalanceChange,
        price_cache: &mut HashMap<(String, i64), Option<Decimal>>,
    ) -> Result<PricedLeg> {
        let amount = u64::try_from(change.raw_amount).map_err(|_| {
            PnLError::DataUnavailable(format!(
                "amount {} of {} in {} does not fit a token amount",
                change.raw_amount, change.mint, signature
            ))
        })?;
        let leg = TokenLeg::new(change.mint, amount, change.decimals)
            .map_err(|e| PnLError::DataUnavailable(format!("transaction {}: {}", signature, e)))?;

        let price_usd = match change.price_usd {
            Some(price) => Some(price),
            None => self.historical_price(leg.mint(), block_time, price_cache).await,
        };

        Ok(PricedLeg { leg, price_usd })
    }

    async fn historical_price(
        &self,
        mint: &str,
        block_time: i64,
        price_cache: &mut HashMap<(String, i64), Option<Decimal>>,
    ) -> Option<Decimal> {
        let provider = self.historical_prices?;
        let key = (mint.to_string(), block_time);
        if let Some(cached) = price_cache.get(&key) {
            return *cached;
        }

        let at = Utc.timestamp_opt(block_time, 0).single()?;
        let price = match provider.fetch_historical_price(mint, at).await {
            Ok(price) => price,
            Err(e) => {
                warn!("Historical price lookup for {} at {} failed: {}", mint, at, e);
                None
            }
        };
        price_cache.insert(key, price);
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;
    use crate::transaction::{SOL_DECIMALS, USDC_MINT, WSOL_MINT};
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn change(mint: &str, raw_amount: i128, decimals: u8, price: Option<Decimal>) -> RawBalanceChange {
        RawBalanceChange {
            mint: mint.to_string(),
            raw_amount,
            decimals,
            price_usd: price,
        }
    }

    #[test]
    fn test_classify_rules() {
        let sol = leg(WSOL_MINT, 1, SOL_DECIMALS);
        let usdc = leg(USDC_MINT, 1, 6);
        let token = leg(TOKEN_A, 1, 6);
        let other = leg(TOKEN_B, 1, 6);

        assert_eq!(classify(Some(&token), Some(&sol), "SWAP"), TransactionKind::Buy);
        assert_eq!(classify(Some(&usdc), Some(&token), "SWAP"), TransactionKind::Sell);
        assert_eq!(classify(Some(&token), Some(&other), "SWAP"), TransactionKind::Swap);
        assert_eq!(classify(Some(&token), None, "TOKEN_MINT"), TransactionKind::Airdrop);
        assert_eq!(classify(Some(&token), None, "TRANSFER"), TransactionKind::TransferIn);
        assert_eq!(classify(None, Some(&token), "TRANSFER"), TransactionKind::TransferOut);
        assert_eq!(classify(None, None, "UNKNOWN"), TransactionKind::Unknown);
    }

    #[test]
    fn test_ensure_chronological() {
        let ok = vec![
            acquire_tx("a", 0, TOKEN_A, 1, 0, dec!(1)),
            acquire_tx("b", 0, TOKEN_A, 1, 0, dec!(1)),
            acquire_tx("c", 5, TOKEN_A, 1, 0, dec!(1)),
        ];
        assert!(ensure_chronological(&ok).is_ok());

        let bad = vec![
            acquire_tx("a", 5, TOKEN_A, 1, 0, dec!(1)),
            acquire_tx("b", 0, TOKEN_A, 1, 0, dec!(1)),
        ];
        assert!(matches!(ensure_chronological(&bad), Err(PnLError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn test_swap_nets_changes_and_attaches_fee() {
        let record = MockRecord::new("sig1", 1_000, 10, "SWAP")
            .with_change(change(WSOL_MINT, -500_000_000, 9, Some(dec!(100))))
            .with_change(change(WSOL_MINT, -10_000_000, 9, Some(dec!(100))))
            .with_change(change(TOKEN_A, 1_000_000, 6, Some(dec!(51))))
            .with_fee(5_000, Some(dec!(100)));

        let txs = TransactionNormalizer::new(WALLET)
            .normalize(&[record])
            .await
            .unwrap();

        assert_eq!(txs.len(), 1);
        let tx = &txs[0];
        assert_eq!(tx.kind, TransactionKind::Buy);
        assert_eq!(tx.token_in.as_ref().unwrap().mint(), TOKEN_A);
        assert_eq!(tx.token_out.as_ref().unwrap().amount(), 510_000_000);
        assert_eq!(tx.fee.as_ref().unwrap().amount(), 5_000);
        assert_eq!(tx.slot, 10);
    }

    #[tokio::test]
    async fn test_extra_legs_become_additional_transactions() {
        let record = MockRecord::new("multi", 1_000, 1, "SWAP")
            .with_change(change(TOKEN_A, 10, 0, Some(dec!(1))))
            .with_change(change(TOKEN_B, 100, 0, Some(dec!(1))))
            .with_change(change(USDC_MINT, -110_000_000, 6, Some(dec!(1))))
            .with_fee(5_000, None);

        let txs = TransactionNormalizer::new(WALLET)
            .normalize(&[record])
            .await
            .unwrap();

        assert_eq!(txs.len(), 2);
        // largest inbound leg rides on the primary
        assert_eq!(txs[0].token_in.as_ref().unwrap().mint(), TOKEN_B);
        assert!(txs[0].token_out.is_some());
        assert!(txs[0].fee.is_some());
        assert_eq!(txs[1].token_in.as_ref().unwrap().mint(), TOKEN_A);
        assert!(txs[1].token_out.is_none());
        assert!(txs[1].fee.is_none());
        assert_eq!(txs[1].signature, "multi");
    }

    #[tokio::test]
    async fn test_failed_transaction_keeps_only_fee() {
        let record = MockRecord::new("failed", 1_000, 1, "SWAP")
            .with_change(change(TOKEN_A, 10, 0, Some(dec!(1))))
            .with_fee(5_000, Some(dec!(150)))
            .failed();

        let txs = TransactionNormalizer::new(WALLET)
            .normalize(&[record])
            .await
            .unwrap();

        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::Unknown);
        assert!(txs[0].token_in.is_none());
        assert_eq!(txs[0].fee.as_ref().unwrap().usd_value(txs[0].fee_price_usd).unwrap(), dec!(0.00075));
    }

    #[tokio::test]
    async fn test_newest_first_records_are_reordered_stably() {
        let records = vec![
            MockRecord::new("late", 2_000, 20, "TRANSFER").with_change(change(TOKEN_A, 1, 0, None)),
            MockRecord::new("tie_b", 1_000, 10, "TRANSFER").with_change(change(TOKEN_A, 1, 0, None)),
            MockRecord::new("tie_a", 1_000, 10, "TRANSFER").with_change(change(TOKEN_A, 1, 0, None)),
            MockRecord::new("early", 500, 5, "TRANSFER").with_change(change(TOKEN_A, 1, 0, None)),
        ];

        let txs = TransactionNormalizer::new(WALLET)
            .newest_first(true)
            .normalize(&records)
            .await
            .unwrap();

        let order: Vec<&str> = txs.iter().map(|t| t.signature.as_str()).collect();
        assert_eq!(order, vec!["early", "tie_a", "tie_b", "late"]);
        assert!(ensure_chronological(&txs).is_ok());
    }

    #[tokio::test]
    async fn test_historical_prices_fill_gaps_with_memo() {
        let historical = StaticHistoricalPrices::new(&[(TOKEN_A, 1_000, dec!(2.5))]);
        let records = vec![
            MockRecord::new("a", 1_000, 1, "TRANSFER").with_change(change(TOKEN_A, 4, 0, None)),
            MockRecord::new("b", 1_000, 2, "TRANSFER").with_change(change(TOKEN_A, 4, 0, None)),
            MockRecord::new("c", 1_000, 3, "TRANSFER").with_change(change(TOKEN_B, 4, 0, None)),
        ];

        let txs = TransactionNormalizer::new(WALLET)
            .with_historical_prices(&historical)
            .normalize(&records)
            .await
            .unwrap();

        assert_eq!(txs[0].price_in_usd, Some(dec!(2.5)));
        assert_eq!(txs[1].price_in_usd, Some(dec!(2.5)));
        assert_eq!(txs[2].price_in_usd, None);
        assert_eq!(historical.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_records_are_data_unavailable() {
        let too_precise = MockRecord::new("bad", 1_000, 1, "TRANSFER").with_change(change(TOKEN_A, 1, 30, None));
        let err = TransactionNormalizer::new(WALLET)
            .normalize(&[too_precise])
            .await
            .unwrap_err();
        assert!(matches!(err, PnLError::DataUnavailable(_)));

        let too_large = MockRecord::new("huge", 1_000, 1, "TRANSFER")
            .with_change(change(TOKEN_A, i128::from(u64::MAX) + 1, 0, None));
        let err = TransactionNormalizer::new(WALLET)
            .normalize(&[too_large])
            .await
            .unwrap_err();
        assert!(matches!(err, PnLError::DataUnavailable(_)));

        let unnegatable = MockRecord::new("min", 1_000, 1, "TRANSFER").with_change(change(TOKEN_A, i128::MIN, 0, None));
        let err = TransactionNormalizer::new(WALLET)
            .normalize(&[unnegatable])
            .await
            .unwrap_err();
        assert!(matches!(err, PnLError::DataUnavailable(_)));

        let bad_time =MockRecord::new("time", i64::MAX, 1, "TRANSFER");
        let err = TransactionNormalizer::new(WALLET)
            .normalize(&[bad_time])
            .await
            .unwrap_err();
        assert!(matches!(err, PnLError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_zero_net_changes_are_dropped() {
        let record = MockRecord::new("wash", 1_000, 1, "TRANSFER")
            .with_change(change(TOKEN_A, 10, 0, None))
            .with_change(change(TOKEN_A, -10, 0, None));

        let txs = TransactionNormalizer::new(WALLET)
            .normalize(&[record])
            .await
            .unwrap();
        assert!(txs.is_empty());
    }
}
