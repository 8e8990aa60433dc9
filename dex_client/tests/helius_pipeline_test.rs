use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dex_client::{parse_multi_price, parse_transactions};
use pnl_core::transaction::WSOL_MINT;
use pnl_core::{
    accumulate, open_mints, value_holdings, HistoricalPriceProvider, PnlWarning, QuantityReconciliation,
    RawHistoryRecord, TransactionKind, TransactionNormalizer,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
const JUP: &str = "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN";

const HELIUS_PAGE: &str = include_str!("fixtures/helius_wallet_page.json");
const BIRDEYE_PRICES: &str = include_str!("fixtures/birdeye_multi_price.json");

/// Prices pinned per (mint, unix time)
struct PinnedHistory(HashMap<(&'static str, i64), Decimal>);

#[async_trait]
impl HistoricalPriceProvider for PinnedHistory {
    async fn fetch_historical_price(&self, mint: &str, at: DateTime<Utc>) -> pnl_core::Result<Option<Decimal>> {
        Ok(self
            .0
            .iter()
            .find(|((m, t), _)| *m == mint && *t == at.timestamp())
            .map(|(_, p)| *p))
    }
}

fn pinned_history() -> PinnedHistory {
    let mut prices = HashMap::new();
    for t in [1_700_000_000, 1_700_000_100, 1_700_000_200, 1_700_000_300] {
        prices.insert((WSOL_MINT, t), dec!(100));
    }
    prices.insert((BONK, 1_700_000_000), dec!(0.0001));
    prices.insert((BONK, 1_700_000_300), dec!(0.0004));
    PinnedHistory(prices)
}

#[test]
fn test_parses_recorded_page() {
    let records = parse_transactions(HELIUS_PAGE).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].signature(), "5sellBonkForSol");
    assert!(records[1].failed());
    assert!(!records[0].failed());
    assert_eq!(records[2].kind_hint(), "TOKEN_MINT");
    // pool-side changes are not the wallet's
    let buy = records[3].balance_changes(WALLET).unwrap();
    assert_eq!(buy.len(), 2);
}

#[tokio::test]
async fn test_normalizes_recorded_page_oldest_first() {
    let records = parse_transactions(HELIUS_PAGE).unwrap();
    let txs = TransactionNormalizer::new(WALLET)
        .newest_first(true)
        .normalize(&records)
        .await
        .unwrap();

    let kinds: Vec<(&str, TransactionKind)> = txs.iter().map(|t| (t.signature.as_str(), t.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("2buyBonkWithSol", TransactionKind::Buy),
            ("3jupAirdrop", TransactionKind::Airdrop),
            ("4failedSwap", TransactionKind::Unknown),
            ("5sellBonkForSol", TransactionKind::Sell),
        ]
    );

    let buy = &txs[0];
    assert_eq!(buy.token_in.as_ref().unwrap().amount(), 800_000_000);
    assert_eq!(buy.token_out.as_ref().unwrap().amount(), 1_000_000_000);
    assert_eq!(buy.fee.as_ref().unwrap().amount(), 5_000);

    // someone else paid the airdrop fee
    assert!(txs[1].fee.is_none());
    assert!(txs[2].token_in.is_none() && txs[2].token_out.is_none());
    assert_eq!(txs[3].token_in.as_ref().unwrap().amount(), 2_000_000_000);
}

#[tokio::test]
async fn test_recorded_page_through_accumulator_and_valuation() {
    let records = parse_transactions(HELIUS_PAGE).unwrap();
    let history = pinned_history();
    let txs = TransactionNormalizer::new(WALLET)
        .newest_first(true)
        .with_historical_prices(&history)
        .normalize(&records)
        .await
        .unwrap();

    let acc = accumulate(&txs).unwrap();
    // 5000 BONK bought at $0.0001, sold at $0.0004
    assert_eq!(acc.states[BONK].realized_pnl_usd, dec!(1.5));
    // three fees of 5000 lamports at $100
    assert_eq!(acc.total_fees_usd, dec!(0.0015));
    // the SOL spent on the first buy predates the recorded history
    assert!(acc
        .warnings
        .iter()
        .any(|w| matches!(w, PnlWarning::DisposalShortfall { mint, .. } if mint == WSOL_MINT)));
    // JUP airdrop has no historical price
    assert_eq!(acc.unpriced_legs, 1);

    let policy = QuantityReconciliation::Tracked;
    let open = open_mints(&acc, policy);
    assert!(open.contains(BONK) && open.contains(JUP) && open.contains(WSOL_MINT));

    let current = parse_multi_price(BIRDEYE_PRICES).unwrap();
    let valuation = value_holdings(&acc, &current, policy).unwrap();

    // 3000 BONK left at $0.0001 cost, now $0.0003
    assert_eq!(valuation.tokens[BONK].unrealized_pnl_usd, dec!(0.6));
    // JUP came back null from the price API
    assert!(valuation
        .warnings
        .contains(&PnlWarning::PriceUnavailable { mint: JUP.to_string() }));
    assert_eq!(valuation.positions[JUP].current_value_usd, Decimal::ZERO);
    // 2 SOL received at $100 each, now $150.5
    assert_eq!(valuation.positions[WSOL_MINT].unrealized_pnl_usd, dec!(101));
}
