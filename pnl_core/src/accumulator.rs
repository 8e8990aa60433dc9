use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::lot_inventory::LotInventory;
use crate::normalizer::ensure_chronological;
use crate::transaction::{to_ui_amount, try_add, try_mul, try_sub, LegSide, TokenLeg, Transaction};
use crate::warning::PnlWarning;
use crate::{PnLError, Result};

/// Running figures for one mint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlState {
    pub mint: String,

    /// Sum of proceeds minus cost basis over every disposal
    pub realized_pnl_usd: Decimal,

    pub acquisitions: u32,
    pub disposals: u32,

    /// Display units received
    pub total_acquired: Decimal,

    /// Display units matched against lots on disposal
    pub total_disposed: Decimal,

    pub total_proceeds_usd: Decimal,
    pub total_cost_disposed_usd: Decimal,

    /// Display units disposed without a lot to match (history gaps)
    pub unmatched_quantity: Decimal,

    pub first_acquired_at: Option<DateTime<Utc>>,
    pub last_disposed_at: Option<DateTime<Utc>>,
}

impl PnlState {
    pub fn new(mint: impl Into<String>) -> Self {
        Self {
            mint: mint.into(),
            realized_pnl_usd: Decimal::ZERO,
            acquisitions: 0,
            disposals: 0,
            total_acquired: Decimal::ZERO,
            total_disposed: Decimal::ZERO,
            total_proceeds_usd: Decimal::ZERO,
            total_cost_disposed_usd: Decimal::ZERO,
            unmatched_quantity: Decimal::ZERO,
            first_acquired_at: None,
            last_disposed_at: None,
        }
    }
}

/// Everything the accumulator pass produces for the valuation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Accumulation {
    pub inventory: LotInventory,

    /// One entry for every mint seen on any leg
    pub states: BTreeMap<String, PnlState>,

    /// USD value of every fee leg across the history
    pub total_fees_usd: Decimal,
    pub fees_by_mint: BTreeMap<String, Decimal>,

    pub warnings: Vec<PnlWarning>,
    pub transactions_processed: usize,
    pub unpriced_legs: usize,
}

impl Accumulation {
    pub fn realized_pnl_usd(&self) -> Result<Decimal> {
        self.states
            .values()
            .try_fold(Decimal::ZERO, |total, s| try_add(total, s.realized_pnl_usd))
    }
}

/// Single left-to-right pass over a wallet's transactions
#[derive(Debug, Default)]
pub struct PnlAccumulator {
    acc: Accumulation,
    last_timestamp: Option<DateTime<Utc>>,
}

impl PnlAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory(&self) -> &LotInventory {
        &self.acc.inventory
    }

    pub fn state(&self, mint: &str) -> Option<&PnlState> {
        self.acc.states.get(mint)
    }

    pub fn warnings(&self) -> &[PnlWarning] {
        &self.acc.warnings
    }

    /// Apply one transaction. Fails without mutating anything if it is older
    /// than the previously applied one. A `Calculation` error (a USD figure
    /// outside the `Decimal` range) can leave the transaction partly applied,
    /// so the accumulator should be discarded after one.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if tx.timestamp < last {
                return Err(PnLError::DataUnavailable(format!(
                    "transaction {} at {} precedes previously applied {}",
                    tx.signature, tx.timestamp, last
                )));
            }
        }
        self.last_timestamp = Some(tx.timestamp);

        debug!(
            "Applying {:?} {} at {} (in={:?}, out={:?})",
            tx.kind,
            tx.signature,
            tx.timestamp,
            tx.token_in.as_ref().map(|l| l.mint()),
            tx.token_out.as_ref().map(|l| l.mint())
        );

        for (side, leg, price) in tx.legs() {
            self.touch(leg.mint());
            if price.is_none() {
                self.record_unpriced(tx, side, leg);
            }
        }

        if let Some(leg) = &tx.token_in {
            self.acquire(tx, leg, tx.price_in_usd)?;
        }
        if let Some(leg) = &tx.token_out {
            self.dispose(tx, leg, tx.price_out_usd)?;
        }
        if let Some(leg) = &tx.fee {
            self.record_fee(leg, tx.fee_price_usd)?;
        }

        self.acc.transactions_processed += 1;
        Ok(())
    }

    pub fn finish(self) -> Accumulation {
        debug!(
            "Accumulated {} transactions over {} mints (fees ${}, {} warnings)",
            self.acc.transactions_processed,
            self.acc.states.len(),
            self.acc.total_fees_usd,
            self.acc.warnings.len()
        );
        self.acc
    }

    fn touch(&mut self, mint: &str) -> &mut PnlState {
        self.acc
            .states
            .entry(mint.to_string())
            .or_insert_with(|| PnlState::new(mint))
    }

    fn record_unpriced(&mut self, tx: &Transaction, side: LegSide, leg: &TokenLeg) {
        self.acc.unpriced_legs += 1;
        let warning = PnlWarning::UnpricedLeg {
            mint: leg.mint().to_string(),
            signature: tx.signature.clone(),
            side,
        };
        warn!("{}", warning);
        self.acc.warnings.push(warning);
    }

    /// Amount of `leg` in its holding's decimals, warning on a mismatch
    fn aligned_amount(&mut self, tx: &Transaction, leg: &TokenLeg) -> (u64, u8) {
        let aligned = self.acc.inventory.align(leg);
        if let Some(found) = aligned.rescaled_from {
            let warning = PnlWarning::DecimalsMismatch {
                mint: leg.mint().to_string(),
                signature: tx.signature.clone(),
                expected: aligned.decimals,
                found,
            };
            warn!("{}", warning);
            self.acc.warnings.push(warning);
        }
        (aligned.amount, aligned.decimals)
    }

    fn record_fee(&mut self, leg: &TokenLeg, price: Option<Decimal>) -> Result<()> {
        let fee_usd = leg.usd_value(price)?;
        let by_mint = self
            .acc
            .fees_by_mint
            .get(leg.mint())
            .copied()
            .unwrap_or(Decimal::ZERO);

        self.acc.total_fees_usd = try_add(self.acc.total_fees_usd, fee_usd)?;
        self.acc
            .fees_by_mint
            .insert(leg.mint().to_string(), try_add(by_mint, fee_usd)?);
        Ok(())
    }

    fn acquire(&mut self, tx: &Transaction, leg: &TokenLeg, price: Option<Decimal>) -> Result<()> {
        let (amount, decimals) = self.aligned_amount(tx, leg);
        let unit_cost = price.unwrap_or(Decimal::ZERO);
        // the lot's full cost basis must be representable before it is queued
        try_mul(to_ui_amount(amount, decimals), unit_cost)?;
        let total_acquired = match self.acc.states.get(leg.mint()) {
            Some(state) => try_add(state.total_acquired, to_ui_amount(amount, decimals))?,
            None => to_ui_amount(amount, decimals),
        };

        self.acc.inventory.acquire(
            leg.mint(),
            decimals,
            amount,
            unit_cost,
            tx.timestamp,
            &tx.signature,
        );

        if amount == 0 {
            return Ok(());
        }
        let state = self.touch(leg.mint());
        state.acquisitions += 1;
        state.total_acquired = total_acquired;
        state.first_acquired_at.get_or_insert(tx.timestamp);
        Ok(())
    }

    fn dispose(&mut self, tx: &Transaction, leg: &TokenLeg, price: Option<Decimal>) -> Result<()> {
        let (amount, decimals) = self.aligned_amount(tx, leg);
        // proceeds of the full request bound those of the matched part
        try_mul(to_ui_amount(amount, decimals), price.unwrap_or(Decimal::ZERO))?;
        let disposal = self.acc.inventory.dispose(leg.mint(), amount)?;

        let disposed = to_ui_amount(disposal.disposed, decimals);
        let proceeds = try_mul(disposed, price.unwrap_or(Decimal::ZERO))?;
        let realized = try_sub(proceeds, disposal.cost_basis_usd)?;

        if !disposal.is_complete() {
            let warning = PnlWarning::DisposalShortfall {
                mint: leg.mint().to_string(),
                signature: tx.signature.clone(),
                requested: to_ui_amount(disposal.requested, decimals),
                disposed,
            };
            warn!("{}", warning);
            self.acc.warnings.push(warning);
        }

        let state = self.touch(leg.mint());
        state.realized_pnl_usd = try_add(state.realized_pnl_usd, realized)?;
        state.total_disposed = try_add(state.total_disposed, disposed)?;
        state.total_proceeds_usd = try_add(state.total_proceeds_usd, proceeds)?;
        state.total_cost_disposed_usd = try_add(state.total_cost_disposed_usd, disposal.cost_basis_usd)?;
        state.unmatched_quantity = try_add(
            state.unmatched_quantity,
            to_ui_amount(disposal.shortfall(), decimals),
        )?;
        if disposal.requested > 0 {
            state.disposals += 1;
            state.last_disposed_at = Some(tx.timestamp);
        }

        debug!(
            "Disposed {} {} for ${} against cost ${} (realized ${})",
            disposed, leg.mint(), proceeds, disposal.cost_basis_usd, realized
        );
        Ok(())
    }
}

/// Run the accumulator over a whole history. The sequence is checked for
/// chronological order before anything is mutated.
pub fn accumulate(transactions: &[Transaction]) -> Result<Accumulation> {
    ensure_chronological(transactions)?;

    let mut accumulator = PnlAccumulator::new();
    for tx in transactions {
        accumulator.apply(tx)?;
    }
    Ok(accumulator.finish())
}
