use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

use crate::transaction::{to_ui_amount, to_ui_amount_wide, try_add, try_mul, TokenLeg};
use crate::Result;

/// A batch of one mint acquired at one time for one unit cost
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionLot {
    /// When this lot was acquired
    pub acquired_at: DateTime<Utc>,

    /// Transaction that created the lot
    pub signature: String,

    /// Units still held, in the mint's smallest unit
    pub quantity: u64,

    /// USD paid (or attributed) per display unit
    pub cost_per_unit_usd: Decimal,
}

impl AcquisitionLot {
    pub fn cost_basis_usd(&self, decimals: u8) -> Result<Decimal> {
        try_mul(to_ui_amount(self.quantity, decimals), self.cost_per_unit_usd)
    }
}

/// Result of consuming lots for one disposal
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Disposal {
    /// Units the transaction tried to dispose
    pub requested: u64,

    /// Units actually matched against lots
    pub disposed: u64,

    /// Cost basis of the matched units
    pub cost_basis_usd: Decimal,

    /// Lots drawn from, oldest first
    pub lots_touched: usize,
}

impl Disposal {
    /// Units disposed without a matching lot
    pub fn shortfall(&self) -> u64 {
        self.requested - self.disposed
    }

    pub fn is_complete(&self) -> bool {
        self.disposed == self.requested
    }
}

/// Open lots of one mint, oldest first, plus the running quantity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenHolding {
    mint: String,
    decimals: u8,
    lots: VecDeque<AcquisitionLot>,
    current_quantity: u64,
}

impl TokenHolding {
    pub fn new(mint: impl Into<String>, decimals: u8) -> Self {
        Self {
            mint: mint.into(),
            decimals,
            lots: VecDeque::new(),
            current_quantity: 0,
        }
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Remaining lots, oldest first
    pub fn lots(&self) -> impl Iterator<Item = &AcquisitionLot> {
        self.lots.iter()
    }

    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    /// Incrementally tracked quantity, smallest unit
    pub fn current_quantity(&self) -> u64 {
        self.current_quantity
    }

    /// Quantity recomputed from the lots, smallest unit
    pub fn lot_quantity_sum(&self) -> u128 {
        self.lots.iter().map(|lot| u128::from(lot.quantity)).sum()
    }

    pub fn is_reconciled(&self) -> bool {
        u128::from(self.current_quantity) == self.lot_quantity_sum()
    }

    pub fn current_quantity_ui(&self) -> Decimal {
        to_ui_amount(self.current_quantity, self.decimals)
    }

    pub fn lot_quantity_sum_ui(&self) -> Decimal {
        to_ui_amount_wide(self.lot_quantity_sum(), self.decimals)
    }

    /// Total cost basis of every remaining lot
    pub fn remaining_cost_basis_usd(&self) -> Result<Decimal> {
        self.lots.iter().try_fold(Decimal::ZERO, |total, lot| {
            try_add(total, lot.cost_basis_usd(self.decimals)?)
        })
    }

    /// Append a lot at the tail of the queue
    pub fn acquire(
        &mut self,
        quantity: u64,
        cost_per_unit_usd: Decimal,
        acquired_at: DateTime<Utc>,
        signature: &str,
    ) {
        if quantity == 0 {
            debug!("Ignoring zero-quantity acquisition of {} (tx {})", self.mint, signature);
            return;
        }

        self.lots.push_back(AcquisitionLot {
            acquired_at,
            signature: signature.to_string(),
            quantity,
            cost_per_unit_usd,
        });
        self.current_quantity = self.current_quantity.saturating_add(quantity);

        trace!(
            "Acquired {} {} @ ${} (lots={}, held={})",
            to_ui_amount(quantity, self.decimals),
            self.mint,
            cost_per_unit_usd,
            self.lots.len(),
            self.current_quantity_ui()
        );
    }

    /// Remove `quantity` units from the head of the queue, spanning lots as
    /// needed. Disposing more than is held consumes everything and reports the
    /// shortfall instead of failing. A cost basis outside the `Decimal` range
    /// fails with `Calculation` and leaves the queue untouched.
    pub fn dispose(&mut self, quantity: u64) -> Result<Disposal> {
        let mut remains = quantity;
        let mut cost_basis_usd = Decimal::ZERO;
        let mut lots_touched = 0usize;

        for lot in &self.lots {
            if remains == 0 {
                break;
            }
            let taken = remains.min(lot.quantity);
            let taken_cost = try_mul(to_ui_amount(taken, self.decimals), lot.cost_per_unit_usd)?;
            cost_basis_usd = try_add(cost_basis_usd, taken_cost)?;
            remains -= taken;
            lots_touched += 1;
        }

        let disposed = quantity - remains;
        let mut pending = disposed;
        while pending > 0 {
            let Some(oldest) = self.lots.front_mut() else {
                break;
            };

            let taken = pending.min(oldest.quantity);
            oldest.quantity -= taken;
            pending -= taken;

            trace!(
                "FIFO: took {} {} from lot {} @ ${} (lot left {})",
                to_ui_amount(taken, self.decimals),
                self.mint,
                oldest.signature,
                oldest.cost_per_unit_usd,
                to_ui_amount(oldest.quantity, self.decimals)
            );

            if oldest.quantity == 0 {
                self.lots.pop_front();
            }
        }

        self.current_quantity = self.current_quantity.saturating_sub(disposed);

        Ok(Disposal {
            requested: quantity,
            disposed,
            cost_basis_usd,
            lots_touched,
        })
    }

    #[cfg(test)]
    pub(crate) fn force_tracked_quantity(&mut self, quantity: u64) {
        self.current_quantity = quantity;
    }
}

/// A leg's amount expressed in the decimals of the holding it lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedAmount {
    pub amount: u64,
    pub decimals: u8,
    /// Holding decimals when they differ from the leg's
    pub rescaled_from: Option<u8>,
}

/// Per-mint FIFO lot queues for one wallet computation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LotInventory {
    holdings: BTreeMap<String, TokenHolding>,
}

impl LotInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(&self, mint: &str) -> Option<&TokenHolding> {
        self.holdings.get(mint)
    }

    /// Holdings in mint order, including fully disposed ones
    pub fn holdings(&self) -> impl Iterator<Item = &TokenHolding> {
        self.holdings.values()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Express `leg` in the decimals of its existing holding, if any.
    /// Scaling down truncates sub-unit dust; scaling up saturates at `u64::MAX`.
    pub fn align(&self, leg: &TokenLeg) -> AlignedAmount {
        let Some(holding) = self.holdings.get(leg.mint()) else {
            return AlignedAmount {
                amount: leg.amount(),
                decimals: leg.decimals(),
                rescaled_from: None,
            };
        };

        let target = holding.decimals();
        if target == leg.decimals() {
            return AlignedAmount {
                amount: leg.amount(),
                decimals: target,
                rescaled_from: None,
            };
        }

        let raw = u128::from(leg.amount());
        let scaled = if target > leg.decimals() {
            raw.saturating_mul(10u128.pow(u32::from(target - leg.decimals())))
        } else {
            raw / 10u128.pow(u32::from(leg.decimals() - target))
        };

        AlignedAmount {
            amount: u64::try_from(scaled).unwrap_or(u64::MAX),
            decimals: target,
            rescaled_from: Some(leg.decimals()),
        }
    }

    pub fn acquire(
        &mut self,
        mint: &str,
        decimals: u8,
        quantity: u64,
        cost_per_unit_usd: Decimal,
        acquired_at: DateTime<Utc>,
        signature: &str,
    ) {
        self.holdings
            .entry(mint.to_string())
            .or_insert_with(|| TokenHolding::new(mint, decimals))
            .acquire(quantity, cost_per_unit_usd, acquired_at, signature);
    }

    /// Dispose from `mint`'s queue. A mint never acquired yields an empty
    /// disposal with the whole quantity as shortfall and creates no holding.
    pub fn dispose(&mut self, mint: &str, quantity: u64) -> Result<Disposal> {
        match self.holdings.get_mut(mint) {
            Some(holding) => holding.dispose(quantity),
            None => Ok(Disposal {
                requested: quantity,
                ..Disposal::default()
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn holding_mut(&mut self, mint: &str) -> Option<&mut TokenHolding> {
        self.holdings.get_mut(mint)
    }
}
