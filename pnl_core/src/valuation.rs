use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use config_manager::QuantityReconciliation;

use crate::accumulator::Accumulation;
use crate::lot_inventory::TokenHolding;
use crate::transaction::{try_add, try_div, try_mul, try_sub};
use crate::warning::PnlWarning;
use crate::Result;

/// Gain/loss figures for one mint or for the whole wallet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PnlResult {
    pub realized_pnl_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub total_pnl_usd: Decimal,
    /// USD per unit of the remaining holding; None when nothing is held
    pub average_cost_basis_usd: Option<Decimal>,
}

impl PnlResult {
    fn new(realized: Decimal, unrealized: Decimal, average_cost_basis_usd: Option<Decimal>) -> Result<Self> {
        Ok(Self {
            realized_pnl_usd: realized,
            unrealized_pnl_usd: unrealized,
            total_pnl_usd: try_add(realized, unrealized)?,
            average_cost_basis_usd,
        })
    }
}

/// Mark-to-market of one open position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValuation {
    pub mint: String,
    /// Display units used for valuation
    pub quantity: Decimal,
    /// None when no current price was available (valued at zero)
    pub current_price_usd: Option<Decimal>,
    pub current_value_usd: Decimal,
    pub cost_basis_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub average_cost_basis_usd: Decimal,
}

/// Output of the valuation pass, before it is wrapped into a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Valuation {
    pub tokens: BTreeMap<String, PnlResult>,
    pub positions: BTreeMap<String, PositionValuation>,
    pub overall: PnlResult,
    pub warnings: Vec<PnlWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub transactions_processed: usize,
    pub unpriced_legs: usize,
    pub quantity_reconciliation: QuantityReconciliation,
    /// Every non-fatal condition met, in detection order
    pub warnings: Vec<PnlWarning>,
}

/// Final per-wallet result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlReport {
    pub wallet_address: String,
    /// Every mint touched by any leg
    pub tokens: BTreeMap<String, PnlResult>,
    pub positions: BTreeMap<String, PositionValuation>,
    /// Sum over tokens, realized reduced by all fees paid
    pub overall: PnlResult,
    pub total_fees_usd: Decimal,
    pub fees_by_mint: BTreeMap<String, Decimal>,
    pub metadata: ReportMetadata,
}

impl PnlReport {
    pub fn assemble(
        wallet_address: impl Into<String>,
        accumulation: Accumulation,
        valuation: Valuation,
        policy: QuantityReconciliation,
    ) -> Self {
        let mut warnings = accumulation.warnings;
        warnings.extend(valuation.warnings);

        Self {
            wallet_address: wallet_address.into(),
            tokens: valuation.tokens,
            positions: valuation.positions,
            overall: valuation.overall,
            total_fees_usd: accumulation.total_fees_usd,
            fees_by_mint: accumulation.fees_by_mint,
            metadata: ReportMetadata {
                transactions_processed: accumulation.transactions_processed,
                unpriced_legs: accumulation.unpriced_legs,
                quantity_reconciliation: policy,
                warnings,
            },
        }
    }

    pub fn token(&self, mint: &str) -> Option<&PnlResult> {
        self.tokens.get(mint)
    }

    pub fn has_reconciliation_warnings(&self) -> bool {
        self.metadata.warnings.iter().any(PnlWarning::is_reconciliation)
    }
}

fn valuation_quantity(holding: &TokenHolding, policy: QuantityReconciliation) -> Decimal {
    match policy {
        QuantityReconciliation::Tracked => holding.current_quantity_ui(),
        QuantityReconciliation::LotSum => holding.lot_quantity_sum_ui(),
    }
}

/// Mints that will need a current price under `policy`
pub fn open_mints(accumulation: &Accumulation, policy: QuantityReconciliation) -> BTreeSet<String> {
    accumulation
        .inventory
        .holdings()
        .filter(|h| valuation_quantity(h, policy) > Decimal::ZERO)
        .map(|h| h.mint().to_string())
        .collect()
}

/// Value the ending inventory at `prices` and aggregate per mint and overall.
/// Mints missing from `prices` are valued at zero with a warning. A figure
/// outside the `Decimal` range fails the whole pass with `Calculation`.
pub fn value_holdings(
    accumulation: &Accumulation,
    prices: &HashMap<String, Decimal>,
    policy: QuantityReconciliation,
) -> Result<Valuation> {
    let mut valuation = Valuation::default();
    let mut realized_sum = Decimal::ZERO;
    let mut unrealized_sum = Decimal::ZERO;

    for (mint, state) in &accumulation.states {
        let realized = state.realized_pnl_usd;
        realized_sum = try_add(realized_sum, realized)?;

        let Some(holding) = accumulation.inventory.holding(mint) else {
            valuation
                .tokens
                .insert(mint.clone(), PnlResult::new(realized, Decimal::ZERO, None)?);
            continue;
        };

        if !holding.is_reconciled() {
            let warning = PnlWarning::QuantityMismatch {
                mint: mint.clone(),
                tracked: holding.current_quantity_ui(),
                lot_sum: holding.lot_quantity_sum_ui(),
                used: valuation_quantity(holding, policy),
            };
            warn!("{}", warning);
            valuation.warnings.push(warning);
        }

        let quantity = valuation_quantity(holding, policy);
        if quantity <= Decimal::ZERO {
            valuation
                .tokens
                .insert(mint.clone(), PnlResult::new(realized, Decimal::ZERO, None)?);
            continue;
        }

        let current_price = prices.get(mint).copied();
        if current_price.is_none() {
            let warning = PnlWarning::PriceUnavailable { mint: mint.clone() };
            warn!("{}", warning);
            valuation.warnings.push(warning);
        }

        let cost_basis = holding.remaining_cost_basis_usd()?;
        let current_value = try_mul(quantity, current_price.unwrap_or(Decimal::ZERO))?;
        let unrealized = try_sub(current_value, cost_basis)?;
        let average_cost = try_div(cost_basis, quantity)?;
        unrealized_sum = try_add(unrealized_sum, unrealized)?;

        debug!(
            "Valued {} {} @ ${:?}: value ${}, cost ${}, unrealized ${}",
            quantity, mint, current_price, current_value, cost_basis, unrealized
        );

        valuation.positions.insert(
            mint.clone(),
            PositionValuation {
                mint: mint.clone(),
                quantity,
                current_price_usd: current_price,
                current_value_usd: current_value,
                cost_basis_usd: cost_basis,
                unrealized_pnl_usd: unrealized,
                average_cost_basis_usd: average_cost,
            },
        );
        valuation
            .tokens
            .insert(mint.clone(), PnlResult::new(realized, unrealized, Some(average_cost))?);
    }

    valuation.overall = PnlResult::new(
        try_sub(realized_sum, accumulation.total_fees_usd)?,
        unrealized_sum,
        None,
    )?;
    Ok(valuation)
}
