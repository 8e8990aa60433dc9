use rust_decimal::Decimal;
use serde::Serialize;

use crate::transaction::LegSide;

/// Non-fatal condition met while computing a report. Each one is logged where
/// it is detected and carried in the report so callers can judge how far to
/// trust the numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PnlWarning {
    /// Disposed more than the recorded lots held (history gap)
    DisposalShortfall {
        mint: String,
        signature: String,
        requested: Decimal,
        disposed: Decimal,
    },
    /// Tracked holding quantity disagrees with the sum of remaining lots
    QuantityMismatch {
        mint: String,
        tracked: Decimal,
        lot_sum: Decimal,
        used: Decimal,
    },
    /// A leg reported a different decimal count than the holding was opened with
    DecimalsMismatch {
        mint: String,
        signature: String,
        expected: u8,
        found: u8,
    },
    /// No current price for an open position; valued at zero
    PriceUnavailable { mint: String },
    /// Leg carried no USD price at transaction time; treated as zero
    UnpricedLeg {
        mint: String,
        signature: String,
        side: LegSide,
    },
}

impl PnlWarning {
    /// Ledger disagreements, as opposed to missing price data
    pub fn is_reconciliation(&self) -> bool {
        matches!(
            self,
            PnlWarning::DisposalShortfall { .. }
                | PnlWarning::QuantityMismatch { .. }
                | PnlWarning::DecimalsMismatch { .. }
        )
    }

    pub fn mint(&self) -> &str {
        match self {
            PnlWarning::DisposalShortfall { mint, .. }
            | PnlWarning::QuantityMismatch { mint, .. }
            | PnlWarning::DecimalsMismatch { mint, .. }
            | PnlWarning::PriceUnavailable { mint }
            | PnlWarning::UnpricedLeg { mint, .. } => mint,
        }
    }
}

impl std::fmt::Display for PnlWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PnlWarning::DisposalShortfall {
                mint,
                signature,
                requested,
                disposed,
            } => write!(
                f,
                "disposed {} of {} but only {} was held; possible history gap (tx {})",
                requested, mint, disposed, signature
            ),
            PnlWarning::QuantityMismatch {
                mint,
                tracked,
                lot_sum,
                used,
            } => write!(
                f,
                "remaining quantity mismatch for {}: tracked {}, lots {}, valued {}",
                mint, tracked, lot_sum, used
            ),
            PnlWarning::DecimalsMismatch {
                mint,
                signature,
                expected,
                found,
            } => write!(
                f,
                "{} reported {} decimals, holding uses {} (tx {})",
                mint, found, expected, signature
            ),
            PnlWarning::PriceUnavailable { mint } => {
                write!(f, "no current price for {}; valued at zero", mint)
            }
            PnlWarning::UnpricedLeg {
                mint,
                signature,
                side,
            } => write!(
                f,
                "no historical price for {} leg of {} (tx {}); treated as zero",
                side, mint, signature
            ),
        }
    }
}
