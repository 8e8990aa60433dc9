use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PnLError, Result};

/// Wrapped SOL; native SOL balance changes are reported under this mint
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// Assets a wallet pays with or is paid in when trading
pub const QUOTE_MINTS: &[&str] = &[WSOL_MINT, USDC_MINT, USDT_MINT];

pub const SOL_DECIMALS: u8 = 9;

/// Largest decimal count a `Decimal` can hold exactly
pub const MAX_DECIMALS: u8 = 28;

pub fn is_quote_mint(mint: &str) -> bool {
    QUOTE_MINTS.contains(&mint)
}

/// Convert a raw amount in the token's smallest unit to display units
pub fn to_ui_amount(raw: u64, decimals: u8) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(raw), u32::from(decimals.min(MAX_DECIMALS)))
}

/// Same as [`to_ui_amount`] for lot sums, which are accumulated in `u128`
pub fn to_ui_amount_wide(raw: u128, decimals: u8) -> Decimal {
    i128::try_from(raw)
        .ok()
        .and_then(|r| Decimal::try_from_i128_with_scale(r, u32::from(decimals.min(MAX_DECIMALS))).ok())
        .unwrap_or(Decimal::MAX)
}

fn out_of_range(lhs: Decimal, op: &str, rhs: Decimal) -> PnLError {
    PnLError::Calculation(format!("{} {} {} is outside the Decimal range", lhs, op, rhs))
}

/// `lhs + rhs`, failing with `Calculation` instead of overflowing
pub fn try_add(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_add(rhs).ok_or_else(|| out_of_range(lhs, "+", rhs))
}

/// `lhs - rhs`, failing with `Calculation` instead of overflowing
pub fn try_sub(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_sub(rhs).ok_or_else(|| out_of_range(lhs, "-", rhs))
}

/// `lhs * rhs`, failing with `Calculation` instead of overflowing
pub fn try_mul(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_mul(rhs).ok_or_else(|| out_of_range(lhs, "*", rhs))
}

/// `lhs / rhs`, failing with `Calculation` on overflow or a zero divisor
pub fn try_div(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_div(rhs).ok_or_else(|| out_of_range(lhs, "/", rhs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Buy,
    Sell,
    TransferIn,
    TransferOut,
    Swap,
    Airdrop,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    In,
    Out,
    Fee,
}

impl std::fmt::Display for LegSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegSide::In => write!(f, "in"),
            LegSide::Out => write!(f, "out"),
            LegSide::Fee => write!(f, "fee"),
        }
    }
}

/// A quantity of one mint, in the mint's smallest unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenLeg {
    mint: String,
    amount: u64,
    decimals: u8,
}

impl TokenLeg {
    pub fn new(mint: impl Into<String>, amount: u64, decimals: u8) -> Result<Self> {
        let mint = mint.into();
        if mint.is_empty() {
            return Err(PnLError::InvalidLeg("empty mint".to_string()));
        }
        if decimals > MAX_DECIMALS {
            return Err(PnLError::InvalidLeg(format!(
                "{} has {} decimals, at most {} supported",
                mint, decimals, MAX_DECIMALS
            )));
        }

        Ok(Self {
            mint,
            amount,
            decimals,
        })
    }

    /// Build a leg from a display amount; it must be representable exactly in
    /// the mint's smallest unit.
    pub fn from_ui(mint: impl Into<String>, ui_amount: Decimal, decimals: u8) -> Result<Self> {
        let mint = mint.into();
        if ui_amount.is_sign_negative() && !ui_amount.is_zero() {
            return Err(PnLError::InvalidLeg(format!(
                "negative amount {} for {}",
                ui_amount, mint
            )));
        }
        if decimals > MAX_DECIMALS {
            return Err(PnLError::InvalidLeg(format!(
                "{} has {} decimals, at most {} supported",
                mint, decimals, MAX_DECIMALS
            )));
        }

        let mut scaled = ui_amount;
        scaled.rescale(u32::from(decimals));
        if scaled != ui_amount || scaled.scale() != u32::from(decimals) {
            return Err(PnLError::InvalidLeg(format!(
                "amount {} of {} is finer than {} decimals",
                ui_amount, mint, decimals
            )));
        }

        let amount = u64::try_from(scaled.mantissa()).map_err(|_| {
            PnLError::InvalidLeg(format!("amount {} of {} exceeds u64 base units", ui_amount, mint))
        })?;

        Self::new(mint, amount, decimals)
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    /// Raw amount in the smallest unit
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn ui_amount(&self) -> Decimal {
        to_ui_amount(self.amount, self.decimals)
    }

    /// USD value at `unit_price_usd`; an absent price values the leg at zero
    pub fn usd_value(&self, unit_price_usd: Option<Decimal>) -> Result<Decimal> {
        try_mul(self.ui_amount(), unit_price_usd.unwrap_or(Decimal::ZERO))
    }
}

/// Canonical, immutable record of one wallet-relevant transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// On-chain signature, kept for traceability
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    /// Slot the transaction landed in; 0 when the provider does not say
    pub slot: u64,
    pub kind: TransactionKind,
    /// Token received by the wallet
    pub token_in: Option<TokenLeg>,
    /// Token sent from the wallet
    pub token_out: Option<TokenLeg>,
    /// Network fee paid by the wallet
    pub fee: Option<TokenLeg>,
    /// USD unit prices at the time of the transaction
    pub price_in_usd: Option<Decimal>,
    pub price_out_usd: Option<Decimal>,
    pub fee_price_usd: Option<Decimal>,
}

impl Transaction {
    pub fn new(signature: impl Into<String>, timestamp: DateTime<Utc>, kind: TransactionKind) -> Self {
        Self {
            signature: signature.into(),
            timestamp,
            slot: 0,
            kind,
            token_in: None,
            token_out: None,
            fee: None,
            price_in_usd: None,
            price_out_usd: None,
            fee_price_usd: None,
        }
    }

    pub fn with_slot(mut self, slot: u64) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_token_in(mut self, leg: TokenLeg, price_usd: Option<Decimal>) -> Self {
        self.token_in = Some(leg);
        self.price_in_usd = price_usd;
        self
    }

    pub fn with_token_out(mut self, leg: TokenLeg, price_usd: Option<Decimal>) -> Self {
        self.token_out = Some(leg);
        self.price_out_usd = price_usd;
        self
    }

    pub fn with_fee(mut self, leg: TokenLeg, price_usd: Option<Decimal>) -> Self {
        self.fee = Some(leg);
        self.fee_price_usd = price_usd;
        self
    }

    /// Legs present on this transaction with their side and unit price
    pub fn legs(&self) -> impl Iterator<Item = (LegSide, &TokenLeg, Option<Decimal>)> {
        [
            (LegSide::In, self.token_in.as_ref(), self.price_in_usd),
            (LegSide::Out, self.token_out.as_ref(), self.price_out_usd),
            (LegSide::Fee, self.fee.as_ref(), self.fee_price_usd),
        ]
        .into_iter()
        .filter_map(|(side, leg, price)| leg.map(|l| (side, l, price)))
    }
}
