//! Fee and breakeven math
//!
//! Pure decimal arithmetic: half-even rounding at scale 8 throughout.
//! Two calculators exist side by side: a fixed single-rate cap, and a
//! maker/taker tier with the BNB-paid discount. The active one is chosen
//! by configuration alone, and both are deterministic: identical inputs
//! always produce identical outputs.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::PositionType;

const SCALE: u32 = 8;

fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Single-leg trading fee: `notional × rate`.
pub fn trading_fee(notional: Decimal, rate: Decimal) -> Decimal {
    round(notional * rate)
}

/// Entry + exit fee, symmetric on the entry notional.
pub fn total_fee(notional: Decimal, rate: Decimal) -> Decimal {
    round(trading_fee(notional, rate) * Decimal::TWO)
}

/// The exit price at which a round trip nets zero after fees.
pub fn breakeven(entry: Decimal, rate: Decimal, position: PositionType) -> Decimal {
    let spread = Decimal::TWO * rate;
    let factor = match position {
        PositionType::Long => Decimal::ONE + spread,
        PositionType::Short => Decimal::ONE - spread,
    };
    round(entry * factor)
}

/// Volume-weighted entry over multiple fills: `Σ(pᵢ·qᵢ) / Σqᵢ`.
pub fn weighted_entry(fills: &[(Decimal, Decimal)]) -> Option<Decimal> {
    let total_qty: Decimal = fills.iter().map(|(_, q)| *q).sum();
    if total_qty.is_zero() {
        return None;
    }
    let notional: Decimal = fills.iter().map(|(p, q)| *p * *q).sum();
    Some(round(notional / total_qty))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeeMode {
    /// One flat rate for every leg.
    Fixed { rate: Decimal },
    /// Maker/taker rates, optionally discounted for BNB-paid fees.
    Tiered {
        maker: Decimal,
        taker: Decimal,
        bnb_discount: bool,
    },
}

/// BNB-paid fees are charged at 90% of the tier rate.
const BNB_DISCOUNT: &str = "0.9";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liquidity {
    Maker,
    Taker,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeePreview {
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub total_fee: Decimal,
    pub breakeven_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct FeeCalculator {
    mode: FeeMode,
}

impl FeeCalculator {
    pub fn new(mode: FeeMode) -> Self {
        Self { mode }
    }

    pub fn fixed(rate: f64) -> Self {
        Self::new(FeeMode::Fixed {
            rate: Decimal::from_f64(rate).unwrap_or_default(),
        })
    }

    /// The effective per-leg rate for the given liquidity role.
    pub fn rate(&self, liquidity: Liquidity) -> Decimal {
        match &self.mode {
            FeeMode::Fixed { rate } => *rate,
            FeeMode::Tiered {
                maker,
                taker,
                bnb_discount,
            } => {
                let base = match liquidity {
                    Liquidity::Maker => *maker,
                    Liquidity::Taker => *taker,
                };
                if *bnb_discount {
                    round(base * BNB_DISCOUNT.parse::<Decimal>().unwrap_or(Decimal::ONE))
                } else {
                    base
                }
            }
        }
    }

    /// Expected fees and breakeven for an order about to be placed.
    /// Attached to the order result before placement.
    pub fn preview(
        &self,
        entry_price: Decimal,
        quantity: Decimal,
        position: PositionType,
        liquidity: Liquidity,
    ) -> FeePreview {
        let rate = self.rate(liquidity);
        let notional = round(entry_price * quantity);
        let entry_fee = trading_fee(notional, rate);
        FeePreview {
            entry_fee,
            exit_fee: entry_fee,
            total_fee: total_fee(notional, rate),
            breakeven_price: breakeven(entry_price, rate, position),
        }
    }
}
