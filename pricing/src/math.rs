//! Pricing arithmetic
//!
//! `total_cost = amount x (1 + rate x terms / 365)`, rounded
//! half-away-from-zero to two decimal places. The buyer pays exactly
//! this; the supplier receives the face amount; the provider's profit is
//! the difference.

use rust_decimal::{Decimal, RoundingStrategy};

/// Buyer's all-in cost for financing `amount` at an annualised
/// `discount_rate` over `terms_days`.
pub fn total_cost(amount: Decimal, discount_rate: Decimal, terms_days: u16) -> Decimal {
    let financing = amount * discount_rate * Decimal::from(terms_days) / Decimal::from(365);
    (amount + financing).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Capital provider's profit on a settlement
pub fn provider_profit(amount: Decimal, total_cost: Decimal) -> Decimal {
    total_cost - amount
}
