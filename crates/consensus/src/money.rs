//! Monetary units.

/// Balances and values in the smallest unit (10^-18 of a coin).
pub type Amount = u128;

pub const COIN: Amount = 1_000_000_000_000_000_000;
