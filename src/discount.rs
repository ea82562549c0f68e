//! Holder discounts derived from an on-chain token balance.
//!
//! A discount is a derived value: recomputed per checkout from a live
//! balance query, capped by configuration, and never persisted. A failed
//! lookup degrades to zero discount at the call site; it must never block a
//! purchase.
use crate::config::DiscountConfig;
use crate::error::CheckoutError;
use crate::gateway::ChainGateway;
use rust_decimal::Decimal;
use std::sync::Arc;

/// The clamp itself, kept pure so its monotonicity is testable without a
/// gateway: `min(balance × rate, cap)`, never below zero.
pub fn discount_for_balance(balance: u64, rate_per_token: Decimal, cap: Decimal) -> Decimal {
    let raw = Decimal::from(balance) * rate_per_token;
    raw.min(cap).max(Decimal::ZERO)
}

pub struct DiscountCalculator {
    config: DiscountConfig,
    chain: Arc<dyn ChainGateway>,
}

impl DiscountCalculator {
    pub fn new(config: DiscountConfig, chain: Arc<dyn ChainGateway>) -> Self {
        Self { config, chain }
    }

    /// Percentage points of discount for `address`, in `[0, cap]`. Disabled
    /// discounts answer zero without touching the network.
    pub async fn discount_for(&self, address: &str) -> Result<Decimal, CheckoutError> {
        if !self.config.enabled {
            return Ok(Decimal::ZERO);
        }

        let balance = self
            .chain
            .token_balance(address, &self.config.token_id)
            .await
            .map_err(|e| CheckoutError::DiscountUnavailable(e.to_string()))?;

        Ok(discount_for_balance(
            balance,
            self.config.rate_per_token,
            self.config.cap,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn clamps_at_the_cap() {
        let rate = Decimal::from_str("0.5").unwrap();
        let cap = Decimal::from_str("20").unwrap();

        assert_eq!(discount_for_balance(10, rate, cap), Decimal::from(5));
        assert_eq!(discount_for_balance(40, rate, cap), cap);
        assert_eq!(discount_for_balance(4_000, rate, cap), cap);
    }

    #[test]
    fn zero_balance_earns_nothing() {
        let rate = Decimal::from_str("0.5").unwrap();
        let cap = Decimal::from_str("20").unwrap();

        assert_eq!(discount_for_balance(0, rate, cap), Decimal::ZERO);
    }
}
