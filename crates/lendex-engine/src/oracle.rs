//! Price Oracle seam
//!
//! Quote-currency price per unit of an asset. Callers treat a missing or
//! non-positive price as unavailable and abort rather than assume zero.

use async_trait::async_trait;
use dashmap::DashMap;
use lendex_common::{AssetId, LendexError, Result};
use rust_decimal::Decimal;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one unit of `asset_id`, if known
    async fn price_of(&self, asset_id: &str) -> Option<Decimal>;
}

/// Oracle backed by a concurrent map of fixed prices
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    prices: DashMap<AssetId, Decimal>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style price setter
    pub fn with_price(self, asset_id: &str, price: Decimal) -> Result<Self> {
        self.set_price(asset_id, price)?;
        Ok(self)
    }

    pub fn set_price(&self, asset_id: &str, price: Decimal) -> Result<()> {
        if price <= Decimal::ZERO {
            return Err(LendexError::Validation(format!(
                "price for {asset_id} must be positive, got {price}"
            )));
        }
        self.prices.insert(asset_id.to_string(), price);
        Ok(())
    }

    pub fn remove_price(&self, asset_id: &str) {
        self.prices.remove(asset_id);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_of(&self, asset_id: &str) -> Option<Decimal> {
        self.prices
            .get(asset_id)
            .map(|p| *p)
            .filter(|p| *p > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_set_and_read_price() {
        let oracle = StaticPriceOracle::new()
            .with_price("BTC", dec!(50000))
            .unwrap();

        assert_eq!(oracle.price_of("BTC").await, Some(dec!(50000)));
        assert_eq!(oracle.price_of("ETH").await, None);

        oracle.remove_price("BTC");
        assert_eq!(oracle.price_of("BTC").await, None);
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let oracle = StaticPriceOracle::new();
        assert!(oracle.set_price("USDT", Decimal::ZERO).is_err());
        assert!(oracle.set_price("USDT", dec!(-1)).is_err());
    }
}
