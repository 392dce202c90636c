//! Rate Table
//!
//! Read-only policy lookup of annual rates and collateral requirements per
//! asset. Engines take a snapshot at position creation and never re-query it
//! for an existing position.

use std::collections::HashMap;

use lendex_common::{AssetId, LendexError, RateQuote, RateRole, Result};
use rust_decimal::Decimal;

use crate::config::{EngineConfig, RateEntry};

/// Rate policy seam
pub trait RateTable: Send + Sync {
    /// Quote for an asset in a role, or `AssetNotSupported`
    fn lookup(&self, asset_id: &str, role: RateRole) -> Result<RateQuote>;

    /// Assets with any configured role
    fn assets(&self) -> Vec<AssetId>;
}

#[derive(Debug, Clone, PartialEq)]
struct AssetRates {
    lend_rate_percent: Option<Decimal>,
    borrow_rate_percent: Option<Decimal>,
    required_collateral_ratio_percent: Decimal,
    collateral_enabled: bool,
}

/// Rate Table built from static policy
#[derive(Debug, Clone)]
pub struct StaticRateTable {
    rates: HashMap<AssetId, AssetRates>,
}

impl StaticRateTable {
    pub fn builder(min_collateral_ratio_percent: Decimal) -> RateTableBuilder {
        RateTableBuilder::new(min_collateral_ratio_percent)
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut builder = Self::builder(config.policy.min_collateral_ratio_percent);
        for entry in &config.rates {
            builder = builder.with_entry(entry);
        }
        builder.build()
    }
}

impl RateTable for StaticRateTable {
    fn lookup(&self, asset_id: &str, role: RateRole) -> Result<RateQuote> {
        let unsupported = || LendexError::AssetNotSupported {
            asset_id: asset_id.to_string(),
            role,
        };
        let rates = self.rates.get(asset_id).ok_or_else(unsupported)?;

        let annual_rate_percent = match role {
            RateRole::Lend => rates.lend_rate_percent.ok_or_else(unsupported)?,
            RateRole::Borrow => rates.borrow_rate_percent.ok_or_else(unsupported)?,
            RateRole::Collateral if rates.collateral_enabled => Decimal::ZERO,
            RateRole::Collateral => return Err(unsupported()),
        };

        Ok(RateQuote {
            asset_id: asset_id.to_string(),
            role,
            annual_rate_percent,
            required_collateral_ratio_percent: rates.required_collateral_ratio_percent,
        })
    }

    fn assets(&self) -> Vec<AssetId> {
        let mut assets: Vec<AssetId> = self.rates.keys().cloned().collect();
        assets.sort();
        assets
    }
}

/// Builder for [`StaticRateTable`]
#[derive(Debug, Clone)]
pub struct RateTableBuilder {
    min_collateral_ratio_percent: Decimal,
    rates: HashMap<AssetId, AssetRates>,
}

impl RateTableBuilder {
    pub fn new(min_collateral_ratio_percent: Decimal) -> Self {
        Self {
            min_collateral_ratio_percent,
            rates: HashMap::new(),
        }
    }

    fn entry(&mut self, asset_id: &str) -> &mut AssetRates {
        let min = self.min_collateral_ratio_percent;
        self.rates
            .entry(asset_id.to_string())
            .or_insert_with(|| AssetRates {
                lend_rate_percent: None,
                borrow_rate_percent: None,
                required_collateral_ratio_percent: min,
                collateral_enabled: false,
            })
    }

    /// Set lending rate for an asset
    pub fn with_lend_rate(mut self, asset_id: &str, annual_rate_percent: Decimal) -> Self {
        self.entry(asset_id).lend_rate_percent = Some(annual_rate_percent);
        self
    }

    /// Set borrowing rate for an asset
    pub fn with_borrow_rate(mut self, asset_id: &str, annual_rate_percent: Decimal) -> Self {
        self.entry(asset_id).borrow_rate_percent = Some(annual_rate_percent);
        self
    }

    /// Override the origination collateral ratio for loans of an asset
    pub fn with_required_ratio(mut self, asset_id: &str, ratio_percent: Decimal) -> Self {
        self.entry(asset_id).required_collateral_ratio_percent = ratio_percent;
        self
    }

    /// Accept an asset as collateral
    pub fn with_collateral(mut self, asset_id: &str) -> Self {
        self.entry(asset_id).collateral_enabled = true;
        self
    }

    pub fn with_entry(mut self, entry: &RateEntry) -> Self {
        let min = self.min_collateral_ratio_percent;
        let rates = self.entry(&entry.asset_id);
        rates.lend_rate_percent = entry.lend_rate_percent;
        rates.borrow_rate_percent = entry.borrow_rate_percent;
        rates.required_collateral_ratio_percent =
            entry.required_collateral_ratio_percent.unwrap_or(min);
        rates.collateral_enabled = entry.collateral_enabled;
        self
    }

    pub fn build(self) -> StaticRateTable {
        StaticRateTable { rates: self.rates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> StaticRateTable {
        StaticRateTable::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_default_rates() {
        let table = table();

        let lend = table.lookup("USDT", RateRole::Lend).unwrap();
        assert_eq!(lend.annual_rate_percent, dec!(8.5));

        let borrow = table.lookup("USDT", RateRole::Borrow).unwrap();
        assert_eq!(borrow.annual_rate_percent, dec!(12));
        assert_eq!(borrow.required_collateral_ratio_percent, dec!(150));

        assert_eq!(table.assets(), vec!["BTC", "ETH", "USDC", "USDT"]);
    }

    #[test]
    fn test_unknown_asset() {
        let err = table().lookup("DOGE", RateRole::Lend).unwrap_err();
        assert!(matches!(
            err,
            LendexError::AssetNotSupported { ref asset_id, role: RateRole::Lend } if asset_id == "DOGE"
        ));
    }

    #[test]
    fn test_role_not_configured() {
        let table = StaticRateTable::builder(dec!(150))
            .with_lend_rate("SOL", dec!(5))
            .with_required_ratio("SOL", dec!(200))
            .build();

        assert!(table.lookup("SOL", RateRole::Lend).is_ok());
        assert!(table.lookup("SOL", RateRole::Borrow).is_err());
        assert!(table.lookup("SOL", RateRole::Collateral).is_err());
    }

    #[test]
    fn test_per_asset_ratio_override() {
        let table = StaticRateTable::builder(dec!(150))
            .with_borrow_rate("ETH", dec!(7.5))
            .with_required_ratio("ETH", dec!(175))
            .with_collateral("BTC")
            .build();

        let quote = table.lookup("ETH", RateRole::Borrow).unwrap();
        assert_eq!(quote.required_collateral_ratio_percent, dec!(175));

        let collateral = table.lookup("BTC", RateRole::Collateral).unwrap();
        assert_eq!(collateral.annual_rate_percent, Decimal::ZERO);
    }
}
