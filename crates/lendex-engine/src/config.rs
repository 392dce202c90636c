//! Engine configuration
//!
//! Sources, lowest priority first:
//! 1. Compiled defaults
//! 2. Optional file named by `LENDEX_CONFIG` (any format the `config` crate reads)
//! 3. `LENDEX_*` environment variables, `__` separating nested keys
//!    (e.g. `LENDEX_POLICY__PLATFORM_FEE_PERCENT=12`)
//!
//! A `.env` file is loaded into the environment first when present.

use lendex_common::{
    LendexError, Result, DEFAULT_AMOUNT_SCALE, DEFAULT_DAYS_PER_YEAR,
    DEFAULT_LIQUIDATION_THRESHOLD_PERCENT, DEFAULT_MIN_COLLATERAL_RATIO_PERCENT,
    DEFAULT_PLATFORM_FEE_PERCENT,
};
use lendex_ledger::LedgerConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::fees::FeeNotifierConfig;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "LENDEX_CONFIG";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LENDEX";

/// Revenue stream that receives lending fees
pub const DEFAULT_FEE_STREAM_ID: u32 = 1;

/// Account credited with seized collateral
pub const DEFAULT_TREASURY_ACCOUNT: &str = "platform-treasury";

/// Lendex engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: InterestPolicy,
    /// Stream id passed to the fee sink
    pub fee_stream_id: u32,
    pub treasury_account: String,
    pub store: LedgerConfig,
    pub fee_notifier: FeeNotifierConfig,
    pub rates: Vec<RateEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: InterestPolicy::default(),
            fee_stream_id: DEFAULT_FEE_STREAM_ID,
            treasury_account: DEFAULT_TREASURY_ACCOUNT.to_string(),
            store: LedgerConfig::default(),
            fee_notifier: FeeNotifierConfig::default(),
            rates: RateEntry::defaults(),
        }
    }
}

/// Interest, fee and collateral policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestPolicy {
    /// Platform share of interest, in percent
    pub platform_fee_percent: Decimal,
    /// Collateral ratio required at origination when an asset sets none
    pub min_collateral_ratio_percent: Decimal,
    /// Collateral ratio at which a position becomes liquidatable
    pub liquidation_threshold_percent: Decimal,
    pub days_per_year: u32,
    /// Decimal places kept on settlement amounts
    pub amount_scale: u32,
}

impl Default for InterestPolicy {
    fn default() -> Self {
        Self {
            platform_fee_percent: DEFAULT_PLATFORM_FEE_PERCENT,
            min_collateral_ratio_percent: DEFAULT_MIN_COLLATERAL_RATIO_PERCENT,
            liquidation_threshold_percent: DEFAULT_LIQUIDATION_THRESHOLD_PERCENT,
            days_per_year: DEFAULT_DAYS_PER_YEAR,
            amount_scale: DEFAULT_AMOUNT_SCALE,
        }
    }
}

/// Rate Table entry for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub asset_id: String,
    /// Absent when the asset cannot be lent
    #[serde(default)]
    pub lend_rate_percent: Option<Decimal>,
    /// Absent when the asset cannot be borrowed
    #[serde(default)]
    pub borrow_rate_percent: Option<Decimal>,
    /// Overrides the policy minimum for loans of this asset
    #[serde(default)]
    pub required_collateral_ratio_percent: Option<Decimal>,
    #[serde(default)]
    pub collateral_enabled: bool,
}

impl RateEntry {
    /// Stock rates for the supported assets
    pub fn defaults() -> Vec<Self> {
        [
            ("USDT", dec!(8.5), dec!(12)),
            ("USDC", dec!(8), dec!(11.5)),
            ("BTC", dec!(3.5), dec!(6)),
            ("ETH", dec!(4.5), dec!(7.5)),
        ]
        .into_iter()
        .map(|(asset_id, lend, borrow)| Self {
            asset_id: asset_id.to_string(),
            lend_rate_percent: Some(lend),
            borrow_rate_percent: Some(borrow),
            required_collateral_ratio_percent: None,
            collateral_enabled: true,
        })
        .collect()
    }
}

impl EngineConfig {
    /// Load configuration from `.env`, an optional file, and the environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LendexError::Config(format!("Failed to read configuration: {}", e)))?;

        Self::from_settings(settings)
    }

    /// Parse configuration text in the given format, on top of the defaults
    pub fn parse(content: &str, format: config::FileFormat) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, format))
            .build()
            .map_err(|e| LendexError::Config(format!("Failed to parse configuration: {}", e)))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let config: Self = settings
            .try_deserialize()
            .map_err(|e| LendexError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent policy
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;

        if policy.platform_fee_percent < Decimal::ZERO
            || policy.platform_fee_percent >= Decimal::ONE_HUNDRED
        {
            return Err(LendexError::Config(format!(
                "platform_fee_percent must be in [0, 100), got {}",
                policy.platform_fee_percent
            )));
        }
        if policy.liquidation_threshold_percent <= Decimal::ONE_HUNDRED {
            return Err(LendexError::Config(format!(
                "liquidation_threshold_percent must exceed 100, got {}",
                policy.liquidation_threshold_percent
            )));
        }
        if policy.liquidation_threshold_percent >= policy.min_collateral_ratio_percent {
            return Err(LendexError::Config(format!(
                "liquidation threshold {} must be below the origination minimum {}",
                policy.liquidation_threshold_percent, policy.min_collateral_ratio_percent
            )));
        }
        if policy.days_per_year == 0 {
            return Err(LendexError::Config("days_per_year must be positive".into()));
        }
        if policy.amount_scale > 18 {
            return Err(LendexError::Config(format!(
                "amount_scale {} is too large",
                policy.amount_scale
            )));
        }
        if self.treasury_account.trim().is_empty() {
            return Err(LendexError::Config("treasury_account is required".into()));
        }
        if self.fee_notifier.channel_buffer == 0 {
            return Err(LendexError::Config(
                "fee_notifier.channel_buffer must be positive".into(),
            ));
        }

        for entry in &self.rates {
            if entry.asset_id.trim().is_empty() {
                return Err(LendexError::Config("rate entry without asset_id".into()));
            }
            for rate in [entry.lend_rate_percent, entry.borrow_rate_percent]
                .into_iter()
                .flatten()
            {
                if rate <= Decimal::ZERO {
                    return Err(LendexError::Config(format!(
                        "rates for {} must be positive, got {}",
                        entry.asset_id, rate
                    )));
                }
            }
            if let Some(ratio) = entry.required_collateral_ratio_percent {
                if ratio <= policy.liquidation_threshold_percent {
                    return Err(LendexError::Config(format!(
                        "required collateral ratio for {} must exceed the liquidation threshold",
                        entry.asset_id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.platform_fee_percent, dec!(15));
        assert_eq!(config.policy.min_collateral_ratio_percent, dec!(150));
        assert_eq!(config.policy.liquidation_threshold_percent, dec!(130));
        assert_eq!(config.rates.len(), 4);
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let config = EngineConfig::parse(
            r#"
            fee_stream_id = 7

            [policy]
            platform_fee_percent = "10"

            [[rates]]
            asset_id = "SOL"
            lend_rate_percent = "5.25"
            collateral_enabled = true
            "#,
            config::FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.fee_stream_id, 7);
        assert_eq!(config.policy.platform_fee_percent, dec!(10));
        assert_eq!(config.policy.days_per_year, 365);
        assert_eq!(config.rates.len(), 1);
        assert_eq!(config.rates[0].lend_rate_percent, Some(dec!(5.25)));
        assert_eq!(config.rates[0].borrow_rate_percent, None);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.policy.liquidation_threshold_percent = dec!(160);
        assert!(matches!(config.validate(), Err(LendexError::Config(_))));
    }

    #[test]
    fn test_rejects_full_fee() {
        let mut config = EngineConfig::default();
        config.policy.platform_fee_percent = dec!(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let mut config = EngineConfig::default();
        config.rates[0].borrow_rate_percent = Some(Decimal::ZERO);
        assert!(config.validate().is_err());
    }
}
