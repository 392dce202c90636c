//! Rate quotes handed out by the Rate Table

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AssetId;

/// Role an asset plays in a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateRole {
    Lend,
    Borrow,
    Collateral,
}

impl fmt::Display for RateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateRole::Lend => "lending",
            RateRole::Borrow => "borrowing",
            RateRole::Collateral => "collateral",
        })
    }
}

/// Policy snapshot for one asset and role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub asset_id: AssetId,
    pub role: RateRole,
    /// Zero for the collateral role
    pub annual_rate_percent: Decimal,
    /// Minimum collateral-to-loan ratio at origination
    pub required_collateral_ratio_percent: Decimal,
}
