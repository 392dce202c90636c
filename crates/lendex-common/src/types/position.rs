//! Position - a single lend or borrow contract
//!
//! ```text
//!            Repay / Withdraw
//!   Active ─────────────────────▶ Repaid
//!     │
//!     │      liquidation
//!     └─────────────────────────▶ Liquidated
//! ```
//!
//! Terms (`kind`, `principal`, `annual_rate_percent`, `duration_days`) are fixed
//! at creation. Only settlement fields change afterwards.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AssetId, UserId};
use crate::error::PositionError;
use crate::SECONDS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    Lending,
    Borrowing,
}

impl fmt::Display for PositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PositionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionKind::Lending => "lending",
            PositionKind::Borrowing => "borrowing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Repaid,
    Liquidated,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Repaid => "repaid",
            PositionStatus::Liquidated => "liquidated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Active)
    }

    /// Only `Active` has outgoing transitions
    pub fn can_transition_to(&self, next: PositionStatus) -> bool {
        matches!(
            (self, next),
            (PositionStatus::Active, PositionStatus::Repaid)
                | (PositionStatus::Active, PositionStatus::Liquidated)
        )
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collateral posted against a borrowing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralTerms {
    pub asset_id: AssetId,
    pub amount: Decimal,
    /// Quote-currency value when the position was opened
    pub value_at_origination: Decimal,
    /// Collateral price at which the position becomes liquidatable
    pub liquidation_price: Decimal,
}

/// Terms of a new lending position
#[derive(Debug, Clone)]
pub struct NewLending {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
    pub annual_rate_percent: Decimal,
    pub duration_days: u32,
    pub platform_fee_percent: Decimal,
}

/// Terms of a new borrowing position
#[derive(Debug, Clone)]
pub struct NewBorrowing {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
    pub annual_rate_percent: Decimal,
    pub duration_days: u32,
    pub platform_fee_percent: Decimal,
    pub collateral: CollateralTerms,
}

/// Settlement applied to an active position
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    Repaid {
        interest_accrued: Decimal,
        platform_fee: Decimal,
        settled_at: DateTime<Utc>,
    },
    Liquidated {
        interest_accrued: Decimal,
        settled_at: DateTime<Utc>,
    },
}

impl StatusTransition {
    pub fn target(&self) -> PositionStatus {
        match self {
            StatusTransition::Repaid { .. } => PositionStatus::Repaid,
            StatusTransition::Liquidated { .. } => PositionStatus::Liquidated,
        }
    }
}

/// Lending or borrowing contract owned by the Position Store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Time-ordered (v7), immutable
    pub id: Uuid,
    pub user_id: UserId,
    /// Lent or borrowed asset
    pub asset_id: AssetId,
    pub kind: PositionKind,

    pub principal: Decimal,
    /// Principal still owed or returnable; zero only in a terminal state
    pub outstanding: Decimal,
    /// Rate snapshot taken at creation
    pub annual_rate_percent: Decimal,
    pub duration_days: u32,
    pub platform_fee_percent: Decimal,

    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub last_interest_update: DateTime<Utc>,

    pub interest_accrued: Decimal,
    pub platform_fee_collected: Decimal,

    /// Borrowing only
    pub collateral: Option<CollateralTerms>,

    pub settled_at: Option<DateTime<Utc>>,

    pub version: u64,
}

impl Position {
    pub fn open_lending(terms: NewLending, now: DateTime<Utc>) -> Self {
        Self::open(
            PositionKind::Lending,
            terms.user_id,
            terms.asset_id,
            terms.amount,
            terms.annual_rate_percent,
            terms.duration_days,
            terms.platform_fee_percent,
            None,
            now,
        )
    }

    pub fn open_borrowing(terms: NewBorrowing, now: DateTime<Utc>) -> Self {
        Self::open(
            PositionKind::Borrowing,
            terms.user_id,
            terms.asset_id,
            terms.amount,
            terms.annual_rate_percent,
            terms.duration_days,
            terms.platform_fee_percent,
            Some(terms.collateral),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        kind: PositionKind,
        user_id: UserId,
        asset_id: AssetId,
        principal: Decimal,
        annual_rate_percent: Decimal,
        duration_days: u32,
        platform_fee_percent: Decimal,
        collateral: Option<CollateralTerms>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            asset_id,
            kind,
            principal,
            outstanding: principal,
            annual_rate_percent,
            duration_days,
            platform_fee_percent,
            status: PositionStatus::Active,
            created_at: now,
            matures_at: now + Duration::days(i64::from(duration_days)),
            last_interest_update: now,
            interest_accrued: Decimal::ZERO,
            platform_fee_collected: Decimal::ZERO,
            collateral,
            settled_at: None,
            version: 0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.matures_at
    }

    /// Whole days until maturity, rounded up; zero once matured
    pub fn days_until_maturity(&self, now: DateTime<Utc>) -> i64 {
        let seconds = (self.matures_at - now).num_seconds();
        if seconds <= 0 {
            return 0;
        }
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }

    /// Asset and amount held locked by this position while active
    pub fn locked_claim(&self) -> (&str, Decimal) {
        match &self.collateral {
            Some(collateral) => (collateral.asset_id.as_str(), collateral.amount),
            None => (self.asset_id.as_str(), self.principal),
        }
    }

    /// Move to a terminal state, finalizing interest and fee
    pub fn apply(&mut self, transition: &StatusTransition) -> Result<(), PositionError> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let (interest_accrued, platform_fee, settled_at) = match *transition {
            StatusTransition::Repaid {
                interest_accrued,
                platform_fee,
                settled_at,
            } => (interest_accrued, platform_fee, settled_at),
            StatusTransition::Liquidated {
                interest_accrued,
                settled_at,
            } => (interest_accrued, Decimal::ZERO, settled_at),
        };

        self.status = target;
        self.outstanding = Decimal::ZERO;
        self.interest_accrued = interest_accrued;
        self.platform_fee_collected = platform_fee;
        self.last_interest_update = settled_at;
        self.settled_at = Some(settled_at);
        self.version += 1;
        Ok(())
    }
}
