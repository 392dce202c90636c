//! Typed operation requests
//!
//! Each request deserializes strictly (unknown or missing fields are errors)
//! and is validated before any engine work starts.

use lendex_common::{LendexError, Result, UserId, MAX_AMOUNT, MAX_DURATION_DAYS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LendexError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(LendexError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    if value > MAX_AMOUNT {
        return Err(LendexError::Validation(format!(
            "{field} must not exceed {MAX_AMOUNT}, got {value}"
        )));
    }
    Ok(())
}

fn require_duration(duration_days: u32) -> Result<()> {
    if duration_days == 0 || duration_days > MAX_DURATION_DAYS {
        return Err(LendexError::Validation(format!(
            "duration_days must be between 1 and {MAX_DURATION_DAYS}, got {duration_days}"
        )));
    }
    Ok(())
}

/// Lend idle balance for a fixed term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LendRequest {
    pub user_id: UserId,
    pub asset_id: String,
    pub amount: Decimal,
    pub duration_days: u32,
}

impl LendRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("user_id", &self.user_id)?;
        require_id("asset_id", &self.asset_id)?;
        require_positive("amount", self.amount)?;
        require_duration(self.duration_days)
    }
}

/// Settle a matured lending position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawRequest {
    pub user_id: UserId,
    pub position_id: Uuid,
}

impl WithdrawRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("user_id", &self.user_id)
    }
}

/// Borrow against posted collateral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BorrowRequest {
    pub user_id: UserId,
    pub borrow_asset_id: String,
    pub amount: Decimal,
    pub collateral_asset_id: String,
    pub collateral_amount: Decimal,
    pub duration_days: u32,
}

impl BorrowRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("user_id", &self.user_id)?;
        require_id("borrow_asset_id", &self.borrow_asset_id)?;
        require_id("collateral_asset_id", &self.collateral_asset_id)?;
        require_positive("amount", self.amount)?;
        require_positive("collateral_amount", self.collateral_amount)?;
        require_duration(self.duration_days)?;

        if self.borrow_asset_id == self.collateral_asset_id {
            return Err(LendexError::Validation(format!(
                "cannot borrow {} against itself",
                self.borrow_asset_id
            )));
        }
        Ok(())
    }
}

/// Settle a borrowing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepayRequest {
    pub user_id: UserId,
    pub position_id: Uuid,
}

impl RepayRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("user_id", &self.user_id)
    }
}

/// Liquidate an undercollateralized borrowing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiquidateRequest {
    pub position_id: Uuid,
}
