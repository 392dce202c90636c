//! Balance - per-user, per-asset funds
//!
//! Key characteristics:
//! - `total` is everything the user holds of the asset
//! - `locked` is the part reserved by active positions (lent principal or posted collateral)
//! - `available = total - locked` is what new operations may consume
//! - Version field bumped on every mutation

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AssetId, UserId};

/// Balance operation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BalanceError {
    #[error("Insufficient available balance: required {required}, available {available}")]
    InsufficientAvailable {
        required: Decimal,
        available: Decimal,
    },

    #[error("Cannot unlock {requested}: only {locked} locked")]
    InvariantViolation { requested: Decimal, locked: Decimal },

    #[error("Amount must not be negative: {0}")]
    InvalidAmount(Decimal),

    #[error("Crediting {amount} would overflow total {total}")]
    Overflow { total: Decimal, amount: Decimal },
}

/// Ledger key of a balance record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user_id: UserId,
    pub asset_id: AssetId,
}

impl BalanceKey {
    pub fn new(user_id: impl Into<UserId>, asset_id: impl Into<AssetId>) -> Self {
        Self {
            user_id: user_id.into(),
            asset_id: asset_id.into(),
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.asset_id)
    }
}

/// Balance record owned by the Balance Ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub asset_id: AssetId,

    /// Everything held, locked or not
    pub total: Decimal,

    /// Reserved by active positions, never above `total`
    pub locked: Decimal,

    /// Bumped on every mutation
    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zero balance for a pair that has never been referenced
    pub fn empty(key: &BalanceKey, at: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id.clone(),
            asset_id: key.asset_id.clone(),
            total: Decimal::ZERO,
            locked: Decimal::ZERO,
            version: 0,
            updated_at: at,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.user_id.clone(), self.asset_id.clone())
    }

    #[inline]
    pub fn available(&self) -> Decimal {
        self.total - self.locked
    }

    /// `0 <= locked <= total`
    pub fn is_consistent(&self) -> bool {
        self.locked >= Decimal::ZERO && self.locked <= self.total
    }

    /// Reserve part of the available balance; `total` is unchanged
    pub fn lock(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        check_amount(amount)?;
        self.ensure_available(amount)?;

        self.locked += amount;
        self.touch();
        Ok(())
    }

    /// Release a reservation back to available
    pub fn unlock(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        check_amount(amount)?;

        if amount > self.locked {
            return Err(BalanceError::InvariantViolation {
                requested: amount,
                locked: self.locked,
            });
        }

        self.locked -= amount;
        self.touch();
        Ok(())
    }

    pub fn credit(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        check_amount(amount)?;

        self.total = self
            .total
            .checked_add(amount)
            .ok_or(BalanceError::Overflow {
                total: self.total,
                amount,
            })?;
        self.touch();
        Ok(())
    }

    /// Remove funds from the available part of the balance
    pub fn debit(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        check_amount(amount)?;
        self.ensure_available(amount)?;

        self.total -= amount;
        self.touch();
        Ok(())
    }

    fn ensure_available(&self, amount: Decimal) -> Result<(), BalanceError> {
        let available = self.available();
        if available < amount {
            return Err(BalanceError::InsufficientAvailable {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

fn check_amount(amount: Decimal) -> Result<(), BalanceError> {
    if amount < Decimal::ZERO {
        return Err(BalanceError::InvalidAmount(amount));
    }
    Ok(())
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Balance({}/{}: total={}, locked={}, available={})",
            self.user_id,
            self.asset_id,
            self.total,
            self.locked,
            self.available()
        )
    }
}
