//! Error types for Lendex
//!
//! `LendexError` is what callers of the engines see. `LedgerError` comes out of
//! the Balance Ledger and Position Store and converts into it. Variants carry
//! the numbers a caller needs to render an actionable message.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::position::{PositionKind, PositionStatus};
use crate::types::rates::RateRole;
use crate::types::{AssetId, UserId};

/// Result type alias using LendexError
pub type Result<T> = std::result::Result<T, LendexError>;

/// Unified error type for engine operations
#[derive(Debug, Error)]
pub enum LendexError {
    // Validation errors
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Asset {asset_id} is not supported for {role}")]
    AssetNotSupported { asset_id: AssetId, role: RateRole },

    // State errors
    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    // Insufficiency errors
    #[error("Insufficient {asset_id} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset_id: AssetId,
        required: Decimal,
        available: Decimal,
    },

    #[error("Insufficient collateral: required {required}%, provided {provided}%")]
    InsufficientCollateral { required: Decimal, provided: Decimal },

    // Infrastructure errors
    #[error("No usable price for {0}")]
    PriceUnavailable(AssetId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // Fatal errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`LendexError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input, rejected before any mutation
    Validation,
    /// Position not found, wrong owner, wrong kind, not matured, terminal
    State,
    /// Balance or collateral short of what the operation needs
    Insufficiency,
    /// Store or oracle trouble; no partial effect was applied
    Infrastructure,
    /// Broken invariant or misconfiguration
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::State => "state",
            ErrorClass::Insufficiency => "insufficiency",
            ErrorClass::Infrastructure => "infrastructure",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl LendexError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LendexError::Validation(_) | LendexError::AssetNotSupported { .. } => {
                ErrorClass::Validation
            }
            LendexError::Position(_) => ErrorClass::State,
            LendexError::InsufficientBalance { .. } | LendexError::InsufficientCollateral { .. } => {
                ErrorClass::Insufficiency
            }
            LendexError::PriceUnavailable(_) | LendexError::StoreUnavailable(_) => {
                ErrorClass::Infrastructure
            }
            LendexError::Config(_)
            | LendexError::InvariantViolation(_)
            | LendexError::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Whether the same request may succeed later (after correcting input or
    /// once the underlying condition changes)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::Insufficiency | ErrorClass::Infrastructure
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// Position state errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position not found: {0}")]
    NotFound(Uuid),

    #[error("Position {position_id} is not owned by {user_id}")]
    NotOwner { position_id: Uuid, user_id: UserId },

    #[error("Position {position_id} is a {actual} position, expected {expected}")]
    WrongKind {
        position_id: Uuid,
        expected: PositionKind,
        actual: PositionKind,
    },

    #[error("Position {position_id} is {status}, not active")]
    NotActive {
        position_id: Uuid,
        status: PositionStatus,
    },

    #[error("Position {position_id} matures at {matures_at} ({days_remaining} days remaining)")]
    NotMatured {
        position_id: Uuid,
        matures_at: DateTime<Utc>,
        days_remaining: i64,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error(
        "Position {position_id} is not liquidatable: collateral price {collateral_price} above liquidation price {liquidation_price}"
    )]
    NotLiquidatable {
        position_id: Uuid,
        collateral_price: Decimal,
        liquidation_price: Decimal,
    },
}

/// Balance Ledger and Position Store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient available {asset_id} for {user_id}: required {required}, available {available}")]
    InsufficientAvailable {
        user_id: UserId,
        asset_id: AssetId,
        required: Decimal,
        available: Decimal,
    },

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("Position already exists: {0}")]
    DuplicatePosition(Uuid),

    #[error("Record was not claimed by this unit: {0}")]
    Unclaimed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<LedgerError> for LendexError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientAvailable {
                asset_id,
                required,
                available,
                ..
            } => LendexError::InsufficientBalance {
                asset_id,
                required,
                available,
            },
            LedgerError::InvariantViolation(msg) => LendexError::InvariantViolation(msg),
            LedgerError::InvalidAmount(amount) => {
                LendexError::Validation(format!("invalid amount {amount}"))
            }
            LedgerError::Position(err) => LendexError::Position(err),
            LedgerError::StoreUnavailable(msg) => LendexError::StoreUnavailable(msg),
            err @ (LedgerError::DuplicatePosition(_) | LedgerError::Unclaimed(_)) => {
                LendexError::Internal(err.to_string())
            }
        }
    }
}
