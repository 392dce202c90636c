//! # Lendex Common
//!
//! Shared types, errors, and policy constants for the Lendex collateralized
//! lending and margin-position engine.
//!
//! ## Core Types
//!
//! - [`Balance`]: Per-user, per-asset balance with a `total` and `locked` sub-balance
//! - [`Position`]: A single lend or borrow contract and its state machine
//! - [`RateQuote`]: Snapshot of an asset's annual rate and collateral requirement
//! - [`Clock`]: Time source used for maturity and interest accrual
//!
//! ## Errors
//!
//! - [`LendexError`]: Engine-boundary error, classified per [`ErrorClass`]
//! - [`LedgerError`]: Balance Ledger / Position Store error
//! - [`PositionError`]: Position state errors (not found, wrong owner, not matured, ...)

pub mod clock;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorClass, LedgerError, LendexError, PositionError, Result};
pub use types::{
    balance::{Balance, BalanceError, BalanceKey},
    position::{
        CollateralTerms, NewBorrowing, NewLending, Position, PositionKind, PositionStatus,
        StatusTransition,
    },
    rates::{RateQuote, RateRole},
    AssetId, UserId,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Lendex version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform share of accrued interest, in percent
pub const DEFAULT_PLATFORM_FEE_PERCENT: Decimal = dec!(15);

/// Minimum collateral-to-loan ratio at origination, in percent
pub const DEFAULT_MIN_COLLATERAL_RATIO_PERCENT: Decimal = dec!(150);

/// Collateral-to-loan ratio at which a borrowing position becomes liquidatable, in percent
pub const DEFAULT_LIQUIDATION_THRESHOLD_PERCENT: Decimal = dec!(130);

/// Day-count basis for annual rates
pub const DEFAULT_DAYS_PER_YEAR: u32 = 365;

/// Decimal places kept on settlement amounts
pub const DEFAULT_AMOUNT_SCALE: u32 = 8;

/// Longest contract accepted at the request boundary
pub const MAX_DURATION_DAYS: u32 = 3650;

/// Largest single amount accepted at the request boundary and by deposits
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Seconds in one accrual day
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
