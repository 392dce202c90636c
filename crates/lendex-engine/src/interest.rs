//! Interest, fee and collateral math
//!
//! ```text
//! fixed-term interest = principal × rate% × durationDays / daysPerYear
//! accrued interest    = principal × rate% × daysElapsed  / daysPerYear
//! platform fee        = interest × fee%
//! liquidation price   = borrowValue × threshold% / collateralAmount
//! ```
//!
//! Results are rounded to the policy scale with banker's rounding. The net
//! share is derived by subtraction so that fee + net always equals the total.
//! Every product and quotient is checked; an out-of-range result is a
//! validation error, never a panic.

use chrono::{DateTime, Utc};
use lendex_common::{LendexError, Position, Result, SECONDS_PER_DAY};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::InterestPolicy;

/// Round a settlement amount to the policy scale
pub fn round_amount(value: Decimal, policy: &InterestPolicy) -> Decimal {
    value.round_dp_with_strategy(policy.amount_scale, RoundingStrategy::MidpointNearestEven)
}

fn out_of_range(what: &str) -> LendexError {
    LendexError::Validation(format!("{what} is out of range"))
}

/// Quote-currency value of an amount
pub fn value_of(amount: Decimal, price: Decimal) -> Result<Decimal> {
    amount
        .checked_mul(price)
        .ok_or_else(|| out_of_range("asset value"))
}

/// Checked sum of two settlement amounts
pub fn add_amounts(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| out_of_range("settlement amount"))
}

fn simple_interest(
    principal: Decimal,
    annual_rate_percent: Decimal,
    days: Decimal,
    policy: &InterestPolicy,
) -> Result<Decimal> {
    let year = Decimal::ONE_HUNDRED * Decimal::from(policy.days_per_year);
    principal
        .checked_mul(annual_rate_percent)
        .and_then(|v| v.checked_mul(days))
        .and_then(|v| v.checked_div(year))
        .map(|v| round_amount(v, policy))
        .ok_or_else(|| out_of_range("interest"))
}

/// Interest over the full contract term
pub fn fixed_term_interest(
    principal: Decimal,
    annual_rate_percent: Decimal,
    duration_days: u32,
    policy: &InterestPolicy,
) -> Result<Decimal> {
    simple_interest(
        principal,
        annual_rate_percent,
        Decimal::from(duration_days),
        policy,
    )
}

/// Interest for a number of elapsed days
pub fn accrued_interest(
    principal: Decimal,
    annual_rate_percent: Decimal,
    days_elapsed: i64,
    policy: &InterestPolicy,
) -> Result<Decimal> {
    if days_elapsed <= 0 {
        return Ok(Decimal::ZERO);
    }
    simple_interest(
        principal,
        annual_rate_percent,
        Decimal::from(days_elapsed),
        policy,
    )
}

/// Whole days between two instants, rounded up; zero if `to` is not after `from`
pub fn days_elapsed_ceil(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let seconds = (to - from).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

/// Interest split between the platform and the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub total_interest: Decimal,
    pub platform_fee: Decimal,
    pub net_interest: Decimal,
}

pub fn split_fee(
    total_interest: Decimal,
    fee_percent: Decimal,
    policy: &InterestPolicy,
) -> Result<FeeSplit> {
    let platform_fee = total_interest
        .checked_mul(fee_percent)
        .map(|v| round_amount(v / Decimal::ONE_HUNDRED, policy))
        .ok_or_else(|| out_of_range("platform fee"))?;
    Ok(FeeSplit {
        total_interest,
        platform_fee,
        net_interest: total_interest - platform_fee,
    })
}

/// Collateral price at which collateral value falls to the liquidation threshold
pub fn liquidation_price(
    borrow_value: Decimal,
    collateral_amount: Decimal,
    policy: &InterestPolicy,
) -> Result<Decimal> {
    borrow_value
        .checked_mul(policy.liquidation_threshold_percent)
        .map(|v| v / Decimal::ONE_HUNDRED)
        .and_then(|v| v.checked_div(collateral_amount))
        .map(|v| round_amount(v, policy))
        .ok_or_else(|| out_of_range("liquidation price"))
}

/// Collateral ratio as a percentage, two decimal places
pub fn collateral_ratio_percent(collateral_value: Decimal, borrow_value: Decimal) -> Result<Decimal> {
    if borrow_value.is_zero() {
        return Ok(Decimal::ZERO);
    }
    collateral_value
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|v| v.checked_div(borrow_value))
        .map(|v| v.round_dp_with_strategy(2, RoundingStrategy::ToZero))
        .ok_or_else(|| out_of_range("collateral ratio"))
}

/// Exact comparison, `collateral / borrow >= required%`
pub fn meets_collateral_ratio(
    collateral_value: Decimal,
    borrow_value: Decimal,
    required_percent: Decimal,
) -> Result<bool> {
    let provided = collateral_value.checked_mul(Decimal::ONE_HUNDRED);
    let required = required_percent.checked_mul(borrow_value);
    match (provided, required) {
        (Some(provided), Some(required)) => Ok(provided >= required),
        _ => Err(out_of_range("collateral ratio")),
    }
}

/// Non-binding projection of a lending position at maturity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsProjection {
    pub total_interest: Decimal,
    pub platform_fee: Decimal,
    pub net_earnings: Decimal,
    pub matures_at: DateTime<Utc>,
}

impl EarningsProjection {
    pub fn for_position(position: &Position, policy: &InterestPolicy) -> Result<Self> {
        let total = fixed_term_interest(
            position.principal,
            position.annual_rate_percent,
            position.duration_days,
            policy,
        )?;
        let split = split_fee(total, position.platform_fee_percent, policy)?;
        Ok(Self {
            total_interest: split.total_interest,
            platform_fee: split.platform_fee,
            net_earnings: split.net_interest,
            matures_at: position.matures_at,
        })
    }
}
