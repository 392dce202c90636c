//! Shared collaborators of the lending and margin engines

use std::sync::Arc;

use lendex_common::{
    Clock, CollateralTerms, ErrorClass, LendexError, Position, PositionError, PositionKind,
    Result,
};
use lendex_ledger::Ledger;
use rust_decimal::Decimal;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::InterestPolicy;
use crate::fees::{FeeNotice, FeeNotifier};
use crate::interest::round_amount;
use crate::metrics::EngineMetrics;
use crate::oracle::PriceOracle;
use crate::rates::RateTable;

/// Everything an engine needs besides its own logic
pub struct EngineContext {
    pub ledger: Ledger,
    pub rates: Arc<dyn RateTable>,
    pub oracle: Arc<dyn PriceOracle>,
    pub notifier: FeeNotifier,
    pub metrics: Arc<EngineMetrics>,
    pub policy: InterestPolicy,
    pub fee_stream_id: u32,
    pub treasury_account: String,
}

impl EngineContext {
    /// Price of an asset; missing prices fail closed
    pub async fn price_of(&self, asset_id: &str) -> Result<Decimal> {
        self.oracle
            .price_of(asset_id)
            .await
            .filter(|price| *price > Decimal::ZERO)
            .ok_or_else(|| LendexError::PriceUnavailable(asset_id.to_string()))
    }

    /// Ownership, kind and status checks shared by settlement paths
    pub fn check_settleable(
        &self,
        position: &Position,
        user_id: &str,
        kind: PositionKind,
    ) -> std::result::Result<(), PositionError> {
        if position.user_id != user_id {
            return Err(PositionError::NotOwner {
                position_id: position.id,
                user_id: user_id.to_string(),
            });
        }
        check_kind_and_status(position, kind)
    }

    /// Queue the platform fee of a settlement, valued in the quote currency
    pub fn notify_fee(
        &self,
        position: &Position,
        platform_fee: Decimal,
        asset_price: Decimal,
        description: String,
    ) -> bool {
        let Some(value) = platform_fee.checked_mul(asset_price) else {
            error!(position_id = %position.id, %platform_fee, %asset_price, "Fee value out of range");
            return false;
        };
        let amount_usd = round_amount(value, &self.policy);
        if amount_usd <= Decimal::ZERO {
            return false;
        }

        let queued = self.notifier.notify(FeeNotice::new(
            position.id,
            self.fee_stream_id,
            amount_usd,
            description,
            self.ledger.clock().now(),
        ));
        if queued {
            self.metrics.record_fee(amount_usd);
        }
        queued
    }

    /// Count and log a failed request
    pub fn record_rejection(&self, operation: &str, err: &LendexError) {
        let class = err.class();
        self.metrics.record_rejected(operation, class);

        if err.is_fatal() {
            error!(operation, error = %err, "Engine invariant broken");
        } else if class == ErrorClass::Infrastructure {
            warn!(operation, error = %err, "Request failed on infrastructure");
        } else {
            debug!(operation, class = class.as_str(), error = %err, "Request rejected");
        }
    }
}

/// Kind and status checks without an ownership requirement
pub fn check_kind_and_status(
    position: &Position,
    kind: PositionKind,
) -> std::result::Result<(), PositionError> {
    if position.kind != kind {
        return Err(PositionError::WrongKind {
            position_id: position.id,
            expected: kind,
            actual: position.kind,
        });
    }
    if !position.is_active() {
        return Err(PositionError::NotActive {
            position_id: position.id,
            status: position.status,
        });
    }
    Ok(())
}

/// Collateral terms of a borrowing position
pub(crate) fn collateral_of(position: &Position) -> Result<CollateralTerms> {
    position.collateral.clone().ok_or_else(|| {
        LendexError::InvariantViolation(format!(
            "borrowing position {} has no collateral",
            position.id
        ))
    })
}

pub(crate) fn fee_description(kind: PositionKind, position_id: Uuid) -> String {
    match kind {
        PositionKind::Lending => format!("Lending fee for position {position_id}"),
        PositionKind::Borrowing => format!("Borrowing fee for position {position_id}"),
    }
}
