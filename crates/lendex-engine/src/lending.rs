//! Lending Engine
//!
//! Fixed-term lending against a user's idle balance.
//!
//! `Lend` locks the principal in place; it never leaves the user's `total`.
//! `Withdraw` at or after maturity releases the lock and credits the user's
//! share of the full-term interest. The platform's share is handed to the fee
//! notifier after the settlement commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lendex_common::{
    Clock, LendexError, NewLending, Position, PositionError, PositionKind, RateRole, Result,
    StatusTransition,
};
use lendex_ledger::LockClaims;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::context::{fee_description, EngineContext};
use crate::interest::{add_amounts, fixed_term_interest, split_fee, EarningsProjection};
use crate::requests::{LendRequest, WithdrawRequest};

/// Result of a successful `Lend`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendOutcome {
    pub position: Position,
    /// Informational; not a guarantee
    pub projection: EarningsProjection,
}

/// Result of a settlement (`Withdraw` or `Repay`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub position: Position,
    pub total_interest: Decimal,
    pub platform_fee: Decimal,
    /// User's share of the interest
    pub net_interest: Decimal,
    /// Funds returned to (withdraw) or taken from (repay) the user's available balance
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
    /// Whether the fee notice was queued for delivery
    pub fee_queued: bool,
}

pub struct LendingEngine {
    ctx: Arc<EngineContext>,
}

impl LendingEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Open a fixed-term lending position
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, asset_id = %request.asset_id, amount = %request.amount)
    )]
    pub async fn lend(&self, request: LendRequest) -> Result<LendOutcome> {
        let _timer = self.ctx.metrics.start_timer("lend");
        let result = self.open(request).await;
        if let Err(err) = &result {
            self.ctx.record_rejection("lend", err);
        }
        result
    }

    /// Settle a matured lending position
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, position_id = %request.position_id)
    )]
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<SettlementResult> {
        let _timer = self.ctx.metrics.start_timer("withdraw");
        let result = self.settle(request).await;
        if let Err(err) = &result {
            self.ctx.record_rejection("withdraw", err);
        }
        result
    }

    async fn open(&self, request: LendRequest) -> Result<LendOutcome> {
        request.validate()?;
        let quote = self.ctx.rates.lookup(&request.asset_id, RateRole::Lend)?;

        let LendRequest {
            user_id,
            asset_id,
            amount,
            duration_days,
        } = request;

        let mut unit = self
            .ctx
            .ledger
            .begin(LockClaims::new().balance(&user_id, &asset_id))
            .await?;

        let balance = unit.get_or_create_balance(&user_id, &asset_id).await?;
        if balance.available() < amount {
            debug!(available = %balance.available(), "Lend rejected on available balance");
            return Err(LendexError::InsufficientBalance {
                asset_id,
                required: amount,
                available: balance.available(),
            });
        }

        let position = Position::open_lending(
            NewLending {
                user_id: user_id.clone(),
                asset_id: asset_id.clone(),
                amount,
                annual_rate_percent: quote.annual_rate_percent,
                duration_days,
                platform_fee_percent: self.ctx.policy.platform_fee_percent,
            },
            unit.now(),
        );
        let projection = EarningsProjection::for_position(&position, &self.ctx.policy)?;

        unit.lock(&user_id, &asset_id, amount).await?;
        unit.create_position(position.clone())?;
        unit.commit().await?;

        self.ctx.metrics.record_opened(PositionKind::Lending);
        info!(
            position_id = %position.id,
            rate = %position.annual_rate_percent,
            matures_at = %position.matures_at,
            "Lending position opened"
        );

        Ok(LendOutcome {
            position,
            projection,
        })
    }

    async fn settle(&self, request: WithdrawRequest) -> Result<SettlementResult> {
        request.validate()?;
        let WithdrawRequest {
            user_id,
            position_id,
        } = request;

        let position = self.ctx.ledger.get_position(position_id).await?;
        self.ctx
            .check_settleable(&position, &user_id, PositionKind::Lending)?;
        ensure_matured(&position, self.ctx.ledger.clock().now())?;

        let price = self.ctx.price_of(&position.asset_id).await?;
        let asset_id = position.asset_id.clone();

        let mut unit = self
            .ctx
            .ledger
            .begin(
                LockClaims::new()
                    .position(position_id)
                    .balance(&user_id, &asset_id),
            )
            .await?;

        // Another unit may have settled it while we waited for the locks
        let current = unit.position(position_id).await?;
        self.ctx
            .check_settleable(&current, &user_id, PositionKind::Lending)?;
        let settled_at = unit.now();
        ensure_matured(&current, settled_at)?;

        let total_interest = fixed_term_interest(
            current.principal,
            current.annual_rate_percent,
            current.duration_days,
            &self.ctx.policy,
        )?;
        let split = split_fee(
            total_interest,
            current.platform_fee_percent,
            &self.ctx.policy,
        )?;
        let amount = add_amounts(current.principal, split.net_interest)?;

        unit.get_or_create_balance(&user_id, &asset_id).await?;
        unit.unlock(&user_id, &asset_id, current.principal).await?;
        unit.credit(&user_id, &asset_id, split.net_interest).await?;
        let settled = unit
            .update_status(
                position_id,
                StatusTransition::Repaid {
                    interest_accrued: split.total_interest,
                    platform_fee: split.platform_fee,
                    settled_at,
                },
            )
            .await?;
        unit.commit().await?;

        self.ctx
            .metrics
            .record_settled(PositionKind::Lending, settled.status);
        info!(
            total_interest = %split.total_interest,
            platform_fee = %split.platform_fee,
            net_interest = %split.net_interest,
            "Lending position withdrawn"
        );

        let fee_queued = self.ctx.notify_fee(
            &settled,
            split.platform_fee,
            price,
            fee_description(PositionKind::Lending, position_id),
        );

        Ok(SettlementResult {
            amount,
            position: settled,
            total_interest: split.total_interest,
            platform_fee: split.platform_fee,
            net_interest: split.net_interest,
            settled_at,
            fee_queued,
        })
    }
}

fn ensure_matured(position: &Position, now: DateTime<Utc>) -> Result<()> {
    if position.is_matured(now) {
        return Ok(());
    }
    Err(PositionError::NotMatured {
        position_id: position.id,
        matures_at: position.matures_at,
        days_remaining: position.days_until_maturity(now),
    }
    .into())
}
