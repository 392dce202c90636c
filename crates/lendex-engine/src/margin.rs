//! Margin Engine
//!
//! Collateralized borrowing. `Borrow` locks collateral and credits the borrowed
//! asset as freely available funds. `Repay` accrues simple interest for the
//! elapsed days, debits principal plus interest and releases the collateral.
//!
//! Liquidation is driven externally: a risk monitor polls
//! [`MarginEngine::liquidation_candidates`] and calls [`MarginEngine::liquidate`],
//! which seizes the full collateral into the treasury account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lendex_common::{
    CollateralTerms, LendexError, NewBorrowing, Position, PositionError, PositionKind, RateRole,
    Result, StatusTransition,
};
use lendex_ledger::LockClaims;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::{check_kind_and_status, collateral_of, fee_description, EngineContext};
use crate::interest::{
    accrued_interest, add_amounts, collateral_ratio_percent, days_elapsed_ceil,
    liquidation_price, meets_collateral_ratio, round_amount, split_fee, value_of,
};
use crate::lending::SettlementResult;
use crate::requests::{BorrowRequest, LiquidateRequest, RepayRequest};

/// Result of a liquidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub position: Position,
    pub collateral_price: Decimal,
    pub collateral_seized: Decimal,
    pub interest_accrued: Decimal,
    pub treasury_account: String,
    pub liquidated_at: DateTime<Utc>,
}

/// Active borrowing at or below its liquidation price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationCandidate {
    pub position: Position,
    pub collateral_price: Decimal,
}

pub struct MarginEngine {
    ctx: Arc<EngineContext>,
}

impl MarginEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Open a borrowing position against collateral
    #[instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            borrow_asset = %request.borrow_asset_id,
            collateral_asset = %request.collateral_asset_id
        )
    )]
    pub async fn borrow(&self, request: BorrowRequest) -> Result<Position> {
        let _timer = self.ctx.metrics.start_timer("borrow");
        let result = self.open(request).await;
        if let Err(err) = &result {
            self.ctx.record_rejection("borrow", err);
        }
        result
    }

    /// Settle a borrowing position
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, position_id = %request.position_id)
    )]
    pub async fn repay(&self, request: RepayRequest) -> Result<SettlementResult> {
        let _timer = self.ctx.metrics.start_timer("repay");
        let result = self.settle(request).await;
        if let Err(err) = &result {
            self.ctx.record_rejection("repay", err);
        }
        result
    }

    /// Seize the collateral of an undercollateralized position
    #[instrument(skip(self, request), fields(position_id = %request.position_id))]
    pub async fn liquidate(&self, request: LiquidateRequest) -> Result<LiquidationResult> {
        let _timer = self.ctx.metrics.start_timer("liquidate");
        let result = self.seize(request.position_id).await;
        if let Err(err) = &result {
            self.ctx.record_rejection("liquidate", err);
        }
        result
    }

    /// Active borrowings whose collateral price is at or below the liquidation price
    pub async fn liquidation_candidates(&self) -> Vec<LiquidationCandidate> {
        let mut candidates = Vec::new();
        for position in self.ctx.ledger.active_borrowings().await {
            let Some(collateral) = position.collateral.as_ref() else {
                warn!(position_id = %position.id, "Borrowing position without collateral");
                continue;
            };
            let collateral_price = match self.ctx.price_of(&collateral.asset_id).await {
                Ok(price) => price,
                Err(err) => {
                    warn!(position_id = %position.id, error = %err, "Skipping liquidation check");
                    continue;
                }
            };
            if collateral_price <= collateral.liquidation_price {
                candidates.push(LiquidationCandidate {
                    position,
                    collateral_price,
                });
            }
        }
        candidates
    }

    async fn open(&self, request: BorrowRequest) -> Result<Position> {
        request.validate()?;
        let quote = self
            .ctx
            .rates
            .lookup(&request.borrow_asset_id, RateRole::Borrow)?;
        self.ctx
            .rates
            .lookup(&request.collateral_asset_id, RateRole::Collateral)?;

        let borrow_price = self.ctx.price_of(&request.borrow_asset_id).await?;
        let collateral_price = self.ctx.price_of(&request.collateral_asset_id).await?;

        let borrow_value = value_of(request.amount, borrow_price)?;
        let collateral_value = value_of(request.collateral_amount, collateral_price)?;
        let required = quote.required_collateral_ratio_percent;
        if !meets_collateral_ratio(collateral_value, borrow_value, required)? {
            return Err(LendexError::InsufficientCollateral {
                required,
                provided: collateral_ratio_percent(collateral_value, borrow_value)?,
            });
        }

        let policy = &self.ctx.policy;
        let collateral = CollateralTerms {
            asset_id: request.collateral_asset_id.clone(),
            amount: request.collateral_amount,
            value_at_origination: round_amount(collateral_value, policy),
            liquidation_price: liquidation_price(borrow_value, request.collateral_amount, policy)?,
        };

        let BorrowRequest {
            user_id,
            borrow_asset_id,
            amount,
            collateral_asset_id,
            collateral_amount,
            duration_days,
        } = request;

        let mut unit = self
            .ctx
            .ledger
            .begin(
                LockClaims::new()
                    .balance(&user_id, &borrow_asset_id)
                    .balance(&user_id, &collateral_asset_id),
            )
            .await?;

        let posted = unit
            .get_or_create_balance(&user_id, &collateral_asset_id)
            .await?;
        unit.get_or_create_balance(&user_id, &borrow_asset_id)
            .await?;
        if posted.available() < collateral_amount {
            debug!(available = %posted.available(), "Borrow rejected on available collateral");
            return Err(LendexError::InsufficientBalance {
                asset_id: collateral_asset_id,
                required: collateral_amount,
                available: posted.available(),
            });
        }

        let position = Position::open_borrowing(
            NewBorrowing {
                user_id: user_id.clone(),
                asset_id: borrow_asset_id.clone(),
                amount,
                annual_rate_percent: quote.annual_rate_percent,
                duration_days,
                platform_fee_percent: policy.platform_fee_percent,
                collateral,
            },
            unit.now(),
        );

        unit.lock(&user_id, &collateral_asset_id, collateral_amount)
            .await?;
        unit.credit(&user_id, &borrow_asset_id, amount).await?;
        unit.create_position(position.clone())?;
        unit.commit().await?;

        self.ctx.metrics.record_opened(PositionKind::Borrowing);
        info!(
            position_id = %position.id,
            amount = %amount,
            collateral_amount = %collateral_amount,
            liquidation_price = ?position.collateral.as_ref().map(|c| c.liquidation_price),
            "Borrowing position opened"
        );
        Ok(position)
    }

    async fn settle(&self, request: RepayRequest) -> Result<SettlementResult> {
        request.validate()?;
        let RepayRequest {
            user_id,
            position_id,
        } = request;

        let position = self.ctx.ledger.get_position(position_id).await?;
        self.ctx
            .check_settleable(&position, &user_id, PositionKind::Borrowing)?;
        let collateral = collateral_of(&position)?;
        let price = self.ctx.price_of(&position.asset_id).await?;
        let asset_id = position.asset_id.clone();

        let mut unit = self
            .ctx
            .ledger
            .begin(
                LockClaims::new()
                    .position(position_id)
                    .balance(&user_id, &asset_id)
                    .balance(&user_id, &collateral.asset_id),
            )
            .await?;

        let current = unit.position(position_id).await?;
        self.ctx
            .check_settleable(&current, &user_id, PositionKind::Borrowing)?;
        let settled_at = unit.now();

        let days_elapsed = days_elapsed_ceil(current.last_interest_update, settled_at);
        let new_interest = accrued_interest(
            current.principal,
            current.annual_rate_percent,
            days_elapsed,
            &self.ctx.policy,
        )?;
        let total_interest = add_amounts(current.interest_accrued, new_interest)?;
        let total_owed = add_amounts(current.principal, total_interest)?;

        let balance = unit.get_or_create_balance(&user_id, &asset_id).await?;
        if balance.available() < total_owed {
            debug!(
                total_owed = %total_owed,
                available = %balance.available(),
                "Repay rejected on available balance"
            );
            return Err(LendexError::InsufficientBalance {
                asset_id,
                required: total_owed,
                available: balance.available(),
            });
        }

        let split = split_fee(
            total_interest,
            current.platform_fee_percent,
            &self.ctx.policy,
        )?;

        unit.debit(&user_id, &asset_id, total_owed).await?;
        unit.unlock(&user_id, &collateral.asset_id, collateral.amount)
            .await?;
        let settled = unit
            .update_status(
                position_id,
                StatusTransition::Repaid {
                    interest_accrued: total_interest,
                    platform_fee: split.platform_fee,
                    settled_at,
                },
            )
            .await?;
        unit.commit().await?;

        self.ctx
            .metrics
            .record_settled(PositionKind::Borrowing, settled.status);
        info!(
            days_elapsed,
            total_owed = %total_owed,
            total_interest = %total_interest,
            platform_fee = %split.platform_fee,
            "Borrowing position repaid"
        );

        let fee_queued = self.ctx.notify_fee(
            &settled,
            split.platform_fee,
            price,
            fee_description(PositionKind::Borrowing, position_id),
        );

        Ok(SettlementResult {
            position: settled,
            total_interest,
            platform_fee: split.platform_fee,
            net_interest: split.net_interest,
            amount: total_owed,
            settled_at,
            fee_queued,
        })
    }

    async fn seize(&self, position_id: Uuid) -> Result<LiquidationResult> {
        let position = self.ctx.ledger.get_position(position_id).await?;
        check_kind_and_status(&position, PositionKind::Borrowing)?;
        let collateral = collateral_of(&position)?;

        let collateral_price = self.ctx.price_of(&collateral.asset_id).await?;
        ensure_liquidatable(&position, &collateral, collateral_price)?;

        let owner = position.user_id.clone();
        let treasury = self.ctx.treasury_account.clone();
        let mut unit = self
            .ctx
            .ledger
            .begin(
                LockClaims::new()
                    .position(position_id)
                    .balance(&owner, &collateral.asset_id)
                    .balance(&treasury, &collateral.asset_id),
            )
            .await?;

        let current = unit.position(position_id).await?;
        check_kind_and_status(&current, PositionKind::Borrowing)?;
        let liquidated_at = unit.now();

        let days_elapsed = days_elapsed_ceil(current.last_interest_update, liquidated_at);
        let interest_accrued = add_amounts(
            current.interest_accrued,
            accrued_interest(
                current.principal,
                current.annual_rate_percent,
                days_elapsed,
                &self.ctx.policy,
            )?,
        )?;

        unit.get_or_create_balance(&owner, &collateral.asset_id)
            .await?;
        unit.get_or_create_balance(&treasury, &collateral.asset_id)
            .await?;
        unit.unlock(&owner, &collateral.asset_id, collateral.amount)
            .await?;
        unit.debit(&owner, &collateral.asset_id, collateral.amount)
            .await?;
        unit.credit(&treasury, &collateral.asset_id, collateral.amount)
            .await?;
        let liquidated = unit
            .update_status(
                position_id,
                StatusTransition::Liquidated {
                    interest_accrued,
                    settled_at: liquidated_at,
                },
            )
            .await?;
        unit.commit().await?;

        self.ctx
            .metrics
            .record_settled(PositionKind::Borrowing, liquidated.status);
        info!(
            user_id = %owner,
            collateral_asset = %collateral.asset_id,
            collateral_seized = %collateral.amount,
            collateral_price = %collateral_price,
            "Borrowing position liquidated"
        );

        Ok(LiquidationResult {
            position: liquidated,
            collateral_price,
            collateral_seized: collateral.amount,
            interest_accrued,
            treasury_account: treasury,
            liquidated_at,
        })
    }
}

fn ensure_liquidatable(
    position: &Position,
    collateral: &CollateralTerms,
    collateral_price: Decimal,
) -> std::result::Result<(), PositionError> {
    if collateral_price > collateral.liquidation_price {
        return Err(PositionError::NotLiquidatable {
            position_id: position.id,
            collateral_price,
            liquidation_price: collateral.liquidation_price,
        });
    }
    Ok(())
}
