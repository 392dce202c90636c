//! Read-only positions overview for `ListPositions`

use std::collections::BTreeMap;

use lendex_common::{AssetId, Position, PositionKind, PositionStatus, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Active amounts on one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetExposure {
    /// Active lending principal
    pub lent: Decimal,
    /// Active borrowing principal
    pub borrowed: Decimal,
    /// Collateral held by active borrowings
    pub collateral_locked: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub active_lending: usize,
    pub active_borrowing: usize,
    pub exposures: BTreeMap<AssetId, AssetExposure>,
    /// Net interest received on repaid lending, per asset
    pub interest_earned: BTreeMap<AssetId, Decimal>,
    /// Interest paid on repaid borrowing, per asset
    pub interest_paid: BTreeMap<AssetId, Decimal>,
}

impl PositionSummary {
    pub fn total_lent(&self, asset_id: &str) -> Decimal {
        self.exposures
            .get(asset_id)
            .map_or(Decimal::ZERO, |e| e.lent)
    }

    pub fn total_borrowed(&self, asset_id: &str) -> Decimal {
        self.exposures
            .get(asset_id)
            .map_or(Decimal::ZERO, |e| e.borrowed)
    }
}

/// All positions of a user plus their aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsOverview {
    pub user_id: UserId,
    pub positions: Vec<Position>,
    pub summary: PositionSummary,
}

impl PositionsOverview {
    pub fn from_positions(user_id: &str, positions: Vec<Position>) -> Self {
        let mut summary = PositionSummary::default();

        for position in &positions {
            match (position.kind, position.status) {
                (PositionKind::Lending, PositionStatus::Active) => {
                    summary.active_lending += 1;
                    exposure(&mut summary, &position.asset_id).lent += position.principal;
                }
                (PositionKind::Borrowing, PositionStatus::Active) => {
                    summary.active_borrowing += 1;
                    exposure(&mut summary, &position.asset_id).borrowed += position.principal;
                    if let Some(collateral) = &position.collateral {
                        exposure(&mut summary, &collateral.asset_id).collateral_locked +=
                            collateral.amount;
                    }
                }
                (PositionKind::Lending, PositionStatus::Repaid) => {
                    *summary
                        .interest_earned
                        .entry(position.asset_id.clone())
                        .or_default() +=
                        position.interest_accrued - position.platform_fee_collected;
                }
                (PositionKind::Borrowing, PositionStatus::Repaid) => {
                    *summary
                        .interest_paid
                        .entry(position.asset_id.clone())
                        .or_default() += position.interest_accrued;
                }
                (_, PositionStatus::Liquidated) => {}
            }
        }

        Self {
            user_id: user_id.to_string(),
            positions,
            summary,
        }
    }
}

fn exposure<'a>(summary: &'a mut PositionSummary, asset_id: &str) -> &'a mut AssetExposure {
    summary.exposures.entry(asset_id.to_string()).or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lendex_common::{CollateralTerms, NewBorrowing, NewLending, StatusTransition};
    use rust_decimal_macros::dec;

    fn lending(amount: Decimal) -> Position {
        Position::open_lending(
            NewLending {
                user_id: "alice".into(),
                asset_id: "USDT".into(),
                amount,
                annual_rate_percent: dec!(8.5),
                duration_days: 30,
                platform_fee_percent: dec!(15),
            },
            Utc::now(),
        )
    }

    fn borrowing() -> Position {
        Position::open_borrowing(
            NewBorrowing {
                user_id: "alice".into(),
                asset_id: "USDT".into(),
                amount: dec!(500),
                annual_rate_percent: dec!(12),
                duration_days: 30,
                platform_fee_percent: dec!(15),
                collateral: CollateralTerms {
                    asset_id: "BTC".into(),
                    amount: dec!(0.02),
                    value_at_origination: dec!(1000),
                    liquidation_price: dec!(32500),
                },
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_summary_aggregates_active_and_settled() {
        let mut repaid = lending(dec!(1000));
        repaid
            .apply(&StatusTransition::Repaid {
                interest_accrued: dec!(6.98630137),
                platform_fee: dec!(1.04794521),
                settled_at: Utc::now(),
            })
            .unwrap();

        let positions = vec![lending(dec!(200)), lending(dec!(300)), borrowing(), repaid];
        let overview = PositionsOverview::from_positions("alice", positions);
        let summary = &overview.summary;

        assert_eq!(overview.positions.len(), 4);
        assert_eq!(summary.active_lending, 2);
        assert_eq!(summary.active_borrowing, 1);
        assert_eq!(summary.total_lent("USDT"), dec!(500));
        assert_eq!(summary.total_borrowed("USDT"), dec!(500));
        assert_eq!(summary.exposures["BTC"].collateral_locked, dec!(0.02));
        assert_eq!(summary.interest_earned["USDT"], dec!(5.93835616));
        assert!(summary.interest_paid.is_empty());
    }

    #[test]
    fn test_empty_overview() {
        let overview = PositionsOverview::from_positions("nobody", Vec::new());
        assert_eq!(overview.summary, PositionSummary::default());
        assert_eq!(overview.summary.total_lent("USDT"), Decimal::ZERO);
    }
}
