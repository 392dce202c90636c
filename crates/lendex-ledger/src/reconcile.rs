//! Reconciliation of balances against active positions
//!
//! For every balance of a user, `locked` must equal the principal of their
//! active lending positions plus the collateral of their active borrowing
//! positions on that asset, and `0 <= locked <= total` must hold.

use std::collections::BTreeMap;

use lendex_common::{AssetId, Balance, Position, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Mismatch found by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// `locked` is negative or above `total`
    LockedOutOfRange {
        asset_id: AssetId,
        total: Decimal,
        locked: Decimal,
    },
    /// `locked` differs from what active positions hold
    LockedMismatch {
        asset_id: AssetId,
        locked: Decimal,
        expected: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub user_id: UserId,
    pub balances_checked: usize,
    pub active_positions: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Check one user's balances against their positions
pub fn reconcile(user_id: &str, balances: &[Balance], positions: &[Position]) -> ReconciliationReport {
    let mut expected: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut active_positions = 0;

    for position in positions.iter().filter(|p| p.is_active()) {
        active_positions += 1;
        let (asset_id, amount) = position.locked_claim();
        *expected.entry(asset_id).or_default() += amount;
    }

    let mut discrepancies = Vec::new();

    for balance in balances {
        if !balance.is_consistent() {
            discrepancies.push(Discrepancy::LockedOutOfRange {
                asset_id: balance.asset_id.clone(),
                total: balance.total,
                locked: balance.locked,
            });
        }

        let want = expected
            .remove(balance.asset_id.as_str())
            .unwrap_or(Decimal::ZERO);
        if balance.locked != want {
            discrepancies.push(Discrepancy::LockedMismatch {
                asset_id: balance.asset_id.clone(),
                locked: balance.locked,
                expected: want,
            });
        }
    }

    // Positions holding an asset the user has no balance record for
    for (asset_id, want) in expected {
        discrepancies.push(Discrepancy::LockedMismatch {
            asset_id: asset_id.to_string(),
            locked: Decimal::ZERO,
            expected: want,
        });
    }

    ReconciliationReport {
        user_id: user_id.to_string(),
        balances_checked: balances.len(),
        active_positions,
        discrepancies,
    }
}
