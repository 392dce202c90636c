//! Append-only audit journal
//!
//! Every committed unit of work appends exactly one [`JournalEntry`] holding the
//! balance and position events it applied, in the order they were staged.

use chrono::{DateTime, Utc};
use lendex_common::{AssetId, PositionKind, PositionStatus, UserId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event recorded by the Balance Ledger and Position Store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LedgerEvent {
    BalanceLocked {
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
    },
    BalanceUnlocked {
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
    },
    BalanceCredited {
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
    },
    BalanceDebited {
        user_id: UserId,
        asset_id: AssetId,
        amount: Decimal,
    },
    PositionOpened {
        position_id: Uuid,
        user_id: UserId,
        kind: PositionKind,
        asset_id: AssetId,
        principal: Decimal,
    },
    PositionSettled {
        position_id: Uuid,
        status: PositionStatus,
        interest_accrued: Decimal,
        platform_fee: Decimal,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BalanceLocked { .. } => "balance_locked",
            LedgerEvent::BalanceUnlocked { .. } => "balance_unlocked",
            LedgerEvent::BalanceCredited { .. } => "balance_credited",
            LedgerEvent::BalanceDebited { .. } => "balance_debited",
            LedgerEvent::PositionOpened { .. } => "position_opened",
            LedgerEvent::PositionSettled { .. } => "position_settled",
        }
    }
}

/// One committed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub unit_id: Uuid,
    /// Commit order, starting at 1
    pub sequence: u64,
    pub committed_at: DateTime<Utc>,
    pub events: Vec<LedgerEvent>,
}

/// Sink for committed units
pub trait Journal: Send + Sync {
    fn append(&self, entry: JournalEntry);

    fn entries(&self) -> Vec<JournalEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Journal kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries that touched the given position
    pub fn entries_for_position(&self, position_id: Uuid) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| {
                entry.events.iter().any(|event| match event {
                    LedgerEvent::PositionOpened { position_id: id, .. }
                    | LedgerEvent::PositionSettled { position_id: id, .. } => *id == position_id,
                    _ => false,
                })
            })
            .cloned()
            .collect()
    }
}

impl Journal for InMemoryJournal {
    fn append(&self, entry: JournalEntry) {
        self.entries.write().push(entry);
    }

    fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().clone()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
