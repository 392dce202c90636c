//! Durable store seam
//!
//! A [`LendingStore`] hands out [`StoreTx`] handles. A handle owns the row
//! locks named by its [`LockClaims`] until it is committed or dropped; dropping
//! an uncommitted handle applies nothing.

pub mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lendex_common::{Balance, BalanceKey, LedgerError, Position};
use uuid::Uuid;

use crate::journal::{Journal, JournalEntry, LedgerEvent};

pub use memory::InMemoryStore;

/// Records a unit of work will touch, acquired in a fixed global order:
/// position ids ascending, then balance keys ascending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockClaims {
    positions: BTreeSet<Uuid>,
    balances: BTreeSet<BalanceKey>,
}

impl LockClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(mut self, user_id: &str, asset_id: &str) -> Self {
        self.balances.insert(BalanceKey::new(user_id, asset_id));
        self
    }

    pub fn position(mut self, id: Uuid) -> Self {
        self.positions.insert(id);
        self
    }

    pub fn positions(&self) -> impl Iterator<Item = &Uuid> {
        self.positions.iter()
    }

    pub fn balances(&self) -> impl Iterator<Item = &BalanceKey> {
        self.balances.iter()
    }

    pub fn covers_balance(&self, key: &BalanceKey) -> bool {
        self.balances.contains(key)
    }

    pub fn covers_position(&self, id: &Uuid) -> bool {
        self.positions.contains(id)
    }

    pub fn len(&self) -> usize {
        self.positions.len() + self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a unit of work writes, applied all at once
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub balances: Vec<Balance>,
    pub created: Vec<Position>,
    pub updated: Vec<Position>,
    pub events: Vec<LedgerEvent>,
    pub committed_at: DateTime<Utc>,
}

/// Consistent view of one user's records
#[derive(Debug, Clone, Default)]
pub struct UserSnapshot {
    pub balances: Vec<Balance>,
    pub positions: Vec<Position>,
}

/// Storage backend for balances and positions
#[async_trait]
pub trait LendingStore: Send + Sync {
    /// Acquire the claimed row locks and open a transaction
    async fn begin(&self, claims: &LockClaims) -> Result<Box<dyn StoreTx>, LedgerError>;

    /// Committed balance, if the pair was ever referenced
    async fn balance(&self, key: &BalanceKey) -> Option<Balance>;

    async fn position(&self, id: &Uuid) -> Option<Position>;

    /// Balances and positions of one user, read at a single commit point
    async fn user_snapshot(&self, user_id: &str) -> UserSnapshot;

    /// Active borrowing positions across all users
    async fn active_borrowings(&self) -> Vec<Position>;

    fn journal(&self) -> Arc<dyn Journal>;
}

/// Open transaction holding row locks
#[async_trait]
pub trait StoreTx: Send + Sync {
    fn unit_id(&self) -> Uuid;

    async fn read_balance(&self, key: &BalanceKey) -> Result<Option<Balance>, LedgerError>;

    async fn read_position(&self, id: &Uuid) -> Result<Option<Position>, LedgerError>;

    /// Apply the change set atomically and release the row locks
    async fn commit(&mut self, changes: ChangeSet) -> Result<JournalEntry, LedgerError>;
}
