//! In-memory store
//!
//! Rows live in DashMaps. Each balance key and position id has its own tokio
//! mutex acting as a row lock; a transaction holds the owned guards for every
//! claimed row. Row locks exist only while some transaction holds or awaits
//! them and are pruned when the last one lets go. Commits are applied under a
//! write gate so snapshot readers never observe half of a unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lendex_common::{
    Balance, BalanceKey, LedgerError, Position, PositionKind, PositionStatus, UserId,
};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChangeSet, LendingStore, LockClaims, StoreTx, UserSnapshot};
use crate::journal::{InMemoryJournal, Journal, JournalEntry};

struct MemoryInner {
    balances: DashMap<BalanceKey, Balance>,
    positions: DashMap<Uuid, Position>,
    /// Position ids by owner, in creation order
    by_user: DashMap<UserId, Vec<Uuid>>,
    balance_locks: DashMap<BalanceKey, Arc<Mutex<()>>>,
    position_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    commit_gate: RwLock<()>,
    sequence: AtomicU64,
    journal: Arc<dyn Journal>,
    lock_timeout: Duration,
}

/// In-memory storage implementation
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<MemoryInner>,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_journal(lock_timeout, Arc::new(InMemoryJournal::new()))
    }

    pub fn with_journal(lock_timeout: Duration, journal: Arc<dyn Journal>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                balances: DashMap::new(),
                positions: DashMap::new(),
                by_user: DashMap::new(),
                balance_locks: DashMap::new(),
                position_locks: DashMap::new(),
                commit_gate: RwLock::new(()),
                sequence: AtomicU64::new(0),
                journal,
                lock_timeout,
            }),
        }
    }

    pub fn balance_count(&self) -> usize {
        self.inner.balances.len()
    }

    pub fn position_count(&self) -> usize {
        self.inner.positions.len()
    }

    /// Row locks currently held or awaited
    pub fn row_lock_count(&self) -> usize {
        self.inner.balance_locks.len() + self.inner.position_locks.len()
    }

    async fn acquire(
        &self,
        lock: Arc<Mutex<()>>,
        record: String,
    ) -> Result<OwnedMutexGuard<()>, LedgerError> {
        match tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(record = %record, timeout_ms = self.inner.lock_timeout.as_millis() as u64, "Row lock timed out");
                Err(LedgerError::StoreUnavailable(format!(
                    "timed out waiting for lock on {record}"
                )))
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::DEFAULT_LOCK_TIMEOUT_MS))
    }
}

#[async_trait]
impl LendingStore for InMemoryStore {
    async fn begin(&self, claims: &LockClaims) -> Result<Box<dyn StoreTx>, LedgerError> {
        // Built up front so a timeout midway still prunes the entries it touched
        let mut tx = MemoryTx {
            unit_id: Uuid::now_v7(),
            inner: self.inner.clone(),
            claims: claims.clone(),
            guards: Vec::with_capacity(claims.len()),
            committed: false,
        };

        for id in claims.positions() {
            let lock = self.inner.position_locks.entry(*id).or_default().clone();
            tx.guards.push(self.acquire(lock, format!("position {id}")).await?);
        }
        for key in claims.balances() {
            let lock = self.inner.balance_locks.entry(key.clone()).or_default().clone();
            tx.guards.push(self.acquire(lock, format!("balance {key}")).await?);
        }

        Ok(Box::new(tx))
    }

    async fn balance(&self, key: &BalanceKey) -> Option<Balance> {
        self.inner.balances.get(key).map(|b| b.clone())
    }

    async fn position(&self, id: &Uuid) -> Option<Position> {
        self.inner.positions.get(id).map(|p| p.clone())
    }

    async fn user_snapshot(&self, user_id: &str) -> UserSnapshot {
        let _gate = self.inner.commit_gate.read();

        let mut balances: Vec<Balance> = self
            .inner
            .balances
            .iter()
            .filter(|b| b.user_id == user_id)
            .map(|b| b.clone())
            .collect();
        balances.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

        let positions = self
            .inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.positions.get(id).map(|p| p.clone()))
                    .collect()
            })
            .unwrap_or_default();

        UserSnapshot {
            balances,
            positions,
        }
    }

    async fn active_borrowings(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .inner
            .positions
            .iter()
            .filter(|p| p.kind == PositionKind::Borrowing && p.status == PositionStatus::Active)
            .map(|p| p.clone())
            .collect();
        positions.sort_by_key(|p| p.id);
        positions
    }

    fn journal(&self) -> Arc<dyn Journal> {
        self.inner.journal.clone()
    }
}

struct MemoryTx {
    unit_id: Uuid,
    inner: Arc<MemoryInner>,
    claims: LockClaims,
    /// Row locks, released on drop
    guards: Vec<OwnedMutexGuard<()>>,
    committed: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.guards.clear();

        // A lock nobody else references has no holder and no waiter
        for id in self.claims.positions() {
            self.inner
                .position_locks
                .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        }
        for key in self.claims.balances() {
            self.inner
                .balance_locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl MemoryTx {
    fn check(&self, changes: &ChangeSet) -> Result<(), LedgerError> {
        for balance in &changes.balances {
            if !balance.is_consistent() {
                return Err(LedgerError::InvariantViolation(format!(
                    "{balance} violates 0 <= locked <= total"
                )));
            }
        }
        for position in &changes.created {
            if self.inner.positions.contains_key(&position.id) {
                return Err(LedgerError::DuplicatePosition(position.id));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    fn unit_id(&self) -> Uuid {
        self.unit_id
    }

    async fn read_balance(&self, key: &BalanceKey) -> Result<Option<Balance>, LedgerError> {
        Ok(self.inner.balances.get(key).map(|b| b.clone()))
    }

    async fn read_position(&self, id: &Uuid) -> Result<Option<Position>, LedgerError> {
        Ok(self.inner.positions.get(id).map(|p| p.clone()))
    }

    async fn commit(&mut self, changes: ChangeSet) -> Result<JournalEntry, LedgerError> {
        if self.committed {
            return Err(LedgerError::InvariantViolation(format!(
                "unit {} committed twice",
                self.unit_id
            )));
        }
        self.check(&changes)?;

        let entry = {
            let _gate = self.inner.commit_gate.write();

            for balance in changes.balances {
                self.inner.balances.insert(balance.key(), balance);
            }
            for position in changes.created {
                self.inner
                    .by_user
                    .entry(position.user_id.clone())
                    .or_default()
                    .push(position.id);
                self.inner.positions.insert(position.id, position);
            }
            for position in changes.updated {
                self.inner.positions.insert(position.id, position);
            }

            let entry = JournalEntry {
                unit_id: self.unit_id,
                sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                committed_at: changes.committed_at,
                events: changes.events,
            };
            self.inner.journal.append(entry.clone());
            entry
        };

        self.committed = true;
        self.guards.clear();

        debug!(
            unit_id = %entry.unit_id,
            sequence = entry.sequence,
            events = entry.events.len(),
            "Unit committed"
        );
        Ok(entry)
    }
}
