//! # Lendex Ledger
//!
//! Balance Ledger and Position Store for the Lendex lending engine.
//!
//! ## Components
//!
//! - **Store**: pluggable durable store with per-record row locks ([`LendingStore`])
//! - **Unit of work**: atomic staging of balance and position changes ([`UnitOfWork`])
//! - **Journal**: append-only record of every committed unit
//! - **Reconciliation**: `locked` vs active positions check
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Ledger                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ UnitOfWork  │──▶│ LendingStore │──▶│     Journal      │  │
//! │  │  (staging)  │   │ (row locks)  │   │  (append-only)   │  │
//! │  └─────────────┘   └──────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation that moves money opens one unit, declares the records it
//! will touch up front, stages its changes and commits them together.

pub mod journal;
pub mod reconcile;
pub mod store;
pub mod unit;

pub use journal::{InMemoryJournal, Journal, JournalEntry, LedgerEvent};
pub use reconcile::{Discrepancy, ReconciliationReport};
pub use store::{ChangeSet, InMemoryStore, LendingStore, LockClaims, StoreTx, UserSnapshot};
pub use unit::UnitOfWork;

use std::sync::Arc;
use std::time::Duration;

use lendex_common::{
    Balance, BalanceKey, Clock, LedgerError, Position, PositionError, MAX_AMOUNT,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

/// Default wait for a row lock before giving up
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Row lock wait in milliseconds; exceeded waits fail as store unavailable
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Balance Ledger and Position Store over a [`LendingStore`]
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LendingStore>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LendingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Ledger over a fresh in-memory store
    pub fn in_memory(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(InMemoryStore::new(config.lock_timeout())), clock)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn LendingStore> {
        &self.store
    }

    /// Acquire the claimed records and open a unit of work
    pub async fn begin(&self, claims: LockClaims) -> Result<UnitOfWork, LedgerError> {
        let tx = self.store.begin(&claims).await?;
        Ok(UnitOfWork::new(tx, claims, self.clock.now()))
    }

    /// Committed balance, or a zero view for a pair never referenced
    pub async fn balance(&self, user_id: &str, asset_id: &str) -> Balance {
        let key = BalanceKey::new(user_id, asset_id);
        match self.store.balance(&key).await {
            Some(balance) => balance,
            None => Balance::empty(&key, self.clock.now()),
        }
    }

    pub async fn balances(&self, user_id: &str) -> Vec<Balance> {
        self.store.user_snapshot(user_id).await.balances
    }

    pub async fn get_position(&self, id: Uuid) -> Result<Position, LedgerError> {
        self.store
            .position(&id)
            .await
            .ok_or(LedgerError::Position(PositionError::NotFound(id)))
    }

    /// All positions of a user, oldest first
    pub async fn list_by_user(&self, user_id: &str) -> Vec<Position> {
        self.store.user_snapshot(user_id).await.positions
    }

    pub async fn list_active_by_user(&self, user_id: &str) -> Vec<Position> {
        self.list_by_user(user_id)
            .await
            .into_iter()
            .filter(Position::is_active)
            .collect()
    }

    pub async fn active_borrowings(&self) -> Vec<Position> {
        self.store.active_borrowings().await
    }

    pub async fn snapshot(&self, user_id: &str) -> UserSnapshot {
        self.store.user_snapshot(user_id).await
    }

    /// Fund a balance in its own unit
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<Balance, LedgerError> {
        if amount <= Decimal::ZERO || amount > MAX_AMOUNT {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut unit = self
            .begin(LockClaims::new().balance(user_id, asset_id))
            .await?;
        unit.get_or_create_balance(user_id, asset_id).await?;
        unit.credit(user_id, asset_id, amount).await?;
        let balance = unit.get_or_create_balance(user_id, asset_id).await?;
        unit.commit().await?;

        info!(amount = %amount, total = %balance.total, "Deposit committed");
        Ok(balance)
    }

    /// Check `locked` against the user's active positions
    pub async fn reconcile(&self, user_id: &str) -> ReconciliationReport {
        let snapshot = self.store.user_snapshot(user_id).await;
        reconcile::reconcile(user_id, &snapshot.balances, &snapshot.positions)
    }

    pub fn journal(&self) -> Arc<dyn Journal> {
        self.store.journal()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}
