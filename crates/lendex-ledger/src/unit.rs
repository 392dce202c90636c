//! Atomic unit of work
//!
//! A [`UnitOfWork`] stages balance and position changes privately on top of an
//! open [`StoreTx`]. Nothing is visible to other units until [`UnitOfWork::commit`]
//! succeeds. Dropping the unit for any reason, including cancellation of the
//! surrounding future, discards everything staged and releases its row locks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lendex_common::{
    Balance, BalanceError, BalanceKey, LedgerError, Position, PositionError, StatusTransition,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::journal::{JournalEntry, LedgerEvent};
use crate::store::{ChangeSet, LockClaims, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staged {
    Created,
    Updated,
}

/// Staged changes over a set of claimed records
pub struct UnitOfWork {
    tx: Box<dyn StoreTx>,
    claims: LockClaims,
    now: DateTime<Utc>,
    balances: BTreeMap<BalanceKey, Balance>,
    positions: BTreeMap<Uuid, (Position, Staged)>,
    events: Vec<LedgerEvent>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Box<dyn StoreTx>, claims: LockClaims, now: DateTime<Utc>) -> Self {
        Self {
            tx,
            claims,
            now,
            balances: BTreeMap::new(),
            positions: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn unit_id(&self) -> Uuid {
        self.tx.unit_id()
    }

    /// Timestamp applied to everything this unit writes
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Balance record for a claimed pair, created as zero on first reference
    pub async fn get_or_create_balance(
        &mut self,
        user_id: &str,
        asset_id: &str,
    ) -> Result<Balance, LedgerError> {
        let key = BalanceKey::new(user_id, asset_id);
        Ok(self.working_balance(&key).await?.clone())
    }

    pub async fn lock(
        &mut self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.mutate_balance(user_id, asset_id, |b| b.lock(amount))
            .await?;
        self.events.push(LedgerEvent::BalanceLocked {
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
            amount,
        });
        Ok(())
    }

    pub async fn unlock(
        &mut self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.mutate_balance(user_id, asset_id, |b| b.unlock(amount))
            .await?;
        self.events.push(LedgerEvent::BalanceUnlocked {
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
            amount,
        });
        Ok(())
    }

    pub async fn credit(
        &mut self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.mutate_balance(user_id, asset_id, |b| b.credit(amount))
            .await?;
        self.events.push(LedgerEvent::BalanceCredited {
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
            amount,
        });
        Ok(())
    }

    pub async fn debit(
        &mut self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.mutate_balance(user_id, asset_id, |b| b.debit(amount))
            .await?;
        self.events.push(LedgerEvent::BalanceDebited {
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
            amount,
        });
        Ok(())
    }

    /// Stage a new position
    pub fn create_position(&mut self, position: Position) -> Result<Uuid, LedgerError> {
        let id = position.id;
        if self.positions.contains_key(&id) {
            return Err(LedgerError::DuplicatePosition(id));
        }

        self.events.push(LedgerEvent::PositionOpened {
            position_id: id,
            user_id: position.user_id.clone(),
            kind: position.kind,
            asset_id: position.asset_id.clone(),
            principal: position.principal,
        });
        self.positions.insert(id, (position, Staged::Created));
        Ok(id)
    }

    /// Current view of a claimed position, including staged changes
    pub async fn position(&mut self, id: Uuid) -> Result<Position, LedgerError> {
        if let Some((position, _)) = self.positions.get(&id) {
            return Ok(position.clone());
        }
        if !self.claims.covers_position(&id) {
            return Err(LedgerError::Unclaimed(format!("position {id}")));
        }

        let position = self
            .tx
            .read_position(&id)
            .await?
            .ok_or(PositionError::NotFound(id))?;
        self.positions
            .insert(id, (position.clone(), Staged::Updated));
        Ok(position)
    }

    /// Apply a status transition to a claimed position
    pub async fn update_status(
        &mut self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Position, LedgerError> {
        self.position(id).await?;
        let (position, _) = self
            .positions
            .get_mut(&id)
            .ok_or(PositionError::NotFound(id))?;

        position.apply(&transition)?;
        let settled = position.clone();

        self.events.push(LedgerEvent::PositionSettled {
            position_id: id,
            status: settled.status,
            interest_accrued: settled.interest_accrued,
            platform_fee: settled.platform_fee_collected,
        });
        Ok(settled)
    }

    /// Events staged so far
    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Apply all staged changes atomically
    pub async fn commit(mut self) -> Result<JournalEntry, LedgerError> {
        let mut changes = ChangeSet {
            balances: Vec::with_capacity(self.balances.len()),
            created: Vec::new(),
            updated: Vec::new(),
            events: std::mem::take(&mut self.events),
            committed_at: self.now,
        };

        changes.balances.extend(std::mem::take(&mut self.balances).into_values());
        for (position, staged) in std::mem::take(&mut self.positions).into_values() {
            match staged {
                Staged::Created => changes.created.push(position),
                Staged::Updated => changes.updated.push(position),
            }
        }

        self.tx.commit(changes).await
    }

    async fn working_balance(&mut self, key: &BalanceKey) -> Result<&mut Balance, LedgerError> {
        if !self.claims.covers_balance(key) {
            return Err(LedgerError::Unclaimed(format!("balance {key}")));
        }

        if !self.balances.contains_key(key) {
            let loaded = self
                .tx
                .read_balance(key)
                .await?
                .unwrap_or_else(|| Balance::empty(key, self.now));
            self.balances.insert(key.clone(), loaded);
        }

        self.balances
            .get_mut(key)
            .ok_or_else(|| LedgerError::Unclaimed(format!("balance {key}")))
    }

    async fn mutate_balance<F>(
        &mut self,
        user_id: &str,
        asset_id: &str,
        op: F,
    ) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut Balance) -> Result<(), BalanceError> + Send,
    {
        let key = BalanceKey::new(user_id, asset_id);
        let now = self.now;
        let balance = self.working_balance(&key).await?;

        // Work on a copy so a rejected operation leaves the staged record untouched
        let mut next = balance.clone();
        op(&mut next).map_err(|err| balance_error(&key, err))?;
        next.updated_at = now;
        *balance = next;
        Ok(())
    }
}

fn balance_error(key: &BalanceKey, err: BalanceError) -> LedgerError {
    match err {
        BalanceError::InsufficientAvailable {
            required,
            available,
        } => LedgerError::InsufficientAvailable {
            user_id: key.user_id.clone(),
            asset_id: key.asset_id.clone(),
            required,
            available,
        },
        BalanceError::InvariantViolation { requested, locked } => {
            LedgerError::InvariantViolation(format!(
                "unlock {requested} exceeds locked {locked} on {key}"
            ))
        }
        BalanceError::InvalidAmount(amount) | BalanceError::Overflow { amount, .. } => {
            LedgerError::InvalidAmount(amount)
        }
    }
}
