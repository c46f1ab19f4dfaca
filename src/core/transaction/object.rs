//! Per-transaction state: id, 2PL state/phase, held locks, write buffer,
//! read set, and the original-value snapshot used for pre-image stability.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::common::LedgerError;
use crate::core::concurrency::{LockMode, ResourceKey};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state. Once COMMITTED or ABORTED, a transaction is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// 2PL phase. Locks may only be acquired in `Growing`; entering
/// `Shrinking` is one-way and happens exactly once, at commit or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Growing,
    Shrinking,
}

/// A buffered write, applied to storage only when the transaction commits.
#[derive(Debug, Clone)]
pub struct Operation {
    pub resource: ResourceKey,
    pub new_balance: i64,
}

/// A single SS2PL transaction. Not `Clone`: a transaction is consumed by
/// exactly one thread of control from `begin` through `commit`/`abort`.
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    state: TransactionState,
    phase: TransactionPhase,
    held_locks: Vec<(ResourceKey, LockMode)>,
    write_buffer: Vec<Operation>,
    read_set: Vec<ResourceKey>,
    original_values: HashMap<u64, i64>,
}

impl Transaction {
    pub fn new() -> Self {
        let id = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            state: TransactionState::Active,
            phase: TransactionPhase::Growing,
            held_locks: Vec::new(),
            write_buffer: Vec::new(),
            read_set: Vec::new(),
            original_values: HashMap::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Record that a lock was granted. Upgrading from shared to exclusive
    /// on an already-tracked resource replaces the recorded mode in place.
    pub fn add_lock(&mut self, resource: ResourceKey, mode: LockMode) -> Result<(), LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::Validation(format!(
                "txn {} cannot acquire locks: not active",
                self.id
            )));
        }
        if self.phase != TransactionPhase::Growing {
            return Err(LedgerError::Validation(format!(
                "txn {} cannot acquire locks: in shrinking phase",
                self.id
            )));
        }
        if let Some(existing) = self.held_locks.iter_mut().find(|(r, _)| *r == resource) {
            if matches!((existing.1, mode), (LockMode::Shared, LockMode::Exclusive)) {
                existing.1 = LockMode::Exclusive;
            }
            return Ok(());
        }
        self.held_locks.push((resource, mode));
        Ok(())
    }

    pub fn record_read(&mut self, resource: ResourceKey, value: i64) {
        if !self.original_values.contains_key(&resource.account_id) {
            self.original_values.insert(resource.account_id, value);
        }
        self.read_set.push(resource);
    }

    pub fn buffer_write(&mut self, resource: ResourceKey, new_balance: i64) -> Result<(), LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::Validation(format!(
                "txn {} cannot write: not active",
                self.id
            )));
        }
        self.write_buffer.push(Operation { resource, new_balance });
        Ok(())
    }

    pub fn write_buffer(&self) -> &[Operation] {
        &self.write_buffer
    }

    pub fn held_locks(&self) -> &[(ResourceKey, LockMode)] {
        &self.held_locks
    }

    pub fn original_value(&self, account_id: u64) -> Option<i64> {
        self.original_values.get(&account_id).copied()
    }

    fn enter_shrinking_phase(&mut self) {
        if self.phase == TransactionPhase::Growing {
            self.phase = TransactionPhase::Shrinking;
        }
    }

    pub fn commit(&mut self) -> Result<(), LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::Validation(format!(
                "txn {} already {:?}",
                self.id, self.state
            )));
        }
        self.enter_shrinking_phase();
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn abort(&mut self) -> Result<(), LedgerError> {
        if self.state == TransactionState::Committed {
            return Err(LedgerError::Validation(format!(
                "txn {} already committed, cannot abort",
                self.id
            )));
        }
        self.enter_shrinking_phase();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    /// Reset a transaction back to a fresh growing-phase state, keeping its
    /// id. Used between bounded-retry attempts after a self-abort.
    pub fn reset(&mut self) {
        self.state = TransactionState::Active;
        self.phase = TransactionPhase::Growing;
        self.held_locks.clear();
        self.write_buffer.clear();
        self.read_set.clear();
        self.original_values.clear();
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ResourceKey {
        ResourceKey::new("n1", 1)
    }

    #[test]
    fn new_transaction_is_active_and_growing() {
        let txn = Transaction::new();
        assert_eq!(txn.state(), TransactionState::Active);
        assert_eq!(txn.phase(), TransactionPhase::Growing);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Transaction::new();
        let b = Transaction::new();
        assert!(b.id > a.id);
    }

    #[test]
    fn commit_enters_shrinking_and_terminal_state() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.phase(), TransactionPhase::Shrinking);
    }

    #[test]
    fn cannot_commit_twice() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert!(txn.commit().is_err());
    }

    #[test]
    fn cannot_abort_after_commit() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert!(txn.abort().is_err());
    }

    #[test]
    fn cannot_acquire_lock_once_shrinking() {
        let mut txn = Transaction::new();
        txn.abort().unwrap();
        assert!(txn.add_lock(resource(), LockMode::Shared).is_err());
    }

    #[test]
    fn adding_exclusive_after_shared_upgrades_in_place() {
        let mut txn = Transaction::new();
        txn.add_lock(resource(), LockMode::Shared).unwrap();
        txn.add_lock(resource(), LockMode::Exclusive).unwrap();
        assert_eq!(txn.held_locks().len(), 1);
        assert_eq!(txn.held_locks()[0].1, LockMode::Exclusive);
    }

    #[test]
    fn reset_clears_all_transaction_local_state() {
        let mut txn = Transaction::new();
        txn.add_lock(resource(), LockMode::Shared).unwrap();
        txn.record_read(resource(), 100);
        txn.buffer_write(resource(), 50).unwrap();
        txn.reset();
        assert!(txn.held_locks().is_empty());
        assert!(txn.write_buffer().is_empty());
        assert!(txn.original_value(1).is_none());
        assert_eq!(txn.state(), TransactionState::Active);
    }

    #[test]
    fn record_read_keeps_first_original_value() {
        let mut txn = Transaction::new();
        txn.record_read(resource(), 100);
        txn.record_read(resource(), 80);
        assert_eq!(txn.original_value(1), Some(100));
    }
}
