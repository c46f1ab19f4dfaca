//! Orchestrates transactions across the lock table and storage adapter:
//! the read/write/transfer operations, commit/abort protocols, and the
//! bounded-retry wrapper that drives self-aborted deadlock victims back
//! through a fresh attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::core::common::LedgerError;
use crate::core::concurrency::{LockMode, LockTable, ResourceKey};
use crate::core::storage::StorageAdapter;

use super::object::{Transaction, TransactionState};

/// A single high-level operation the retry loop can execute end to end.
/// Mirrors the reference driver's `TransactionType` dispatch.
#[derive(Debug, Clone)]
pub enum TransactionPlan {
    Transfer { from: u64, to: u64, amount: i64 },
    Withdraw { account: u64, amount: i64 },
    Deposit { account: u64, amount: i64 },
}

const MAX_RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_millis(500);

pub struct TransactionManager {
    storage: Arc<dyn StorageAdapter>,
    lock_table: Arc<LockTable>,
    active: Mutex<HashMap<u64, ()>>,
}

impl TransactionManager {
    pub fn new(storage: Arc<dyn StorageAdapter>, lock_timeout: Duration) -> Self {
        Self {
            storage,
            lock_table: Arc::new(LockTable::new(lock_timeout)),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin_transaction(&self) -> Transaction {
        let txn = Transaction::new();
        self.active.lock().insert(txn.id, ());
        tracing::debug!(txn_id = txn.id, "transaction started");
        txn
    }

    /// Acquire SHARED and read the current balance (or the transaction's
    /// own still-uncommitted pre-image captured at write time; the core
    /// does not re-read storage once a pre-image is already recorded.
    pub fn execute_read(&self, txn: &mut Transaction, account_id: u64) -> Result<Option<i64>, LedgerError> {
        if !txn.is_active() {
            return Err(LedgerError::Validation(format!("txn {} is not active", txn.id)));
        }
        let node = match self.storage.route(account_id) {
            Ok(node) => node,
            Err(_) => return Ok(None),
        };
        let resource = ResourceKey::new(node.as_str(), account_id);
        self.lock_table.acquire(txn.id, &resource, LockMode::Shared)?;
        txn.add_lock(resource.clone(), LockMode::Shared)?;

        let balance = self.storage.read_balance(&node, account_id)?;
        txn.record_read(resource, balance);
        tracing::debug!(txn_id = txn.id, account_id, balance, "read");
        Ok(Some(balance))
    }

    /// Acquire EXCLUSIVE (upgrading a held SHARED lock in place), capture a
    /// pre-image if one was not already read, and buffer the write.
    pub fn execute_write(&self, txn: &mut Transaction, account_id: u64, new_balance: i64) -> Result<(), LedgerError> {
        if !txn.is_active() {
            return Err(LedgerError::Validation(format!("txn {} is not active", txn.id)));
        }
        if new_balance < 0 {
            return Err(LedgerError::Validation(format!("balance cannot be negative: {new_balance}")));
        }
        let node = self.storage.route(account_id)?;
        let resource = ResourceKey::new(node.as_str(), account_id);

        let already_holds_shared = txn
            .held_locks()
            .iter()
            .any(|(r, m)| *r == resource && *m == LockMode::Shared);
        if already_holds_shared {
            self.lock_table.upgrade(txn.id, &resource)?;
        } else {
            self.lock_table.acquire(txn.id, &resource, LockMode::Exclusive)?;
        }
        txn.add_lock(resource.clone(), LockMode::Exclusive)?;

        if txn.original_value(account_id).is_none() {
            let current = self.storage.read_balance(&node, account_id)?;
            txn.record_read(resource.clone(), current);
        }

        txn.buffer_write(resource, new_balance)?;
        tracing::debug!(txn_id = txn.id, account_id, new_balance, "write buffered");
        Ok(())
    }

    pub fn transfer(&self, txn: &mut Transaction, from: u64, to: u64, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::Validation("transfer amount must be positive".into()));
        }
        let from_balance = self
            .execute_read(txn, from)?
            .ok_or_else(|| LedgerError::Validation(format!("source account {from} not found")))?;
        let to_balance = self
            .execute_read(txn, to)?
            .ok_or_else(|| LedgerError::Validation(format!("destination account {to} not found")))?;

        if from_balance < amount {
            return Err(LedgerError::BusinessRule(format!(
                "insufficient balance: {from_balance} < {amount}"
            )));
        }

        self.execute_write(txn, from, from_balance - amount)?;
        self.execute_write(txn, to, to_balance + amount)?;
        Ok(())
    }

    pub fn withdraw(&self, txn: &mut Transaction, account: u64, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::Validation("withdraw amount must be positive".into()));
        }
        let balance = self
            .execute_read(txn, account)?
            .ok_or_else(|| LedgerError::Validation(format!("account {account} not found")))?;
        if balance < amount {
            return Err(LedgerError::BusinessRule(format!("insufficient balance: {balance} < {amount}")));
        }
        self.execute_write(txn, account, balance - amount)
    }

    pub fn deposit(&self, txn: &mut Transaction, account: u64, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::Validation("deposit amount must be positive".into()));
        }
        let balance = self
            .execute_read(txn, account)?
            .ok_or_else(|| LedgerError::Validation(format!("account {account} not found")))?;
        self.execute_write(txn, account, balance + amount)
    }

    /// Flush buffered writes in insertion order, commit the transaction
    /// object, release all locks, drop it from the active set.
    pub fn commit_transaction(&self, txn: &mut Transaction) -> Result<(), LedgerError> {
        if !txn.is_active() {
            return Err(LedgerError::Validation(format!("txn {} is not active", txn.id)));
        }
        for op in txn.write_buffer() {
            self.storage.write_balance(&op.resource.node, op.resource.account_id, op.new_balance)?;
        }
        txn.commit()?;
        self.lock_table.release_all(txn.id);
        self.active.lock().remove(&txn.id);
        tracing::info!(txn_id = txn.id, "committed");
        Ok(())
    }

    pub fn abort_transaction(&self, txn: &mut Transaction) -> Result<(), LedgerError> {
        if txn.state() == TransactionState::Committed {
            return Err(LedgerError::Validation(format!("txn {} already committed", txn.id)));
        }
        txn.abort()?;
        self.lock_table.release_all(txn.id);
        self.active.lock().remove(&txn.id);
        tracing::info!(txn_id = txn.id, "aborted");
        Ok(())
    }

    fn run_plan(&self, txn: &mut Transaction, plan: &TransactionPlan) -> Result<(), LedgerError> {
        match *plan {
            TransactionPlan::Transfer { from, to, amount } => self.transfer(txn, from, to, amount),
            TransactionPlan::Withdraw { account, amount } => self.withdraw(txn, account, amount),
            TransactionPlan::Deposit { account, amount } => self.deposit(txn, account, amount),
        }
    }

    /// Top-level entry point: begins a transaction, runs `plan`, and on a
    /// self-detected deadlock aborts, backs off, resets, and retries up to
    /// `MAX_RETRY_ATTEMPTS` times. Any other error aborts without retry.
    pub fn execute_transaction(&self, plan: TransactionPlan) -> bool {
        let mut txn = self.begin_transaction();

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.run_plan(&mut txn, &plan) {
                Ok(()) => {
                    return match self.commit_transaction(&mut txn) {
                        Ok(()) => true,
                        Err(err) => {
                            tracing::error!(txn_id = txn.id, %err, "commit failed, aborting");
                            let _ = self.abort_transaction(&mut txn);
                            false
                        }
                    };
                }
                Err(LedgerError::DeadlockDetected { .. }) => {
                    let _ = self.abort_transaction(&mut txn);
                    if attempt == MAX_RETRY_ATTEMPTS {
                        tracing::warn!(txn_id = txn.id, attempt, "retry attempts exhausted after deadlock");
                        return false;
                    }
                    let backoff = random_backoff();
                    tracing::debug!(txn_id = txn.id, attempt, ?backoff, "deadlock, retrying after backoff");
                    std::thread::sleep(backoff);
                    txn.reset();
                    self.active.lock().insert(txn.id, ());
                }
                Err(err) => {
                    tracing::warn!(txn_id = txn.id, %err, "transaction failed, no retry");
                    let _ = self.abort_transaction(&mut txn);
                    return false;
                }
            }
        }
        false
    }

    pub fn active_transaction_count(&self) -> usize {
        self.active.lock().len()
    }
}

fn random_backoff() -> Duration {
    let millis = rand::thread_rng().gen_range(BACKOFF_MIN.as_millis() as u64..=BACKOFF_MAX.as_millis() as u64);
    Duration::from_millis(millis)
}
