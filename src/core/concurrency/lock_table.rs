//! Centralized lock table: one resource-keyed map of lock entries, guarded
//! by a single mutex, paired with a wait-for graph for synchronous deadlock
//! detection on every blocking acquire.
//!
//! The acquisition protocol (mirrors the reference `_try_acquire_lock`
//! loop):
//!
//! 1. Under the table mutex, check whether `mode` is compatible with the
//!    current holders of `resource`.
//! 2. If compatible, grant immediately: add to holders, clear the
//!    requester's wait-for edges, return.
//! 3. If not compatible, add a wait-for edge from the requester to every
//!    conflicting holder and run cycle detection.
//! 4. If a cycle is found, remove the edges just added and fail with
//!    `DeadlockDetected` (the requester is always the victim).
//! 5. Otherwise enqueue the requester as a waiter (once) and block on the
//!    resource's condvar until re-notified or the timeout elapses, then
//!    loop back to step 1.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::common::LedgerError;
use super::wfg::WaitForGraph;

/// Identifies a lockable resource: one account on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub node: String,
    pub account_id: u64,
}

impl ResourceKey {
    pub fn new(node: impl Into<String>, account_id: u64) -> Self {
        Self { node: node.into(), account_id }
    }
}

/// Shared locks are mutually compatible; exclusive locks are compatible
/// with nothing, including themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Introspection snapshot of a resource's lock state, for diagnostics and
/// tests. Not used by the acquisition protocol itself.
#[derive(Debug, Clone)]
pub struct LockEntryInfo {
    pub resource: ResourceKey,
    pub mode: LockMode,
    pub holders: Vec<u64>,
    pub waiters: Vec<u64>,
}

#[derive(Debug)]
struct LockEntry {
    mode: LockMode,
    holders: Vec<u64>,
    waiters: Vec<u64>,
}

impl LockEntry {
    fn new(mode: LockMode, holder: u64) -> Self {
        Self { mode, holders: vec![holder], waiters: Vec::new() }
    }
}

struct Inner {
    locks: HashMap<ResourceKey, LockEntry>,
    held_by_txn: HashMap<u64, Vec<ResourceKey>>,
    wfg: WaitForGraph,
}

/// The centralized, table-wide lock manager. One instance is shared across
/// every transaction in the process; there is no per-resource mutex, only
/// the condvars used to park waiters.
pub struct LockTable {
    inner: Mutex<Inner>,
    condvars: Mutex<HashMap<ResourceKey, std::sync::Arc<Condvar>>>,
    default_timeout: Duration,
}

impl LockTable {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                held_by_txn: HashMap::new(),
                wfg: WaitForGraph::new(),
            }),
            condvars: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    fn condvar_for(&self, resource: &ResourceKey) -> std::sync::Arc<Condvar> {
        let mut condvars = self.condvars.lock();
        condvars
            .entry(resource.clone())
            .or_insert_with(|| std::sync::Arc::new(Condvar::new()))
            .clone()
    }

    /// Block until `txn_id` holds `mode` on `resource`, or fail with
    /// `DeadlockDetected` (a cycle was found, requester is the victim) or
    /// `LockTimeout` (the wait exceeded the configured bound).
    pub fn acquire(
        &self,
        txn_id: u64,
        resource: &ResourceKey,
        mode: LockMode,
    ) -> Result<(), LedgerError> {
        let deadline = Instant::now() + self.default_timeout;
        let condvar = self.condvar_for(resource);
        let mut guard = self.inner.lock();

        loop {
            if let Some(entry) = guard.locks.get_mut(resource) {
                if entry.holders.contains(&txn_id) {
                    if entry.mode == LockMode::Exclusive || entry.mode == mode {
                        tracing::info!(
                            txn_id,
                            node = %resource.node,
                            account_id = resource.account_id,
                            mode = ?mode,
                            "lock grant (re-entrant)"
                        );
                        return Ok(());
                    }
                    // Held SHARED, requesting EXCLUSIVE: not sufficient, caller must upgrade.
                    return Err(LedgerError::Validation(format!(
                        "txn {txn_id} already holds {:?} on {resource:?}; use upgrade for {mode:?}",
                        entry.mode
                    )));
                }
                if entry.mode.compatible_with(mode) {
                    entry.holders.push(txn_id);
                    entry.waiters.retain(|&w| w != txn_id);
                    guard.wfg.remove_waiting(txn_id);
                    guard.held_by_txn.entry(txn_id).or_default().push(resource.clone());
                    tracing::info!(
                        txn_id,
                        node = %resource.node,
                        account_id = resource.account_id,
                        mode = ?mode,
                        "lock grant"
                    );
                    return Ok(());
                }
            } else {
                guard.locks.insert(resource.clone(), LockEntry::new(mode, txn_id));
                guard.held_by_txn.entry(txn_id).or_default().push(resource.clone());
                tracing::info!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?mode,
                    "lock grant"
                );
                return Ok(());
            }

            // Conflict: record a wait-for edge onto every other holder and
            // check for a cycle before parking.
            let holders: Vec<u64> = guard
                .locks
                .get(resource)
                .map(|e| e.holders.iter().copied().filter(|&h| h != txn_id).collect())
                .unwrap_or_default();

            for &holder in &holders {
                guard.wfg.add_dependency(txn_id, holder);
            }

            if let Some(victim) = guard.wfg.detect_cycle() {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                // The requester always self-aborts on a detected cycle,
                // regardless of which node the DFS happened to return.
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?mode,
                    cycle_node = victim,
                    "deadlock detected, aborting requester"
                );
                return Err(LedgerError::DeadlockDetected { txn_id, resource: resource.clone() });
            }

            if let Some(entry) = guard.locks.get_mut(resource) {
                if !entry.waiters.contains(&txn_id) {
                    entry.waiters.push(txn_id);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?mode,
                    "lock timeout"
                );
                return Err(LedgerError::LockTimeout { txn_id, resource: resource.clone() });
            }
            let remaining = deadline - now;

            tracing::debug!(
                txn_id,
                node = %resource.node,
                account_id = resource.account_id,
                mode = ?mode,
                wait_ms = remaining.as_millis() as u64,
                "lock wait"
            );
            let result = condvar.wait_for(&mut guard, remaining);
            if result.timed_out() {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?mode,
                    "lock timeout"
                );
                return Err(LedgerError::LockTimeout { txn_id, resource: resource.clone() });
            }
        }
    }

    /// Upgrade an already-held shared lock to exclusive. Grounded on the
    /// reference `_upgrade_lock_internal`: granted immediately when the
    /// requester is the sole holder. Otherwise this keeps holding the
    /// shared lock while it waits, and (unlike the reference source)
    /// records a wait-for edge onto every other current holder so that
    /// two transactions upgrading the same resource at once are detected
    /// as a cycle instead of both timing out (spec §9 flags the
    /// edge-free version as an incompleteness; this closes it).
    pub fn upgrade(&self, txn_id: u64, resource: &ResourceKey) -> Result<(), LedgerError> {
        let deadline = Instant::now() + self.default_timeout;
        let condvar = self.condvar_for(resource);
        let mut guard = self.inner.lock();

        loop {
            let (is_holder, sole_holder, others) = match guard.locks.get(resource) {
                Some(entry) => {
                    let is_holder = entry.holders.contains(&txn_id);
                    let sole_holder = entry.holders.len() == 1 && is_holder;
                    let others: Vec<u64> = entry.holders.iter().copied().filter(|&h| h != txn_id).collect();
                    (is_holder, sole_holder, others)
                }
                None => {
                    return Err(LedgerError::Validation(format!(
                        "txn {txn_id} cannot upgrade a lock it does not hold on {resource:?}"
                    )));
                }
            };

            if !is_holder {
                return Err(LedgerError::Validation(format!(
                    "txn {txn_id} cannot upgrade a lock it does not hold on {resource:?}"
                )));
            }

            if sole_holder {
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.mode = LockMode::Exclusive;
                }
                guard.wfg.remove_waiting(txn_id);
                tracing::debug!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?LockMode::Exclusive,
                    "lock upgrade granted"
                );
                return Ok(());
            }

            for &holder in &others {
                guard.wfg.add_dependency(txn_id, holder);
            }

            if let Some(victim) = guard.wfg.detect_cycle() {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?LockMode::Exclusive,
                    cycle_node = victim,
                    "deadlock detected during upgrade, aborting requester"
                );
                return Err(LedgerError::DeadlockDetected { txn_id, resource: resource.clone() });
            }

            if let Some(entry) = guard.locks.get_mut(resource) {
                if !entry.waiters.contains(&txn_id) {
                    entry.waiters.push(txn_id);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?LockMode::Exclusive,
                    "lock timeout during upgrade"
                );
                return Err(LedgerError::LockTimeout { txn_id, resource: resource.clone() });
            }
            let remaining = deadline - now;

            tracing::debug!(
                txn_id,
                node = %resource.node,
                account_id = resource.account_id,
                mode = ?LockMode::Exclusive,
                wait_ms = remaining.as_millis() as u64,
                "lock upgrade wait"
            );
            let result = condvar.wait_for(&mut guard, remaining);
            if result.timed_out() {
                guard.wfg.remove_waiting(txn_id);
                if let Some(entry) = guard.locks.get_mut(resource) {
                    entry.waiters.retain(|&w| w != txn_id);
                }
                tracing::warn!(
                    txn_id,
                    node = %resource.node,
                    account_id = resource.account_id,
                    mode = ?LockMode::Exclusive,
                    "lock timeout during upgrade"
                );
                return Err(LedgerError::LockTimeout { txn_id, resource: resource.clone() });
            }
        }
    }

    /// Release one resource held by `txn_id`, waking any parked waiters.
    pub fn release(&self, txn_id: u64, resource: &ResourceKey) {
        let mut guard = self.inner.lock();
        let mut now_empty = false;
        if let Some(entry) = guard.locks.get_mut(resource) {
            entry.holders.retain(|&h| h != txn_id);
            now_empty = entry.holders.is_empty();
        }
        if now_empty {
            guard.locks.remove(resource);
        }
        if let Some(held) = guard.held_by_txn.get_mut(&txn_id) {
            held.retain(|r| r != resource);
        }
        guard.wfg.remove_transaction(txn_id);
        drop(guard);

        let condvar = self.condvar_for(resource);
        condvar.notify_all();
    }

    /// Release every resource held by `txn_id`. Called at commit and abort;
    /// O(number of locks held), never touches storage.
    pub fn release_all(&self, txn_id: u64) {
        let resources: Vec<ResourceKey> = {
            let guard = self.inner.lock();
            guard.held_by_txn.get(&txn_id).cloned().unwrap_or_default()
        };
        let released = resources.len();
        for resource in resources {
            self.release(txn_id, &resource);
        }
        tracing::info!(txn_id, released, "released all locks");
        let mut guard = self.inner.lock();
        guard.held_by_txn.remove(&txn_id);
        guard.wfg.remove_transaction(txn_id);
    }

    /// Snapshot of a resource's current lock state, for diagnostics.
    pub fn lock_info(&self, resource: &ResourceKey) -> Option<LockEntryInfo> {
        let guard = self.inner.lock();
        guard.locks.get(resource).map(|e| LockEntryInfo {
            resource: resource.clone(),
            mode: e.mode,
            holders: e.holders.clone(),
            waiters: e.waiters.clone(),
        })
    }

    /// All resources currently held by `txn_id`.
    pub fn transaction_locks(&self, txn_id: u64) -> Vec<ResourceKey> {
        let guard = self.inner.lock();
        guard.held_by_txn.get(&txn_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn table() -> LockTable {
        LockTable::new(Duration::from_millis(500))
    }

    #[test]
    fn first_acquire_always_grants() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        assert!(t.acquire(1, &r, LockMode::Exclusive).is_ok());
        assert_eq!(t.lock_info(&r).unwrap().holders, vec![1]);
    }

    #[test]
    fn shared_locks_are_concurrent() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        assert!(t.acquire(1, &r, LockMode::Shared).is_ok());
        assert!(t.acquire(2, &r, LockMode::Shared).is_ok());
        let info = t.lock_info(&r).unwrap();
        assert_eq!(info.holders.len(), 2);
    }

    #[test]
    fn exclusive_blocks_and_times_out() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        t.acquire(1, &r, LockMode::Exclusive).unwrap();
        let result = t.acquire(2, &r, LockMode::Exclusive);
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
    }

    #[test]
    fn release_wakes_a_waiter() {
        let t = Arc::new(table());
        let r = ResourceKey::new("n1", 1);
        t.acquire(1, &r, LockMode::Exclusive).unwrap();

        let t2 = t.clone();
        let r2 = r.clone();
        let handle = thread::spawn(move || t2.acquire(2, &r2, LockMode::Exclusive));

        thread::sleep(Duration::from_millis(50));
        t.release(1, &r);

        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn release_all_clears_every_resource() {
        let t = table();
        let r1 = ResourceKey::new("n1", 1);
        let r2 = ResourceKey::new("n1", 2);
        t.acquire(1, &r1, LockMode::Exclusive).unwrap();
        t.acquire(1, &r2, LockMode::Shared).unwrap();
        t.release_all(1);
        assert!(t.lock_info(&r1).is_none());
        assert!(t.lock_info(&r2).is_none());
        assert!(t.transaction_locks(1).is_empty());
    }

    #[test]
    fn cross_deadlock_self_aborts_the_detector() {
        let t = Arc::new(table());
        let r1 = ResourceKey::new("n1", 1);
        let r2 = ResourceKey::new("n1", 2);
        t.acquire(1, &r1, LockMode::Exclusive).unwrap();
        t.acquire(2, &r2, LockMode::Exclusive).unwrap();

        let t2 = t.clone();
        let r2c = r2.clone();
        let handle = thread::spawn(move || t2.acquire(1, &r2c, LockMode::Exclusive));

        thread::sleep(Duration::from_millis(50));
        let result = t.acquire(2, &r1, LockMode::Exclusive);
        assert!(matches!(result, Err(LedgerError::DeadlockDetected { txn_id: 2, .. })));

        t.release(1, &r1);
        let _ = handle.join();
    }

    #[test]
    fn upgrade_sole_holder_is_immediate() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        t.acquire(1, &r, LockMode::Shared).unwrap();
        assert!(t.upgrade(1, &r).is_ok());
        assert_eq!(t.lock_info(&r).unwrap().mode, LockMode::Exclusive);
    }

    #[test]
    fn holding_exclusive_satisfies_a_later_shared_request() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        t.acquire(1, &r, LockMode::Exclusive).unwrap();
        assert!(t.acquire(1, &r, LockMode::Shared).is_ok());
        assert_eq!(t.lock_info(&r).unwrap().holders, vec![1]);
    }

    #[test]
    fn holding_shared_cannot_silently_satisfy_an_exclusive_request() {
        let t = table();
        let r = ResourceKey::new("n1", 1);
        t.acquire(1, &r, LockMode::Shared).unwrap();
        let result = t.acquire(1, &r, LockMode::Exclusive);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
