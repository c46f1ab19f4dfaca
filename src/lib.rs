//! ledgerdb: a horizontally fragmented (sharded) transactional account store.
//!
//! Accounts are numeric-balance records, each resident on exactly one
//! physical node determined by a city-to-node routing table. Transactions
//! execute under centralized Strict Two-Phase Locking (SS2PL): a single
//! [`core::concurrency::LockTable`] grants shared/exclusive locks, a
//! [`core::concurrency::WaitForGraph`] detects deadlock cycles before a
//! requester suspends, and the [`core::transaction::TransactionManager`]
//! drives the growing/shrinking-phase lifecycle, deferred write buffering,
//! and commit-time flush to a [`core::storage::StorageAdapter`].
//!
//! ## Module map
//!
//! - `core::concurrency`: wait-for graph + lock table (the concurrency core).
//! - `core::transaction`: transaction object + transaction manager.
//! - `core::storage`: the storage adapter contract and two implementations.
//! - `core::config`: city-to-node routing table, loaded from TOML.
//! - `core::common`: crate-wide error type.
//! - `ingest`: CSV account ingestion.
//!
//! ## Non-goals
//!
//! No distributed consensus across nodes, no write-ahead logging or crash
//! recovery, no multi-version concurrency or snapshot isolation, no
//! two-phase commit; a single coordinator applies writes sequentially at
//! commit time against whichever nodes the transaction touched.

pub mod core;
pub mod ingest;

pub use crate::core::common::error::LedgerError;
pub use crate::core::concurrency::{LockMode, LockTable, WaitForGraph};
pub use crate::core::config::{NodeConfig, RoutingConfig};
pub use crate::core::storage::{Account, FileStore, InMemoryStore, StorageAdapter};
pub use crate::core::transaction::{Transaction, TransactionManager, TransactionState};
