//! Storage adapter: the external interface transactions use to read and
//! durably apply balance changes, and the two implementations of it.
//!
//! [`FileStore`] follows the reference engine's durability pattern: the
//! whole per-node table is serialized and written to a temp file, fsynced,
//! then atomically renamed over the live file, so a crash mid-write never
//! corrupts the previous committed state.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::common::LedgerError;

/// One account row. `balance` must never go negative; callers enforce this
/// before calling `write_balance`, storage does not re-validate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: u64,
    pub balance: i64,
}

/// The contract every transaction interacts with, independent of what
/// physically backs a node: route accounts to nodes, read a balance,
/// durably write one back.
pub trait StorageAdapter: Send + Sync {
    fn route(&self, account_id: u64) -> Result<String, LedgerError>;
    fn read_balance(&self, node: &str, account_id: u64) -> Result<i64, LedgerError>;
    fn write_balance(&self, node: &str, account_id: u64, new_balance: i64) -> Result<(), LedgerError>;
    fn create_account(&self, node: &str, account_id: u64, initial_balance: i64) -> Result<(), LedgerError>;
    fn delete_account(&self, node: &str, account_id: u64) -> Result<(), LedgerError>;
}

/// An in-process, non-durable store used by tests; never touches disk.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    nodes: parking_lot::Mutex<HashMap<String, HashMap<u64, i64>>>,
    index: parking_lot::Mutex<HashMap<u64, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for InMemoryStore {
    fn route(&self, account_id: u64) -> Result<String, LedgerError> {
        self.index
            .lock()
            .get(&account_id)
            .cloned()
            .ok_or_else(|| LedgerError::Validation(format!("unknown account {account_id}")))
    }

    fn read_balance(&self, node: &str, account_id: u64) -> Result<i64, LedgerError> {
        self.nodes
            .lock()
            .get(node)
            .and_then(|accounts| accounts.get(&account_id))
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound { node: node.to_string(), account_id })
    }

    fn write_balance(&self, node: &str, account_id: u64, new_balance: i64) -> Result<(), LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::Validation(format!(
                "negative balance {new_balance} rejected for account {account_id}"
            )));
        }
        let mut nodes = self.nodes.lock();
        let accounts = nodes
            .entry(node.to_string())
            .or_default();
        if !accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountNotFound { node: node.to_string(), account_id });
        }
        accounts.insert(account_id, new_balance);
        Ok(())
    }

    fn create_account(&self, node: &str, account_id: u64, initial_balance: i64) -> Result<(), LedgerError> {
        if initial_balance < 0 {
            return Err(LedgerError::Validation("initial balance must be non-negative".into()));
        }
        self.nodes
            .lock()
            .entry(node.to_string())
            .or_default()
            .insert(account_id, initial_balance);
        self.index.lock().insert(account_id, node.to_string());
        Ok(())
    }

    fn delete_account(&self, node: &str, account_id: u64) -> Result<(), LedgerError> {
        self.nodes.lock().entry(node.to_string()).or_default().remove(&account_id);
        self.index.lock().remove(&account_id);
        Ok(())
    }
}

/// One node's on-disk table: account id -> balance, loaded fully into
/// memory and rewritten wholesale on every durable write.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeTable {
    accounts: HashMap<u64, i64>,
}

/// File-backed storage adapter. Each node owns one JSON file; writes go
/// through a temp-file-then-rename so a crash never leaves a half-written
/// table on disk.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    node_paths: HashMap<String, PathBuf>,
    tables: parking_lot::Mutex<HashMap<String, NodeTable>>,
    index: parking_lot::Mutex<HashMap<u64, String>>,
}

impl FileStore {
    /// `node_paths` maps node name to its backing file path (taken from
    /// routing config's `db_path` field). Missing files are treated as
    /// empty tables, matching the reference loader's "no file yet" case.
    pub fn new(base_dir: impl Into<PathBuf>, node_paths: HashMap<String, PathBuf>) -> Result<Self, LedgerError> {
        let base_dir = base_dir.into();
        let mut tables = HashMap::new();
        let mut index = HashMap::new();
        for (node, path) in &node_paths {
            let table = Self::load_table(path)?;
            for &account_id in table.accounts.keys() {
                index.insert(account_id, node.clone());
            }
            tables.insert(node.clone(), table);
        }
        Ok(Self {
            base_dir,
            node_paths,
            tables: parking_lot::Mutex::new(tables),
            index: parking_lot::Mutex::new(index),
        })
    }

    fn load_table(path: &Path) -> Result<NodeTable, LedgerError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(NodeTable::default()),
            Err(err) => Err(LedgerError::from(err)),
        }
    }

    fn save_table(&self, node: &str, table: &NodeTable) -> Result<(), LedgerError> {
        let path = self
            .node_paths
            .get(node)
            .ok_or_else(|| LedgerError::Config(format!("no db_path configured for node {node}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");

        struct TempFileGuard<'a>(&'a Path);
        impl<'a> Drop for TempFileGuard<'a> {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(self.0);
            }
        }
        let guard = TempFileGuard(&temp_path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, table)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        std::fs::rename(&temp_path, path)?;
        std::mem::forget(guard);
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl StorageAdapter for FileStore {
    fn route(&self, account_id: u64) -> Result<String, LedgerError> {
        self.index
            .lock()
            .get(&account_id)
            .cloned()
            .ok_or_else(|| LedgerError::Validation(format!("unknown account {account_id}")))
    }

    fn read_balance(&self, node: &str, account_id: u64) -> Result<i64, LedgerError> {
        self.tables
            .lock()
            .get(node)
            .and_then(|t| t.accounts.get(&account_id))
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound { node: node.to_string(), account_id })
    }

    fn write_balance(&self, node: &str, account_id: u64, new_balance: i64) -> Result<(), LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::Validation(format!(
                "negative balance {new_balance} rejected for account {account_id}"
            )));
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(node.to_string()).or_default();
        if !table.accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountNotFound { node: node.to_string(), account_id });
        }
        table.accounts.insert(account_id, new_balance);
        self.save_table(node, table)
    }

    fn create_account(&self, node: &str, account_id: u64, initial_balance: i64) -> Result<(), LedgerError> {
        if initial_balance < 0 {
            return Err(LedgerError::Validation("initial balance must be non-negative".into()));
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(node.to_string()).or_default();
        table.accounts.insert(account_id, initial_balance);
        self.save_table(node, table)?;
        self.index.lock().insert(account_id, node.to_string());
        Ok(())
    }

    fn delete_account(&self, node: &str, account_id: u64) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock();
        let table = tables.entry(node.to_string()).or_default();
        table.accounts.remove(&account_id);
        self.save_table(node, table)?;
        self.index.lock().remove(&account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let store = InMemoryStore::new();
        store.create_account("n1", 1, 100).unwrap();
        assert_eq!(store.read_balance("n1", 1).unwrap(), 100);
        store.write_balance("n1", 1, 80).unwrap();
        assert_eq!(store.read_balance("n1", 1).unwrap(), 80);
        assert_eq!(store.route(1).unwrap(), "n1");
    }

    #[test]
    fn in_memory_rejects_negative_balance() {
        let store = InMemoryStore::new();
        store.create_account("n1", 1, 100).unwrap();
        assert!(store.write_balance("n1", 1, -5).is_err());
    }

    #[test]
    fn file_store_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-a.json");
        let mut paths = HashMap::new();
        paths.insert("node-a".to_string(), path.clone());

        {
            let store = FileStore::new(dir.path(), paths.clone()).unwrap();
            store.create_account("node-a", 42, 500).unwrap();
            store.write_balance("node-a", 42, 450).unwrap();
        }

        let reopened = FileStore::new(dir.path(), paths).unwrap();
        assert_eq!(reopened.read_balance("node-a", 42).unwrap(), 450);
        assert_eq!(reopened.route(42).unwrap(), "node-a");
    }

    #[test]
    fn file_store_missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let mut paths = HashMap::new();
        paths.insert("node-a".to_string(), path);
        let store = FileStore::new(dir.path(), paths).unwrap();
        assert!(store.read_balance("node-a", 1).is_err());
    }
}
