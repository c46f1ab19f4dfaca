//! CSV account ingestion: bulk-loads `(city, balance[, account_id])` rows
//! into a [`StorageAdapter`], resolving each row's node via a
//! [`RoutingConfig`] the way the reference loader's `add_accounts_from_csv`
//! walks a pandas dataframe row by row.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::core::common::LedgerError;
use crate::core::config::RoutingConfig;
use crate::core::storage::StorageAdapter;

#[derive(Debug, Deserialize)]
struct AccountRow {
    city: String,
    #[serde(default)]
    balance: Option<i64>,
    #[serde(default)]
    account_id: Option<u64>,
}

/// Generates account ids for CSV rows that omit one, starting above any
/// id already present on disk.
pub struct AccountIdAllocator {
    next: AtomicU64,
}

impl AccountIdAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self { next: AtomicU64::new(next) }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn observe(&self, account_id: u64) {
        self.next.fetch_max(account_id + 1, Ordering::Relaxed);
    }
}

const DEFAULT_BALANCE: i64 = 1000;

/// Reads `path` as CSV with a `city` column and optional `balance` /
/// `account_id` columns, creating one account per row. Returns the ids
/// created, in file order.
pub fn load_accounts_csv(
    path: impl AsRef<Path>,
    routing: &RoutingConfig,
    storage: &dyn StorageAdapter,
    allocator: &AccountIdAllocator,
) -> Result<Vec<u64>, LedgerError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut created = Vec::new();

    for record in reader.deserialize() {
        let row: AccountRow = record?;
        let node = routing
            .node_for_city(&row.city)
            .ok_or_else(|| LedgerError::Config(format!("no node configured for city '{}'", row.city)))?;

        let account_id = match row.account_id {
            Some(id) => {
                allocator.observe(id);
                id
            }
            None => allocator.allocate(),
        };
        let balance = row.balance.unwrap_or(DEFAULT_BALANCE);

        storage.create_account(&node.name, account_id, balance)?;
        created.push(account_id);
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::InMemoryStore;
    use std::io::Write;

    fn routing() -> RoutingConfig {
        RoutingConfig::from_toml_str(
            r#"
            [[nodes]]
            name = "node-a"
            counties = ["Nairobi"]
            db_path = "unused.json"

            [[nodes]]
            name = "node-b"
            counties = ["Kisumu"]
            db_path = "unused2.json"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn loads_rows_with_explicit_and_default_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "city,balance,account_id").unwrap();
        writeln!(file, "Nairobi,5000,1").unwrap();
        writeln!(file, "Kisumu,,").unwrap();
        drop(file);

        let store = InMemoryStore::new();
        let allocator = AccountIdAllocator::starting_at(1);
        let ids = load_accounts_csv(&path, &routing(), &store, &allocator).unwrap();

        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.read_balance("node-a", 1).unwrap(), 5000);
        assert_eq!(store.read_balance("node-b", 2).unwrap(), DEFAULT_BALANCE);
    }

    #[test]
    fn unknown_city_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "city,balance,account_id").unwrap();
        writeln!(file, "Nowhere,100,1").unwrap();
        drop(file);

        let store = InMemoryStore::new();
        let allocator = AccountIdAllocator::starting_at(1);
        assert!(load_accounts_csv(&path, &routing(), &store, &allocator).is_err());
    }
}
