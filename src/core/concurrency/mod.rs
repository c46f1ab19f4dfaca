//! The concurrency-control core: wait-for graph + centralized lock table.

pub mod lock_table;
pub mod wfg;

pub use lock_table::{LockEntryInfo, LockMode, LockTable, ResourceKey};
pub use wfg::WaitForGraph;
