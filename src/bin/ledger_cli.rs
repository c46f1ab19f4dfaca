//! `ledger-cli`: loads a routing config and an account CSV, then runs a
//! requested operation against a file-backed store. Mirrors the reference
//! `main.py` driver's shape (load config, load accounts, exercise the
//! store) but with a proper subcommand surface instead of a fixed script.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ledgerdb::core::transaction::TransactionPlan;
use ledgerdb::ingest::{load_accounts_csv, AccountIdAllocator};
use ledgerdb::{FileStore, RoutingConfig, StorageAdapter, TransactionManager};

#[derive(Parser)]
#[command(name = "ledger-cli", about = "Sharded account store with SS2PL concurrency control")]
struct Cli {
    /// Path to the routing config (fragmentation.toml-shaped TOML file).
    #[arg(long, default_value = "fragmentation.toml")]
    config: PathBuf,

    /// Directory node db_path entries are resolved relative to.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Lock acquisition timeout, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    lock_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load accounts from a CSV file (`city,balance,account_id` columns).
    LoadCsv { csv_path: PathBuf },
    /// Print an account's balance.
    Balance { account_id: u64 },
    /// Transfer between two accounts.
    Transfer { from: u64, to: u64, amount: i64 },
    /// Withdraw from one account.
    Withdraw { account_id: u64, amount: i64 },
    /// Deposit into one account.
    Deposit { account_id: u64, amount: i64 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let routing = RoutingConfig::load(&cli.config)
        .with_context(|| format!("loading routing config from {}", cli.config.display()))?;

    let node_paths = routing
        .nodes
        .iter()
        .map(|n| (n.name.clone(), cli.data_dir.join(&n.db_path)))
        .collect();
    let storage = Arc::new(
        FileStore::new(cli.data_dir.clone(), node_paths).context("opening node stores")?,
    );

    match cli.command {
        Command::LoadCsv { csv_path } => {
            let allocator = AccountIdAllocator::starting_at(1);
            let created = load_accounts_csv(&csv_path, &routing, storage.as_ref(), &allocator)
                .with_context(|| format!("loading accounts from {}", csv_path.display()))?;
            println!("loaded {} accounts", created.len());
        }
        Command::Balance { account_id } => {
            let node = storage.route(account_id).context("resolving account")?;
            let balance = storage.read_balance(&node, account_id)?;
            println!("account {account_id} on {node}: {balance}");
        }
        Command::Transfer { from, to, amount } => {
            let manager = TransactionManager::new(storage, Duration::from_millis(cli.lock_timeout_ms));
            let ok = manager.execute_transaction(TransactionPlan::Transfer { from, to, amount });
            println!("transfer {}", if ok { "SUCCESS" } else { "FAILURE" });
        }
        Command::Withdraw { account_id, amount } => {
            let manager = TransactionManager::new(storage, Duration::from_millis(cli.lock_timeout_ms));
            let ok = manager.execute_transaction(TransactionPlan::Withdraw { account: account_id, amount });
            println!("withdraw {}", if ok { "SUCCESS" } else { "FAILURE" });
        }
        Command::Deposit { account_id, amount } => {
            let manager = TransactionManager::new(storage, Duration::from_millis(cli.lock_timeout_ms));
            let ok = manager.execute_transaction(TransactionPlan::Deposit { account: account_id, amount });
            println!("deposit {}", if ok { "SUCCESS" } else { "FAILURE" });
        }
    }

    Ok(())
}
