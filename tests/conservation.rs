//! Property test: concurrent transfers among a fixed pool of accounts
//! never change the sum of balances and never leave a balance negative,
//! regardless of how many transfers land on the same account or race
//! with each other.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ledgerdb::core::transaction::TransactionPlan;
use ledgerdb::{InMemoryStore, StorageAdapter, TransactionManager};
use proptest::prelude::*;

const NODE: &str = "n1";
const ACCOUNT_COUNT: u64 = 4;
const INITIAL_BALANCE: i64 = 10_000;

fn total_balance(store: &InMemoryStore) -> i64 {
    (1..=ACCOUNT_COUNT).map(|id| store.read_balance(NODE, id).unwrap()).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn concurrent_transfers_conserve_total_balance_and_stay_non_negative(
        transfers in prop::collection::vec(
            (1..=ACCOUNT_COUNT, 1..=ACCOUNT_COUNT, 1i64..2_000),
            1..24,
        )
    ) {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=ACCOUNT_COUNT {
            store.create_account(NODE, id, INITIAL_BALANCE).unwrap();
        }
        let manager = Arc::new(TransactionManager::new(store.clone(), Duration::from_secs(5)));
        let before = total_balance(&store);

        let handles: Vec<_> = transfers
            .into_iter()
            .filter(|&(from, to, _)| from != to)
            .map(|(from, to, amount)| {
                let manager = manager.clone();
                thread::spawn(move || {
                    manager.execute_transaction(TransactionPlan::Transfer { from, to, amount });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let after = total_balance(&store);
        prop_assert_eq!(before, after);
        for id in 1..=ACCOUNT_COUNT {
            prop_assert!(store.read_balance(NODE, id).unwrap() >= 0);
        }
        prop_assert_eq!(manager.active_transaction_count(), 0);
    }
}
