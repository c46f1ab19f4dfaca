//! Transaction object and transaction manager: the 2PL growing/shrinking
//! state machine, deferred write buffering, and the high-level operations
//! (read, write, transfer) built on top of the lock table and storage
//! adapter.

mod manager;
mod object;

pub use manager::{TransactionManager, TransactionPlan};
pub use object::{Operation, TransactionPhase, TransactionState};

pub use object::Transaction;
