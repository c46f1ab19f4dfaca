pub mod error;

pub use error::LedgerError;
