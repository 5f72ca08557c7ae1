//! Infrastructure layer: storage, transactions, configuration.
//!
//! The inventory crate owns the rules; this crate decides where the state
//! lives and makes each ledger call one transaction against it.

pub mod config;
pub mod service;
pub mod store;

pub use service::LedgerService;
pub use store::{InMemoryStockStore, PostgresStockStore, StockStore, StockTransaction, StoreError};
