//! Custodial ledger: account balances, an append-only transaction log and an
//! admin-approved fund request queue, mutated only through [`ledger::Ledger`].

pub mod config;
pub mod dlq;
pub mod domain;
pub mod engine;
pub mod ingestion;
pub mod ledger;
pub mod report;
pub mod store;
pub mod telemetry;

pub use config::LedgerConfig;
pub use domain::{Error, LedgerError, Money};
pub use ledger::{Ledger, TransferReceipt};
