//! SQLite backend for the schemalog migration ledger.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Migration SQL and its bookkeeping are
//! executed in one `IMMEDIATE` transaction, which is also what serialises
//! concurrent lock acquisition across processes.

mod encode;
mod lock;
mod runner;
mod schema;
mod status;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
