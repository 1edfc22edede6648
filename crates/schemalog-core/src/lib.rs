//! Core types and trait definitions for the schemalog migration ledger.
//!
//! This crate is deliberately free of database dependencies. Backends
//! implement [`store::MigrationStore`]; the decision logic that does not need
//! a database (checksums, run plans, version ordering) lives here.

// Native `async fn` in traits; `Send` bounds are spelled out on the trait.
#![allow(async_fn_in_trait)]

pub mod checksum;
pub mod error;
pub mod lock;
pub mod migration;
pub mod plan;
pub mod store;
pub mod version;

pub use checksum::compute_checksum;
pub use error::{Error, Result};
