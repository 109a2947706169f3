//! Schema migrations
//!
//! SQL migration files, a durable ledger, and a batch-aware runner.

pub mod definitions;
pub mod runner;

pub use definitions::{Migration, MigrationRecord, LEDGER_TABLE};
pub use runner::MigrationRunner;
