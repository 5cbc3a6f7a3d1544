//! automig Core - database-independent schema migration engine
//!
//! This crate holds everything about coordinated migration that does not
//! depend on a particular database driver:
//! - The immutable migration catalog and its statement-group sentinels
//! - The ordering invariant between the applied ledger and the catalog
//! - Classification of deliberately raised database signals
//! - Exponential backoff with jitter for transient signals
//! - The migration applier and the runtime auto-migrate guard, written
//!   against the [`LedgerBackend`] trait
//! - The canonical error and logging facilities
//!
//! The PostgreSQL binding lives in `automig-store`.

pub mod backend;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod errors;
pub mod guard;
pub mod logging_facility;
pub mod migrator;
pub mod plan;
pub mod retry;

#[doc(hidden)]
pub use automig_core_types as core_types;

// Re-export commonly used types
pub use backend::LedgerBackend;
pub use catalog::{Catalog, ExecutionMode, MigrationDescriptor, StatementGroup};
pub use classify::{classify, signal_of, Classified, MigrationSignal};
pub use config::MigratorConfig;
pub use errors::{ExError, ExErrorKind, Result};
pub use guard::run_with_auto_migrate;
pub use migrator::{ApplyOptions, ApplyOutcome, Migrator};
pub use plan::MigrationStatus;
pub use retry::{retry_on, RetryPolicy};
