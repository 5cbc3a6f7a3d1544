//! automig Store - PostgreSQL binding for the migration engine
//!
//! Provides:
//! - Connection pool setup
//! - The session-scoped advisory lock guarding ledger bootstrap
//! - Ledger DDL, legacy import and the apply transaction
//! - The `MIGRATION_NEEDED` detection query for caller transactions

pub mod check_query;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod lock;
pub mod sql;

use std::sync::Arc;

use automig_core::{Catalog, Migrator, MigratorConfig};
use sqlx::PgPool;

pub use check_query::migration_check_query;
pub use errors::Result;
pub use ledger::PgLedger;
pub use lock::{with_ledger_lock, LedgerLock};

/// Migrator bound to a PostgreSQL ledger
pub type PgMigrator = Migrator<PgLedger>;

/// Build a migrator for `catalog` on `pool`
pub fn pg_migrator(pool: PgPool, catalog: Arc<Catalog>, config: &MigratorConfig) -> PgMigrator {
    Migrator::new(PgLedger::new(pool, config), catalog, config.retry)
}
