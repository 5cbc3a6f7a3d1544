//! PostgreSQL ledger backend
//!
//! ## Bootstrap (under the ledger lock, one serializable transaction):
//! 1. Create the ledger table if absent
//! 2. Import finished legacy rows not yet present by name
//! 3. Raise `MIGRATION_IN_PROGRESS` if a fresh unfinished entry exists
//! 4. Read finished names ordered by `startedAt`
//!
//! ## Apply (no lock, one serializable transaction):
//! for each pending migration: already-done guard, upsert `startedAt`,
//! statement groups, set `finishedAt`; then the optional delay and commit.

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Connection, Executor};

use automig_core::catalog::{ExecutionMode, MigrationDescriptor};
use automig_core::{signal_of, ApplyOptions, LedgerBackend, MigratorConfig};
use automig_core::{log_op_end, log_op_error, log_op_start};

use crate::errors::{from_apply_error, from_sqlx, Result};
use crate::lock::with_ledger_lock;
use crate::sql::{wrap_in_do_block, LedgerSql};

const SET_SERIALIZABLE: &str = "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE";

/// Ledger stored in a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    sql: LedgerSql,
    lock_id: i64,
}

impl PgLedger {
    pub fn new(pool: PgPool, config: &MigratorConfig) -> Self {
        Self {
            pool,
            sql: LedgerSql::new(config),
            lock_id: config.lock_id,
        }
    }
}

async fn bootstrap(conn: &mut PgConnection, sql: LedgerSql) -> Result<Vec<String>> {
    let op = "ledger_bootstrap";
    let mut tx = conn.begin().await.map_err(|e| from_sqlx(op, e))?;

    (&mut *tx)
        .execute(SET_SERIALIZABLE)
        .await
        .map_err(|e| from_sqlx(op, e))?;
    (&mut *tx)
        .execute(sql.create_table().as_str())
        .await
        .map_err(|e| from_sqlx(op, e))?;
    if let Some(import) = sql.legacy_import() {
        let imported = (&mut *tx)
            .execute(import.as_str())
            .await
            .map_err(|e| from_sqlx(op, e))?;
        tracing::trace!(rows = imported.rows_affected(), "legacy import ran");
    }
    (&mut *tx)
        .execute(sql.in_progress_guard().as_str())
        .await
        .map_err(|e| from_sqlx(op, e))?;

    let names: Vec<String> = sqlx::query_scalar(&sql.select_finished())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| from_sqlx(op, e))?;

    tx.commit().await.map_err(|e| from_sqlx(op, e))?;
    Ok(names)
}

#[async_trait]
impl LedgerBackend for PgLedger {
    async fn load_applied_names(&self) -> Result<Vec<String>> {
        log_op_start!("ledger_bootstrap", lock_id = self.lock_id);
        let start = std::time::Instant::now();

        let sql = self.sql.clone();
        let result = with_ledger_lock(&self.pool, self.lock_id, move |conn| {
            bootstrap(conn, sql).boxed()
        })
        .await;

        match result {
            Ok(names) => {
                log_op_end!(
                    "ledger_bootstrap",
                    duration_ms = start.elapsed().as_millis() as u64,
                    applied_len = names.len()
                );
                Ok(names)
            }
            Err(e) => {
                // the in-progress signal is retried upstream; keep it out of error logs
                if signal_of(&e).is_some() {
                    tracing::debug!(error = %e, "ledger bootstrap signalled");
                } else {
                    log_op_error!(
                        "ledger_bootstrap",
                        e,
                        duration_ms = start.elapsed().as_millis() as u64
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_pending(
        &self,
        pending: &[MigrationDescriptor],
        options: &ApplyOptions,
    ) -> Result<()> {
        let op = "apply_pending";
        let constraint = self.sql.unique_constraint();
        let fail = |e: sqlx::Error| from_apply_error(op, e, &constraint);

        let mut tx = self.pool.begin().await.map_err(|e| from_sqlx(op, e))?;
        (&mut *tx).execute(SET_SERIALIZABLE).await.map_err(fail)?;

        for migration in pending {
            let name = migration.name();
            let with_name = |e| fail(e).with_migration(name);

            (&mut *tx)
                .execute(self.sql.already_done_guard(name).as_str())
                .await
                .map_err(with_name)?;

            sqlx::query(&self.sql.upsert_started())
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(with_name)?;

            for (index, group) in migration.groups().iter().enumerate() {
                let statement = match group.mode {
                    ExecutionMode::Standalone => Some(group.sql.clone()),
                    ExecutionMode::Wrapped => wrap_in_do_block(&group.sql),
                };
                let Some(statement) = statement else {
                    continue;
                };
                tracing::debug!(migration = name, group = index, "executing statement group");
                (&mut *tx)
                    .execute(statement.as_str())
                    .await
                    .map_err(with_name)?;
            }

            sqlx::query(&self.sql.mark_finished())
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(with_name)?;

            tracing::info!(migration = name, "migration applied in transaction");
        }

        if let Some(delay) = options.artificial_delay {
            sqlx::query("SELECT pg_sleep($1)")
                .bind(delay.as_secs_f64())
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
        }

        tx.commit().await.map_err(fail)?;
        Ok(())
    }
}
