//! Integration tests against a live PostgreSQL server
//!
//! Set `AUTOMIG_TEST_DATABASE_URL` to a role allowed to create databases;
//! each test runs in a throwaway database. Without it the tests return
//! early.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use automig_core::config::DEFAULT_LOCK_ID;
use automig_core::{
    run_with_auto_migrate, signal_of, ApplyOptions, Catalog, ExError, ExErrorKind, LedgerBackend,
    MigrationDescriptor, MigrationSignal, Migrator, MigratorConfig, RetryPolicy,
};
use automig_store::errors::from_sqlx;
use automig_store::sql::LedgerSql;
use automig_store::{
    migration_check_query, pg_migrator, with_ledger_lock, LedgerLock, PgLedger, PgMigrator,
};
use futures::FutureExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor, Row};

const DATABASE_URL_ENV: &str = "AUTOMIG_TEST_DATABASE_URL";

struct TestDb {
    admin: PgPool,
    pool: PgPool,
    name: String,
}

impl TestDb {
    async fn create() -> Option<Self> {
        let url = match std::env::var(DATABASE_URL_ENV) {
            Ok(url) => url,
            Err(_) => {
                eprintln!("skipping: {} not set", DATABASE_URL_ENV);
                return None;
            }
        };

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap();
        let name = format!("automig_test_{}", uuid::Uuid::new_v4().simple());
        admin
            .execute(format!("CREATE DATABASE \"{}\"", name).as_str())
            .await
            .unwrap();

        let options: PgConnectOptions = url.parse().unwrap();
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options.database(&name))
            .await
            .unwrap();

        Some(Self { admin, pool, name })
    }

    async fn drop_db(self) {
        self.pool.close().await;
        self.admin
            .execute(format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name).as_str())
            .await
            .unwrap();
    }
}

fn catalog(entries: &[(&str, &str)]) -> Arc<Catalog> {
    Arc::new(
        Catalog::new(
            entries
                .iter()
                .map(|(name, sql)| MigrationDescriptor::parse(*name, sql))
                .collect(),
        )
        .unwrap(),
    )
}

fn migrator(db: &TestDb, catalog: Arc<Catalog>) -> PgMigrator {
    pg_migrator(db.pool.clone(), catalog, &MigratorConfig::default())
}

async fn ledger_rows(pool: &PgPool) -> Vec<(String, bool)> {
    sqlx::query(
        r#"SELECT "migrationName", "finishedAt" IS NOT NULL AS finished
           FROM "SchemaMigration" ORDER BY "startedAt""#,
    )
    .fetch_all(pool)
    .await
    .unwrap()
    .into_iter()
    .map(|row| (row.get::<String, _>(0), row.get::<bool, _>(1)))
    .collect()
}

async fn advisory_locks_held(pool: &PgPool) -> i64 {
    sqlx::query_scalar(
        "SELECT count(*) FROM pg_locks l JOIN pg_database d ON d.oid = l.database
         WHERE l.locktype = 'advisory' AND d.datname = current_database()",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Backend that always reports an empty ledger, like a process whose
/// bootstrap ran before another one committed
struct StaleLedger(PgLedger);

#[async_trait]
impl LedgerBackend for StaleLedger {
    async fn load_applied_names(&self) -> automig_core::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn apply_pending(
        &self,
        pending: &[MigrationDescriptor],
        options: &ApplyOptions,
    ) -> automig_core::Result<()> {
        self.0.apply_pending(pending, options).await
    }
}

const CREATE_T: (&str, &str) = ("001", "CREATE TABLE t(id INT)");
const ADD_N: (&str, &str) = ("002", "ALTER TABLE t ADD COLUMN n INT");

#[tokio::test]
async fn test_applies_catalog_to_empty_database() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let m = migrator(&db, catalog(&[CREATE_T, ADD_N]));

    let outcome = m.apply_pending_migrations(&ApplyOptions::default()).await.unwrap();
    assert_eq!(outcome.newly_applied, vec!["001", "002"]);

    db.pool
        .execute("INSERT INTO t (id, n) VALUES (1, 2)")
        .await
        .unwrap();
    assert_eq!(
        ledger_rows(&db.pool).await,
        vec![("001".to_string(), true), ("002".to_string(), true)]
    );

    let again = m.apply_pending_migrations(&ApplyOptions::default()).await.unwrap();
    assert!(again.newly_applied.is_empty());

    db.drop_db().await;
}

#[tokio::test]
async fn test_applies_suffix_after_partial_catalog() {
    let Some(db) = TestDb::create().await else {
        return;
    };

    let first = migrator(&db, catalog(&[CREATE_T]));
    first
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap();

    let full = migrator(&db, catalog(&[CREATE_T, ADD_N]));
    let outcome = full
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.newly_applied, vec!["002"]);
    assert_eq!(ledger_rows(&db.pool).await.len(), 2);

    db.drop_db().await;
}

#[tokio::test]
async fn test_concurrent_appliers_one_wins() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let entries = [CREATE_T, ADD_N];
    let a = migrator(&db, catalog(&entries));
    let b = migrator(&db, catalog(&entries));
    let options = ApplyOptions {
        artificial_delay: Some(Duration::from_secs(1)),
    };

    let (ra, rb) = tokio::join!(
        a.apply_pending_migrations(&options),
        b.apply_pending_migrations(&options)
    );
    let mut lens = vec![
        ra.unwrap().newly_applied.len(),
        rb.unwrap().newly_applied.len(),
    ];
    lens.sort_unstable();

    assert_eq!(lens, vec![0, 2]);
    assert_eq!(
        ledger_rows(&db.pool).await,
        vec![("001".to_string(), true), ("002".to_string(), true)]
    );

    db.drop_db().await;
}

#[tokio::test]
async fn test_failed_migration_commits_nothing() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let m = migrator(&db, catalog(&[CREATE_T, ("002", "ALTER TABLE missing ADD COLUMN x INT")]));

    let err = m
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::Persistence);
    assert_eq!(err.migration(), Some("002"));
    assert_eq!(err.db_code(), Some("42P01"));
    assert!(ledger_rows(&db.pool).await.is_empty());
    let t_exists: Option<String> = sqlx::query_scalar("SELECT to_regclass('t')::text")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(t_exists, None);

    db.drop_db().await;
}

#[tokio::test]
async fn test_wrapped_and_standalone_groups() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let body = "IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'mood') THEN\n\
                    CREATE TYPE mood AS ENUM ('ok', 'meh');\n\
                END IF;\n\
                -- SPLIT_STATEMENT_SENTINEL\n\
                -- SINGLE_STATEMENT_SENTINEL\n\
                CREATE TABLE feelings(m mood)";
    let m = migrator(&db, catalog(&[("001_mood", body)]));

    m.apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap();

    db.pool
        .execute("INSERT INTO feelings VALUES ('meh')")
        .await
        .unwrap();

    db.drop_db().await;
}

#[tokio::test]
async fn test_gap_in_ledger_is_fatal() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let m = migrator(&db, catalog(&[("m1", "SELECT 1"), ("m2", "SELECT 1"), ("m3", "SELECT 1")]));
    m.load_applied_migrations().await.unwrap();
    db.pool
        .execute(
            r#"INSERT INTO "SchemaMigration" ("migrationName", "startedAt", "finishedAt") VALUES
               ('m1', now() - INTERVAL '2 minutes', now() - INTERVAL '2 minutes'),
               ('m3', now() - INTERVAL '1 minute', now() - INTERVAL '1 minute')"#,
        )
        .await
        .unwrap();

    let err = m
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::AppliedOutOfOrder);
    assert_eq!(ledger_rows(&db.pool).await.len(), 2);

    db.drop_db().await;
}

#[tokio::test]
async fn test_legacy_import_is_idempotent() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    db.pool
        .execute(
            r#"CREATE TABLE "_prisma_migrations" (
                   id TEXT PRIMARY KEY,
                   migration_name TEXT NOT NULL,
                   started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                   finished_at TIMESTAMPTZ
               );
               INSERT INTO "_prisma_migrations" (id, migration_name, started_at, finished_at) VALUES
                   ('a', 'legacy_1', now() - INTERVAL '3 days', now() - INTERVAL '3 days'),
                   ('b', 'legacy_2', now() - INTERVAL '2 days', now() - INTERVAL '2 days'),
                   ('c', 'legacy_3', now() - INTERVAL '1 day', now() - INTERVAL '1 day'),
                   ('d', 'legacy_failed', now(), NULL);"#,
        )
        .await
        .unwrap();
    let m = migrator(
        &db,
        catalog(&[
            ("legacy_1", "SELECT 1"),
            ("legacy_2", "SELECT 1"),
            ("legacy_3", "SELECT 1"),
        ]),
    );

    let first = m.load_applied_migrations().await.unwrap();
    let second = m.load_applied_migrations().await.unwrap();

    assert_eq!(first, vec!["legacy_1", "legacy_2", "legacy_3"]);
    assert_eq!(second, first);
    assert_eq!(ledger_rows(&db.pool).await.len(), 3);
    let status = m.status().await.unwrap();
    assert!(status.is_up_to_date());

    db.drop_db().await;
}

#[tokio::test]
async fn test_check_query_raises_needed_on_fresh_database() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let catalog = catalog(&[CREATE_T]);
    let check = migration_check_query(&catalog, "SchemaMigration");

    let err = db
        .pool
        .execute(check.as_str())
        .await
        .map_err(|e| from_sqlx("check", e))
        .unwrap_err();

    assert_eq!(signal_of(&err), Some(MigrationSignal::Needed));

    db.drop_db().await;
}

#[tokio::test]
async fn test_guard_self_heals_stale_schema() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let catalog = catalog(&[CREATE_T, ADD_N]);
    let m = migrator(&db, catalog.clone());
    let check = migration_check_query(&catalog, "SchemaMigration");
    let pool = db.pool.clone();

    let count = run_with_auto_migrate(&m, || {
        let pool = pool.clone();
        let check = check.clone();
        async move {
            let mut tx = pool.begin().await.map_err(|e| from_sqlx("guarded", e))?;
            (&mut *tx)
                .execute(check.as_str())
                .await
                .map_err(|e| from_sqlx("guarded", e))?;
            let count: i64 = sqlx::query_scalar("SELECT count(n) FROM t")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| from_sqlx("guarded", e))?;
            tx.commit().await.map_err(|e| from_sqlx("guarded", e))?;
            Ok(count)
        }
    })
    .await
    .unwrap();

    assert_eq!(count, 0);
    assert_eq!(ledger_rows(&db.pool).await.len(), 2);

    db.drop_db().await;
}

#[tokio::test]
async fn test_concurrent_guarded_queries() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let catalog = catalog(&[CREATE_T, ADD_N]);
    let check = migration_check_query(&catalog, "SchemaMigration");

    let run = |m: PgMigrator, id: i32| {
        let pool = db.pool.clone();
        let check = check.clone();
        async move {
            run_with_auto_migrate(&m, || {
                let pool = pool.clone();
                let check = check.clone();
                async move {
                    let mut tx = pool.begin().await.map_err(|e| from_sqlx("guarded", e))?;
                    (&mut *tx)
                        .execute(check.as_str())
                        .await
                        .map_err(|e| from_sqlx("guarded", e))?;
                    sqlx::query("INSERT INTO t (id, n) VALUES ($1, 1)")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| from_sqlx("guarded", e))?;
                    tx.commit().await.map_err(|e| from_sqlx("guarded", e))?;
                    Ok(())
                }
            })
            .await
        }
    };

    let (a, b) = tokio::join!(
        run(migrator(&db, catalog.clone()), 1),
        run(migrator(&db, catalog.clone()), 2)
    );

    // The apply loser only returns once the winner has committed, so its
    // single retry sees a current schema.
    a.unwrap();
    b.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM t WHERE n = 1")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);
    assert_eq!(ledger_rows(&db.pool).await.len(), 2);

    db.drop_db().await;
}

#[tokio::test]
async fn test_fresh_unfinished_entry_exhausts_retries_and_releases_lock() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let config = MigratorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        },
        ..MigratorConfig::default()
    };
    let m = pg_migrator(db.pool.clone(), catalog(&[CREATE_T]), &config);
    m.load_applied_migrations().await.unwrap();
    db.pool
        .execute(r#"INSERT INTO "SchemaMigration" ("migrationName") VALUES ('stuck')"#)
        .await
        .unwrap();

    let err = m.load_applied_migrations().await.unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::RetriesExhausted);
    let cause = err.source_error().expect("last in-progress error kept as source");
    assert_eq!(signal_of(cause), Some(MigrationSignal::InProgress));
    assert_eq!(advisory_locks_held(&db.pool).await, 0);

    // outside the window the entry is treated as abandoned
    db.pool
        .execute(
            r#"UPDATE "SchemaMigration" SET "startedAt" = now() - INTERVAL '1 minute'
               WHERE "migrationName" = 'stuck'"#,
        )
        .await
        .unwrap();
    let outcome = m.apply_pending_migrations(&ApplyOptions::default()).await.unwrap();
    assert_eq!(outcome.newly_applied, vec!["001"]);

    db.drop_db().await;
}

#[tokio::test]
async fn test_ledger_lock_serializes_holders() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let holders = Arc::new(AtomicU32::new(0));

    let hold = |pool: PgPool, holders: Arc<AtomicU32>| async move {
        with_ledger_lock(&pool, DEFAULT_LOCK_ID, move |conn| {
            async move {
                assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0, "lock held twice");
                sqlx::query("SELECT pg_sleep(0.2)")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("hold", e))?;
                holders.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ExError>(())
            }
            .boxed()
        })
        .await
    };

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(
        hold(db.pool.clone(), holders.clone()),
        hold(db.pool.clone(), holders.clone())
    );

    a.unwrap();
    b.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(advisory_locks_held(&db.pool).await, 0);

    db.drop_db().await;
}

#[tokio::test]
async fn test_dropped_ledger_lock_frees_lock() {
    let Some(db) = TestDb::create().await else {
        return;
    };

    let lock = LedgerLock::acquire(&db.pool, DEFAULT_LOCK_ID).await.unwrap();
    drop(lock);

    let again = tokio::time::timeout(
        Duration::from_secs(5),
        LedgerLock::acquire(&db.pool, DEFAULT_LOCK_ID),
    )
    .await
    .expect("lock freed after its session closed")
    .unwrap();
    again.release().await.unwrap();
    assert_eq!(advisory_locks_held(&db.pool).await, 0);

    db.drop_db().await;
}

#[tokio::test]
async fn test_apply_after_concurrent_commit_yields_already_done() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let catalog = catalog(&[CREATE_T, ADD_N]);
    let config = MigratorConfig::default();
    migrator(&db, catalog.clone())
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap();

    let err = PgLedger::new(db.pool.clone(), &config)
        .apply_pending(catalog.as_slice(), &ApplyOptions::default())
        .await
        .unwrap_err();
    assert_eq!(signal_of(&err), Some(MigrationSignal::AlreadyDone));
    assert_eq!(err.migration(), Some("001"));

    let stale = Migrator::new(
        StaleLedger(PgLedger::new(db.pool.clone(), &config)),
        catalog,
        config.retry,
    );
    let outcome = stale
        .apply_pending_migrations(&ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.newly_applied.is_empty());
    assert_eq!(
        ledger_rows(&db.pool).await,
        vec![("001".to_string(), true), ("002".to_string(), true)]
    );

    db.drop_db().await;
}

#[tokio::test]
async fn test_unterminated_statement_before_inline_comment() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let m = migrator(
        &db,
        catalog(&[CREATE_T, ("002", "ALTER TABLE t ADD COLUMN n INT -- widen t")]),
    );

    let outcome = m.apply_pending_migrations(&ApplyOptions::default()).await.unwrap();

    assert_eq!(outcome.newly_applied, vec!["001", "002"]);
    db.pool
        .execute("INSERT INTO t (id, n) VALUES (1, 2)")
        .await
        .unwrap();

    db.drop_db().await;
}

#[tokio::test]
async fn test_long_ledger_name_conflict_constraint_matches_catalog() {
    let Some(db) = TestDb::create().await else {
        return;
    };
    let config = MigratorConfig {
        ledger_table: "l".repeat(50),
        ..MigratorConfig::default()
    };
    let m = pg_migrator(db.pool.clone(), catalog(&[CREATE_T]), &config);
    m.load_applied_migrations().await.unwrap();

    let stored: String = sqlx::query_scalar(
        "SELECT conname::text FROM pg_constraint WHERE contype = 'u' AND conrelid = to_regclass($1)",
    )
    .bind(format!("\"{}\"", config.ledger_table))
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(stored, LedgerSql::new(&config).unique_constraint());

    db.drop_db().await;
}
