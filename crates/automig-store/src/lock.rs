//! Ledger lock coordinator
//!
//! A session-level advisory lock held on one pooled connection. The ledger
//! bootstrap transaction runs on that same connection, so its snapshot is
//! taken only after the lock is granted.

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, Postgres};

use automig_core::errors::{ExError, ExErrorKind};

use crate::errors::{from_sqlx, Result};

/// Exclusive hold on the ledger lock
///
/// Dropping the guard without [`LedgerLock::release`] detaches the
/// connection from the pool, which ends the session and with it the lock.
pub struct LedgerLock {
    conn: Option<PoolConnection<Postgres>>,
    lock_id: i64,
}

impl LedgerLock {
    /// Block until the lock is granted
    pub async fn acquire(pool: &PgPool, lock_id: i64) -> Result<Self> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| from_sqlx("ledger_lock_acquire", e))?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(lock_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("ledger_lock_acquire", e))?;

        tracing::debug!(lock_id, "ledger lock acquired");
        Ok(Self {
            conn: Some(conn),
            lock_id,
        })
    }

    /// Connection holding the lock
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn.as_deref_mut().ok_or_else(|| {
            ExError::new(ExErrorKind::Internal)
                .with_op("ledger_lock_conn")
                .with_message("ledger lock already released")
        })
    }

    /// Unlock and return the connection to the pool
    ///
    /// If unlocking fails the connection is discarded instead, which still
    /// frees the lock.
    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        match sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .execute(&mut *conn)
            .await
        {
            Ok(_) => {
                tracing::debug!(lock_id = self.lock_id, "ledger lock released");
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(from_sqlx("ledger_lock_release", e))
            }
        }
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                lock_id = self.lock_id,
                "ledger lock dropped while held, closing its session"
            );
            drop(conn.detach());
        }
    }
}

/// Run `f` on the lock-holding connection, releasing on every exit path
pub async fn with_ledger_lock<T, F>(pool: &PgPool, lock_id: i64, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut lock = LedgerLock::acquire(pool, lock_id).await?;
    let result = f(lock.conn()?).await;

    if let Err(release_err) = lock.release().await {
        // The session was closed, so the lock is gone either way
        tracing::warn!(error = %release_err, "ledger lock release failed");
    }

    result
}
