//! Runtime auto-migrate guard
//!
//! Wraps arbitrary database work. If the work reports `MIGRATION_NEEDED`
//! (typically via the detection query at the top of its transaction), the
//! pending suffix is applied and the work is run exactly once more.

use std::future::Future;

use crate::backend::LedgerBackend;
use crate::classify::{classify, Classified, MigrationSignal};
use crate::errors::{ExError, ExErrorKind, Result};
use crate::migrator::{ApplyOptions, Migrator};

/// Run `op`, self-healing a stale schema at most once
///
/// A second consecutive `MIGRATION_NEEDED` after catching up is fatal
/// ([`ExErrorKind::SchemaStillStale`]). Every other failure, from `op` or
/// from the apply step, propagates unchanged.
pub async fn run_with_auto_migrate<B, T, F, Fut>(migrator: &Migrator<B>, mut op: F) -> Result<T>
where
    B: LedgerBackend,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let first = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    match classify(first) {
        Classified::Signal {
            signal: MigrationSignal::Needed,
            ..
        } => {}
        other => return Err(other.into_error()),
    }

    tracing::info!(
        signal = MigrationSignal::Needed.name(),
        "schema is behind the running code, applying pending migrations"
    );
    let outcome = migrator
        .apply_pending_migrations(&ApplyOptions::default())
        .await?;
    tracing::debug!(
        applied_len = outcome.newly_applied.len(),
        "retrying guarded operation"
    );

    match op().await {
        Ok(value) => Ok(value),
        Err(err) => match classify(err) {
            Classified::Signal {
                signal: MigrationSignal::Needed,
                error,
            } => Err(ExError::new(ExErrorKind::SchemaStillStale)
                .with_op("run_with_auto_migrate")
                .with_message("migrations still needed after applying the pending suffix")
                .with_source(error)),
            other => Err(other.into_error()),
        },
    }
}
