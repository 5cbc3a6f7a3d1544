//! Migration applier
//!
//! ## Apply pipeline (in order):
//! 1. Bootstrap and read the ledger (retried while another process holds
//!    the bootstrap critical section)
//! 2. Check the ledger is a prefix of the catalog (fatal otherwise)
//! 3. Hand the pending suffix to the backend as one serializable transaction
//! 4. Interpret a lost race as "another process is applying the same
//!    migrations" and return an empty result

use std::sync::Arc;
use std::time::Duration;

use automig_core_types::RequestId;

use crate::backend::LedgerBackend;
use crate::catalog::Catalog;
use crate::classify::{classify, signal_of, Classified, MigrationSignal};
use crate::errors::{ExError, ExErrorKind, Result};
use crate::plan::{self, MigrationStatus};
use crate::retry::{retry_on, RetryPolicy};
use crate::{log_op_end, log_op_error, log_op_start};

/// Caller-supplied knobs for one apply run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Sleep inside the apply transaction before committing
    ///
    /// Diagnostic only: widens the race window in concurrency tests.
    pub artificial_delay: Option<Duration>,
}

/// Result of an apply run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Migrations committed by this run, in catalog order
    pub newly_applied: Vec<String>,
}

/// Coordinates a catalog against a ledger backend
pub struct Migrator<B> {
    backend: B,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl<B: LedgerBackend> Migrator<B> {
    pub fn new(backend: B, catalog: Arc<Catalog>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            catalog,
            retry,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bootstrap the ledger and return finished names in start order
    ///
    /// `MIGRATION_IN_PROGRESS` is retried with backoff; exhausting the
    /// budget yields [`ExErrorKind::RetriesExhausted`].
    pub async fn load_applied_migrations(&self) -> Result<Vec<String>> {
        retry_on(
            &self.retry,
            MigrationSignal::InProgress.name(),
            |err| signal_of(err) == Some(MigrationSignal::InProgress),
            || self.backend.load_applied_names(),
        )
        .await
    }

    /// Apply every catalog entry after the ledger's finished prefix
    pub async fn apply_pending_migrations(&self, options: &ApplyOptions) -> Result<ApplyOutcome> {
        let request_id = RequestId::new();
        log_op_start!(
            "apply_pending_migrations",
            request_id = request_id.as_str(),
            catalog_len = self.catalog.len()
        );
        let start = std::time::Instant::now();

        let outcome = self
            .apply_pending_migrations_impl(options)
            .await
            .map_err(|e| {
                let e = e.with_request_id(request_id.clone());
                log_op_error!(
                    "apply_pending_migrations",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    request_id = request_id.as_str()
                );
                e
            })?;

        log_op_end!(
            "apply_pending_migrations",
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = request_id.as_str(),
            applied_len = outcome.newly_applied.len()
        );

        Ok(outcome)
    }

    async fn apply_pending_migrations_impl(&self, options: &ApplyOptions) -> Result<ApplyOutcome> {
        let applied = self.load_applied_migrations().await?;
        let pending = plan::pending_suffix(&self.catalog, &applied)?;

        if pending.is_empty() {
            tracing::debug!(applied_len = applied.len(), "ledger matches catalog");
            return Ok(ApplyOutcome::default());
        }

        tracing::info!(
            applied_len = applied.len(),
            pending_len = pending.len(),
            first_pending = pending[0].name(),
            "applying pending migrations"
        );

        match self.backend.apply_pending(pending, options).await {
            Ok(()) => Ok(ApplyOutcome {
                newly_applied: pending.iter().map(|m| m.name().to_string()).collect(),
            }),
            Err(err) => yield_to_concurrent_applier(err),
        }
    }

    /// Applied and pending names without changing anything beyond bootstrap
    pub async fn status(&self) -> Result<MigrationStatus> {
        let applied = self.load_applied_migrations().await?;
        plan::status(&self.catalog, applied)
    }
}

/// Decide whether a failed apply lost a race or genuinely failed
///
/// The loser never retries: the winner's transaction is still in flight and
/// a retry would most likely conflict again.
fn yield_to_concurrent_applier(err: ExError) -> Result<ApplyOutcome> {
    if err.kind() == ExErrorKind::SerializationConflict {
        tracing::info!(
            db_code = err.db_code().unwrap_or_default(),
            "concurrent applier won the race, yielding"
        );
        return Ok(ApplyOutcome::default());
    }

    match classify(err) {
        Classified::Signal {
            signal: MigrationSignal::AlreadyDone,
            error,
        } => {
            tracing::info!(
                migration = error.migration().unwrap_or_default(),
                "migration already finished by another process, yielding"
            );
            Ok(ApplyOutcome::default())
        }
        Classified::Signal {
            signal: MigrationSignal::Timeout,
            error,
        } => {
            let mut fatal = ExError::new(ExErrorKind::MigrationTimeout)
                .with_op("apply_pending_migrations")
                .with_message("database reported the migration overran its window");
            if let Some(name) = error.migration() {
                fatal = fatal.with_migration(name);
            }
            Err(fatal.with_source(error))
        }
        other => Err(other.into_error()),
    }
}
