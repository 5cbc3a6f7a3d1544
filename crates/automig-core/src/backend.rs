//! Storage seam between the coordination logic and a concrete database

use async_trait::async_trait;

use crate::catalog::MigrationDescriptor;
use crate::errors::Result;
use crate::migrator::ApplyOptions;

/// A database able to host the migration ledger
///
/// Implementations own locking and transactions. The contract each method
/// must honor is spelled out below; [`crate::Migrator`] relies on it.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Bootstrap the ledger and return finished migration names
    ///
    /// Runs under the exclusive ledger lock: creates the ledger if absent,
    /// imports legacy history, and refuses with the `MIGRATION_IN_PROGRESS`
    /// signal while another process has a fresh unfinished entry. Names are
    /// ordered by start time.
    async fn load_applied_names(&self) -> Result<Vec<String>>;

    /// Apply `pending` in order inside one serializable transaction
    ///
    /// Each migration is recorded as started, its statement groups run, and
    /// it is marked finished. Losing a race to a concurrent applier must
    /// surface as [`crate::ExErrorKind::SerializationConflict`] or the
    /// `MIGRATION_ALREADY_DONE` signal, with nothing committed.
    async fn apply_pending(
        &self,
        pending: &[MigrationDescriptor],
        options: &ApplyOptions,
    ) -> Result<()>;
}

#[async_trait]
impl<B: LedgerBackend + ?Sized> LedgerBackend for std::sync::Arc<B> {
    async fn load_applied_names(&self) -> Result<Vec<String>> {
        (**self).load_applied_names().await
    }

    async fn apply_pending(
        &self,
        pending: &[MigrationDescriptor],
        options: &ApplyOptions,
    ) -> Result<()> {
        (**self).apply_pending(pending, options).await
    }
}
