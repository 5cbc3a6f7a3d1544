//! Ordering invariant between the ledger and the catalog
//!
//! The applied ledger, ordered by start time, must always be a prefix of the
//! catalog. Everything after that prefix is pending.

use crate::catalog::{Catalog, MigrationDescriptor};
use crate::errors::{ExError, ExErrorKind, Result};

/// Applied and pending migration names at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

impl MigrationStatus {
    /// Whether the database matches the catalog exactly
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Return the catalog suffix not yet applied
///
/// Fails with [`ExErrorKind::AppliedOutOfOrder`] when `applied` is longer
/// than the catalog or differs from it at any position.
pub fn pending_suffix<'a>(
    catalog: &'a Catalog,
    applied: &[String],
) -> Result<&'a [MigrationDescriptor]> {
    let expected = catalog.as_slice();

    if applied.len() > expected.len() {
        return Err(ExError::new(ExErrorKind::AppliedOutOfOrder)
            .with_op("pending_suffix")
            .with_migration(applied[expected.len()].clone())
            .with_message(format!(
                "ledger records {} finished migrations but the catalog only has {}",
                applied.len(),
                expected.len()
            )));
    }

    for (position, (name, migration)) in applied.iter().zip(expected).enumerate() {
        if name != migration.name() {
            return Err(ExError::new(ExErrorKind::AppliedOutOfOrder)
                .with_op("pending_suffix")
                .with_migration(name.clone())
                .with_message(format!(
                    "ledger position {} holds '{}' but the catalog expects '{}'",
                    position,
                    name,
                    migration.name()
                )));
        }
    }

    Ok(&expected[applied.len()..])
}

/// Build a [`MigrationStatus`] from the ledger contents
pub fn status(catalog: &Catalog, applied: Vec<String>) -> Result<MigrationStatus> {
    let pending = pending_suffix(catalog, &applied)?
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    Ok(MigrationStatus { applied, pending })
}
