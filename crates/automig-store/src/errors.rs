//! Error handling for automig-store
//!
//! Wraps automig-core ExError with sqlx-specific helpers

use automig_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// SQLSTATE for `could not serialize access`
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for `deadlock detected`
pub const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for `duplicate key value violates unique constraint`
pub const UNIQUE_VIOLATION: &str = "23505";

/// Create an ExError from sqlx::Error
///
/// Database errors keep their SQLSTATE and raw server message, which is
/// what signal classification inspects.
pub fn from_sqlx(op: &str, err: sqlx::Error) -> ExError {
    match err {
        sqlx::Error::Database(db) => {
            let mut ex = ExError::new(ExErrorKind::Persistence)
                .with_op(op)
                .with_message(db.message().to_string());
            if let Some(code) = db.code() {
                ex = ex.with_db_code(code.into_owned());
            }
            ex
        }
        sqlx::Error::Io(io) => ExError::new(ExErrorKind::Io)
            .with_op(op)
            .with_message(io.to_string()),
        sqlx::Error::Configuration(cause) => ExError::new(ExErrorKind::Config)
            .with_op(op)
            .with_message(cause.to_string()),
        other => ExError::new(ExErrorKind::Persistence)
            .with_op(op)
            .with_message(other.to_string()),
    }
}

/// Whether a failure of the apply transaction means a concurrent applier won
///
/// Serialization failures and deadlocks qualify, and so does a duplicate
/// ledger row: both transactions tried to record the same migration.
pub fn is_concurrent_apply_conflict(err: &sqlx::Error, ledger_unique_constraint: &str) -> bool {
    let Some(db) = err.as_database_error() else {
        return false;
    };
    match db.code().as_deref() {
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => true,
        Some(UNIQUE_VIOLATION) => db.constraint() == Some(ledger_unique_constraint),
        _ => false,
    }
}

/// Map an apply-transaction failure, flagging lost races
pub fn from_apply_error(op: &str, err: sqlx::Error, ledger_unique_constraint: &str) -> ExError {
    if is_concurrent_apply_conflict(&err, ledger_unique_constraint) {
        let conflict = from_sqlx(op, err);
        let mut mapped = ExError::new(ExErrorKind::SerializationConflict)
            .with_op(op)
            .with_message(conflict.message().to_string());
        if let Some(code) = conflict.db_code() {
            mapped = mapped.with_db_code(code);
        }
        return mapped;
    }
    from_sqlx(op, err)
}
