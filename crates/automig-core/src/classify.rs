//! Classification of deliberately raised database signals
//!
//! The database can only report application-level conditions through its
//! generic raised-exception channel (SQLSTATE `P0001`). Every signal this
//! engine raises has the message `automig: <NAME>`, so the signal name is
//! the second whitespace-delimited token. All parsing of that channel is
//! kept in this module.

use std::fmt;
use std::str::FromStr;

use crate::errors::ExError;

/// SQLSTATE of `RAISE EXCEPTION` without an explicit code
pub const RAISE_EXCEPTION_SQLSTATE: &str = "P0001";

/// Leading token of every message raised by this engine
pub const SIGNAL_PREFIX: &str = "automig:";

/// Conditions the database raises on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationSignal {
    /// Another process is inside the bootstrap critical section
    InProgress,
    /// The migration about to be applied is already finished in the ledger
    AlreadyDone,
    /// Reserved for a database-side guard that bounds migration duration
    Timeout,
    /// The running code expects migrations the database has not applied
    Needed,
}

impl MigrationSignal {
    pub const ALL: [MigrationSignal; 4] = [
        MigrationSignal::InProgress,
        MigrationSignal::AlreadyDone,
        MigrationSignal::Timeout,
        MigrationSignal::Needed,
    ];

    /// Wire name of the signal
    pub fn name(&self) -> &'static str {
        match self {
            MigrationSignal::InProgress => "MIGRATION_IN_PROGRESS",
            MigrationSignal::AlreadyDone => "MIGRATION_ALREADY_DONE",
            MigrationSignal::Timeout => "MIGRATION_TIMEOUT",
            MigrationSignal::Needed => "MIGRATION_NEEDED",
        }
    }

    /// Message text carried by the raised exception
    pub fn message(&self) -> String {
        format!("{} {}", SIGNAL_PREFIX, self.name())
    }

    /// PL/pgSQL statement raising this signal
    pub fn raise_statement(&self) -> String {
        format!("RAISE EXCEPTION '{}';", self.message())
    }

    /// Recognize a signal in a raised message
    pub fn parse_message(message: &str) -> Option<Self> {
        message
            .split_whitespace()
            .nth(1)
            .and_then(|token| token.parse().ok())
    }
}

impl fmt::Display for MigrationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MigrationSignal {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MigrationSignal::ALL
            .into_iter()
            .find(|signal| signal.name() == s)
            .ok_or(())
    }
}

/// Outcome of classifying an error
#[derive(Debug)]
pub enum Classified {
    /// A recognized signal; the original error is kept for re-raising
    Signal {
        signal: MigrationSignal,
        error: ExError,
    },
    /// Anything else, returned unchanged
    Unrecognized(ExError),
}

impl Classified {
    /// Give back the original error regardless of classification
    pub fn into_error(self) -> ExError {
        match self {
            Classified::Signal { error, .. } => error,
            Classified::Unrecognized(error) => error,
        }
    }
}

/// Inspect an error without consuming it
///
/// Only raised exceptions (`P0001`) are considered; any other database error
/// is never mistaken for a signal, whatever its message says.
pub fn signal_of(err: &ExError) -> Option<MigrationSignal> {
    if err.db_code() != Some(RAISE_EXCEPTION_SQLSTATE) {
        return None;
    }
    MigrationSignal::parse_message(err.message())
}

/// Classify an error into a signal or hand it back untouched
pub fn classify(err: ExError) -> Classified {
    match signal_of(&err) {
        Some(signal) => Classified::Signal { signal, error: err },
        None => Classified::Unrecognized(err),
    }
}
