use automig_core_types::RequestId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// This taxonomy provides a stable, structured classification of every error
/// the migration engine surfaces. Each kind maps to a stable error code that
/// can be used for programmatic handling, tests and log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Catalog/Validation
    InvalidCatalog,
    DuplicateMigration,

    // Ordering
    /// Ledger is not a prefix of the catalog
    AppliedOutOfOrder,

    // Coordination
    /// Transient signal kept recurring past the retry budget
    RetriesExhausted,
    /// Reserved database-side guard reported a migration overran its window
    MigrationTimeout,
    /// MIGRATION_NEEDED was raised again right after catching up
    SchemaStillStale,
    /// Concurrent transaction won the race (serialization failure, deadlock,
    /// or a duplicate ledger row)
    SerializationConflict,

    // Integration/IO
    Io,
    Persistence,
    Config,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidCatalog => "ERR_INVALID_CATALOG",
            ExErrorKind::DuplicateMigration => "ERR_DUPLICATE_MIGRATION",
            ExErrorKind::AppliedOutOfOrder => "ERR_APPLIED_OUT_OF_ORDER",
            ExErrorKind::RetriesExhausted => "ERR_RETRIES_EXHAUSTED",
            ExErrorKind::MigrationTimeout => "ERR_MIGRATION_TIMEOUT",
            ExErrorKind::SchemaStillStale => "ERR_SCHEMA_STILL_STALE",
            ExErrorKind::SerializationConflict => "ERR_SERIALIZATION_CONFLICT",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether this kind must never be retried by any layer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExErrorKind::AppliedOutOfOrder
                | ExErrorKind::RetriesExhausted
                | ExErrorKind::MigrationTimeout
                | ExErrorKind::SchemaStillStale
                | ExErrorKind::InvalidCatalog
                | ExErrorKind::DuplicateMigration
        )
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and the raw
/// database diagnostics (SQLSTATE and message) that signal classification
/// reads.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    migration: Option<String>,
    db_code: Option<String>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            migration: None,
            db_code: None,
            request_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the name of the migration being processed
    pub fn with_migration(mut self, name: impl Into<String>) -> Self {
        self.migration = Some(name.into());
        self
    }

    /// Add the database SQLSTATE that produced this error
    pub fn with_db_code(mut self, code: impl Into<String>) -> Self {
        self.db_code = Some(code.into());
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the migration name context, if any
    pub fn migration(&self) -> Option<&str> {
        self.migration.as_deref()
    }

    /// Get the database SQLSTATE, if the error came from the database
    pub fn db_code(&self) -> Option<&str> {
        self.db_code.as_deref()
    }

    /// Get the request ID context, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(migration) = &self.migration {
            write!(f, " (migration: {})", migration)?;
        }
        if let Some(db_code) = &self.db_code {
            write!(f, " (sqlstate: {})", db_code)?;
        }
        if let Some(source) = &self.source {
            write!(f, "; caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Failures while assembling a migration catalog
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// Migration name is empty or whitespace-only
    #[error("Migration name must not be empty")]
    EmptyName,

    /// Two catalog entries share a name
    #[error("Duplicate migration name in catalog: {name}")]
    DuplicateName { name: String },

    /// Migrations directory could not be read
    #[error("Cannot read migrations directory {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// Directory name is not valid UTF-8 and cannot serve as a migration name
    #[error("Migration directory name is not valid UTF-8: {path}")]
    NonUtf8Name { path: PathBuf },
}

/// Conversion from CatalogError to ExError
impl From<CatalogError> for ExError {
    fn from(err: CatalogError) -> Self {
        match &err {
            CatalogError::EmptyName => ExError::new(ExErrorKind::InvalidCatalog)
                .with_op("catalog_new")
                .with_message(err.to_string()),

            CatalogError::DuplicateName { name } => ExError::new(ExErrorKind::DuplicateMigration)
                .with_op("catalog_new")
                .with_migration(name.clone())
                .with_message(err.to_string()),

            CatalogError::Unreadable { .. } => ExError::new(ExErrorKind::Io)
                .with_op("catalog_from_dir")
                .with_message(err.to_string()),

            CatalogError::NonUtf8Name { .. } => ExError::new(ExErrorKind::InvalidCatalog)
                .with_op("catalog_from_dir")
                .with_message(err.to_string()),
        }
    }
}
