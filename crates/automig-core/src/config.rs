//! Migrator configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! An empty `legacy_table` turns the legacy import off.
//!
//! ```toml
//! ledger_table = "SchemaMigration"
//! legacy_table = "_prisma_migrations"
//! in_progress_window_secs = 10
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 100
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::errors::{ExError, ExErrorKind, Result};
use crate::retry::RetryPolicy;

/// Advisory lock id shared by every process migrating the same database
pub const DEFAULT_LOCK_ID: i64 = 0x6175_746f_6d69_6701;

/// Longest ledger table name whose `_pkey` constraint still fits in 63 bytes
pub const MAX_LEDGER_TABLE_BYTES: usize = 63 - "_pkey".len();

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigratorConfig {
    /// Table holding the migration ledger
    pub ledger_table: String,
    /// Legacy ledger to import finished entries from, if any
    pub legacy_table: Option<String>,
    pub lock_id: i64,
    pub retry: RetryPolicy,
    /// Unfinished ledger entries younger than this block new bootstraps
    pub in_progress_window_secs: u64,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            ledger_table: "SchemaMigration".to_string(),
            legacy_table: Some("_prisma_migrations".to_string()),
            lock_id: DEFAULT_LOCK_ID,
            retry: RetryPolicy::default(),
            in_progress_window_secs: 10,
        }
    }
}

impl MigratorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut config: MigratorConfig = toml::from_str(input).map_err(|e| {
            ExError::new(ExErrorKind::Config)
                .with_op("config_parse")
                .with_message(e.to_string())
        })?;
        config.legacy_table = config.legacy_table.filter(|t| !t.is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Config)
                .with_op("config_load")
                .with_message(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject table names that are not plain identifiers
    pub fn validate(&self) -> Result<()> {
        check_identifier("ledger_table", &self.ledger_table)?;
        if self.ledger_table.len() > MAX_LEDGER_TABLE_BYTES {
            return Err(ExError::new(ExErrorKind::Config)
                .with_op("config_validate")
                .with_message(format!(
                    "ledger_table must be at most {} bytes",
                    MAX_LEDGER_TABLE_BYTES
                )));
        }
        if let Some(legacy) = &self.legacy_table {
            check_identifier("legacy_table", legacy)?;
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ExError::new(ExErrorKind::Config)
                .with_op("config_validate")
                .with_message("retry.base_delay_ms must be positive"));
        }
        Ok(())
    }
}

fn check_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ExError::new(ExErrorKind::Config)
            .with_op("config_validate")
            .with_message(format!(
                "{} must be a plain identifier, got '{}'",
                field, value
            )))
    }
}
