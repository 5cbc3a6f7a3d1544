//! Migration catalog
//!
//! The catalog is the ordered list of migrations the running build expects
//! to have been applied. It is fixed at build/deploy time and is the single
//! source of truth for which migrations exist and in what order.
//!
//! A migration body is opaque SQL split into statement groups by
//! [`SPLIT_STATEMENT_SENTINEL`]. A group that mentions
//! [`SINGLE_STATEMENT_SENTINEL`] (normally inside a `--` comment) runs as a
//! standalone statement; every other group is wrapped in an anonymous
//! procedural block so it may use block-level control flow.

use std::path::Path;

use crate::errors::CatalogError;

/// Separates independent statement groups inside a migration body
pub const SPLIT_STATEMENT_SENTINEL: &str = "SPLIT_STATEMENT_SENTINEL";

/// Marks a group that must run verbatim rather than inside a `DO` block
pub const SINGLE_STATEMENT_SENTINEL: &str = "SINGLE_STATEMENT_SENTINEL";

/// How a statement group is handed to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run verbatim as its own statement
    Standalone,
    /// Run inside an anonymous procedural block
    Wrapped,
}

/// One group of SQL statements within a migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementGroup {
    pub sql: String,
    pub mode: ExecutionMode,
}

/// A named, immutable migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDescriptor {
    name: String,
    groups: Vec<StatementGroup>,
}

impl MigrationDescriptor {
    /// Build a descriptor from a raw SQL body using the sentinel conventions
    pub fn parse(name: impl Into<String>, body: &str) -> Self {
        let groups = body
            .split(SPLIT_STATEMENT_SENTINEL)
            .filter(|group| !group.trim().is_empty())
            .map(|group| StatementGroup {
                sql: group.to_string(),
                mode: if group.contains(SINGLE_STATEMENT_SENTINEL) {
                    ExecutionMode::Standalone
                } else {
                    ExecutionMode::Wrapped
                },
            })
            .collect();

        Self {
            name: name.into(),
            groups,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[StatementGroup] {
        &self.groups
    }
}

/// Ordered, validated list of migrations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    migrations: Vec<MigrationDescriptor>,
}

impl Catalog {
    /// Create a catalog, keeping the given order
    ///
    /// Rejects empty and duplicate names.
    pub fn new(migrations: Vec<MigrationDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for migration in &migrations {
            if migration.name().trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if !seen.insert(migration.name()) {
                return Err(CatalogError::DuplicateName {
                    name: migration.name().to_string(),
                });
            }
        }
        Ok(Self { migrations })
    }

    /// Load a catalog from a directory of migration folders
    ///
    /// Every sub-directory holding at least one `*.sql` file is one
    /// migration named after the directory. Its SQL files are read in name
    /// order and joined as separate statement groups. Migrations are sorted
    /// by name.
    pub fn from_dir(dir: &Path) -> Result<Self, CatalogError> {
        let unreadable = |path: &Path, err: std::io::Error| CatalogError::Unreadable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        };

        let mut folders: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| unreadable(dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        let mut migrations = Vec::new();
        for folder in folders {
            let name = folder
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CatalogError::NonUtf8Name {
                    path: folder.clone(),
                })?
                .to_string();

            let mut sql_files: Vec<_> = std::fs::read_dir(&folder)
                .map_err(|e| unreadable(&folder, e))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && p.extension().map(|ext| ext == "sql").unwrap_or(false))
                .collect();
            if sql_files.is_empty() {
                continue;
            }
            sql_files.sort();

            let mut bodies = Vec::with_capacity(sql_files.len());
            for file in &sql_files {
                bodies.push(std::fs::read_to_string(file).map_err(|e| unreadable(file, e))?);
            }
            let body = bodies.join(&format!("\n-- {}\n", SPLIT_STATEMENT_SENTINEL));

            migrations.push(MigrationDescriptor::parse(name, &body));
        }

        Self::new(migrations)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MigrationDescriptor> {
        self.migrations.get(index)
    }

    pub fn as_slice(&self) -> &[MigrationDescriptor] {
        &self.migrations
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationDescriptor> {
        self.migrations.iter()
    }

    /// Migration names in catalog order
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }
}
