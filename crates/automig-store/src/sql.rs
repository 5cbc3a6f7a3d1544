//! SQL text for the ledger and the apply transaction
//!
//! Identifiers come from validated configuration and migration names are
//! embedded as quoted literals, since `DO` blocks cannot take parameters.

use automig_core::{MigrationSignal, MigratorConfig};

/// Dollar-quote tag used for every generated `DO` block
pub const DO_TAG: &str = "$automig$";

/// Quote an identifier for PostgreSQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for PostgreSQL
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Longest identifier PostgreSQL stores; longer names are truncated
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Truncate an identifier the way the server does
pub fn truncate_ident(ident: &str) -> &str {
    if ident.len() <= MAX_IDENTIFIER_BYTES {
        return ident;
    }
    let mut end = MAX_IDENTIFIER_BYTES;
    while !ident.is_char_boundary(end) {
        end -= 1;
    }
    &ident[..end]
}

/// Code part of a line, up to a `--` comment outside string literals
fn strip_line_comment(line: &str) -> &str {
    let mut in_literal = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_literal = !in_literal,
            b'-' if !in_literal && bytes.get(i + 1) == Some(&b'-') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Wrap statements in an anonymous PL/pgSQL block
///
/// Trailing blank and `--` comment lines are dropped. An unterminated last
/// statement gets a `;` on a line of its own, so a trailing inline comment
/// cannot swallow it. Returns `None` for a body with no statements.
pub fn wrap_in_do_block(body: &str) -> Option<String> {
    let mut lines: Vec<&str> = body.lines().collect();
    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            lines.pop();
        } else {
            break;
        }
    }
    if lines.iter().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with("--")
    }) {
        return None;
    }

    let mut statements = lines.join("\n");
    let terminated = lines
        .last()
        .map(|last| strip_line_comment(last).trim_end().ends_with(';'))
        .unwrap_or(false);
    if !terminated {
        statements.push_str("\n;");
    }
    Some(format!("DO {tag}\nBEGIN\n{statements}\nEND\n{tag};", tag = DO_TAG))
}

fn do_block(body: &str) -> String {
    format!("DO {tag}\nBEGIN\n{body}\nEND\n{tag};", tag = DO_TAG)
}

/// Statement text for one configured ledger
#[derive(Debug, Clone)]
pub struct LedgerSql {
    table_name: String,
    table: String,
    legacy_table_name: Option<String>,
    in_progress_window_secs: u64,
}

impl LedgerSql {
    pub fn new(config: &MigratorConfig) -> Self {
        Self {
            table_name: config.ledger_table.clone(),
            table: quote_ident(&config.ledger_table),
            legacy_table_name: config.legacy_table.clone(),
            in_progress_window_secs: config.in_progress_window_secs,
        }
    }

    /// Quoted ledger table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the unique constraint on `migrationName`, as stored
    pub fn unique_constraint(&self) -> String {
        truncate_ident(&format!("{}_migrationName_key", self.table_name)).to_string()
    }

    pub fn create_table(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
    "id" TEXT NOT NULL DEFAULT gen_random_uuid()::text,
    "startedAt" TIMESTAMP(3) NOT NULL DEFAULT clock_timestamp(),
    "finishedAt" TIMESTAMP(3),
    "migrationName" TEXT NOT NULL,
    CONSTRAINT {pkey} PRIMARY KEY ("id"),
    CONSTRAINT {unique} UNIQUE ("migrationName")
)"#,
            table = self.table,
            pkey = quote_ident(truncate_ident(&format!("{}_pkey", self.table_name))),
            unique = quote_ident(&self.unique_constraint()),
        )
    }

    /// Copy finished legacy rows not yet present by name
    ///
    /// A no-op when the legacy table is absent from the current schema.
    pub fn legacy_import(&self) -> Option<String> {
        let legacy_name = self.legacy_table_name.as_ref()?;
        let legacy = quote_ident(legacy_name);
        Some(do_block(&format!(
            r#"IF to_regclass(format('%I.%I', current_schema(), {legacy_literal})) IS NOT NULL THEN
    INSERT INTO {table} ("migrationName", "startedAt", "finishedAt")
    SELECT DISTINCT ON (l.migration_name) l.migration_name, l.started_at, l.finished_at
    FROM {legacy} l
    WHERE l.finished_at IS NOT NULL
      AND NOT EXISTS (
        SELECT 1 FROM {table} sm WHERE sm."migrationName" = l.migration_name
      )
    ORDER BY l.migration_name, l.finished_at DESC;
END IF;"#,
            legacy_literal = quote_literal(legacy_name),
            table = self.table,
            legacy = legacy,
        )))
    }

    /// Raise `MIGRATION_IN_PROGRESS` while a fresh unfinished entry exists
    pub fn in_progress_guard(&self) -> String {
        do_block(&format!(
            r#"IF EXISTS (
    SELECT 1 FROM {table}
    WHERE "finishedAt" IS NULL
      AND "startedAt" > (clock_timestamp() - INTERVAL '{secs} seconds')::timestamp
) THEN
    {raise}
END IF;"#,
            table = self.table,
            secs = self.in_progress_window_secs,
            raise = MigrationSignal::InProgress.raise_statement(),
        ))
    }

    pub fn select_finished(&self) -> String {
        format!(
            r#"SELECT "migrationName" FROM {} WHERE "finishedAt" IS NOT NULL ORDER BY "startedAt" ASC"#,
            self.table
        )
    }

    /// Raise `MIGRATION_ALREADY_DONE` if `name` is already finished
    pub fn already_done_guard(&self, name: &str) -> String {
        do_block(&format!(
            r#"IF EXISTS (
    SELECT 1 FROM {table}
    WHERE "migrationName" = {name} AND "finishedAt" IS NOT NULL
) THEN
    {raise}
END IF;"#,
            table = self.table,
            name = quote_literal(name),
            raise = MigrationSignal::AlreadyDone.raise_statement(),
        ))
    }

    /// Record `$1` as started, re-stamping an existing row
    ///
    /// The stamp is kept strictly after every existing `startedAt`, so
    /// migrations applied in one transaction still sort in catalog order.
    pub fn upsert_started(&self) -> String {
        format!(
            r#"INSERT INTO {table} ("migrationName", "startedAt")
SELECT $1, GREATEST(
    clock_timestamp()::timestamp(3),
    MAX("startedAt") + INTERVAL '1 millisecond'
)
FROM {table}
ON CONFLICT ("migrationName") DO UPDATE SET "startedAt" = EXCLUDED."startedAt", "finishedAt" = NULL"#,
            table = self.table
        )
    }

    pub fn mark_finished(&self) -> String {
        format!(
            r#"UPDATE {} SET "finishedAt" = clock_timestamp() WHERE "migrationName" = $1"#,
            self.table
        )
    }
}
