//! `MIGRATION_NEEDED` detection query
//!
//! Meant to be the first statement of a caller's own transaction: it raises
//! the signal when the ledger is missing, or when any catalog migration is
//! absent or unfinished. Pair it with
//! [`automig_core::run_with_auto_migrate`] to self-heal on first contact.

use automig_core::{Catalog, MigrationSignal};

use crate::sql::{quote_ident, quote_literal, DO_TAG};

/// Build the detection statement for `catalog` against `ledger_table`
pub fn migration_check_query(catalog: &Catalog, ledger_table: &str) -> String {
    let table = quote_ident(ledger_table);
    let names = catalog
        .iter()
        .map(|m| quote_literal(m.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let raise = MigrationSignal::Needed.raise_statement();

    format!(
        r#"DO {tag}
BEGIN
    IF to_regclass({table_literal}) IS NULL THEN
        {raise}
    END IF;
    IF EXISTS (
        SELECT 1
        FROM unnest(ARRAY[{names}]::text[]) AS expected(name)
        LEFT JOIN {table} sm ON sm."migrationName" = expected.name
        WHERE sm."migrationName" IS NULL OR sm."finishedAt" IS NULL
    ) THEN
        {raise}
    END IF;
END
{tag};"#,
        tag = DO_TAG,
        table_literal = quote_literal(&table),
        table = table,
        names = names,
        raise = raise,
    )
}
