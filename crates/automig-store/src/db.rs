//! Database connection management
//!
//! Provides utilities for opening PostgreSQL connection pools

use std::time::Duration;

use automig_core_types::Sensitive;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::errors::{from_sqlx, Result};

/// Pool sizing for a migrator process
///
/// Bootstrap pins one connection for the advisory lock while the apply
/// transaction needs another, so two is the useful minimum.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Open a pool against the given database URL
pub async fn connect(url: &Sensitive<String>) -> Result<PgPool> {
    connect_with(url, DEFAULT_MAX_CONNECTIONS).await
}

/// Open a pool with an explicit connection cap
pub async fn connect_with(url: &Sensitive<String>, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(2))
        .acquire_timeout(Duration::from_secs(30))
        .connect(url.expose())
        .await
        .map_err(|e| from_sqlx("connect", e))
}
