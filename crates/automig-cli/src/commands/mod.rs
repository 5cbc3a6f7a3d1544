//! Subcommands and the arguments they share

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use automig_core::logging_facility::{init, Profile};
use automig_core::{Catalog, ExError, ExErrorKind, MigratorConfig};
use automig_core_types::Sensitive;
use automig_store::{db, pg_migrator, PgMigrator};

pub mod apply;
pub mod check;
pub mod status;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Directory with one sub-directory of `.sql` files per migration
    #[arg(long, global = true, default_value = "migrations")]
    pub migrations_dir: PathBuf,

    /// TOML file with migrator settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Log output: `human` or `json`
    #[arg(long, global = true, default_value = "human")]
    pub log_format: String,
}

pub fn init_logging(global: &GlobalArgs) -> Result<(), ExError> {
    let profile: Profile = global.log_format.parse()?;
    init(profile);
    Ok(())
}

pub fn load_config(global: &GlobalArgs) -> Result<MigratorConfig, ExError> {
    match &global.config {
        Some(path) => MigratorConfig::from_file(path),
        None => Ok(MigratorConfig::default()),
    }
}

pub fn load_catalog(global: &GlobalArgs) -> Result<Arc<Catalog>, ExError> {
    let catalog = Catalog::from_dir(&global.migrations_dir)?;
    tracing::debug!(
        migrations_dir = %global.migrations_dir.display(),
        catalog_len = catalog.len(),
        "catalog loaded"
    );
    Ok(Arc::new(catalog))
}

fn database_url(global: &GlobalArgs) -> Result<Sensitive<String>, ExError> {
    global
        .database_url
        .clone()
        .map(Sensitive::from)
        .ok_or_else(|| {
            ExError::new(ExErrorKind::Config)
                .with_op("database_url")
                .with_message("no database given; pass --database-url or set DATABASE_URL")
        })
}

/// Connect and build a migrator from the shared arguments
pub async fn open_migrator(global: &GlobalArgs) -> Result<PgMigrator, ExError> {
    let config = load_config(global)?;
    let catalog = load_catalog(global)?;
    let pool = db::connect(&database_url(global)?).await?;
    Ok(pg_migrator(pool, catalog, &config))
}
