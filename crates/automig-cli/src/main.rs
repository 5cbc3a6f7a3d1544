//! automig CLI
//!
//! Command-line interface for applying and inspecting schema migrations

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "automig")]
#[command(about = "automig - Coordinated schema migrations for PostgreSQL", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply every pending migration
    Apply(commands::apply::ApplyArgs),
    /// Show applied and pending migrations
    Status,
    /// Print the MIGRATION_NEEDED detection query for the catalog
    CheckQuery,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = commands::init_logging(&cli.global) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Apply(args) => commands::apply::execute(&cli.global, args).await,
        Commands::Status => commands::status::execute(&cli.global).await,
        Commands::CheckQuery => commands::check::execute(&cli.global),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
