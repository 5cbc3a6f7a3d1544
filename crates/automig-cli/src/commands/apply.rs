//! Apply pending migrations

use std::time::Duration;

use clap::Args;

use automig_core::ApplyOptions;

use super::{open_migrator, CommandResult, GlobalArgs};

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Sleep this long inside the apply transaction before committing
    #[arg(long, hide = true)]
    pub artificial_delay_ms: Option<u64>,
}

pub async fn execute(global: &GlobalArgs, args: ApplyArgs) -> CommandResult {
    let migrator = open_migrator(global).await?;
    let options = ApplyOptions {
        artificial_delay: args.artificial_delay_ms.map(Duration::from_millis),
    };

    let outcome = migrator.apply_pending_migrations(&options).await?;

    if outcome.newly_applied.is_empty() {
        println!("No migrations applied");
    } else {
        println!("Applied {} migration(s):", outcome.newly_applied.len());
        for name in &outcome.newly_applied {
            println!("  {}", name);
        }
    }
    Ok(())
}
