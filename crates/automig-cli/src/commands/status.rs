//! Report applied and pending migrations

use super::{open_migrator, CommandResult, GlobalArgs};

pub async fn execute(global: &GlobalArgs) -> CommandResult {
    let migrator = open_migrator(global).await?;
    let status = migrator.status().await?;

    println!("Applied: {}", status.applied.len());
    for name in &status.applied {
        println!("  [x] {}", name);
    }
    println!("Pending: {}", status.pending.len());
    for name in &status.pending {
        println!("  [ ] {}", name);
    }
    Ok(())
}
