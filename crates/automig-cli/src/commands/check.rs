//! Print the detection query for embedding in application transactions

use automig_store::migration_check_query;

use super::{load_catalog, load_config, CommandResult, GlobalArgs};

pub fn execute(global: &GlobalArgs) -> CommandResult {
    let config = load_config(global)?;
    let catalog = load_catalog(global)?;

    println!("{}", migration_check_query(&catalog, &config.ledger_table));
    Ok(())
}
