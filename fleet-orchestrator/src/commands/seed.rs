//! Generate and store test cases.

use anyhow::{Context, Result};
use fleet_orchestrator::config::Config;
use fleet_orchestrator::storage::{SqliteStore, TestCaseStore};

/// Run the seed command.
pub async fn run(config: &Config, images: &str, flags: &str) -> Result<()> {
    let images = fleet_core::parse_images(images)?;
    let selection = fleet_core::parse_selection(flags)?;
    let rows = fleet_core::generate(&config.experiment.name, &images, &selection);

    let store = SqliteStore::new(&config.storage.database)
        .await
        .context("Failed to open test case store")?;
    let inserted = store.bulk_insert(&rows).await?;

    println!(
        "Seeded {} test cases for experiment {} ({} image classes)",
        inserted,
        config.experiment.name,
        images.len()
    );
    Ok(())
}
