//! Show experiment progress.

use anyhow::{Context, Result};
use fleet_orchestrator::config::Config;
use fleet_orchestrator::storage::{SqliteStore, TestCaseStore};

/// Run the status command.
pub async fn run(config: &Config) -> Result<()> {
    let store = SqliteStore::new(&config.storage.database)
        .await
        .context("Failed to open test case store")?;
    let counts = store.status_counts(&config.experiment.name).await?;

    println!("=== experiment {} ===", config.experiment.name);
    println!();
    println!("  TO_START:     {}", counts.to_start);
    println!("  RUNNING:      {}", counts.running);
    println!("  DETECTED:     {}", counts.detected);
    println!("  NOT_DETECTED: {}", counts.not_detected);
    println!("  FAILED:       {}", counts.failed);
    println!();
    println!("  finished {}/{}", counts.finished(), counts.total());
    Ok(())
}
