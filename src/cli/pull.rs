//! Provision model artifacts

use std::path::PathBuf;

use anyhow::Result;

use crate::provision::Provisioner;

/// Fetch graph, weights and labels into the artifact directory
pub async fn pull(config: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut config = super::load_config(config.as_deref())?;
    if let Some(dir) = output {
        config.artifacts.dir = dir;
    }
    config.validate_artifacts()?;

    println!("Artifact directory: {}", config.artifacts.dir.display());

    let provisioner = Provisioner::new(&config.artifacts.dir);
    let artifacts =
        tokio::task::spawn_blocking(move || provisioner.fetch_all(&config.artifacts)).await??;

    println!("  graph:   {}", artifacts.graph.display());
    println!("  weights: {}", artifacts.weights.display());
    println!("  labels:  {}", artifacts.labels.display());
    Ok(())
}
