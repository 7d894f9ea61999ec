//! CLI commands
//!
//! `run` drives the whole batch pipeline, `pull` only provisions artifacts
//! and `info` summarises a graph description.

mod info;
mod pull;
mod run;

pub use info::info;
pub use pull::pull;
pub use run::{apply_overrides, report, run, run_pipeline, RunArgs};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::BatchrConfig;
use crate::error::BatchrResult;

/// Batchr - batch image-classification inference driver
#[derive(Parser)]
#[command(name = "batchr")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify one batch of images
    Run(RunArgs),

    /// Fetch the graph, weights and labels without running
    Pull {
        /// Configuration file (YAML or JSON)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Artifact directory (overrides artifacts.dir)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show a graph description and its weights
    Info {
        /// Graph description (JSON)
        graph: PathBuf,

        /// Weights blob (safetensors)
        #[arg(long)]
        weights: Option<PathBuf>,
    },
}

/// Load the configuration file if one was given, defaults otherwise
pub fn load_config(path: Option<&std::path::Path>) -> BatchrResult<BatchrConfig> {
    match path {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            BatchrConfig::from_file(path)
        }
        None => Ok(BatchrConfig::default()),
    }
}
