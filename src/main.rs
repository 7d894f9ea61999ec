use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchr::cli::{Cli, Commands};
use batchr::error::{BatchrError, EXIT_FATAL};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "batchr=debug" } else { "batchr=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Run(args) => batchr::cli::run(args).await,
        Commands::Pull { config, output } => batchr::cli::pull(config, output).await,
        Commands::Info { graph, weights } => batchr::cli::info(graph, weights).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<BatchrError>())
                .map(BatchrError::exit_code)
                .unwrap_or(EXIT_FATAL);
            ExitCode::from(code)
        }
    }
}
