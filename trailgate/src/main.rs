//! trailgate Server Entry Point

use clap::Parser;
use trailgate::cli::serve::ServeArgs;
use trailgate::cli::{Cli, Commands};
use trailgate::config::LoggingConfig;
use trailgate::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_config = LoggingConfig::from_env();
    let guard = match logging::init(&logging_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let result = match cli.command {
        Some(Commands::Serve(args)) => trailgate::cli::serve::execute(&args, &logging_config).await,
        Some(Commands::Audit(args)) => trailgate::cli::audit::execute(&args).await,
        Some(Commands::ApiKey(args)) => trailgate::cli::apikey::execute(&args).await,
        None => {
            // No subcommand - default to serve
            trailgate::cli::serve::execute(&ServeArgs::from_env(), &logging_config).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        drop(guard);
        std::process::exit(1);
    }
}
