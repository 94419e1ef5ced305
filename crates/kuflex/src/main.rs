use clap::Parser;

use kuflex::cli::{Cli, Commands};
use kuflex::config::Config;
use kuflex::orchestrator::Orchestrator;
use kuflex::tracing::{init_tracing, log_dir};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let cli = Cli::parse();

    // Init Tracing
    color_eyre::install()?;
    let _guard = init_tracing(&log_dir(cli.log_dir.as_deref()))?;

    let config = Config::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load configuration: {e:#}");
        e
    })?;
    let orchestrator = Orchestrator::new(config);

    let result = match &cli.command {
        Commands::Install(args) => orchestrator.install(args).await,
        Commands::Uninstall(args) => orchestrator.uninstall(args).await,
        Commands::Attach(args) => orchestrator.attach(args).await,
        Commands::Detach(args) => orchestrator.detach(args).await,
        Commands::Endpoint(args) => orchestrator.endpoint(&args.target).await.map(|endpoint| {
            println!("{endpoint}");
        }),
    };

    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }

    result
}
