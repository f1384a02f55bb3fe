use anyhow::Context;
use clap::Parser;
use goalwatch::cli::{Cli, Commands};
use goalwatch::config::AppConfig;

mod main_runtime;

use main_runtime::{check_config, init_logging, init_logging_simple, run_service, show_status};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    if let Some(dir) = &cli.state_dir {
        config.storage.state_dir = dir.clone();
    }

    match cli.command() {
        Commands::Run { once } => {
            let _guard = init_logging(&config.logging);
            run_service(config, once)
                .await
                .context(if once { "single cycle failed" } else { "watcher failed" })?;
        }
        Commands::Status => {
            init_logging_simple();
            show_status(&config).await.context("reading tracking state")?;
        }
        Commands::CheckConfig => {
            init_logging_simple();
            check_config(&config)?;
        }
    }

    Ok(())
}
