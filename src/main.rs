use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genai_resilience::{telemetry, App, Config, Server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "genai-resilience")]
#[command(about = "Circuit breakers, API key rotation and retry for generative-AI providers")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log filter (e.g. "debug" or "genai_resilience=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the status routes and run the key health monitor (default)
    Serve,
    /// Load and validate the configuration, then list the resolved key ids
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    telemetry::init_tracing(&config.logging).context("Failed to initialize logging")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = App::from_config(config).context("Failed to initialize")?;
            Server::new(app).run().await.context("Server failed")?;
        }
        Command::CheckConfig => {
            let app = App::from_config(config).context("Configuration is invalid")?;
            info!("Configuration is valid");
            for health in app.keys().get_health_status() {
                println!("{}\t{}", health.position, health.key_id);
            }
        }
    }

    Ok(())
}
