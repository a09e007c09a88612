mod app;
mod bot;
mod config;
mod keyboards;

use app::App;
use clap::{Parser, Subcommand};
use config::ParleyConfig;
use parley_agent::ProviderEntry;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", about = "Parley — one chat, several language models")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot
    Serve,
    /// List configured providers
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = ParleyConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve => {
            info!(config = %cli.config.display(), "Starting Parley");
            let (app, events, tasks) = App::build(config).await?;
            let result = bot::run(app, events).await;
            tasks.abort();
            result?;
            info!("Parley stopped");
        }
        Commands::Providers => {
            println!("Configured providers:");
            for model in &config.providers {
                let entry = ProviderEntry::from_config(model)?;
                let marker = if entry.id == config.default_provider {
                    " (default)"
                } else {
                    ""
                };
                println!("  {} — {}{}", entry.id, entry.label(), marker);
                let chain = model.model_chain();
                if chain.len() > 1 {
                    println!("    Fallbacks: {}", chain[1..].join(", "));
                }
            }
            println!("\nTotal: {} provider(s)", config.providers.len());
        }
    }

    Ok(())
}
