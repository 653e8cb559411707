use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{ConfigCommand, ObjectCommand, SyncCommand};
use config::Config;
use hoodie_store::{RemoteConfig, SqliteBackend, Store};

#[derive(Parser)]
#[command(name = "hoodie-store")]
#[command(version)]
#[command(about = "Store JSON objects locally and sync them with a remote collection", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Object(ObjectCommand),

    /// Replicate with the remote collection
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hoodie_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Object(cmd)) => {
            let mut store = open_store(&config).await?;
            cmd.run(&mut store).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let store = open_store(&config).await?;
            cmd.run(store, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Store<SqliteBackend>, Box<dyn std::error::Error>> {
    let backend = SqliteBackend::open(&config.database_path.value).await?;
    let remote = RemoteConfig::new(config.base_url.value.clone(), config.identity.value.clone());
    Ok(Store::new(backend, remote))
}
