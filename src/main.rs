use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use amity::config::Config;
use amity::db::init_db;
use commands::{AccountCommand, GitCommand, SyncCommand};

#[derive(Parser)]
#[command(name = "amity")]
#[command(version)]
#[command(about = "A personal relationship management backend", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage CalDAV/CardDAV accounts
    Account(AccountCommand),

    /// Manage git markdown sync
    Git(GitCommand),

    /// Run synchronization or show its status
    Sync(SyncCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amity=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
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
        Some(Commands::Account(cmd)) => {
            let pool = init_db(Some(config.database_path.clone())).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Git(cmd)) => {
            let pool = init_db(Some(config.database_path.clone())).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(Some(config.database_path.clone())).await?;
            cmd.run(&pool, &config).await?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
