//! derivepass relay server
//!
//! Serves the sync object store, or manages accounts with `add-user`.

use clap::{Parser, Subcommand};
use derivepass_relay::{auth, build_router, RelayConfig, RelayStorage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "derivepass-relay", about = "derivepass sync relay server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (the default)
    Serve,
    /// Create an account; the password is prompted for
    AddUser { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        RelayConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        RelayConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }

    let storage = RelayStorage::open(&cfg.storage_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(storage, &cfg).await,
        Command::AddUser { name } => add_user(&storage, &name),
    }
}

async fn serve(storage: RelayStorage, cfg: &RelayConfig) -> anyhow::Result<()> {
    tracing::info!("Starting derivepass relay on {}", cfg.listen_addr);

    let app = build_router(storage, cfg);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

fn add_user(storage: &RelayStorage, name: &str) -> anyhow::Result<()> {
    let password = rpassword::prompt_password(format!("Password for {}: ", name))?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    auth::create_user(storage, name, &password)?;
    println!("Created user {}", name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
