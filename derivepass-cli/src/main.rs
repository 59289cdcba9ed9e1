use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// derivepass - deterministic site passwords from one master password
#[derive(Parser)]
#[command(name = "derivepass")]
#[command(about = "Deterministic site passwords from one master password", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record database override
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Password option overrides; unset fields come from the site's preset
#[derive(Args, Debug, Default)]
struct OptionArgs {
    /// Allowed characters as a range expression, e.g. `a-z0-9`
    #[arg(long)]
    allowed: Option<String>,

    /// Characters of which at least one must appear
    #[arg(long)]
    required: Option<String>,

    /// Password length
    #[arg(long)]
    length: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive a password without storing the site
    Derive {
        domain: String,
        login: String,
        #[arg(long, default_value_t = 1)]
        revision: u32,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Store a site
    Add {
        domain: String,
        login: String,
        #[arg(long, default_value_t = 1)]
        revision: u32,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// List stored sites
    List,

    /// Change a stored site
    Edit {
        id: String,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        revision: Option<u32>,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Remove a stored site
    Remove { id: String },

    /// Print the password of a stored site
    Password { id: String },

    /// List the built-in site presets
    Presets,

    /// Link this device to a sync relay
    Link {
        host: String,
        username: String,
    },

    /// Unlink this device from its relay
    Unlink,

    /// Run one sync cycle
    Sync,

    /// Show sync status
    Status,

    /// Keep syncing in the foreground until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = commands::Context::new(cli.config, cli.store)?;

    match cli.command {
        Commands::Derive {
            domain,
            login,
            revision,
            options,
        } => commands::derive(domain, login, revision, options).await,
        Commands::Add {
            domain,
            login,
            revision,
            options,
        } => commands::add(&ctx, domain, login, revision, options).await,
        Commands::List => commands::list(&ctx).await,
        Commands::Edit {
            id,
            login,
            revision,
            options,
        } => commands::edit(&ctx, &id, login, revision, options).await,
        Commands::Remove { id } => commands::remove(&ctx, &id).await,
        Commands::Password { id } => commands::password(&ctx, &id).await,
        Commands::Presets => {
            commands::presets();
            Ok(())
        }
        Commands::Link { host, username } => commands::link(&ctx, &host, &username).await,
        Commands::Unlink => commands::unlink(&ctx).await,
        Commands::Sync => commands::sync(&ctx).await,
        Commands::Status => commands::status(&ctx),
        Commands::Watch => commands::watch(&ctx).await,
    }
}
