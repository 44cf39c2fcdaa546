//! # dm-cli
//!
//! Command-line driver for dmsync direct messaging.
//!
//! ## Commands
//!
//! - `init`: Create a local identity and register its display name
//! - `users`: List registered users
//! - `send`: Send a message
//! - `history`: Print a conversation without marking it read
//! - `inbox`: Print one row per conversation, most recent first
//! - `open`: Print a conversation and mark it read
//! - `unread`: Print the unread count
//! - `watch`: Keep the inbox and unread count on screen
//!
//! ## Example
//!
//! ```bash
//! # Two identities sharing one database
//! dm-cli --data-dir ./alice --database ./dm.db init --name alice
//! dm-cli --data-dir ./bob --database ./dm.db init --name bob
//!
//! dm-cli --data-dir ./alice --database ./dm.db send --to bob "hi bob"
//! dm-cli --data-dir ./bob --database ./dm.db unread
//! dm-cli --data-dir ./bob --database ./dm.db open alice
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{history, inbox, init, open, send, unread, users, watch, Account};

/// Command-line driver for dmsync direct messaging.
#[derive(Parser, Debug)]
#[command(name = "dm-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the local identity
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// SQLite database shared by everyone chatting (default: <data-dir>/dmsync.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a local identity
    Init {
        /// Display name shown to other users
        #[arg(long, short)]
        name: String,
    },

    /// List registered users
    Users,

    /// Send a message
    Send {
        /// Recipient display name or user id
        #[arg(long, short)]
        to: String,

        /// Message text
        message: String,
    },

    /// Print a conversation without marking it read
    History {
        /// Peer display name or user id
        with: String,
    },

    /// Print the inbox
    Inbox,

    /// Print a conversation and mark it read
    Open {
        /// Peer display name or user id
        with: String,
    },

    /// Print the number of unread messages
    Unread,

    /// Keep the inbox on screen, refreshing until Ctrl-C
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value = "2")]
        interval: u64,

        /// Stop after this many refreshes
        #[arg(long)]
        polls: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;

    let database = config::database_path(&data_dir, cli.database);
    let json = cli.json;

    let (data_dir, database) = (data_dir.as_path(), database.as_path());
    match cli.command {
        Commands::Init { name } => init::run(data_dir, database, &name).await?,
        Commands::Users => users::run(&Account::open(data_dir, database).await?, json).await?,
        Commands::Send { to, message } => {
            let account = Account::open(data_dir, database).await?;
            send::run(&account, &to, &message, json).await?
        }
        Commands::History { with } => {
            let account = Account::open(data_dir, database).await?;
            history::run(&account, &with, json).await?
        }
        Commands::Inbox => inbox::run(&Account::open(data_dir, database).await?, json).await?,
        Commands::Open { with } => {
            let account = Account::open(data_dir, database).await?;
            open::run(&account, &with, json).await?
        }
        Commands::Unread => unread::run(&Account::open(data_dir, database).await?, json).await?,
        Commands::Watch { interval, polls } => {
            let account = Account::open(data_dir, database).await?;
            watch::run(&account, Duration::from_secs(interval), polls, json).await?
        }
    }

    Ok(())
}

/// Get the default data directory for dm-cli.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "dmsync", "dm-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
