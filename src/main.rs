//! pairchat - one-to-one real-time chat client
//!
//! The synchronization core lives in `chat`; this binary drives it from the
//! terminal against an in-process document store.

mod chat;
mod config;
mod diagnostics;
mod models;
mod remote;
mod repl;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::chat::{bucket, key};
use crate::config::Config;
use crate::models::{parse_timestamp, UserId};

#[derive(Parser)]
#[command(name = "pairchat")]
#[command(about = "One-to-one real-time chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the conversation id for a pair of users
    Key { a: String, b: String },

    /// Show the display bucket of a timestamp (RFC 3339 or epoch millis)
    Bucket {
        timestamp: String,

        /// Reference time instead of the current time
        #[arg(long)]
        now: Option<String>,
    },

    /// Start an interactive chat against an in-process store
    Chat {
        /// Local user id (defaults to `user` from the config file)
        #[arg(short, long)]
        user: Option<String>,

        /// Peer to open the conversation with
        #[arg(short, long)]
        peer: String,

        /// Number of past messages to seed the conversation with
        #[arg(long, default_value = "20", value_parser = clap::value_parser!(u16))]
        seed: u16,

        /// Override the configured page size
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Show the configuration, or write the defaults with --init
    Config {
        #[arg(long)]
        init: bool,
    },
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let value = match raw.parse::<i64>() {
        Ok(millis) => serde_json::Value::from(millis),
        Err(_) => serde_json::Value::from(raw),
    };
    parse_timestamp(&value).with_context(|| format!("Invalid timestamp: {}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Key { a, b } => {
            let a = UserId::parse(a).context("Invalid first user id")?;
            let b = UserId::parse(b).context("Invalid second user id")?;
            println!("{}", key::derive(&a, &b));
        }
        Commands::Bucket { timestamp, now } => {
            let ts = parse_time(&timestamp)?;
            let now = match now {
                Some(raw) => parse_time(&raw)?,
                None => Utc::now(),
            };
            let category = bucket::classify(&ts.with_timezone(&Local), &now.with_timezone(&Local));
            println!("{}", category);
        }
        Commands::Chat {
            user,
            peer,
            seed,
            page_size,
        } => {
            let mut config = Config::load().context("Failed to load config")?;
            if let Some(page_size) = page_size {
                config.page_size = page_size;
            }
            config.validate()?;

            let user = user
                .or_else(|| config.user.clone())
                .context("No user given. Pass --user or set `user` in the config file.")?;
            let user = UserId::parse(user).context("Invalid user id")?;
            let peer = UserId::parse(peer).context("Invalid peer id")?;
            anyhow::ensure!(user != peer, "Cannot chat with yourself");

            tracing::info!("Starting chat {} -> {}", user, peer);
            repl::run(config, user, peer, seed.into()).await?;
        }
        Commands::Config { init } => {
            let path = Config::config_path()?;
            let config = if init {
                let config = Config::default();
                config.save().context("Failed to write config")?;
                println!("Wrote defaults to {}", path.display());
                config
            } else {
                Config::load().context("Failed to load config")?
            };
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
        }
    }

    Ok(())
}
