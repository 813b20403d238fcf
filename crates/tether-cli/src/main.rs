//! # tether
//!
//! Command-line front end for the sync core: replay a captured event
//! stream and print the resulting store state, or print the effective
//! settings.

#![deny(unsafe_code)]

mod replay;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_settings::TetherSettings;

/// tether sync core.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Client-side state sync core")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, overriding the settings file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route a JSONL event capture and print the final store snapshot.
    Replay {
        /// Capture file, one event envelope per line.
        capture: PathBuf,

        /// Print immediately instead of waiting out the grace period.
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the effective settings as JSON.
    Settings,
}

fn load(cli: &Cli) -> Result<TetherSettings> {
    let path = cli.settings.clone().unwrap_or_else(tether_settings::settings_path);
    tether_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        tether_core::logging::init_json_subscriber(level);
    } else {
        tether_core::logging::init_subscriber(level);
    }

    let output = match &cli.command {
        Command::Replay { capture, no_wait } => {
            let events = replay::read_events(capture)?;
            let report = replay::run(&settings, events, !no_wait).await?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Settings => serde_json::to_string_pretty(&settings)?,
    };
    println!("{output}");
    Ok(())
}
