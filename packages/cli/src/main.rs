#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the collision digest job.
//!
//! Without a subcommand the full job runs: fetch the last week of NYC
//! collisions, assign council districts, write the CSV snapshot, and send
//! and save the summary. The other subcommands run single steps against
//! existing files.
//!
//! Uses `indicatif-log-bridge` (via [`collision_digest_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod config;
mod pipeline;

use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};
use collision_digest_spatial::OverlapPolicy;

use crate::config::JobConfig;
use crate::pipeline::RunOptions;

#[derive(Parser)]
#[command(name = "collision_digest", about = "Traffic collision digest job")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Base directory for relative paths (overrides `data_dir` in the config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full job (default)
    Run {
        /// Do not send the summary email
        #[arg(long)]
        skip_email: bool,
        /// Maximum number of records to fetch
        #[arg(long)]
        limit: Option<u64>,
        /// Number of days to look back from today
        #[arg(long)]
        lookback_days: Option<u64>,
    },
    /// Fetch collisions and write the un-annotated snapshot only
    Fetch {
        /// Maximum number of records to fetch
        #[arg(long)]
        limit: Option<u64>,
        /// Number of days to look back from today
        #[arg(long)]
        lookback_days: Option<u64>,
    },
    /// Assign districts to an existing collision CSV
    Assign {
        /// Collision CSV (defaults to the configured snapshot)
        #[arg(long)]
        collisions: Option<PathBuf>,
        /// Boundary CSV or `GeoJSON` file (defaults to the configured file)
        #[arg(long)]
        boundaries: Option<PathBuf>,
        /// Output CSV (defaults to overwriting the collision CSV)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Overlap policy: `first_match`, `smallest_area`, or `reject`
        #[arg(long)]
        policy: Option<OverlapPolicy>,
    },
    /// Print the summary of an existing collision CSV as JSON
    Summarize {
        /// Collision CSV (defaults to the configured snapshot)
        #[arg(long)]
        collisions: Option<PathBuf>,
        /// Boundary file for a per-district breakdown
        #[arg(long)]
        boundaries: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = collision_digest_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = JobConfig::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let command = cli.command.unwrap_or(Commands::Run {
        skip_email: false,
        limit: None,
        lookback_days: None,
    });
    let now = Local::now().fixed_offset();

    match command {
        Commands::Run {
            skip_email,
            limit,
            lookback_days,
        } => {
            apply_fetch_overrides(&mut config, limit, lookback_days);
            pipeline::run(&config, &multi, now, RunOptions { skip_email }).await?;
        }
        Commands::Fetch {
            limit,
            lookback_days,
        } => {
            apply_fetch_overrides(&mut config, limit, lookback_days);
            pipeline::fetch_only(&config, &multi, now).await?;
        }
        Commands::Assign {
            collisions,
            boundaries,
            output,
            policy,
        } => {
            let collisions = collisions.unwrap_or_else(|| config.snapshot_path());
            let boundaries = boundaries.unwrap_or_else(|| config.boundary_path());
            let output = output.unwrap_or_else(|| collisions.clone());
            let policy = policy.unwrap_or(config.districts.overlap_policy);
            pipeline::assign_file(&config, &collisions, &boundaries, &output, policy)?;
            log::info!("Updated data saved with districts to {}", output.display());
        }
        Commands::Summarize {
            collisions,
            boundaries,
        } => {
            let collisions = collisions.unwrap_or_else(|| config.snapshot_path());
            let summary = pipeline::summarize_file(&config, &collisions, boundaries.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn apply_fetch_overrides(config: &mut JobConfig, limit: Option<u64>, lookback_days: Option<u64>) {
    if let Some(limit) = limit {
        config.source.limit = limit;
    }
    if let Some(days) = lookback_days {
        config.source.lookback_days = days;
    }
}
