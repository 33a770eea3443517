// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "fullhouse")]
#[command(about = "Depth sensor pipeline with world unprojection and board calibration")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available sensors
    List,

    /// Stream frames and keep the world buffer updated
    Run {
        /// Streaming duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Write the final world buffer as a LAS point cloud
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Use near depth range
        #[arg(long)]
        near: bool,
    },

    /// Find calibration board corners and their world positions
    Calibrate {
        /// Interior corners per row (overrides config)
        #[arg(long)]
        columns: Option<u32>,

        /// Interior corners per column (overrides config)
        #[arg(long)]
        rows: Option<u32>,

        /// Hide the board in the synthetic scene
        #[arg(long)]
        obstructed: bool,

        /// Report file path (default: data dir, timestamped)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=fullhouse=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => cli::list_sensors(),
        Commands::Run {
            duration,
            export,
            near,
        } => cli::run(config, duration, export, near),
        Commands::Calibrate {
            columns,
            rows,
            obstructed,
            output,
        } => cli::calibrate(config, columns, rows, obstructed, output),
        Commands::Config { write } => cli::show_config(&config, cli.config.as_deref(), write),
    }
}
