//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tlsync - time-indexed buffer pools with multi-producer synchronization
#[derive(Parser, Debug)]
#[command(
    name = "tlsync",
    author,
    version,
    about = "Time-indexed buffer pools with multi-producer synchronization",
    long_about = "Runs bounded, timestamp-keyed buffer pools fed by simulated producers.\n\n\
                  A synchronizer matches the inputs around a common reference time, \n\
                  fuses them sub-slot by sub-slot and publishes into an output timeline."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TLSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TLSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the synchronization pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "pipeline.toml",
        env = "TLSYNC_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the synchronizer timer rate in Hz (0 = sync on every push)
    #[arg(long, env = "TLSYNC_FRAMERATE")]
    pub framerate: Option<f64>,

    /// Override the spill directory of the spill manager
    #[arg(long, env = "TLSYNC_SPILL_DIR")]
    pub spill_dir: Option<PathBuf>,

    /// Maximum number of published frames (0 = unlimited)
    #[arg(long, default_value = "0", env = "TLSYNC_MAX_FRAMES")]
    pub max_frames: u64,

    /// Pipeline timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TLSYNC_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Capacity of the sync outcome queue
    #[arg(long, default_value = "100", env = "TLSYNC_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Prometheus exporter port (0 = disabled)
    #[arg(long, default_value = "0", env = "TLSYNC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show timeline layouts and producers
    #[arg(long)]
    pub timelines: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

impl Cli {
    /// Logging setup selected by `-v` / `-q` / `--log-format`
    pub fn observability(&self) -> observability::ObservabilityConfig {
        observability::ObservabilityConfig::from_verbosity(
            self.verbose,
            self.quiet,
            self.log_format.clone().into(),
        )
    }
}
