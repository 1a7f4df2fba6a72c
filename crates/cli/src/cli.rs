//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// depthcam - stream depth camera sensors described by a device blueprint
#[derive(Parser, Debug)]
#[command(
    name = "depthcam",
    author,
    version,
    about = "Depth camera sensor streaming over mock transports",
    long_about = "Builds raw and synthetic sensors from a device blueprint, streams them over \n\
                  in-process mock transports and reports per-stream statistics."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DEPTHCAM_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true, env = "DEPTHCAM_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream the device's sensors
    Run(RunArgs),

    /// Validate a blueprint without streaming
    Validate(ValidateArgs),

    /// List the logical profiles every sensor advertises
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the device blueprint (TOML or JSON)
    #[arg(short, long, default_value = "device.toml", env = "DEPTHCAM_CONFIG")]
    pub config: PathBuf,

    /// Stream only these sensors (repeatable; default all)
    #[arg(short, long = "sensor", env = "DEPTHCAM_SENSORS", value_delimiter = ',')]
    pub sensors: Vec<String>,

    /// Override every sensor's frames queue size
    #[arg(long, env = "DEPTHCAM_QUEUE_SIZE", value_parser = clap::value_parser!(u32).range(0..=32))]
    pub queue_size: Option<u32>,

    /// Mock transport frame rate
    #[arg(long, default_value = "30", env = "DEPTHCAM_RATE_HZ")]
    pub rate_hz: f64,

    /// Maximum number of frames to receive (0 = unlimited)
    #[arg(long, default_value = "0", env = "DEPTHCAM_MAX_FRAMES")]
    pub max_frames: u64,

    /// Session timeout in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10", env = "DEPTHCAM_TIMEOUT")]
    pub timeout: u64,

    /// Validate the blueprint and exit without streaming
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DEPTHCAM_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the device blueprint to validate
    #[arg(short, long, default_value = "device.toml", env = "DEPTHCAM_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to the device blueprint
    #[arg(short, long, default_value = "device.toml", env = "DEPTHCAM_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Include debug-tagged profiles
    #[arg(long)]
    pub debug: bool,

    /// Show the raw sensor profiles as well
    #[arg(long)]
    pub raw: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
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
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
