//! # Observability
//!
//! Tracing initialisation plus an optional Prometheus exporter.
//!
//! ## Features
//!
//! - Tracing subscriber (JSON / Pretty / Compact), filtered by `RUST_LOG`
//! - Prometheus metrics endpoint
//! - Frame pipeline metric helpers and in-memory run statistics
//!
//! ## Usage
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     metrics_port: Some(9000),
//!     ..Default::default()
//! })?;
//!
//! observability::record_frame_delivered("Stereo Module", "Depth");
//! ```

pub mod metrics;

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-exports
pub use crate::metrics::{
    record_archive_in_flight, record_callback_duration, record_frame_delivered, record_frame_dropped,
    record_power_transition, DropReason, MetricsSummary, RunningStats, StatsSummary, StreamMetricsAggregator,
    StreamSummary,
};

/// Initialise with defaults: JSON logs at `info`, no exporter
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// Observability settings
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus port (None = disabled)
    pub metrics_port: Option<u16>,
    /// Used when `RUST_LOG` is unset
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => anyhow::bail!("unknown log format '{other}'"),
        }
    }
}

/// Initialise tracing, then the exporter when a port is configured
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    init_tracing(config.log_format, &config.default_log_level)?;
    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        "observability initialised"
    );
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// Fails when a subscriber is already installed.
fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    // sensor callbacks run on transport threads, so JSON records carry the thread
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    installed.context("tracing subscriber already installed")
}

/// Install only the Prometheus exporter, for callers that set up tracing themselves
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener((Ipv4Addr::UNSPECIFIED, port))
        .install()
        .with_context(|| format!("cannot install Prometheus exporter on port {port}"))?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}
