//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

use contracts::DeviceBlueprint;
use depthcam_cli::error::CliError;
use depthcam_cli::pipeline::{DeviceRig, Session, SessionConfig};

use crate::cli::RunArgs;

/// Execute the `run` command
pub async fn run_session(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading blueprint");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load blueprint from {}", args.config.display()))?;

    if let Some(queue_size) = args.queue_size {
        info!(queue_size, "Overriding frames queue size from CLI");
        for sensor in &mut blueprint.sensors {
            sensor.frames_queue_size = queue_size;
        }
    }

    info!(
        device = %blueprint.device.name,
        sensors = blueprint.sensors.len(),
        global_time = blueprint.device.global_time,
        "Blueprint loaded"
    );

    if args.dry_run {
        info!("Dry run mode - blueprint is valid, exiting");
        print_blueprint_summary(&blueprint);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!(port = args.metrics_port, "Metrics endpoint available");
    }

    let rig = DeviceRig::from_blueprint(&blueprint).context("Failed to assemble device")?;
    let config = SessionConfig {
        rate_hz: args.rate_hz,
        max_frames: (args.max_frames != 0).then_some(args.max_frames),
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
    };
    let session = Session::new(&rig, &args.sensors, config)?;

    info!("Starting session...");
    let stats = session
        .run(shutdown_signal())
        .await
        .context("Streaming session failed")?;

    info!(
        frames_received = stats.frames_received,
        frames_dropped = stats.frames_dropped(),
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Session completed"
    );
    stats.print_summary();

    info!("depthcam finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print blueprint summary for dry-run mode
fn print_blueprint_summary(blueprint: &DeviceBlueprint) {
    println!("\n=== Blueprint Summary ===\n");
    println!("Device: {}", blueprint.device.name);
    if let Some(ref serial) = blueprint.device.serial {
        println!("  Serial: {serial}");
    }
    println!("  Global time: {}", blueprint.device.global_time);

    println!("\nSensors ({}):", blueprint.sensors.len());
    for sensor in &blueprint.sensors {
        println!(
            "  - {} ({:?}) queue={} modes={} hid_profiles={} converters={}",
            sensor.name,
            sensor.kind,
            sensor.frames_queue_size,
            sensor.physical_profiles.len(),
            sensor.hid_profiles.len(),
            sensor.converters.len()
        );
    }
    println!();
}
