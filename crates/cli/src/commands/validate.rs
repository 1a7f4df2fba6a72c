//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DeviceBlueprint, SensorKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<BlueprintSummary>,
}

#[derive(Serialize)]
struct BlueprintSummary {
    version: String,
    device: String,
    sensor_count: usize,
    physical_profile_count: usize,
    hid_profile_count: usize,
    converter_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating blueprint");

    let result = validate_blueprint(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Blueprint validation failed")
    }
}

fn validate_blueprint(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(BlueprintSummary {
                    version: format!("{:?}", blueprint.version),
                    device: blueprint.device.name.clone(),
                    sensor_count: blueprint.sensors.len(),
                    physical_profile_count: blueprint.sensors.iter().map(|s| s.physical_profiles.len()).sum(),
                    hid_profile_count: blueprint.sensors.iter().map(|s| s.hid_profiles.len()).sum(),
                    converter_count: blueprint.sensors.iter().map(|s| s.converters.len()).sum(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(blueprint: &DeviceBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sensors.is_empty() {
        warnings.push("No sensors declared - nothing to stream".to_string());
    }

    for sensor in &blueprint.sensors {
        if sensor.kind == SensorKind::Uvc && sensor.physical_profiles.is_empty() {
            warnings.push(format!("Sensor '{}' declares no physical profiles", sensor.name));
        }
        for code in sensor.fourcc_formats.keys() {
            if !sensor.fourcc_streams.contains_key(code) {
                warnings.push(format!(
                    "Sensor '{}': fourcc '{code}' has a format but no stream mapping",
                    sensor.name
                ));
            }
        }
        if sensor.converters.is_empty() {
            warnings.push(format!(
                "Sensor '{}' has no converters - every stream is passed through unchanged",
                sensor.name
            ));
        }
        if sensor.frames_queue_size == 0 {
            warnings.push(format!("Sensor '{}' has frames_queue_size = 0", sensor.name));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Blueprint is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Device: {}", summary.device);
            println!("  Sensors: {}", summary.sensor_count);
            println!("  Physical profiles: {}", summary.physical_profile_count);
            println!("  HID profiles: {}", summary.hid_profile_count);
            println!("  Converters: {}", summary.converter_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Blueprint is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}
