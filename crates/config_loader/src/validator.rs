//! Blueprint validation
//!
//! Rules:
//! - struct-level constraints from the `Validate` derives
//! - sensor names are unique
//! - every fourcc key is exactly 4 ASCII characters
//! - every physical profile fourcc has a format mapping
//! - HID sensors declare at least one HID profile
//! - converter sources refer to a format the sensor produces

use std::collections::{BTreeSet, HashSet};

use ::validator::Validate;
use contracts::{DeviceBlueprint, Format, Result, SensorBlueprint, SensorError, SensorKind};

/// Returns the first violation found
pub fn validate(blueprint: &DeviceBlueprint) -> Result<()> {
    blueprint
        .validate()
        .map_err(|e| SensorError::configuration(format!("invalid blueprint: {e}")))?;
    validate_sensor_names(blueprint)?;
    for sensor in &blueprint.sensors {
        validate_fourccs(sensor)?;
        validate_physical_profiles(sensor)?;
        validate_hid_profiles(sensor)?;
        validate_converters(sensor)?;
    }
    Ok(())
}

fn violation(field: impl AsRef<str>, message: impl AsRef<str>) -> SensorError {
    SensorError::configuration(format!("{}: {}", field.as_ref(), message.as_ref()))
}

fn validate_sensor_names(blueprint: &DeviceBlueprint) -> Result<()> {
    let mut seen = HashSet::new();
    for sensor in &blueprint.sensors {
        if !seen.insert(sensor.name.as_str()) {
            return Err(violation(format!("sensors[name={}]", sensor.name), "duplicate sensor name"));
        }
    }
    Ok(())
}

fn check_fourcc(sensor: &SensorBlueprint, field: &str, code: &str) -> Result<()> {
    if code.len() != 4 || !code.is_ascii() {
        return Err(violation(
            format!("sensors[{}].{field}", sensor.name),
            format!("fourcc '{code}' must be exactly 4 ASCII characters"),
        ));
    }
    Ok(())
}

fn validate_fourccs(sensor: &SensorBlueprint) -> Result<()> {
    for code in sensor.fourcc_formats.keys() {
        check_fourcc(sensor, "fourcc_formats", code)?;
    }
    for code in sensor.fourcc_streams.keys() {
        check_fourcc(sensor, "fourcc_streams", code)?;
    }
    Ok(())
}

fn validate_physical_profiles(sensor: &SensorBlueprint) -> Result<()> {
    for (idx, profile) in sensor.physical_profiles.iter().enumerate() {
        check_fourcc(sensor, "physical_profiles", &profile.fourcc)?;
        if !sensor.fourcc_formats.contains_key(&profile.fourcc) {
            return Err(violation(
                format!("sensors[{}].physical_profiles[{idx}]", sensor.name),
                format!("fourcc '{}' has no format mapping", profile.fourcc),
            ));
        }
    }
    Ok(())
}

fn validate_hid_profiles(sensor: &SensorBlueprint) -> Result<()> {
    if sensor.kind == SensorKind::Hid && sensor.hid_profiles.is_empty() {
        return Err(violation(
            format!("sensors[{}].hid_profiles", sensor.name),
            "HID sensor declares no hid profiles",
        ));
    }
    Ok(())
}

/// Formats the raw sensor can advertise
fn produced_formats(sensor: &SensorBlueprint) -> BTreeSet<Format> {
    match sensor.kind {
        SensorKind::Uvc => sensor.fourcc_formats.values().copied().collect(),
        SensorKind::Hid => sensor.hid_profiles.iter().map(|p| p.format).collect(),
    }
}

fn validate_converters(sensor: &SensorBlueprint) -> Result<()> {
    let produced = produced_formats(sensor);
    let mut names = HashSet::new();
    for converter in &sensor.converters {
        if !names.insert(converter.name.as_str()) {
            return Err(violation(
                format!("sensors[{}].converters[name={}]", sensor.name, converter.name),
                "duplicate converter name",
            ));
        }
        if !produced.contains(&converter.source.format) {
            return Err(violation(
                format!("sensors[{}].converters[{}].source", sensor.name, converter.name),
                format!("source format {} is not produced by the sensor", converter.source.format),
            ));
        }
    }
    Ok(())
}
