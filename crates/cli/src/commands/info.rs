//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{CameraInfo, ProfileTag, StreamProfile};
use depthcam_cli::pipeline::{DeviceRig, SensorRig};
use sensor::Sensor;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Device info for JSON output
#[derive(Serialize)]
struct DeviceInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial: Option<String>,
    sensors: Vec<SensorInfo>,
}

#[derive(Serialize)]
struct SensorInfo {
    name: String,
    kind: String,
    profiles: Vec<ProfileInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    raw_profiles: Vec<ProfileInfo>,
}

#[derive(Serialize)]
struct ProfileInfo {
    stream: String,
    index: i32,
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    fps: u32,
    default: bool,
}

impl From<&StreamProfile> for ProfileInfo {
    fn from(p: &StreamProfile) -> Self {
        let dimensions = p.dimensions();
        Self {
            stream: p.stream.to_string(),
            index: p.index,
            format: p.format.to_string(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            fps: p.fps,
            default: p.tag.contains(ProfileTag::DEFAULT),
        }
    }
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading device info");

    if !args.config.exists() {
        anyhow::bail!("Blueprint file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load blueprint from {}", args.config.display()))?;
    let rig = DeviceRig::from_blueprint(&blueprint).context("Failed to assemble device")?;

    let device = build_device_info(&rig, args)?;
    if args.json {
        let json = serde_json::to_string_pretty(&device).context("Failed to serialize device info")?;
        println!("{json}");
    } else {
        print_device_info(&device);
    }

    Ok(())
}

fn build_device_info(rig: &DeviceRig, args: &InfoArgs) -> Result<DeviceInfo> {
    let tag = if args.debug {
        ProfileTag::ANY | ProfileTag::DEBUG
    } else {
        ProfileTag::ANY
    };

    let sensors = rig
        .sensors()
        .iter()
        .map(|s| build_sensor_info(s, tag, args.raw))
        .collect::<Result<Vec<_>>>()?;

    let first = rig.sensors().first().map(|s| s.sensor());
    Ok(DeviceInfo {
        name: first
            .and_then(|s| s.get_info(CameraInfo::Name).ok())
            .unwrap_or_default(),
        serial: first.and_then(|s| s.get_info(CameraInfo::SerialNumber).ok()),
        sensors,
    })
}

fn build_sensor_info(rig: &SensorRig, tag: ProfileTag, with_raw: bool) -> Result<SensorInfo> {
    let profiles = rig
        .sensor()
        .get_stream_profiles(tag)
        .with_context(|| format!("Failed to list profiles of {}", rig.name()))?;
    let raw_profiles = if with_raw {
        rig.raw().get_stream_profiles(tag)?
    } else {
        Vec::new()
    };

    Ok(SensorInfo {
        name: rig.name().to_string(),
        kind: format!("{:?}", rig.blueprint().kind),
        profiles: profiles.iter().map(ProfileInfo::from).collect(),
        raw_profiles: raw_profiles.iter().map(ProfileInfo::from).collect(),
    })
}

fn print_profile(p: &ProfileInfo) {
    let shape = match (p.width, p.height) {
        (Some(w), Some(h)) => format!("{w}x{h}"),
        _ => "-".to_string(),
    };
    println!(
        "    {:<10} {:>2} {:<14} {:>10} @ {:>3} fps{}",
        p.stream,
        p.index,
        p.format,
        shape,
        p.fps,
        if p.default { "  (default)" } else { "" }
    );
}

fn print_device_info(device: &DeviceInfo) {
    println!("\n=== Device Information ===\n");
    println!("Device: {}", device.name);
    if let Some(ref serial) = device.serial {
        println!("Serial: {serial}");
    }

    for sensor in &device.sensors {
        println!("\n{} ({}) - {} profiles", sensor.name, sensor.kind, sensor.profiles.len());
        for profile in &sensor.profiles {
            print_profile(profile);
        }
        if !sensor.raw_profiles.is_empty() {
            println!("  raw:");
            for profile in &sensor.raw_profiles {
                print_profile(profile);
            }
        }
    }
    println!();
}
