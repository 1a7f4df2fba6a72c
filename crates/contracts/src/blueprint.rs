//! DeviceBlueprint - config loader output
//!
//! Describes one device: its sensors, their transport modes, fourcc translation
//! tables, HID sampling profiles and format converters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::{Format, Fourcc, FourccMap, PhysicalProfile, Result, SensorError, StreamType};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Full device description
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[validate(nested)]
    pub device: DeviceConfig,

    #[validate(nested)]
    pub sensors: Vec<SensorBlueprint>,
}

impl DeviceBlueprint {
    pub fn sensor(&self, name: &str) -> Option<&SensorBlueprint> {
        self.sensors.iter().find(|s| s.name == name)
    }
}

/// Device-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub serial: Option<String>,

    #[serde(default)]
    pub firmware_version: Option<String>,

    /// Device keeps host and hardware clocks correlated while streaming
    #[serde(default)]
    pub global_time: bool,
}

/// Transport family of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Uvc,
    Hid,
}

/// One raw sensor plus its synthetic wrapper
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SensorBlueprint {
    #[validate(length(min = 1))]
    pub name: String,

    pub kind: SensorKind,

    /// Max frames in flight per frame family
    #[serde(default = "default_frames_queue_size")]
    #[validate(range(max = 32))]
    pub frames_queue_size: u32,

    /// GYRO and ACCEL share one bus and must run at the same fps
    #[serde(default)]
    pub shared_imu_bus: bool,

    /// fourcc -> format
    #[serde(default)]
    pub fourcc_formats: BTreeMap<String, Format>,

    /// fourcc -> stream
    #[serde(default)]
    pub fourcc_streams: BTreeMap<String, StreamType>,

    /// Transport modes (UVC)
    #[serde(default)]
    #[validate(nested)]
    pub physical_profiles: Vec<PhysicalProfileConfig>,

    /// Sampling profiles (HID)
    #[serde(default)]
    #[validate(nested)]
    pub hid_profiles: Vec<HidProfileConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub fps_to_sampling_frequency: Vec<SamplingFrequencyConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub converters: Vec<ConverterConfig>,
}

fn default_frames_queue_size() -> u32 {
    16
}

impl SensorBlueprint {
    /// Build the translation table shared by the raw and synthetic sensor
    pub fn fourcc_map(&self) -> Result<FourccMap> {
        let mut map = FourccMap::new();
        for (code, format) in &self.fourcc_formats {
            map = map.with_format(code.parse()?, *format);
        }
        for (code, stream) in &self.fourcc_streams {
            map = map.with_stream(code.parse()?, *stream);
        }
        Ok(map)
    }

    pub fn physical_profiles(&self) -> Result<Vec<PhysicalProfile>> {
        self.physical_profiles
            .iter()
            .map(|p| {
                Ok(PhysicalProfile {
                    width: p.width,
                    height: p.height,
                    fps: p.fps,
                    fourcc: p.fourcc.parse::<Fourcc>()?,
                })
            })
            .collect()
    }

    /// Nested `stream -> fps -> frequency` table
    pub fn sampling_frequencies(&self) -> BTreeMap<StreamType, BTreeMap<u32, u32>> {
        let mut table: BTreeMap<StreamType, BTreeMap<u32, u32>> = BTreeMap::new();
        for entry in &self.fps_to_sampling_frequency {
            table.entry(entry.stream).or_default().insert(entry.fps, entry.frequency);
        }
        table
    }

    pub fn converter(&self, name: &str) -> Result<&ConverterConfig> {
        self.converters
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SensorError::NotFound(format!("converter '{name}'")))
    }
}

/// Transport mode entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PhysicalProfileConfig {
    #[validate(length(equal = 4))]
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    #[validate(range(min = 1))]
    pub fps: u32,
}

/// HID sampling profile: the named device sensor produces `stream` samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct HidProfileConfig {
    #[validate(length(min = 1))]
    pub sensor_name: String,
    pub stream: StreamType,
    pub format: Format,
    #[serde(default)]
    pub index: i32,
    #[validate(range(min = 1))]
    pub fps: u32,
}

/// fps request -> device sampling frequency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SamplingFrequencyConfig {
    pub stream: StreamType,
    #[validate(range(min = 1))]
    pub fps: u32,
    #[validate(range(min = 1))]
    pub frequency: u32,
}

/// Converter recipe: one source (stream, index, format) to one or more targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConverterConfig {
    #[validate(length(min = 1))]
    pub name: String,
    pub source: StreamFormatConfig,
    #[validate(length(min = 1))]
    pub targets: Vec<StreamFormatConfig>,
}

/// (stream, index, format) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormatConfig {
    pub stream: StreamType,
    #[serde(default)]
    pub index: i32,
    pub format: Format,
}
