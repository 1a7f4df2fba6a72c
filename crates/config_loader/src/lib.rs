//! # Config Loader
//!
//! Loads a [`DeviceBlueprint`] from TOML or JSON and validates it.
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("device.toml")).unwrap();
//! println!("Device: {}", blueprint.device.name);
//! ```

mod parser;
mod validator;

pub use contracts::DeviceBlueprint;
pub use parser::ConfigFormat;

use contracts::{Result, SensorError};
use std::path::Path;
use tracing::debug;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a blueprint, detecting the format from the file extension
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DeviceBlueprint> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        let blueprint = Self::load_from_str(&content, format)?;
        debug!(path = %path.display(), sensors = blueprint.sensors.len(), "blueprint loaded");
        Ok(blueprint)
    }

    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<DeviceBlueprint> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    pub fn to_toml(blueprint: &DeviceBlueprint) -> Result<String> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| SensorError::configuration(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(blueprint: &DeviceBlueprint) -> Result<String> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| SensorError::configuration(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| SensorError::configuration("cannot determine file format from extension"))?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| SensorError::configuration(format!("unsupported config format: .{ext}")))
    }

    fn read_file(path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| SensorError::configuration(format!("cannot read {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[device]
name = "D435i"
global_time = true

[[sensors]]
name = "Stereo Module"
kind = "uvc"
frames_queue_size = 8

[sensors.fourcc_formats]
"Y8I " = "y8i"
"Z16 " = "z16"

[sensors.fourcc_streams]
"Y8I " = "infrared"
"Z16 " = "depth"

[[sensors.physical_profiles]]
fourcc = "Z16 "
width = 640
height = 480
fps = 30

[[sensors.physical_profiles]]
fourcc = "Y8I "
width = 640
height = 480
fps = 30

[[sensors.converters]]
name = "y8i split"
source = { stream = "infrared", format = "y8i" }
targets = [
    { stream = "infrared", index = 1, format = "y8" },
    { stream = "infrared", index = 2, format = "y8" },
]

[[sensors]]
name = "Motion Module"
kind = "hid"
shared_imu_bus = true

[[sensors.hid_profiles]]
sensor_name = "gyro_3d"
stream = "gyro"
format = "motion_xyz32f"
fps = 200

[[sensors.fps_to_sampling_frequency]]
stream = "gyro"
fps = 200
frequency = 5
"#;

    #[test]
    fn test_load_from_str_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.device.name, "D435i");
        assert_eq!(bp.sensors.len(), 2);
        assert_eq!(bp.sensors[0].frames_queue_size, 8);
        assert_eq!(bp.sensors[0].converters[0].targets.len(), 2);
        assert_eq!(bp.sensors[1].sampling_frequencies()[&contracts::StreamType::Gyro][&200], 5);
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.device.name, bp2.device.name);
        assert_eq!(bp.sensors.len(), bp2.sensors.len());
        assert_eq!(bp.sensors[0].physical_profiles, bp2.sensors[0].physical_profiles);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.sensors[1].hid_profiles, bp2.sensors[1].hid_profiles);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MINIMAL_TOML.replace("name = \"Motion Module\"", "name = \"Stereo Module\"");
        let err = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.sensors[0].name, "Stereo Module");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }
}
