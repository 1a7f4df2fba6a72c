//! Blueprint parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{DeviceBlueprint, Result, SensorError};

/// Blueprint file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<DeviceBlueprint> {
    toml::from_str(content).map_err(|e| SensorError::configuration(format!("TOML parse error: {e}")))
}

pub fn parse_json(content: &str) -> Result<DeviceBlueprint> {
    serde_json::from_str(content).map_err(|e| SensorError::configuration(format!("JSON parse error: {e}")))
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<DeviceBlueprint> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorKind;

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[device]
name = "D435"

[[sensors]]
name = "Stereo Module"
kind = "uvc"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.device.name, "D435");
        assert_eq!(bp.sensors.len(), 1);
        assert_eq!(bp.sensors[0].kind, SensorKind::Uvc);
        assert_eq!(bp.sensors[0].frames_queue_size, 16);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "device": { "name": "T265", "global_time": true },
            "sensors": [{
                "name": "Motion Module",
                "kind": "hid",
                "hid_profiles": [
                    { "sensor_name": "gyro_3d", "stream": "gyro", "format": "motion_xyz32f", "fps": 200 }
                ]
            }]
        }"#;
        let bp = parse_json(content).unwrap();
        assert!(bp.device.global_time);
        assert_eq!(bp.sensors[0].hid_profiles[0].fps, 200);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, SensorError::Configuration { .. }));
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_unknown_sensor_kind_rejected() {
        let content = r#"
[device]
name = "D435"

[[sensors]]
name = "Stereo Module"
kind = "usb"
"#;
        assert!(parse_toml(content).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
