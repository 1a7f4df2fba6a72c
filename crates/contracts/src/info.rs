//! Camera info entries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Info keys a sensor or device can publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraInfo {
    Name,
    SerialNumber,
    FirmwareVersion,
    PhysicalPort,
    ProductId,
    ProductLine,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Name => "Name",
            Self::SerialNumber => "Serial Number",
            Self::FirmwareVersion => "Firmware Version",
            Self::PhysicalPort => "Physical Port",
            Self::ProductId => "Product Id",
            Self::ProductLine => "Product Line",
        };
        f.write_str(name)
    }
}

/// Ordered info map with append-on-register semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoContainer {
    entries: BTreeMap<CameraInfo, String>,
}

impl InfoContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a different value for an existing key appends it on a new line
    pub fn register_info(&mut self, info: CameraInfo, value: impl Into<String>) {
        let value = value.into();
        match self.entries.get_mut(&info) {
            Some(existing) if *existing != value => {
                existing.push('\n');
                existing.push_str(&value);
            }
            Some(_) => {}
            None => {
                self.entries.insert(info, value);
            }
        }
    }

    /// Replace an existing entry; unknown keys are ignored
    pub fn update_info(&mut self, info: CameraInfo, value: impl Into<String>) {
        if let Some(existing) = self.entries.get_mut(&info) {
            *existing = value.into();
        }
    }

    pub fn supports_info(&self, info: CameraInfo) -> bool {
        self.entries.contains_key(&info)
    }

    pub fn get_info(&self, info: CameraInfo) -> Option<&str> {
        self.entries.get(&info).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CameraInfo, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
