//! Sensor options (controls)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{info, warn};

use crate::{Result, SensorError};

/// Option identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionId {
    FramesQueueSize,
    ErrorPollingEnabled,
    Exposure,
    Gain,
    EnableAutoExposure,
    GlobalTimeEnabled,
    /// Processing-block specific control
    Custom(u16),
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FramesQueueSize => f.write_str("Frames Queue Size"),
            Self::ErrorPollingEnabled => f.write_str("Error Polling Enabled"),
            Self::Exposure => f.write_str("Exposure"),
            Self::Gain => f.write_str("Gain"),
            Self::EnableAutoExposure => f.write_str("Enable Auto Exposure"),
            Self::GlobalTimeEnabled => f.write_str("Global Time Enabled"),
            Self::Custom(id) => write!(f, "Custom Option {id}"),
        }
    }
}

/// `[min, max]` with `step` and default `def`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub def: f32,
}

impl OptionRange {
    pub const fn new(min: f32, max: f32, step: f32, def: f32) -> Self {
        Self { min, max, step, def }
    }

    pub fn contains(&self, value: f32) -> bool {
        if value.is_nan() || value < self.min || value > self.max {
            return false;
        }
        if self.step > 0.0 {
            let steps = (value - self.min) / self.step;
            return (steps - steps.round()).abs() < 1e-3;
        }
        true
    }

    /// Inconsistent descriptor, or all four values equal
    pub fn is_malformed(&self) -> bool {
        self.max < self.min
            || self.step < 0.0
            || self.def < self.min
            || self.def > self.max
            || (self.max == self.min && self.min == self.def && self.def == self.step)
    }

    /// Degenerate non-zero range with no step
    pub fn is_read_only(&self) -> bool {
        self.max == self.min && self.min != 0.0 && self.step == 0.0
    }
}

impl fmt::Display for OptionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[min/max/step/default]= [{}/{}/{}/{}]", self.min, self.max, self.step, self.def)
    }
}

/// A settable sensor control
pub trait SensorOption: Send + Sync {
    fn set(&self, value: f32) -> Result<()>;

    fn query(&self) -> Result<f32>;

    fn range(&self) -> OptionRange;

    fn description(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Option backed by a plain stored value, validated against its range
pub struct FloatOption {
    value: Mutex<f32>,
    range: OptionRange,
    description: String,
}

impl FloatOption {
    pub fn new(range: OptionRange, description: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(range.def),
            range,
            description: description.into(),
        }
    }
}

impl SensorOption for FloatOption {
    fn set(&self, value: f32) -> Result<()> {
        if !self.range.contains(value) {
            return Err(SensorError::invalid_value(format!(
                "set({}) failed! Given value {value} is out of range.",
                self.description
            )));
        }
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    fn query(&self) -> Result<f32> {
        Ok(*self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn range(&self) -> OptionRange {
        self.range
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Thread-safe option table
#[derive(Default)]
pub struct OptionsContainer {
    options: RwLock<BTreeMap<OptionId, Arc<dyn SensorOption>>>,
}

impl OptionsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: OptionId, option: Arc<dyn SensorOption>) {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, option);
    }

    /// Register only well-formed controls. Returns whether the option was added.
    pub fn try_register(&self, owner: &str, id: OptionId, option: Arc<dyn SensorOption>) -> bool {
        let range = option.range();
        if range.is_malformed() {
            warn!(sensor = %owner, option = %id, range = %range, "skipping control with invalid descriptor");
            return false;
        }
        if range.is_read_only() {
            info!(sensor = %owner, option = %id, range = %range, "control was added as read-only");
        }
        match option.query() {
            Ok(value) if value < range.min || value > range.max => {
                warn!(sensor = %owner, option = %id, value, range = %range, "invalid reading for control");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(sensor = %owner, option = %id, error = %e, "failed to add control");
                return false;
            }
        }
        self.register(id, option);
        true
    }

    pub fn unregister(&self, id: OptionId) -> Option<Arc<dyn SensorOption>> {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn supports(&self, id: OptionId) -> bool {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn get(&self, id: OptionId) -> Result<Arc<dyn SensorOption>> {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| SensorError::NotFound(format!("option '{id}' is not supported")))
    }

    pub fn ids(&self) -> Vec<OptionId> {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_membership_respects_step() {
        let range = OptionRange::new(0.0, 32.0, 1.0, 16.0);
        assert!(range.contains(0.0));
        assert!(range.contains(32.0));
        assert!(!range.contains(32.5));
        assert!(!range.contains(-1.0));
        assert!(!range.contains(f32::NAN));
    }

    #[test]
    fn test_float_option_rejects_out_of_range() {
        let opt = FloatOption::new(OptionRange::new(0.0, 1.0, 1.0, 0.0), "Error Polling");
        opt.set(1.0).unwrap();
        assert_eq!(opt.query().unwrap(), 1.0);
        assert!(matches!(opt.set(2.0), Err(SensorError::InvalidValue { .. })));
        assert_eq!(opt.query().unwrap(), 1.0);
    }

    #[test]
    fn test_try_register_skips_malformed() {
        let options = OptionsContainer::new();
        let bad = Arc::new(FloatOption::new(OptionRange::new(1.0, 1.0, 1.0, 1.0), "bad"));
        assert!(!options.try_register("Stereo Module", OptionId::Gain, bad));
        assert!(!options.supports(OptionId::Gain));

        let read_only = Arc::new(FloatOption::new(OptionRange::new(5.0, 5.0, 0.0, 5.0), "fixed"));
        assert!(options.try_register("Stereo Module", OptionId::Exposure, read_only));
        assert!(options.supports(OptionId::Exposure));
    }

    #[test]
    fn test_unregister_returns_option() {
        let options = OptionsContainer::new();
        options.register(
            OptionId::Custom(7),
            Arc::new(FloatOption::new(OptionRange::new(0.0, 10.0, 1.0, 3.0), "custom")),
        );
        assert!(options.unregister(OptionId::Custom(7)).is_some());
        assert!(options.get(OptionId::Custom(7)).is_err());
    }
}
