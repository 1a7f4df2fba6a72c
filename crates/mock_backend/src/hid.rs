//! Mock HID transport

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    Continuation, CustomReportField, HidProfile, HidSample, HidSampleCallback, PowerState, RawFrame, Result,
    SensorError,
};
use tracing::debug;

/// Failure injection and canned data for [`MockHidDevice`]
#[derive(Debug, Default, Clone)]
pub struct MockHidConfig {
    /// Names returned by `get_sensors`
    pub sensors: Vec<String>,
    pub fail_open: bool,
    pub fail_start_capture: bool,
    /// (custom sensor, report) -> field -> bytes
    pub custom_reports: HashMap<(String, String), HashMap<CustomReportField, Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidCall {
    RegisterProfiles(Vec<HidProfile>),
    Open(Vec<HidProfile>),
    Close,
    StartCapture,
    StopCapture,
    SetPowerState(PowerState),
}

#[derive(Default)]
struct HidState {
    registered: Vec<HidProfile>,
    opened: Vec<HidProfile>,
    handler: Option<HidSampleCallback>,
    calls: Vec<HidCall>,
}

/// Recording HID transport
pub struct MockHidDevice {
    config: MockHidConfig,
    state: Mutex<HidState>,
    released: Arc<AtomicUsize>,
}

impl MockHidDevice {
    pub fn new(config: MockHidConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HidState::default()),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_sensors<I, S>(sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(MockHidConfig {
            sensors: sensors.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, HidState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<HidCall> {
        self.state().calls.clone()
    }

    pub fn registered_profiles(&self) -> Vec<HidProfile> {
        self.state().registered.clone()
    }

    /// Profiles passed to the last `open`
    pub fn opened_profiles(&self) -> Vec<HidProfile> {
        self.state().opened.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.state().handler.is_some()
    }

    pub fn released_buffers(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver one sample while capturing. Returns whether the handler ran.
    pub fn inject_sample(&self, sensor_name: &str, data: &[u8], metadata: &[u8]) -> bool {
        let handler = self.state().handler.clone();
        let Some(handler) = handler else {
            return false;
        };
        let released = self.released.clone();
        let continuation = Continuation::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
        handler(HidSample {
            sensor_name,
            frame: RawFrame::new(data, metadata, 0.0, continuation),
        });
        true
    }
}

impl contracts::HidDevice for MockHidDevice {
    fn register_profiles(&self, profiles: &[HidProfile]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(HidCall::RegisterProfiles(profiles.to_vec()));
        state.registered = profiles.to_vec();
        Ok(())
    }

    fn get_sensors(&self) -> Vec<String> {
        self.config.sensors.clone()
    }

    fn open(&self, profiles: &[HidProfile]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(HidCall::Open(profiles.to_vec()));
        if self.config.fail_open {
            return Err(SensorError::transport("hid open failed"));
        }
        state.opened = profiles.to_vec();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(HidCall::Close);
        state.opened.clear();
        Ok(())
    }

    fn start_capture(&self, handler: HidSampleCallback) -> Result<()> {
        let mut state = self.state();
        state.calls.push(HidCall::StartCapture);
        if self.config.fail_start_capture {
            return Err(SensorError::transport("hid start_capture failed"));
        }
        state.handler = Some(handler);
        debug!(sensors = state.opened.len(), "hid capture started");
        Ok(())
    }

    fn stop_capture(&self) {
        let mut state = self.state();
        state.calls.push(HidCall::StopCapture);
        state.handler = None;
    }

    fn get_custom_report_data(&self, custom_sensor: &str, report: &str, field: CustomReportField) -> Result<Vec<u8>> {
        self.config
            .custom_reports
            .get(&(custom_sensor.to_owned(), report.to_owned()))
            .and_then(|fields| fields.get(&field))
            .cloned()
            .ok_or_else(|| SensorError::NotFound(format!("{custom_sensor}/{report}/{field:?}")))
    }

    fn set_power_state(&self, state: PowerState) -> Result<()> {
        self.state().calls.push(HidCall::SetPowerState(state));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::HidDevice;

    #[test]
    fn test_samples_need_capture() {
        let device = MockHidDevice::with_sensors(["gyro_3d"]);
        assert!(!device.inject_sample("gyro_3d", &[0; 12], &[]));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        device
            .start_capture(Arc::new(move |sample| {
                assert_eq!(sample.sensor_name, "gyro_3d");
                count_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(device.inject_sample("gyro_3d", &[0; 12], &[]));
        device.stop_capture();
        assert!(!device.inject_sample("gyro_3d", &[0; 12], &[]));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        // buffer dropped unreleased by the handler still counts
        assert_eq!(device.released_buffers(), 1);
    }

    #[test]
    fn test_custom_report_lookup() {
        let mut reports = HashMap::new();
        reports.insert(
            ("custom".to_owned(), "gpio".to_owned()),
            HashMap::from([(CustomReportField::Value, vec![1, 2])]),
        );
        let device = MockHidDevice::new(MockHidConfig {
            custom_reports: reports,
            ..Default::default()
        });
        assert_eq!(
            device
                .get_custom_report_data("custom", "gpio", CustomReportField::Value)
                .unwrap(),
            vec![1, 2]
        );
        assert!(device
            .get_custom_report_data("custom", "gpio", CustomReportField::Name)
            .is_err());
    }
}
