//! Mock UVC transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    Continuation, ExtensionUnit, NotificationCallback, PhysicalProfile, PowerState, RawFrame, RawFrameCallback,
    Result, SensorError,
};
use tracing::{debug, trace};

/// Failure injection for [`MockUvcDevice`]
#[derive(Debug, Default, Clone)]
pub struct MockUvcConfig {
    /// Modes returned by `get_profiles`
    pub profiles: Vec<PhysicalProfile>,
    /// Zero-based index of the `probe_and_commit` call that fails
    pub fail_commit_at: Option<usize>,
    pub fail_stream_on: bool,
    pub fail_power_on: bool,
    pub fail_power_off: bool,
}

/// Calls observed by the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UvcCall {
    ProbeAndCommit(PhysicalProfile),
    Close(PhysicalProfile),
    StreamOn,
    StartCallbacks,
    StopCallbacks,
    SetPowerState(PowerState),
    InitXu(u8),
    GetProfiles,
}

struct UvcState {
    committed: Vec<(PhysicalProfile, RawFrameCallback)>,
    commits: usize,
    streaming: bool,
    callbacks: bool,
    power: PowerState,
    calls: Vec<UvcCall>,
    on_error: Option<NotificationCallback>,
}

/// Recording UVC transport
pub struct MockUvcDevice {
    config: MockUvcConfig,
    state: Mutex<UvcState>,
    released: Arc<AtomicUsize>,
}

impl MockUvcDevice {
    pub fn new(config: MockUvcConfig) -> Self {
        Self {
            config,
            state: Mutex::new(UvcState {
                committed: Vec::new(),
                commits: 0,
                streaming: false,
                callbacks: false,
                power: PowerState::D3,
                calls: Vec::new(),
                on_error: None,
            }),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_profiles(profiles: Vec<PhysicalProfile>) -> Self {
        Self::new(MockUvcConfig {
            profiles,
            ..Default::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, UvcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<UvcCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &UvcCall) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    /// Modes currently committed
    pub fn committed(&self) -> Vec<PhysicalProfile> {
        self.state().committed.iter().map(|(p, _)| *p).collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    pub fn callbacks_enabled(&self) -> bool {
        self.state().callbacks
    }

    /// Transport buffers handed back so far
    pub fn released_buffers(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver one buffer for `profile` if callbacks are enabled.
    /// Returns whether a callback ran.
    pub fn inject_frame(&self, profile: PhysicalProfile, pixels: &[u8], metadata: &[u8], backend_time: f64) -> bool {
        if !self.callbacks_enabled() {
            trace!(mode = %profile, "callbacks disabled, frame not delivered");
            return false;
        }
        self.force_frame(profile, pixels, metadata, backend_time)
    }

    /// Deliver one buffer regardless of callback state, as a late transport
    /// thread would after `stop_callbacks`
    pub fn force_frame(&self, profile: PhysicalProfile, pixels: &[u8], metadata: &[u8], backend_time: f64) -> bool {
        let callback = self
            .state()
            .committed
            .iter()
            .find(|(p, _)| *p == profile)
            .map(|(_, cb)| cb.clone());
        let Some(callback) = callback else {
            return false;
        };
        let released = self.released.clone();
        let continuation = Continuation::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
        callback(&profile, RawFrame::new(pixels, metadata, backend_time, continuation));
        true
    }

    /// Report an asynchronous transport error through the `stream_on` channel
    pub fn raise_error(&self, notification: contracts::Notification) {
        let on_error = self.state().on_error.clone();
        if let Some(on_error) = on_error {
            on_error(notification);
        }
    }
}

impl contracts::UvcDevice for MockUvcDevice {
    fn probe_and_commit(&self, profile: PhysicalProfile, callback: RawFrameCallback) -> Result<()> {
        let mut state = self.state();
        let attempt = state.commits;
        state.commits += 1;
        state.calls.push(UvcCall::ProbeAndCommit(profile));
        if self.config.fail_commit_at == Some(attempt) {
            return Err(SensorError::transport(format!("probe_and_commit({profile}) failed")));
        }
        state.committed.push((profile, callback));
        debug!(mode = %profile, "mode committed");
        Ok(())
    }

    fn close(&self, profile: PhysicalProfile) -> Result<()> {
        let mut state = self.state();
        state.calls.push(UvcCall::Close(profile));
        let before = state.committed.len();
        state.committed.retain(|(p, _)| *p != profile);
        if state.committed.is_empty() {
            state.streaming = false;
        }
        if state.committed.len() == before {
            return Err(SensorError::transport(format!("close({profile}): mode not committed")));
        }
        Ok(())
    }

    fn stream_on(&self, on_error: NotificationCallback) -> Result<()> {
        let mut state = self.state();
        state.calls.push(UvcCall::StreamOn);
        if self.config.fail_stream_on {
            return Err(SensorError::transport("stream_on failed"));
        }
        state.streaming = true;
        state.on_error = Some(on_error);
        Ok(())
    }

    fn start_callbacks(&self) {
        let mut state = self.state();
        state.calls.push(UvcCall::StartCallbacks);
        state.callbacks = true;
    }

    fn stop_callbacks(&self) {
        let mut state = self.state();
        state.calls.push(UvcCall::StopCallbacks);
        state.callbacks = false;
    }

    fn set_power_state(&self, power: PowerState) -> Result<()> {
        let mut state = self.state();
        state.calls.push(UvcCall::SetPowerState(power));
        let fail = match power {
            PowerState::D0 => self.config.fail_power_on,
            PowerState::D3 => self.config.fail_power_off,
        };
        if fail {
            return Err(SensorError::transport(format!("set_power_state({power:?}) failed")));
        }
        state.power = power;
        Ok(())
    }

    fn power_state(&self) -> PowerState {
        self.state().power
    }

    fn init_xu(&self, xu: &ExtensionUnit) -> Result<()> {
        self.state().calls.push(UvcCall::InitXu(xu.unit));
        Ok(())
    }

    fn get_profiles(&self) -> Result<Vec<PhysicalProfile>> {
        self.state().calls.push(UvcCall::GetProfiles);
        Ok(self.config.profiles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Fourcc, UvcDevice};

    fn mode() -> PhysicalProfile {
        PhysicalProfile {
            width: 4,
            height: 2,
            fps: 30,
            fourcc: Fourcc::from_bytes(*b"Z16 "),
        }
    }

    #[test]
    fn test_frames_flow_only_with_callbacks_enabled() {
        let device = MockUvcDevice::with_profiles(vec![mode()]);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        device
            .probe_and_commit(
                mode(),
                Arc::new(move |_, raw| {
                    seen_clone.fetch_add(raw.frame_size(), Ordering::SeqCst);
                    raw.release();
                }),
            )
            .unwrap();

        assert!(!device.inject_frame(mode(), &[0; 16], &[], 1.0));
        device.start_callbacks();
        assert!(device.inject_frame(mode(), &[0; 16], &[], 1.0));

        assert_eq!(seen.load(Ordering::SeqCst), 16);
        assert_eq!(device.released_buffers(), 1);
    }

    #[test]
    fn test_commit_failure_injection() {
        let device = MockUvcDevice::new(MockUvcConfig {
            fail_commit_at: Some(1),
            ..Default::default()
        });
        let cb: RawFrameCallback = Arc::new(|_, _| {});
        assert!(device.probe_and_commit(mode(), cb.clone()).is_ok());
        assert!(device.probe_and_commit(mode(), cb).is_err());
        assert_eq!(device.committed().len(), 1);
    }
}
