//! Transport collaborator contracts (UVC / HID backends)
//!
//! Sensors never talk to hardware directly; they drive one of these traits.
//! Real backends and the mock backend implement them.

use bytes::{Buf, BufMut};
use std::fmt;
use std::sync::Arc;

use crate::{NotificationCallback, PhysicalProfile, Result};

// ============================================================================
// Raw buffer lifetime
// ============================================================================

/// Returns a transport buffer to its owner.
///
/// Released exactly once: either explicitly via [`Continuation::release`] or
/// implicitly when dropped on an early-return path.
pub struct Continuation(Option<Box<dyn FnOnce() + Send>>);

impl Continuation {
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Continuation for buffers nobody needs to reclaim
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Continuation").field(&self.0.is_some()).finish()
    }
}

/// Borrowed view of a transport buffer plus its continuation.
///
/// [`RawFrame::release`] consumes the view, so the buffer cannot be read after
/// it has been handed back.
#[derive(Debug)]
pub struct RawFrame<'a> {
    pub pixels: &'a [u8],
    pub metadata: &'a [u8],
    /// Transport timestamp (ms)
    pub backend_time: f64,
    continuation: Continuation,
}

impl<'a> RawFrame<'a> {
    pub fn new(pixels: &'a [u8], metadata: &'a [u8], backend_time: f64, continuation: Continuation) -> Self {
        Self {
            pixels,
            metadata,
            backend_time,
            continuation,
        }
    }

    /// Bytes actually delivered by the transport
    pub fn frame_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn release(self) {
        self.continuation.release();
    }
}

// ============================================================================
// UVC
// ============================================================================

/// Device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    /// Fully on
    D0,
    /// Suspended
    D3,
}

/// Vendor extension unit that must be initialised after every power-on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionUnit {
    pub subdevice: u8,
    pub unit: u8,
    pub node: u8,
    pub guid: [u8; 16],
}

/// Per-frame callback a UVC backend invokes on its streaming thread
pub type RawFrameCallback = Arc<dyn Fn(&PhysicalProfile, RawFrame<'_>) + Send + Sync>;

/// Video-class transport
pub trait UvcDevice: Send + Sync {
    /// Negotiate and commit one physical mode, registering its frame callback
    fn probe_and_commit(&self, profile: PhysicalProfile, callback: RawFrameCallback) -> Result<()>;

    /// Release a committed mode
    fn close(&self, profile: PhysicalProfile) -> Result<()>;

    /// Start the transport; asynchronous errors are reported to `on_error`
    fn stream_on(&self, on_error: NotificationCallback) -> Result<()>;

    fn start_callbacks(&self);

    fn stop_callbacks(&self);

    fn set_power_state(&self, state: PowerState) -> Result<()>;

    fn power_state(&self) -> PowerState;

    fn init_xu(&self, xu: &ExtensionUnit) -> Result<()>;

    /// Physical modes the device can stream
    fn get_profiles(&self) -> Result<Vec<PhysicalProfile>>;
}

// ============================================================================
// HID
// ============================================================================

/// Sampling request for one named HID sensor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HidProfile {
    pub sensor_name: String,
    pub frequency: u32,
}

/// One sample delivered by a HID backend
#[derive(Debug)]
pub struct HidSample<'a> {
    pub sensor_name: &'a str,
    pub frame: RawFrame<'a>,
}

/// Per-sample callback a HID backend invokes on its capture thread
pub type HidSampleCallback = Arc<dyn Fn(HidSample<'_>) + Send + Sync>;

/// Field of a custom-sensor report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomReportField {
    Minimum,
    Maximum,
    Name,
    Size,
    UnitExpression,
    Value,
}

/// Human-interface-device transport (IMU, GPIO)
pub trait HidDevice: Send + Sync {
    fn register_profiles(&self, profiles: &[HidProfile]) -> Result<()>;

    /// Names of the sensors the device exposes
    fn get_sensors(&self) -> Vec<String>;

    fn open(&self, profiles: &[HidProfile]) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn start_capture(&self, handler: HidSampleCallback) -> Result<()>;

    fn stop_capture(&self);

    fn get_custom_report_data(&self, custom_sensor: &str, report: &str, field: CustomReportField) -> Result<Vec<u8>>;

    /// HID backends without power management accept every transition
    fn set_power_state(&self, _state: PowerState) -> Result<()> {
        Ok(())
    }
}

/// Header prepended to HID metadata: `length:u8 report_type:u8 timestamp:u64le`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidHeader {
    pub length: u8,
    pub report_type: u8,
    /// µs
    pub timestamp: u64,
}

impl HidHeader {
    pub const SIZE: usize = 10;

    pub fn parse(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            length: buf.get_u8(),
            report_type: buf.get_u8(),
            timestamp: buf.get_u64_le(),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(self.length);
        buf.put_u8(self.report_type);
        buf.put_u64_le(self.timestamp);
        out
    }
}
