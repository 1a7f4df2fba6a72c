//! # Sensor
//!
//! Raw depth-camera sensors. A [`UvcSensor`] drives a video-class transport,
//! a [`HidSensor`] an IMU / GPIO transport; both share [`SensorBase`] for
//! state, options, info, profiles and the frame source.
//!
//! ## Frame production
//! Each transport callback turns a borrowed [`contracts::RawFrame`] into an
//! owned [`contracts::Frame`] drawn from the sensor's frame archive, releases
//! the transport buffer, and hands the frame to the user callback.

mod base;
mod hid;
mod notifications;
mod power;
pub mod production;
mod signal;
mod timestamp;
mod traits;
mod uvc;

pub use base::{verify_supported_requests, MetadataModifier, OnOpenHook, SensorBase, DEFAULT_FRAMES_QUEUE_SIZE};
pub use hid::{stream_to_fourcc, HidSensor, HidSensorParams, CUSTOM_SENSOR_NAME};
pub use notifications::NotificationsProcessor;
pub use power::{HidPowerSwitch, PowerController, PowerSwitch, PowerToken, UvcPowerSwitch};
pub use signal::{StreamingChangeCallback, StreamingChangeSignal};
pub use timestamp::{BackendTimestampReader, HostTimestampReader, IioHidTimestampReader};
pub use traits::{RawSensor, Sensor};
pub use uvc::UvcSensor;
