//! In-process transports for tests and the `depthcam` demo session.
//!
//! [`MockUvcDevice`] and [`MockHidDevice`] record every call made on them,
//! can be told to fail specific calls, and deliver frames either on demand
//! (`inject_*`) or from a background [`FrameGenerator`] thread.

mod generator;
mod hid;
mod owner;
mod uvc;

pub use generator::{motion_sample, synth_payload, FrameGenerator, GeneratorConfig};
pub use hid::{HidCall, MockHidConfig, MockHidDevice};
pub use owner::{MockGlobalTime, MockOwner};
pub use uvc::{MockUvcConfig, MockUvcDevice, UvcCall};
