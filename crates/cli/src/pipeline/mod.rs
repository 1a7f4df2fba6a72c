//! Device assembly and streaming sessions.

mod device;
mod session;
mod stats;

pub use device::{converter_factories, DeviceRig, SensorRig, Transport};
pub use session::{select_default_requests, Session, SessionConfig};
pub use stats::SessionStats;
