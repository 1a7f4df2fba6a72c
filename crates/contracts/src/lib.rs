//! # Contracts
//!
//! Interface contracts shared by every depth-camera crate: the stream/profile
//! data model, frames, transport collaborator traits, options, info, errors
//! and the device blueprint. Business crates depend on this crate only.
//!
//! ## Time Model
//! - Frame timestamps are milliseconds (f64) in the frame's `TimestampDomain`
//! - Host arrival time is milliseconds since the UNIX epoch

mod blueprint;
mod callback;
mod clock;
mod device;
mod error;
mod fourcc;
mod frame;
mod info;
mod metadata;
mod option;
mod owner;
mod profile;
mod sensor_name;
mod stream;
mod timestamp;

pub use blueprint::*;
pub use callback::*;
pub use clock::system_time_ms;
pub use device::*;
pub use error::*;
pub use fourcc::*;
pub use frame::*;
pub use info::*;
pub use metadata::{AdditionalDataParser, MetadataId, MetadataParser, MetadataParserMap};
pub use option::*;
pub use owner::*;
pub use profile::*;
pub use sensor_name::SensorName;
pub use stream::*;
pub use timestamp::*;
