//! # Synthetic
//!
//! Logical sensors built on a raw sensor plus a format conversion pipeline.
//!
//! - **ProcessingBlockFactory**: converter edge from source shapes to target shapes
//! - **FormatsConverter**: expands raw profiles into the logical catalog, resolves
//!   logical requests to raw ones, and fans converted frames out to the user callback
//! - **SyntheticSensor**: the `Sensor` users stream from

pub mod converter;
pub mod error;
pub mod processing_block;
pub mod sensor;
pub mod sort;

pub use converter::{ActiveConverter, FormatsConverter};
pub use error::{ConvertError, Result};
pub use processing_block::{
    BlockGenerator, IdentityProcessingBlock, InterleavedSplitBlock, ProcessingBlock, ProcessingBlockFactory,
    ProfileShape,
};
pub use sensor::SyntheticSensor;
pub use sort::sort_profiles;
