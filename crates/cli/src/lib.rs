//! # depthcam
//!
//! Library half of the `depthcam` binary.
//!
//! Provides:
//! - device assembly from a [`contracts::DeviceBlueprint`] over mock transports
//! - streaming sessions with run statistics

pub mod error;
pub mod pipeline;
