//! Stream types and pixel formats

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SensorError;

/// Logical stream kind. Declaration order is the sort order used when ranking profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Any,
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
    Gpio,
    Pose,
    Confidence,
}

impl StreamType {
    pub const ALL: [StreamType; 10] = [
        Self::Any,
        Self::Depth,
        Self::Color,
        Self::Infrared,
        Self::Fisheye,
        Self::Gyro,
        Self::Accel,
        Self::Gpio,
        Self::Pose,
        Self::Confidence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Depth => "Depth",
            Self::Color => "Color",
            Self::Infrared => "Infrared",
            Self::Fisheye => "Fisheye",
            Self::Gyro => "Gyro",
            Self::Accel => "Accel",
            Self::Gpio => "Gpio",
            Self::Pose => "Pose",
            Self::Confidence => "Confidence",
        }
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, Self::Gyro | Self::Accel | Self::Gpio)
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SensorError::invalid_value(format!("unknown stream type '{s}'")))
    }
}

/// Pixel / sample format. `Any` marks an unmapped fourcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Any,
    Z16,
    Disparity16,
    Xyz32f,
    Yuyv,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Y8,
    Y16,
    Raw10,
    Raw16,
    Raw8,
    Uyvy,
    MotionRaw,
    MotionXyz32f,
    GpioRaw,
    SixDof,
    Disparity32,
    Mjpeg,
    Y8i,
    Y12i,
    Z16h,
}

impl Format {
    pub const ALL: [Format; 24] = [
        Self::Any,
        Self::Z16,
        Self::Disparity16,
        Self::Xyz32f,
        Self::Yuyv,
        Self::Rgb8,
        Self::Bgr8,
        Self::Rgba8,
        Self::Bgra8,
        Self::Y8,
        Self::Y16,
        Self::Raw10,
        Self::Raw16,
        Self::Raw8,
        Self::Uyvy,
        Self::MotionRaw,
        Self::MotionXyz32f,
        Self::GpioRaw,
        Self::SixDof,
        Self::Disparity32,
        Self::Mjpeg,
        Self::Y8i,
        Self::Y12i,
        Self::Z16h,
    ];

    /// Bits per pixel; zero for formats with no fixed image layout.
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Z16 | Self::Disparity16 | Self::Y16 | Self::Raw16 | Self::Z16h => 16,
            Self::Yuyv | Self::Uyvy | Self::Y8i => 16,
            Self::Disparity32 | Self::Rgba8 | Self::Bgra8 | Self::Y12i => 32,
            Self::Xyz32f => 96,
            Self::Rgb8 | Self::Bgr8 => 24,
            Self::Y8 | Self::Raw8 | Self::Mjpeg => 8,
            Self::Raw10 => 10,
            Self::GpioRaw | Self::MotionRaw | Self::MotionXyz32f | Self::SixDof => 1,
            Self::Any => 0,
        }
    }

    /// Payload size is whatever the device sent, not width*height*bpp.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpeg | Self::Z16h)
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, Self::MotionRaw | Self::MotionXyz32f | Self::GpioRaw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Z16 => "Z16",
            Self::Disparity16 => "DISPARITY16",
            Self::Xyz32f => "XYZ32F",
            Self::Yuyv => "YUYV",
            Self::Rgb8 => "RGB8",
            Self::Bgr8 => "BGR8",
            Self::Rgba8 => "RGBA8",
            Self::Bgra8 => "BGRA8",
            Self::Y8 => "Y8",
            Self::Y16 => "Y16",
            Self::Raw10 => "RAW10",
            Self::Raw16 => "RAW16",
            Self::Raw8 => "RAW8",
            Self::Uyvy => "UYVY",
            Self::MotionRaw => "MOTION_RAW",
            Self::MotionXyz32f => "MOTION_XYZ32F",
            Self::GpioRaw => "GPIO_RAW",
            Self::SixDof => "6DOF",
            Self::Disparity32 => "DISPARITY32",
            Self::Mjpeg => "MJPEG",
            Self::Y8i => "Y8I",
            Self::Y12i => "Y12I",
            Self::Z16h => "Z16H",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SensorError::invalid_value(format!("unknown format '{s}'")))
    }
}

/// Size in bytes of a tightly packed image.
pub fn compute_frame_expected_size(width: u32, height: u32, bpp: u32) -> usize {
    width as usize * height as usize * bpp as usize / 8
}
