//! Frames handed to user callbacks

use std::fmt;
use std::sync::Arc;

use crate::metadata::lookup;
use crate::{MetadataId, MetadataParserMap, Result, SensorError, SensorName, StreamProfile, StreamType};

/// Clock a frame timestamp is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimestampDomain {
    #[default]
    HardwareClock,
    SystemTime,
    GlobalTime,
}

/// Frame family; the archive keeps one pool per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameExtension {
    Video,
    Composite,
    Points,
    Depth,
    Disparity,
    Motion,
    Pose,
}

impl FrameExtension {
    pub const ALL: [FrameExtension; 7] = [
        Self::Video,
        Self::Composite,
        Self::Points,
        Self::Depth,
        Self::Disparity,
        Self::Motion,
        Self::Pose,
    ];

    /// Pool a frame of the given stream type is allocated from.
    /// GPIO and pose samples share the video pool.
    pub fn from_stream(stream: StreamType) -> Result<Self> {
        match stream {
            StreamType::Depth => Ok(Self::Depth),
            StreamType::Gyro | StreamType::Accel => Ok(Self::Motion),
            StreamType::Color
            | StreamType::Infrared
            | StreamType::Fisheye
            | StreamType::Gpio
            | StreamType::Pose
            | StreamType::Confidence => Ok(Self::Video),
            StreamType::Any => Err(SensorError::invalid_value(format!(
                "stream type {stream} has no frame extension"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Composite => "composite",
            Self::Points => "points",
            Self::Depth => "depth",
            Self::Disparity => "disparity",
            Self::Motion => "motion",
            Self::Pose => "pose",
        }
    }
}

impl fmt::Display for FrameExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame bookkeeping filled in by the producing sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdditionalData {
    /// ms, in `timestamp_domain`
    pub timestamp: f64,
    pub frame_number: u64,
    pub timestamp_domain: TimestampDomain,
    /// Host arrival time (ms since epoch)
    pub system_time: f64,
    pub backend_timestamp: f64,
    pub last_timestamp: f64,
    pub last_frame_number: u64,
    /// Transport metadata blob, copied verbatim
    pub metadata: Vec<u8>,
    pub raw_size: u32,
}

/// Image layout of a video-family frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoLayout {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bytes_per_pixel: u32,
}

/// Invoked with the frame payload once the frame is dropped
pub type ReleaseHook = Box<dyn FnOnce(Vec<u8>) + Send>;

/// A single delivered sample.
///
/// Exclusively owned by whoever holds it; dropping it returns the payload to
/// the pool it came from.
pub struct Frame {
    extension: FrameExtension,
    data: Vec<u8>,
    additional: AdditionalData,
    layout: Option<VideoLayout>,
    profile: Option<StreamProfile>,
    sensor: Option<SensorName>,
    parsers: Option<Arc<MetadataParserMap>>,
    on_release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(extension: FrameExtension, data: Vec<u8>, additional: AdditionalData) -> Self {
        Self {
            extension,
            data,
            additional,
            layout: None,
            profile: None,
            sensor: None,
            parsers: None,
            on_release: None,
        }
    }

    /// New frame of another family carrying this frame's bookkeeping
    pub fn derive(&self, extension: FrameExtension, data: Vec<u8>) -> Self {
        let mut frame = Self::new(extension, data, self.additional.clone());
        frame.profile = self.profile;
        frame.sensor = self.sensor.clone();
        frame.parsers = self.parsers.clone();
        frame
    }

    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.on_release = Some(hook);
        self
    }

    pub fn with_metadata_parsers(mut self, parsers: Option<Arc<MetadataParserMap>>) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn extension(&self) -> FrameExtension {
        self.extension
    }

    /// Reclassify in place; the payload stays accounted to the pool it came from
    pub fn set_extension(&mut self, extension: FrameExtension) {
        self.extension = extension;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn additional(&self) -> &AdditionalData {
        &self.additional
    }

    pub fn additional_mut(&mut self) -> &mut AdditionalData {
        &mut self.additional
    }

    pub fn timestamp(&self) -> f64 {
        self.additional.timestamp
    }

    pub fn frame_number(&self) -> u64 {
        self.additional.frame_number
    }

    pub fn timestamp_domain(&self) -> TimestampDomain {
        self.additional.timestamp_domain
    }

    pub fn set_timestamp_domain(&mut self, domain: TimestampDomain) {
        self.additional.timestamp_domain = domain;
    }

    pub fn profile(&self) -> Option<&StreamProfile> {
        self.profile.as_ref()
    }

    pub fn set_profile(&mut self, profile: StreamProfile) {
        self.profile = Some(profile);
    }

    pub fn sensor(&self) -> Option<&SensorName> {
        self.sensor.as_ref()
    }

    pub fn set_sensor(&mut self, sensor: SensorName) {
        self.sensor = Some(sensor);
    }

    pub fn layout(&self) -> Option<VideoLayout> {
        self.layout
    }

    /// `bpp` is in bits; stored stride and pixel size are in bytes.
    pub fn assign_layout(&mut self, width: u32, height: u32, bpp: u32) {
        self.layout = Some(VideoLayout {
            width,
            height,
            stride: width * bpp / 8,
            bytes_per_pixel: bpp / 8,
        });
    }

    pub fn supports_metadata(&self, id: MetadataId) -> bool {
        lookup(self.parsers.as_ref(), id)
            .map(|p| p.supports(self))
            .unwrap_or(false)
    }

    pub fn get_metadata(&self, id: MetadataId) -> Result<i64> {
        lookup(self.parsers.as_ref(), id)?.get(self)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("extension", &self.extension)
            .field("len", &self.data.len())
            .field("frame_number", &self.additional.frame_number)
            .field("timestamp", &self.additional.timestamp)
            .field("profile", &self.profile)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(std::mem::take(&mut self.data));
        }
    }
}
