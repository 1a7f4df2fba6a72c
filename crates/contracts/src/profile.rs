//! Stream profiles (logical) and physical transport modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;

use crate::{Format, Fourcc, StreamType};

/// Transport-level mode as enumerated by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysicalProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: Fourcc,
}

impl fmt::Display for PhysicalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{} {}", self.width, self.height, self.fps, self.fourcc)
    }
}

/// Shape-specific capability of a profile. Replaces downcasting to a "video" subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Video { width: u32, height: u32 },
    Motion,
}

/// Bit-set of profile tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProfileTag(u32);

impl ProfileTag {
    pub const NONE: Self = Self(0);
    pub const SUPERSET: Self = Self(1);
    pub const DEFAULT: Self = Self(2);
    pub const ANY: Self = Self(4);
    pub const DEBUG: Self = Self(8);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ProfileTag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Logical stream profile.
///
/// Equality and hashing are structural over (stream, index, format, fps, kind);
/// the tag and the backing physical profile are bookkeeping only.
#[derive(Debug, Clone, Copy)]
pub struct StreamProfile {
    pub stream: StreamType,
    pub index: i32,
    pub format: Format,
    pub fps: u32,
    pub kind: ProfileKind,
    pub tag: ProfileTag,
    /// Physical mode this profile was enumerated from (raw sensors only)
    pub backend: Option<PhysicalProfile>,
}

impl StreamProfile {
    pub fn video(stream: StreamType, index: i32, format: Format, width: u32, height: u32, fps: u32) -> Self {
        Self {
            stream,
            index,
            format,
            fps,
            kind: ProfileKind::Video { width, height },
            tag: ProfileTag::NONE,
            backend: None,
        }
    }

    pub fn motion(stream: StreamType, index: i32, format: Format, fps: u32) -> Self {
        Self {
            stream,
            index,
            format,
            fps,
            kind: ProfileKind::Motion,
            tag: ProfileTag::NONE,
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: PhysicalProfile) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_tag(mut self, tag: ProfileTag) -> Self {
        self.tag = tag;
        self
    }

    /// Same shape with a different stream / index / format, used when a
    /// converter maps a source profile to its target.
    pub fn clone_as(&self, stream: StreamType, index: i32, format: Format) -> Self {
        Self {
            stream,
            index,
            format,
            fps: self.fps,
            kind: self.kind,
            tag: self.tag,
            backend: self.backend,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, ProfileKind::Video { .. })
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.kind {
            ProfileKind::Video { width, height } => Some((width, height)),
            ProfileKind::Motion => None,
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().map(|(w, _)| w).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.dimensions().map(|(_, h)| h).unwrap_or(0)
    }

    /// (stream, index, format) triple used to match converter sources
    pub fn same_stream_and_format(&self, other: &StreamProfile) -> bool {
        self.stream == other.stream && self.index == other.index && self.format == other.format
    }

    /// Human readable request description used in error messages
    pub fn describe(&self) -> String {
        match self.kind {
            ProfileKind::Video { width, height } => format!(
                "Stream: {}, Format: {}, width: {}, height: {}, fps: {}",
                self.stream, self.format, width, height, self.fps
            ),
            ProfileKind::Motion => format!("Stream: {}, Format: {}, fps: {}", self.stream, self.format, self.fps),
        }
    }
}

impl PartialEq for StreamProfile {
    fn eq(&self, other: &Self) -> bool {
        self.stream == other.stream
            && self.index == other.index
            && self.format == other.format
            && self.fps == other.fps
            && self.kind == other.kind
    }
}

impl Eq for StreamProfile {}

impl Hash for StreamProfile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stream.hash(state);
        self.index.hash(state);
        self.format.hash(state);
        self.fps.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProfileKind::Video { width, height } => write!(
                f,
                "{}#{} {} {}x{}@{}",
                self.stream, self.index, self.format, width, height, self.fps
            ),
            ProfileKind::Motion => write!(f, "{}#{} {} @{}", self.stream, self.index, self.format, self.fps),
        }
    }
}
