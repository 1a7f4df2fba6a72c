//! FourCC codes and the device-owned fourcc -> format / stream mapping

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Format, SensorError, StreamType};

/// Four-character code packed big-endian: `'Y','U','Y','V'` -> `0x59555956`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self(((b[0] as u32) << 24) | ((b[1] as u32) << 16) | ((b[2] as u32) << 8) | b[3] as u32)
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self})")
    }
}

impl FromStr for Fourcc {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| SensorError::invalid_value(format!("fourcc '{s}' must be exactly 4 bytes")))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Serialize for Fourcc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fourcc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Device-level translation table. Built once by the device owner and shared
/// read-only between the raw sensor and its synthetic wrapper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FourccMap {
    formats: HashMap<Fourcc, Format>,
    streams: HashMap<Fourcc, StreamType>,
}

/// Shared handle injected into every sensor of a device
pub type SharedFourccMap = Arc<FourccMap>;

impl FourccMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, fourcc: Fourcc, format: Format) -> Self {
        self.formats.insert(fourcc, format);
        self
    }

    pub fn with_stream(mut self, fourcc: Fourcc, stream: StreamType) -> Self {
        self.streams.insert(fourcc, stream);
        self
    }

    pub fn insert(&mut self, fourcc: Fourcc, format: Format, stream: StreamType) {
        self.formats.insert(fourcc, format);
        self.streams.insert(fourcc, stream);
    }

    /// `Format::Any` for unmapped codes
    pub fn format_of(&self, fourcc: Fourcc) -> Format {
        self.formats.get(&fourcc).copied().unwrap_or(Format::Any)
    }

    /// `StreamType::Any` for unmapped codes
    pub fn stream_of(&self, fourcc: Fourcc) -> StreamType {
        self.streams.get(&fourcc).copied().unwrap_or(StreamType::Any)
    }

    /// Reverse lookup used when a logical format has to be requested physically
    pub fn fourcc_of(&self, format: Format) -> Option<Fourcc> {
        self.formats
            .iter()
            .filter(|(_, f)| **f == format)
            .map(|(code, _)| *code)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn into_shared(self) -> SharedFourccMap {
        Arc::new(self)
    }
}
