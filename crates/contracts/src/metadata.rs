//! Per-frame metadata attributes and the parser registry attached to frames

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::{AdditionalData, Frame, Result, SensorError};

/// Attribute that can be queried from a delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataId {
    /// Host time at which the sample was received (ms)
    TimeOfArrival,
    /// Timestamp reported by the transport layer (ms)
    BackendTimestamp,
    /// Number of payload bytes the transport delivered
    RawFrameSize,
    FrameCounter,
}

impl fmt::Display for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TimeOfArrival => "Time Of Arrival",
            Self::BackendTimestamp => "Backend Timestamp",
            Self::RawFrameSize => "Raw Frame Size",
            Self::FrameCounter => "Frame Counter",
        };
        f.write_str(name)
    }
}

/// Extracts one attribute from a frame
pub trait MetadataParser: Send + Sync {
    fn get(&self, frame: &Frame) -> Result<i64>;

    fn supports(&self, _frame: &Frame) -> bool {
        true
    }
}

/// Parser reading a field of [`AdditionalData`]
pub struct AdditionalDataParser {
    extract: fn(&AdditionalData) -> i64,
}

impl AdditionalDataParser {
    pub fn new(extract: fn(&AdditionalData) -> i64) -> Self {
        Self { extract }
    }

    pub fn time_of_arrival() -> Self {
        Self::new(|d| d.system_time as i64)
    }

    pub fn backend_timestamp() -> Self {
        Self::new(|d| d.backend_timestamp as i64)
    }

    pub fn raw_frame_size() -> Self {
        Self::new(|d| d.raw_size as i64)
    }

    pub fn frame_counter() -> Self {
        Self::new(|d| d.frame_number as i64)
    }
}

impl MetadataParser for AdditionalDataParser {
    fn get(&self, frame: &Frame) -> Result<i64> {
        Ok((self.extract)(frame.additional()))
    }
}

/// Registry of parsers owned by a sensor and shared with every frame it emits
#[derive(Default)]
pub struct MetadataParserMap {
    parsers: RwLock<HashMap<MetadataId, Arc<dyn MetadataParser>>>,
}

impl MetadataParserMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the attributes every raw sensor supports
    pub fn with_defaults() -> Self {
        let map = Self::new();
        map.register(MetadataId::TimeOfArrival, Arc::new(AdditionalDataParser::time_of_arrival()));
        map.register(MetadataId::BackendTimestamp, Arc::new(AdditionalDataParser::backend_timestamp()));
        map.register(MetadataId::RawFrameSize, Arc::new(AdditionalDataParser::raw_frame_size()));
        map
    }

    /// Later registrations replace earlier ones
    pub fn register(&self, id: MetadataId, parser: Arc<dyn MetadataParser>) {
        let mut parsers = self.parsers.write().unwrap_or_else(PoisonError::into_inner);
        if parsers.insert(id, parser).is_some() {
            debug!(metadata = %id, "metadata parser redefined");
        }
    }

    pub fn get(&self, id: MetadataId) -> Option<Arc<dyn MetadataParser>> {
        self.parsers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn contains(&self, id: MetadataId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.parsers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn lookup(map: Option<&Arc<MetadataParserMap>>, id: MetadataId) -> Result<Arc<dyn MetadataParser>> {
    map.and_then(|m| m.get(id))
        .ok_or_else(|| SensorError::NotFound(format!("metadata attribute '{id}' is not supported")))
}
