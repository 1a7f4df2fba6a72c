//! Callback types shared between sensors, converters and users

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::Frame;

/// User frame callback
///
/// Invoked on a transport thread with an exclusively-owned frame.
/// `Arc` so the same callback can be installed on a converter and kept by the sensor.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Wrap a closure as a [`FrameCallback`]
pub fn frame_callback<F>(f: F) -> FrameCallback
where
    F: Fn(Frame) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    FramesTimeout,
    FrameCorrupted,
    HardwareError,
    HardwareEvent,
    UnknownError,
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Asynchronous device event surfaced to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub category: NotificationCategory,
    pub severity: Severity,
    pub description: String,
    /// ms since epoch
    pub timestamp: f64,
}

impl Notification {
    pub fn new(category: NotificationCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            timestamp: crate::system_time_ms(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.severity, self.description)
    }
}

/// Notification sink
pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;
