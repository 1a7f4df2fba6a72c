//! Host clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch as f64, the unit every frame timestamp uses.
pub fn system_time_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}
