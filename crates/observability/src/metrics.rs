//! Frame pipeline metrics
//!
//! Thin wrappers over the `metrics` facade so every crate records the same
//! metric names and labels. Without an installed recorder these are no-ops.

use std::collections::BTreeMap;
use std::fmt;

use metrics::{counter, gauge, histogram};

/// Why a frame never reached the user callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    /// Transport delivered a frame after stop
    NotStreaming,
    /// Archive in-flight limit reached
    AllocationFailed,
    /// HID custom sample for a stream nobody opened
    Unrequested,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStreaming => "not_streaming",
            Self::AllocationFailed => "allocation_failed",
            Self::Unrequested => "unrequested",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame was handed to the user callback
pub fn record_frame_delivered(sensor: &str, stream: &str) {
    counter!(
        "depthcam_frames_delivered_total",
        "sensor" => sensor.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// A frame was discarded before delivery
pub fn record_frame_dropped(sensor: &str, reason: DropReason) {
    counter!(
        "depthcam_frames_dropped_total",
        "sensor" => sensor.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// User callback duration; `overdue` when it exceeded the frame budget
pub fn record_callback_duration(stream: &str, duration_ms: f64, overdue: bool) {
    histogram!("depthcam_callback_duration_ms", "stream" => stream.to_string()).record(duration_ms);
    if overdue {
        counter!("depthcam_callback_overdue_total", "stream" => stream.to_string()).increment(1);
    }
}

/// Device power transition ("d0" / "d3")
pub fn record_power_transition(state: &str) {
    counter!("depthcam_power_transitions_total", "state" => state.to_string()).increment(1);
}

/// Frames currently held by users, per frame family
pub fn record_archive_in_flight(frame_type: &str, in_flight: usize) {
    gauge!("depthcam_archive_in_flight", "frame_type" => frame_type.to_string()).set(in_flight as f64);
}

/// In-memory per-stream statistics for run summaries
#[derive(Debug, Clone, Default)]
pub struct StreamMetricsAggregator {
    streams: BTreeMap<String, StreamStats>,
    dropped: BTreeMap<DropReason, u64>,
}

/// Statistics of one stream
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub frames: u64,
    /// Gap between consecutive frame timestamps (ms)
    pub interval_ms: RunningStats,
    /// Host arrival minus frame timestamp (ms), system-time domain only
    pub latency_ms: RunningStats,
    pub bytes: u64,
    last_timestamp: Option<f64>,
}

impl StreamMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one delivered frame
    pub fn record_frame(&mut self, stream: &str, timestamp_ms: f64, bytes: usize, latency_ms: Option<f64>) {
        let stats = self.streams.entry(stream.to_string()).or_default();
        stats.frames += 1;
        stats.bytes += bytes as u64;
        if let Some(last) = stats.last_timestamp {
            stats.interval_ms.push(timestamp_ms - last);
        }
        stats.last_timestamp = Some(timestamp_ms);
        if let Some(latency) = latency_ms {
            stats.latency_ms.push(latency);
        }
    }

    pub fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_insert(0) += 1;
    }

    pub fn total_frames(&self) -> u64 {
        self.streams.values().map(|s| s.frames).sum()
    }

    pub fn stream(&self, stream: &str) -> Option<&StreamStats> {
        self.streams.get(stream)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames(),
            streams: self
                .streams
                .iter()
                .map(|(name, s)| {
                    let fps = match s.interval_ms.mean() {
                        mean if mean > 0.0 => 1000.0 / mean,
                        _ => 0.0,
                    };
                    (
                        name.clone(),
                        StreamSummary {
                            frames: s.frames,
                            bytes: s.bytes,
                            measured_fps: fps,
                            interval_ms: StatsSummary::from(&s.interval_ms),
                            latency_ms: StatsSummary::from(&s.latency_ms),
                        },
                    )
                })
                .collect(),
            dropped: self.dropped.iter().map(|(r, n)| (r.as_str().to_string(), *n)).collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub streams: BTreeMap<String, StreamSummary>,
    pub dropped: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub frames: u64,
    pub bytes: u64,
    pub measured_fps: f64,
    pub interval_ms: StatsSummary,
    pub latency_ms: StatsSummary,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Stream Summary ===")?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        for (name, s) in &self.streams {
            writeln!(f, "{name}: {} frames, {} bytes, {:.1} fps", s.frames, s.bytes, s.measured_fps)?;
            writeln!(f, "  interval (ms): {}", s.interval_ms)?;
            writeln!(f, "  latency (ms): {}", s.latency_ms)?;
        }
        if !self.dropped.is_empty() {
            writeln!(f, "Dropped:")?;
            for (reason, count) in &self.dropped {
                writeln!(f, "  {reason}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean / variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_measures_fps() {
        let mut aggregator = StreamMetricsAggregator::new();
        for i in 0..31 {
            aggregator.record_frame("Depth", i as f64 * 33.333, 614_400, None);
        }
        aggregator.record_drop(DropReason::AllocationFailed);

        let summary = aggregator.summary();
        assert_eq!(summary.total_frames, 31);
        let depth = &summary.streams["Depth"];
        assert!((depth.measured_fps - 30.0).abs() < 0.1);
        assert_eq!(summary.dropped["allocation_failed"], 1);
        assert!(summary.to_string().contains("Depth: 31 frames"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_frame_delivered("Stereo Module", "Depth");
        record_frame_dropped("Stereo Module", DropReason::NotStreaming);
        record_callback_duration("Depth", 1.5, false);
        record_power_transition("d0");
        record_archive_in_flight("video", 3);
    }
}
