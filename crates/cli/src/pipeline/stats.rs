//! Session statistics.

use std::time::Duration;

use frame_archive::ArchiveStatsSnapshot;
use observability::StreamMetricsAggregator;

/// Statistics from one streaming session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Frames that reached the session callback
    pub frames_received: u64,

    /// Wall-clock duration of the session
    pub duration: Duration,

    /// Number of sensors that were streaming
    pub active_sensors: usize,

    /// Raw archive counters per sensor, taken after stop
    pub archives: Vec<(String, ArchiveStatsSnapshot)>,

    /// Per-stream frame statistics
    pub streams: StreamMetricsAggregator,
}

impl SessionStats {
    /// Delivered frames per second over the whole session
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Frames the archives refused, summed over sensors
    pub fn frames_dropped(&self) -> u64 {
        self.archives.iter().map(|(_, s)| s.exhausted).sum()
    }

    /// Dropped share of all frames the transports offered, in percent
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.frames_dropped();
        let total = self.archives.iter().map(|(_, s)| s.allocated).sum::<u64>() + dropped;
        if total > 0 {
            (dropped as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Session Statistics ===\n");
        println!("Overview");
        println!("  Duration: {:.2}s", self.duration.as_secs_f64());
        println!("  Frames received: {}", self.frames_received);
        println!("  FPS: {:.2}", self.fps());
        println!("  Active sensors: {}", self.active_sensors);
        println!("  Dropped: {} ({:.2}%)", self.frames_dropped(), self.drop_rate());

        println!("\nArchives");
        for (sensor, s) in &self.archives {
            println!(
                "  {sensor}: allocated={}, exhausted={}, released={}, outstanding={}, callback panics={}",
                s.allocated,
                s.exhausted,
                s.released,
                s.outstanding(),
                s.callback_panics
            );
        }

        println!("\n{}", self.streams.summary());
    }
}
