//! Allocation counters of one frame source

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every archive of a source; survive `init` / `reset`
#[derive(Debug, Default)]
pub struct ArchiveStats {
    allocated: AtomicU64,
    /// Allocations refused because the family was at its limit
    exhausted: AtomicU64,
    released: AtomicU64,
    callback_panics: AtomicU64,
}

impl ArchiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_allocated(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_callback_panics(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ArchiveStatsSnapshot {
        ArchiveStatsSnapshot {
            allocated: self.allocated(),
            exhausted: self.exhausted(),
            released: self.released(),
            callback_panics: self.callback_panics(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStatsSnapshot {
    pub allocated: u64,
    pub exhausted: u64,
    pub released: u64,
    pub callback_panics: u64,
}

impl ArchiveStatsSnapshot {
    /// Frames allocated and not yet returned
    pub fn outstanding(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_outstanding() {
        let stats = ArchiveStats::new();
        stats.inc_allocated();
        stats.inc_allocated();
        stats.inc_released();
        stats.inc_exhausted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocated, 2);
        assert_eq!(snapshot.exhausted, 1);
        assert_eq!(snapshot.outstanding(), 1);
    }
}
