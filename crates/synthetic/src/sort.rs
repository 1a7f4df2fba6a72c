//! Deterministic ordering of the logical profile catalog

use std::cmp::Ordering;

use contracts::{Format, StreamProfile, StreamType};

/// Sort key, compared descending: stream, lower index first, larger
/// resolution and rate first, RGB8 color ahead of other color formats, then format
fn sort_key(p: &StreamProfile) -> (StreamType, i64, u32, u32, u32, bool, Format) {
    (
        p.stream,
        -i64::from(p.index),
        p.width(),
        p.height(),
        p.fps,
        p.stream == StreamType::Color && p.format == Format::Rgb8,
        p.format,
    )
}

fn descending(a: &StreamProfile, b: &StreamProfile) -> Ordering {
    sort_key(b).cmp(&sort_key(a))
}

/// Order profiles so the first match of a loose query is a sensible default
pub fn sort_profiles(profiles: &mut [StreamProfile]) {
    profiles.sort_by(descending);
}
