//! # Frame Archive
//!
//! Bounded frame pools, one per frame family, sharing a max in-flight limit.
//!
//! ## Core Concepts
//!
//! - **FrameArchive**: tracks frames handed out for one family and recycles their buffers
//! - **FrameSource**: the per-sensor set of archives plus the user callback
//! - **FrameQueueSizeOption**: the user-facing control over the in-flight limit
//! - **ArchiveStats**: allocation / exhaustion / release counters of a source
//!
//! A frame allocated from an archive returns its buffer when dropped, so the
//! in-flight count falls as soon as the user lets go of the frame.

mod archive;
mod error;
mod queue_size;
mod source;
mod stats;

pub use archive::FrameArchive;
pub use error::{ArchiveError, Result};
pub use queue_size::{FrameQueueSizeOption, QUEUE_SIZE_DESCRIPTION, QUEUE_SIZE_RANGE};
pub use source::{CallbackGuard, FrameSource};
pub use stats::{ArchiveStats, ArchiveStatsSnapshot};
