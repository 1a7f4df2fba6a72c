//! Processing-block contract and the factories that build them

use std::fmt;
use std::sync::Arc;

use contracts::{Format, Frame, FrameExtension, OptionId, SensorOption, StreamProfile, StreamType};

/// (stream, index, format) a converter consumes or produces.
///
/// A source shape with `StreamType::Any` accepts the format on every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileShape {
    pub stream: StreamType,
    pub index: i32,
    pub format: Format,
}

impl ProfileShape {
    pub const fn new(stream: StreamType, index: i32, format: Format) -> Self {
        Self { stream, index, format }
    }

    /// Whether a raw profile can feed a converter with this source shape
    pub fn accepts(&self, profile: &StreamProfile) -> bool {
        self.format == profile.format
            && (self.stream == StreamType::Any || (self.stream == profile.stream && self.index == profile.index))
    }

    /// Target profile built from a raw source profile
    pub fn apply(&self, source: &StreamProfile) -> StreamProfile {
        source.clone_as(self.stream, self.index, self.format)
    }

    pub fn matches(&self, profile: &StreamProfile) -> bool {
        self.stream == profile.stream && self.index == profile.index && self.format == profile.format
    }
}

/// Converts one source frame into frames of the requested target profiles
pub trait ProcessingBlock: Send + Sync {
    fn name(&self) -> &str;

    /// Emit one converted frame per entry of `targets`
    fn process(&self, source: Frame, targets: &[StreamProfile], emit: &mut dyn FnMut(Frame));

    /// Options the block exposes on the sensor while it is active
    fn options(&self) -> Vec<(OptionId, Arc<dyn SensorOption>)> {
        Vec::new()
    }
}

pub type BlockGenerator = Arc<dyn Fn() -> Arc<dyn ProcessingBlock> + Send + Sync>;

/// Converter edge: any of `sources` can be converted into all of `targets`
/// by a block built with `generate`.
#[derive(Clone)]
pub struct ProcessingBlockFactory {
    sources: Vec<ProfileShape>,
    targets: Vec<ProfileShape>,
    generate: BlockGenerator,
}

impl fmt::Debug for ProcessingBlockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingBlockFactory")
            .field("sources", &self.sources)
            .field("targets", &self.targets)
            .finish()
    }
}

impl ProcessingBlockFactory {
    pub fn new(sources: Vec<ProfileShape>, targets: Vec<ProfileShape>, generate: BlockGenerator) -> Self {
        Self {
            sources,
            targets,
            generate,
        }
    }

    /// Relabel `source` frames as each of `targets` without touching pixels
    pub fn identity(source: ProfileShape, targets: Vec<ProfileShape>) -> Self {
        Self::new(vec![source], targets, Arc::new(|| Arc::new(IdentityProcessingBlock)))
    }

    /// Split an interleaved stereo source into its left and right images
    pub fn interleaved_split(source: ProfileShape, left: ProfileShape, right: ProfileShape) -> Self {
        Self::new(
            vec![source],
            vec![left, right],
            Arc::new(move || Arc::new(InterleavedSplitBlock::new(left, right))),
        )
    }

    pub fn sources(&self) -> &[ProfileShape] {
        &self.sources
    }

    pub fn targets(&self) -> &[ProfileShape] {
        &self.targets
    }

    pub fn accepts(&self, profile: &StreamProfile) -> bool {
        self.sources.iter().any(|s| s.accepts(profile))
    }

    pub fn generate(&self) -> Arc<dyn ProcessingBlock> {
        (self.generate)()
    }
}

/// Copy of `frame` with its own payload buffer.
///
/// The copy is heap-allocated outside any frame pool, so it does not count
/// against the in-flight limit; only the source frame does.
pub(crate) fn duplicate(frame: &Frame) -> Frame {
    let mut copy = frame.derive(frame.extension(), frame.data().to_vec());
    if let Some(layout) = frame.layout() {
        copy.assign_layout(layout.width, layout.height, layout.bytes_per_pixel * 8);
    }
    copy
}

/// Stamp `target` on `frame`, moving it to the target's frame family if needed.
///
/// The pool slot travels with the frame, so a relabelled frame keeps holding
/// it until dropped.
fn retarget(mut frame: Frame, target: &StreamProfile) -> Frame {
    let extension = FrameExtension::from_stream(target.stream).unwrap_or(frame.extension());
    frame.set_extension(extension);
    if let Some((width, height)) = target.dimensions() {
        frame.assign_layout(width, height, target.format.bits_per_pixel());
    }
    frame.set_profile(*target);
    frame
}

/// Passes pixels through unchanged under the target profile
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityProcessingBlock;

impl ProcessingBlock for IdentityProcessingBlock {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&self, source: Frame, targets: &[StreamProfile], emit: &mut dyn FnMut(Frame)) {
        let Some((last, rest)) = targets.split_last() else {
            return;
        };
        for target in rest {
            emit(retarget(duplicate(&source), target));
        }
        emit(retarget(source, last));
    }
}

/// Splits 8+8 bit interleaved stereo pixels (left byte first).
///
/// Each plane is a fresh buffer outside the source frame's pool.
#[derive(Debug, Clone, Copy)]
pub struct InterleavedSplitBlock {
    left: ProfileShape,
    right: ProfileShape,
}

impl InterleavedSplitBlock {
    pub fn new(left: ProfileShape, right: ProfileShape) -> Self {
        Self { left, right }
    }

    fn plane(source: &[u8], offset: usize) -> Vec<u8> {
        source.iter().skip(offset).step_by(2).copied().collect()
    }
}

impl ProcessingBlock for InterleavedSplitBlock {
    fn name(&self) -> &str {
        "interleaved split"
    }

    fn process(&self, source: Frame, targets: &[StreamProfile], emit: &mut dyn FnMut(Frame)) {
        for target in targets {
            let offset = if self.left.matches(target) {
                0
            } else if self.right.matches(target) {
                1
            } else {
                continue;
            };
            let plane = Self::plane(source.data(), offset);
            emit(retarget(source.derive(source.extension(), plane), target));
        }
    }
}
