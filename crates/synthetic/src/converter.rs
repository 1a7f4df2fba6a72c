//! Format conversion pipeline

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use contracts::{Frame, FrameCallback, StreamProfile};
use tracing::{debug, trace, warn};

use crate::processing_block::duplicate;
use crate::{ConvertError, ProcessingBlock, ProcessingBlockFactory, Result};

/// A logical profile reachable from a raw profile through one factory
#[derive(Debug, Clone, Copy)]
struct Candidate {
    target: StreamProfile,
    source: StreamProfile,
    factory: usize,
}

/// Block instance feeding the requested targets from one raw profile
#[derive(Clone)]
pub struct ActiveConverter {
    pub source: StreamProfile,
    pub targets: Vec<StreamProfile>,
    pub block: Arc<dyn ProcessingBlock>,
}

#[derive(Default)]
pub struct FormatsConverter {
    factories: RwLock<Vec<ProcessingBlockFactory>>,
    candidates: RwLock<Vec<Candidate>>,
    active: RwLock<Vec<ActiveConverter>>,
    callback: Mutex<Option<FrameCallback>>,
}

impl FormatsConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_converter(&self, factory: ProcessingBlockFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(factory);
    }

    pub fn register_converters(&self, factories: impl IntoIterator<Item = ProcessingBlockFactory>) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(factories);
    }

    pub fn factory_count(&self) -> usize {
        self.factories.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every logical profile some factory can produce from `raw_profiles`,
    /// in discovery order without duplicates. Remembers which raw profile
    /// and factory lead to each target for [`Self::prepare_to_convert`].
    pub fn get_all_possible_profiles(&self, raw_profiles: &[StreamProfile]) -> Vec<StreamProfile> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut candidates = Vec::new();
        let mut profiles: Vec<StreamProfile> = Vec::new();

        for raw in raw_profiles {
            for (index, factory) in factories.iter().enumerate() {
                if !factory.accepts(raw) {
                    continue;
                }
                for shape in factory.targets() {
                    let target = shape.apply(raw);
                    candidates.push(Candidate {
                        target,
                        source: *raw,
                        factory: index,
                    });
                    if !profiles.contains(&target) {
                        profiles.push(target);
                    }
                }
            }
        }

        debug!(
            raw = raw_profiles.len(),
            logical = profiles.len(),
            factories = factories.len(),
            "conversion catalog built"
        );
        *self.candidates.write().unwrap_or_else(PoisonError::into_inner) = candidates;
        profiles
    }

    /// (raw source, logical target) pairs of the last catalog
    pub fn mappings(&self) -> Vec<(StreamProfile, StreamProfile)> {
        self.candidates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| (c.source, c.target))
            .collect()
    }

    /// Resolve `requests` into active converters and the raw profiles they need.
    ///
    /// Each step picks, for the first unresolved request, the (factory, source)
    /// pair that covers the most remaining requests, so a block producing
    /// several requested streams from one raw profile opens that profile once.
    pub fn prepare_to_convert(&self, requests: &[StreamProfile]) -> Result<()> {
        if requests.is_empty() {
            return Err(ConvertError::EmptyRequest);
        }
        let candidates = self.candidates.read().unwrap_or_else(PoisonError::into_inner);
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);

        let covers = |pick: &Candidate, request: &StreamProfile| {
            candidates
                .iter()
                .any(|c| c.factory == pick.factory && c.source == pick.source && c.target == *request)
        };

        let mut remaining: Vec<StreamProfile> = requests.to_vec();
        let mut active = Vec::new();
        while let Some(request) = remaining.first().copied() {
            let mut best: Option<(&Candidate, usize)> = None;
            for candidate in candidates.iter().filter(|c| c.target == request) {
                let coverage = remaining.iter().filter(|r| covers(candidate, r)).count();
                if best.is_none_or(|(_, n)| coverage > n) {
                    best = Some((candidate, coverage));
                }
            }
            let Some((pick, _)) = best else {
                return Err(ConvertError::NoConverter(request));
            };
            let Some(factory) = factories.get(pick.factory) else {
                return Err(ConvertError::NoConverter(request));
            };

            let (targets, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|r| covers(pick, r));
            remaining = rest;
            let block = factory.generate();
            debug!(block = block.name(), source = %pick.source, targets = targets.len(), "converter selected");
            active.push(ActiveConverter {
                source: pick.source,
                targets,
                block,
            });
        }

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = active;
        Ok(())
    }

    /// Raw profiles the active converters consume, without duplicates
    pub fn get_active_source_profiles(&self) -> Vec<StreamProfile> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let mut sources: Vec<StreamProfile> = Vec::with_capacity(active.len());
        for converter in active.iter() {
            if !sources.contains(&converter.source) {
                sources.push(converter.source);
            }
        }
        sources
    }

    pub fn get_active_converters(&self) -> Vec<ActiveConverter> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_active(&self) {
        self.active.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn set_frames_callback(&self, callback: Option<FrameCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn get_frames_callback(&self) -> Option<FrameCallback> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run `frame` through every active converter fed by its profile and
    /// deliver the results to the frames callback
    pub fn convert_frame(&self, frame: Frame) {
        let Some(profile) = frame.profile().copied() else {
            warn!("frame without a stream profile dropped by converter");
            return;
        };
        let Some(callback) = self.get_frames_callback() else {
            trace!(profile = %profile, "no frames callback, converted frame dropped");
            return;
        };

        let matching: Vec<ActiveConverter> = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.source == profile)
            .cloned()
            .collect();
        let Some((last, rest)) = matching.split_last() else {
            debug!(profile = %profile, "no active converter for frame");
            return;
        };

        let mut emit = |converted: Frame| callback(converted);
        for converter in rest {
            converter.block.process(duplicate(&frame), &converter.targets, &mut emit);
        }
        last.block.process(frame, &last.targets, &mut emit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileShape;
    use contracts::{AdditionalData, Format, FrameExtension, StreamType};

    fn yuyv() -> StreamProfile {
        StreamProfile::video(StreamType::Color, 0, Format::Yuyv, 640, 480, 30)
    }

    fn y8i() -> StreamProfile {
        StreamProfile::video(StreamType::Infrared, 0, Format::Y8i, 640, 480, 30)
    }

    fn converter() -> FormatsConverter {
        let converter = FormatsConverter::new();
        converter.register_converters([
            ProcessingBlockFactory::identity(
                ProfileShape::new(StreamType::Color, 0, Format::Yuyv),
                vec![
                    ProfileShape::new(StreamType::Color, 0, Format::Rgb8),
                    ProfileShape::new(StreamType::Color, 0, Format::Yuyv),
                ],
            ),
            ProcessingBlockFactory::interleaved_split(
                ProfileShape::new(StreamType::Infrared, 0, Format::Y8i),
                ProfileShape::new(StreamType::Infrared, 1, Format::Y8),
                ProfileShape::new(StreamType::Infrared, 2, Format::Y8),
            ),
            ProcessingBlockFactory::identity(
                ProfileShape::new(StreamType::Infrared, 0, Format::Y8i),
                vec![ProfileShape::new(StreamType::Infrared, 1, Format::Y8)],
            ),
        ]);
        converter
    }

    #[test]
    fn test_catalog_has_no_duplicates() {
        let converter = converter();
        let profiles = converter.get_all_possible_profiles(&[yuyv(), y8i()]);
        assert_eq!(profiles.len(), 4);
        assert_eq!(profiles[0].format, Format::Rgb8);
        assert_eq!(profiles[0].dimensions(), Some((640, 480)));
    }

    #[test]
    fn test_unknown_format_produces_nothing() {
        let converter = converter();
        let z16 = StreamProfile::video(StreamType::Depth, 0, Format::Z16, 640, 480, 30);
        assert!(converter.get_all_possible_profiles(&[z16]).is_empty());
    }

    #[test]
    fn test_prepare_prefers_block_covering_most_requests() {
        let converter = converter();
        let profiles = converter.get_all_possible_profiles(&[yuyv(), y8i()]);
        let ir1 = profiles.iter().find(|p| p.index == 1).copied().unwrap();
        let ir2 = profiles.iter().find(|p| p.index == 2).copied().unwrap();

        converter.prepare_to_convert(&[ir1, ir2]).unwrap();
        let active = converter.get_active_converters();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].block.name(), "interleaved split");
        assert_eq!(converter.get_active_source_profiles(), vec![y8i()]);
    }

    #[test]
    fn test_shared_source_opened_once() {
        let converter = converter();
        converter.get_all_possible_profiles(&[yuyv()]);
        let rgb = yuyv().clone_as(StreamType::Color, 0, Format::Rgb8);

        converter.prepare_to_convert(&[rgb, yuyv()]).unwrap();
        assert_eq!(converter.get_active_source_profiles(), vec![yuyv()]);
    }

    #[test]
    fn test_unresolvable_request() {
        let converter = converter();
        converter.get_all_possible_profiles(&[yuyv()]);
        let bgr = yuyv().clone_as(StreamType::Color, 0, Format::Bgr8);
        assert!(matches!(
            converter.prepare_to_convert(&[bgr]),
            Err(ConvertError::NoConverter(_))
        ));
        assert!(matches!(converter.prepare_to_convert(&[]), Err(ConvertError::EmptyRequest)));
    }

    #[test]
    fn test_convert_frame_fans_out_to_callback() {
        let converter = converter();
        converter.get_all_possible_profiles(&[yuyv()]);
        let rgb = yuyv().clone_as(StreamType::Color, 0, Format::Rgb8);
        converter.prepare_to_convert(&[rgb, yuyv()]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        converter.set_frames_callback(Some(Arc::new(move |f: Frame| {
            sink.lock().unwrap().push(f.profile().map(|p| p.format));
        })));

        let mut frame = Frame::new(FrameExtension::Video, vec![0; 8], AdditionalData::default());
        frame.set_profile(yuyv());
        converter.convert_frame(frame);

        assert_eq!(*seen.lock().unwrap(), vec![Some(Format::Rgb8), Some(Format::Yuyv)]);
    }

    #[test]
    fn test_frames_without_callback_are_dropped() {
        let converter = converter();
        converter.get_all_possible_profiles(&[yuyv()]);
        converter.prepare_to_convert(&[yuyv()]).unwrap();
        let mut frame = Frame::new(FrameExtension::Video, vec![0; 8], AdditionalData::default());
        frame.set_profile(yuyv());
        converter.convert_frame(frame);
    }
}
