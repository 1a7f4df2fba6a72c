//! State shared by every raw sensor

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use contracts::{
    system_time_ms, AdditionalData, AdditionalDataParser, CameraInfo, DeviceOwner, Format, Frame, FrameCallback,
    InfoContainer, MetadataId, MetadataParser, MetadataParserMap, NotificationCallback, OptionId,
    OptionsContainer, PhysicalProfile, ProfileTag, RawFrame, Result, SampleContext, SensorError, SensorName,
    SharedFourccMap, StreamProfile, StreamType, TimestampReader,
};
use frame_archive::FrameSource;
use tracing::{debug, warn};

use crate::production::log_callback_end;
use crate::{NotificationsProcessor, StreamingChangeCallback, StreamingChangeSignal};

/// Called with the committed physical profiles once a UVC open succeeds
pub type OnOpenHook = Box<dyn Fn(&[PhysicalProfile]) + Send + Sync>;

/// Adjusts per-frame bookkeeping before timestamps are derived
pub type MetadataModifier = Box<dyn Fn(&mut AdditionalData) + Send + Sync>;

/// Previous (timestamp, frame number) of one stream
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LastSeen {
    pub timestamp: f64,
    pub frame_number: u64,
}

/// Default in-flight frame limit
pub const DEFAULT_FRAMES_QUEUE_SIZE: u32 = 16;

pub struct SensorBase {
    name: SensorName,
    owner: Arc<dyn DeviceOwner>,
    streaming: AtomicBool,
    opened: AtomicBool,
    source: FrameSource,
    /// Sensor whose name is stamped on produced frames (the synthetic wrapper, if any)
    source_owner: Mutex<SensorName>,
    metadata_parsers: Arc<MetadataParserMap>,
    options: OptionsContainer,
    info: RwLock<InfoContainer>,
    active_profiles: Mutex<Vec<StreamProfile>>,
    profiles: Mutex<Option<Vec<StreamProfile>>>,
    before_streaming_changes: StreamingChangeSignal,
    notifications: Arc<NotificationsProcessor>,
    fourcc_map: SharedFourccMap,
    on_open: Mutex<Option<OnOpenHook>>,
    metadata_modifier: RwLock<Option<MetadataModifier>>,
}

impl SensorBase {
    pub fn new(name: SensorName, owner: Arc<dyn DeviceOwner>, fourcc_map: SharedFourccMap) -> Self {
        let source = FrameSource::new(DEFAULT_FRAMES_QUEUE_SIZE);
        let options = OptionsContainer::new();
        options.register(OptionId::FramesQueueSize, source.queue_size_option());

        let metadata_parsers = Arc::new(MetadataParserMap::new());
        metadata_parsers.register(MetadataId::TimeOfArrival, Arc::new(AdditionalDataParser::time_of_arrival()));

        let mut info = InfoContainer::new();
        info.register_info(CameraInfo::Name, name.as_str());

        Self {
            source_owner: Mutex::new(name.clone()),
            name,
            owner,
            streaming: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            source,
            metadata_parsers,
            options,
            info: RwLock::new(info),
            active_profiles: Mutex::new(Vec::new()),
            profiles: Mutex::new(None),
            before_streaming_changes: StreamingChangeSignal::new(),
            notifications: Arc::new(NotificationsProcessor::new()),
            fourcc_map,
            on_open: Mutex::new(None),
            metadata_modifier: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &SensorName {
        &self.name
    }

    pub fn owner(&self) -> &Arc<dyn DeviceOwner> {
        &self.owner
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    // ===== State =====

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::SeqCst);
    }

    pub(crate) fn set_opened(&self, opened: bool) {
        self.opened.store(opened, Ordering::SeqCst);
    }

    // ===== Info =====

    /// Sensor entry first, then the owning device
    pub fn get_info(&self, info: CameraInfo) -> Result<String> {
        if let Some(value) = self.info.read().unwrap_or_else(PoisonError::into_inner).get_info(info) {
            return Ok(value.to_string());
        }
        self.owner
            .get_info(info)
            .ok_or_else(|| SensorError::invalid_value(format!("Selected camera info ({info}) is not supported")))
    }

    pub fn supports_info(&self, info: CameraInfo) -> bool {
        self.info.read().unwrap_or_else(PoisonError::into_inner).supports_info(info) || self.owner.get_info(info).is_some()
    }

    pub fn register_info(&self, info: CameraInfo, value: impl Into<String>) {
        self.info
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_info(info, value);
    }

    // ===== Options / metadata =====

    pub fn options(&self) -> &OptionsContainer {
        &self.options
    }

    pub fn register_metadata(&self, id: MetadataId, parser: Arc<dyn MetadataParser>) {
        self.metadata_parsers.register(id, parser);
    }

    pub fn metadata_parsers(&self) -> Arc<MetadataParserMap> {
        self.metadata_parsers.clone()
    }

    // ===== Profiles =====

    /// Profiles filtered by tag. The full list is built on first use by `init`
    /// and tagged by the owner.
    pub fn get_stream_profiles<F>(&self, tag: ProfileTag, init: F) -> Result<Vec<StreamProfile>>
    where
        F: FnOnce() -> Result<Vec<StreamProfile>>,
    {
        let mut cache = self.profiles.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.is_none() {
            let mut profiles = init()?;
            self.owner.tag_profiles(&mut profiles);
            *cache = Some(profiles);
        }
        let all = cache.as_deref().unwrap_or_default();

        let need_debug = tag.contains(ProfileTag::DEBUG);
        let need_any = tag.contains(ProfileTag::ANY);
        Ok(all
            .iter()
            .filter(|p| need_debug || !p.tag.contains(ProfileTag::DEBUG))
            .filter(|p| need_any || p.tag.bits() & tag.bits() != 0)
            .copied()
            .collect())
    }

    pub fn get_active_streams(&self) -> Vec<StreamProfile> {
        self.active_profiles.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_active_streams(&self, profiles: &[StreamProfile]) {
        *self.active_profiles.lock().unwrap_or_else(PoisonError::into_inner) = profiles.to_vec();
    }

    // ===== Fourcc =====

    pub fn fourcc_map(&self) -> &SharedFourccMap {
        &self.fourcc_map
    }

    pub fn fourcc_to_format(&self, fourcc: contracts::Fourcc) -> Format {
        self.fourcc_map.format_of(fourcc)
    }

    pub fn fourcc_to_stream(&self, fourcc: contracts::Fourcc) -> StreamType {
        self.fourcc_map.stream_of(fourcc)
    }

    // ===== Callbacks =====

    pub fn get_frames_callback(&self) -> Option<FrameCallback> {
        self.source.get_callback()
    }

    pub fn set_frames_callback(&self, callback: FrameCallback) {
        self.source.set_callback(callback);
    }

    pub fn notifications(&self) -> &Arc<NotificationsProcessor> {
        &self.notifications
    }

    /// Enables error polling when the sensor exposes that control
    pub fn register_notifications_callback(&self, callback: NotificationCallback) {
        if let Ok(option) = self.options.get(OptionId::ErrorPollingEnabled) {
            if let Err(e) = option.set(1.0) {
                warn!(sensor = %self.name, error = %e, "failed to enable error polling");
            }
        }
        self.notifications.set_callback(callback);
    }

    pub fn get_notifications_callback(&self) -> Option<NotificationCallback> {
        self.notifications.get_callback()
    }

    pub fn register_before_streaming_changes_callback(&self, callback: StreamingChangeCallback) -> u64 {
        let token = self.before_streaming_changes.subscribe(callback);
        debug!(sensor = %self.name, token, "registered on_before_streaming_changes callback");
        token
    }

    pub fn unregister_before_start_callback(&self, token: u64) {
        if !self.before_streaming_changes.unsubscribe(token) {
            warn!(sensor = %self.name, token, "failed to unregister on_before_streaming_changes token");
        }
    }

    pub(crate) fn raise_on_before_streaming_changes(&self, streaming: bool) {
        self.before_streaming_changes.raise(streaming);
    }

    // ===== Hooks =====

    pub fn set_on_open(&self, hook: OnOpenHook) {
        *self.on_open.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn run_on_open(&self, committed: &[PhysicalProfile]) {
        if let Some(hook) = self.on_open.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            hook(committed);
        }
    }

    pub fn set_metadata_modifier(&self, modifier: MetadataModifier) {
        *self.metadata_modifier.write().unwrap_or_else(PoisonError::into_inner) = Some(modifier);
    }

    pub fn set_source_owner(&self, owner: SensorName) {
        *self.source_owner.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    pub fn source_owner(&self) -> SensorName {
        self.source_owner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// (Re)create the archives and stamp frames with the source owner's name
    pub(crate) fn init_source(&self) {
        self.source.init(self.metadata_parsers.clone());
        self.source.set_sensor(self.source_owner());
    }

    // ===== Frame bookkeeping =====

    /// Build the additional data of one sample and derive its timestamp and counter
    pub(crate) fn generate_additional_data(
        &self,
        raw: &RawFrame<'_>,
        profile: &StreamProfile,
        reader: &dyn TimestampReader,
        last: LastSeen,
        system_time: f64,
    ) -> AdditionalData {
        let (width, height) = profile.dimensions().unwrap_or((0, 0));
        let raw_size = contracts::compute_frame_expected_size(width, height, profile.format.bits_per_pixel());

        let mut additional = AdditionalData {
            system_time,
            metadata: raw.metadata.to_vec(),
            backend_timestamp: raw.backend_time,
            last_timestamp: last.timestamp,
            last_frame_number: last.frame_number,
            raw_size: raw_size as u32,
            ..Default::default()
        };

        if let Some(modifier) = self
            .metadata_modifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            modifier(&mut additional);
        }

        let sample = SampleContext {
            profile,
            additional: &additional,
        };
        let timestamp = reader.get_frame_timestamp(&sample);
        let frame_number = reader.get_frame_counter(&sample);
        additional.timestamp = timestamp;
        additional.frame_number = frame_number;
        additional
    }

    /// Invoke the user callback on a fully built frame and account for it
    pub(crate) fn deliver(&self, frame: Frame, profile: &StreamProfile) {
        let frame_number = frame.frame_number();
        let callback_start = system_time_ms();
        let guard = self.source.begin_callback(frame.extension());
        let delivered = self.source.invoke_callback(frame);
        drop(guard);
        log_callback_end(profile.fps, callback_start, profile.stream, frame_number);
        if delivered {
            observability::record_frame_delivered(self.name.as_str(), profile.stream.as_str());
        }
    }
}

/// Reject duplicate stream types, and mismatched GYRO / ACCEL rates when
/// both travel on one bus
pub fn verify_supported_requests(requests: &[StreamProfile], shared_imu_bus: bool) -> Result<()> {
    let mut by_stream: BTreeMap<StreamType, u32> = BTreeMap::new();
    for request in requests {
        by_stream.insert(request.stream, request.fps);
    }
    if by_stream.len() < requests.len() {
        return Err(SensorError::configuration("Wrong configuration requested"));
    }

    if !shared_imu_bus {
        return Ok(());
    }
    if let (Some(gyro), Some(accel)) = (by_stream.get(&StreamType::Gyro), by_stream.get(&StreamType::Accel)) {
        if gyro != accel {
            return Err(SensorError::configuration(
                "Wrong configuration requested - GYRO and ACCEL streams' fps to be equal for this device",
            ));
        }
    }
    Ok(())
}
