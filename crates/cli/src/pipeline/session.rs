//! Streaming session: open, start and feed the selected sensors, then
//! collect frames until a frame budget, a timeout or a shutdown signal.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{system_time_ms, Frame, ProfileTag, StreamProfile, TimestampDomain};
use mock_backend::FrameGenerator;
use observability::StreamMetricsAggregator;
use sensor::Sensor;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{DeviceRig, SensorRig, SessionStats};
use crate::error::{CliError, Result};

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Generator ticks per second for every transport
    pub rate_hz: f64,

    /// Stop after this many frames (None = unlimited)
    pub max_frames: Option<u64>,

    /// Stop after this long (None = no timeout)
    pub timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            max_frames: None,
            timeout: None,
        }
    }
}

/// What the frame callback forwards to the session loop
struct FrameEvent {
    stream: String,
    timestamp_ms: f64,
    bytes: usize,
    latency_ms: Option<f64>,
}

impl FrameEvent {
    fn from_frame(sensor: &str, frame: &Frame) -> Self {
        let stream = match frame.profile() {
            Some(p) if p.index != 0 => format!("{sensor}/{} {}", p.stream, p.index),
            Some(p) => format!("{sensor}/{}", p.stream),
            None => format!("{sensor}/unknown"),
        };
        let latency_ms = (frame.timestamp_domain() == TimestampDomain::SystemTime)
            .then(|| system_time_ms() - frame.timestamp());
        Self {
            stream,
            timestamp_ms: frame.timestamp(),
            bytes: frame.len(),
            latency_ms,
        }
    }
}

/// One profile per (stream, index): the best-ranked one running at the
/// frame rate of the overall best profile, or the best-ranked one otherwise.
///
/// `profiles` must already be in catalog order.
pub fn select_default_requests(profiles: &[StreamProfile]) -> Vec<StreamProfile> {
    let Some(reference_fps) = profiles.first().map(|p| p.fps) else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for profile in profiles {
        let key = (profile.stream, profile.index);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    keys.into_iter()
        .filter_map(|(stream, index)| {
            let mut candidates = profiles.iter().filter(|p| p.stream == stream && p.index == index);
            let first = candidates.clone().next().copied();
            candidates.find(|p| p.fps == reference_fps).copied().or(first)
        })
        .collect()
}

/// Streaming session over a subset of a device's sensors
pub struct Session<'a> {
    sensors: Vec<&'a SensorRig>,
    config: SessionConfig,
}

impl<'a> Session<'a> {
    /// `names` selects sensors by name; empty selects every sensor
    pub fn new(rig: &'a DeviceRig, names: &[String], config: SessionConfig) -> Result<Self> {
        let sensors = if names.is_empty() {
            rig.sensors().iter().collect()
        } else {
            names
                .iter()
                .map(|name| rig.sensor(name).ok_or_else(|| CliError::sensor_not_found(name.as_str())))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self { sensors, config })
    }

    /// Run until the frame budget, the timeout or `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<SessionStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<FrameEvent>();

        let mut started: Vec<&SensorRig> = Vec::new();
        for rig in &self.sensors {
            if let Err(e) = start_sensor(rig, tx.clone()) {
                teardown(&started);
                if rig.sensor().is_opened() {
                    teardown(&[*rig]);
                }
                return Err(e);
            }
            started.push(*rig);
        }
        drop(tx);

        let mut generators: Vec<FrameGenerator> = started
            .iter()
            .map(|rig| rig.start_generator(self.config.rate_hz))
            .collect();
        info!(sensors = started.len(), rate_hz = self.config.rate_hz, "session streaming");

        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        let mut streams = StreamMetricsAggregator::new();
        let mut frames_received: u64 = 0;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        warn!("all frame callbacks were released");
                        break;
                    };
                    frames_received += 1;
                    streams.record_frame(&event.stream, event.timestamp_ms, event.bytes, event.latency_ms);
                    if self.config.max_frames.is_some_and(|max| frames_received >= max) {
                        info!(frames_received, "frame budget reached");
                        break;
                    }
                }
                _ = &mut deadline => {
                    info!("session timeout reached");
                    break;
                }
                _ = &mut shutdown => {
                    warn!("shutdown requested, stopping session");
                    break;
                }
            }
        }

        for generator in &mut generators {
            generator.stop();
        }
        teardown(&started);

        Ok(SessionStats {
            frames_received,
            duration: start_time.elapsed(),
            active_sensors: started.len(),
            archives: started
                .iter()
                .map(|rig| (rig.name().to_string(), rig.archive_stats().snapshot()))
                .collect(),
            streams,
        })
    }
}

fn start_sensor(rig: &SensorRig, tx: mpsc::UnboundedSender<FrameEvent>) -> Result<()> {
    let sensor = rig.sensor();
    let profiles = sensor.get_stream_profiles(ProfileTag::ANY)?;
    let requests = select_default_requests(&profiles);
    if requests.is_empty() {
        return Err(CliError::NoProfiles {
            sensor: rig.name().to_string(),
        });
    }
    for request in &requests {
        info!(sensor = %rig.name(), profile = %request.describe(), "requesting profile");
    }

    sensor.open(&requests)?;
    let name = rig.name().to_string();
    sensor.start(Arc::new(move |frame: Frame| {
        // receiver gone means the session is shutting down
        let _ = tx.send(FrameEvent::from_frame(&name, &frame));
    }))?;
    Ok(())
}

/// Stop and close, logging failures; teardown must reach every sensor
fn teardown(rigs: &[&SensorRig]) {
    for rig in rigs {
        let sensor = rig.sensor();
        if sensor.is_streaming() {
            if let Err(e) = sensor.stop() {
                error!(sensor = %rig.name(), error = %e, "failed to stop sensor");
            }
        }
        if sensor.is_opened() {
            if let Err(e) = sensor.close() {
                error!(sensor = %rig.name(), error = %e, "failed to close sensor");
            }
        }
    }
}
