//! Background frame generation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BufMut;
use contracts::{compute_frame_expected_size, Format, HidHeader, PhysicalProfile, SharedFourccMap};
use rand::Rng;
use tracing::{debug, trace};

use crate::{MockHidDevice, MockUvcDevice};

/// Standard gravity, reported on the accelerometer Y axis
const GRAVITY: f32 = 9.80665;

/// UVC motion samples travel in fixed 64-byte buffers
const UVC_MOTION_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Ticks per second; every tick emits one buffer per active mode / sensor
    pub rate_hz: f64,
    /// Amplitude of the uniform noise added to motion samples
    pub motion_noise: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            motion_noise: 0.01,
        }
    }
}

/// `x y z` as little-endian f32 with uniform noise
pub fn motion_sample(x: f32, y: f32, z: f32, noise: f32) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut jitter = || if noise > 0.0 { rng.random_range(-noise..noise) } else { 0.0 };
    let mut buf = Vec::with_capacity(12);
    buf.put_f32_le(x + jitter());
    buf.put_f32_le(y + jitter());
    buf.put_f32_le(z + jitter());
    buf
}

/// Deterministic payload for a video or motion mode
pub fn synth_payload(mode: &PhysicalProfile, format: Format, frame_id: u64, noise: f32) -> Vec<u8> {
    if format.is_motion() {
        let mut buf = motion_sample(0.0, -GRAVITY, 0.0, noise);
        buf.resize(UVC_MOTION_BUFFER, 0);
        return buf;
    }
    let size = compute_frame_expected_size(mode.width, mode.height, format.bits_per_pixel());
    let size = if format.is_compressed() { size / 2 } else { size };
    (0..size).map(|i| (i as u64).wrapping_add(frame_id) as u8).collect()
}

/// Thread that feeds a mock transport until stopped.
///
/// Mirrors a transport's streaming thread: buffers are produced on a foreign
/// thread and handed to whatever callback the sensor registered.
pub struct FrameGenerator {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl FrameGenerator {
    fn spawn<F>(name: &'static str, rate_hz: f64, mut tick: F) -> Self
    where
        F: FnMut(u64, f64) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let interval = Duration::from_secs_f64(1.0 / rate_hz.max(0.1));

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let mut frame_id: u64 = 0;
            debug!(generator = name, rate_hz, "mock generator started");
            while flag.load(Ordering::Relaxed) {
                frame_id += 1;
                let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;
                tick(frame_id, elapsed_us);
                trace!(generator = name, frame_id, "tick");
                thread::sleep(interval);
            }
            debug!(generator = name, ticks = frame_id, "mock generator stopped");
            frame_id
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Emit one buffer per committed mode of `device` each tick
    pub fn uvc(device: Arc<MockUvcDevice>, fourcc_map: SharedFourccMap, config: GeneratorConfig) -> Self {
        Self::spawn("uvc", config.rate_hz, move |frame_id, elapsed_us| {
            for mode in device.committed() {
                let format = fourcc_map.format_of(mode.fourcc);
                let payload = synth_payload(&mode, format, frame_id, config.motion_noise);
                device.inject_frame(mode, &payload, &[], elapsed_us / 1000.0);
            }
        })
    }

    /// Emit one sample per listed HID sensor each tick, with a HID header
    /// carrying the device timestamp (µs)
    pub fn hid(device: Arc<MockHidDevice>, sensors: Vec<String>, config: GeneratorConfig) -> Self {
        Self::spawn("hid", config.rate_hz, move |_, elapsed_us| {
            let header = HidHeader {
                length: HidHeader::SIZE as u8,
                report_type: 0,
                timestamp: elapsed_us as u64,
            }
            .encode();
            for sensor in &sensors {
                let sample = if sensor.contains("accel") {
                    motion_sample(0.0, -GRAVITY, 0.0, config.motion_noise)
                } else {
                    motion_sample(0.0, 0.0, 0.0, config.motion_noise)
                };
                device.inject_sample(sensor, &sample, &header);
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop and join; returns the number of ticks emitted
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for FrameGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
