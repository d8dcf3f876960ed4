//! cpal-backed audio sink
//!
//! The output stream runs on its own thread (cpal streams are not `Send`,
//! so the stream object lives and dies inside the thread that built it).
//! Audio travels through a sample ring guarded by a mutex; the stream
//! callback drains it and signals a condvar so `wait_for_space` wakes as
//! soon as room frees up. DSD is delivered as DoP words to DoP-capable
//! devices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::bounded;

use crate::audio::sink::{Sink, SinkFormat};
use crate::config::SinkConfig;
use crate::constants::SINK_BUFFER_SECS;
use crate::dsd::dop::{dop_pcm_rate, reverse_bits, DopEncoder};
use crate::error::SinkError;

/// How long `open` waits for the stream thread to report readiness
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

struct SinkShared {
    ring: Mutex<VecDeque<i32>>,
    space: Condvar,
    /// Ring capacity in samples for the currently open format
    capacity: AtomicUsize,
    open: AtomicBool,
    paused: AtomicBool,
    stop: AtomicBool,
    underruns: AtomicU64,
    frames_pushed: AtomicU64,
    s24_pack: AtomicBool,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            space: Condvar::new(),
            capacity: AtomicUsize::new(0),
            open: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            frames_pushed: AtomicU64::new(0),
            s24_pack: AtomicBool::new(false),
        }
    }

    /// Fill an output buffer from the ring; silence when paused or dry
    fn fill(&self, out: &mut [i32]) {
        if self.paused.load(Ordering::Relaxed) {
            out.fill(0);
            return;
        }

        let mut ring = self.ring.lock().unwrap();
        let take = ring.len().min(out.len());
        for slot in out[..take].iter_mut() {
            *slot = ring.pop_front().unwrap_or(0);
        }
        out[take..].fill(0);

        if take < out.len() && self.open.load(Ordering::Relaxed) {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        drop(ring);
        self.space.notify_all();
    }
}

/// State of the currently open format, owned by the sender side
enum OpenState {
    Pcm,
    Dsd { lsb_first: bool, encoder: DopEncoder },
}

struct Inner {
    enabled: bool,
    config: SinkConfig,
    device_name: Option<String>,
    open_state: Option<OpenState>,
    stream_thread: Option<JoinHandle<()>>,
}

/// cpal implementation of the sink contract
pub struct CpalSink {
    shared: Arc<SinkShared>,
    inner: Mutex<Inner>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SinkShared::new()),
            inner: Mutex::new(Inner {
                enabled: false,
                config: SinkConfig::default(),
                device_name: None,
                open_state: None,
                stream_thread: None,
            }),
        }
    }

    fn stop_stream(&self, inner: &mut Inner) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = inner.stream_thread.take() {
            let _ = handle.join();
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.ring.lock().unwrap().clear();
        self.shared.space.notify_all();
        inner.open_state = None;
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CpalSink {
    fn enable(&self, config: &SinkConfig) -> Result<(), SinkError> {
        let device = resolve_output_device(config.target)?;
        let name = device
            .name()
            .map_err(|e| SinkError::TargetNotFound(e.to_string()))?;

        tracing::info!("Sink target: {}", name);
        tracing::debug!(
            "Sink tuning: thread_mode={} cycle_time={}us mtu={} info_cycle={}us \
             cycle_min={}us profile_limit={}us transfer={}",
            config.thread_mode,
            config.cycle_time_us,
            config.mtu,
            config.info_cycle_us,
            config.cycle_min_time_us,
            config.target_profile_limit_time_us,
            config.transfer_mode.name()
        );

        let mut inner = self.inner.lock().unwrap();
        inner.enabled = true;
        inner.config = config.clone();
        inner.device_name = Some(name);
        Ok(())
    }

    fn open(&self, format: &SinkFormat) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.enabled {
            return Err(SinkError::NotEnabled);
        }

        // A previous track may still hold the stream
        self.stop_stream(&mut inner);

        let (pcm_rate, channels, open_state) = match *format {
            SinkFormat::Pcm {
                sample_rate,
                channels,
            } => (sample_rate, channels, OpenState::Pcm),
            SinkFormat::Dsd {
                rate,
                channels,
                lsb_first,
            } => (
                dop_pcm_rate(rate),
                channels,
                OpenState::Dsd {
                    lsb_first,
                    encoder: DopEncoder::new(channels),
                },
            ),
        };

        let capacity = (pcm_rate as f32 * SINK_BUFFER_SECS) as usize * channels as usize;
        self.shared.capacity.store(capacity, Ordering::Release);
        // Open resets sink state; the pack hint is re-applied by the caller
        self.shared.s24_pack.store(false, Ordering::Release);
        self.shared.frames_pushed.store(0, Ordering::Release);

        let device = resolve_device_by_name(inner.device_name.as_deref())?;
        let shared = Arc::clone(&self.shared);
        let (ready_tx, ready_rx) = bounded::<Result<(), SinkError>>(1);

        let handle = thread::Builder::new()
            .name("sink-output".to_string())
            .spawn(move || {
                run_output_stream(device, pcm_rate, channels, shared, ready_tx);
            })
            .map_err(|e| SinkError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                self.shared.stop.store(true, Ordering::Release);
                let _ = handle.join();
                self.shared.stop.store(false, Ordering::Release);
                return Err(SinkError::StreamError(
                    "output stream did not start in time".to_string(),
                ));
            }
        }

        inner.stream_thread = Some(handle);
        inner.open_state = Some(open_state);
        self.shared.open.store(true, Ordering::Release);

        match *format {
            SinkFormat::Pcm {
                sample_rate,
                channels,
            } => tracing::info!("Sink open: {} Hz, {} ch PCM", sample_rate, channels),
            SinkFormat::Dsd { rate, channels, .. } => tracing::info!(
                "Sink open: DSD {} Hz over DoP at {} Hz, {} ch",
                rate,
                pcm_rate,
                channels
            ),
        }
        Ok(())
    }

    fn send_audio(&self, data: &[u8], frames: usize) -> Result<usize, SinkError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(open_state) = inner.open_state.as_mut() else {
            return Err(SinkError::NotOpen);
        };

        let mut samples: Vec<i32> = Vec::new();
        match open_state {
            OpenState::Pcm => {
                samples.reserve(data.len() / 4);
                for word in data.chunks_exact(4) {
                    samples.push(i32::from_ne_bytes([word[0], word[1], word[2], word[3]]));
                }
            }
            OpenState::Dsd { lsb_first, encoder } => {
                if *lsb_first {
                    let mut corrected = data.to_vec();
                    reverse_bits(&mut corrected);
                    encoder.encode_planar(&corrected, &mut samples);
                } else {
                    encoder.encode_planar(data, &mut samples);
                }
            }
        }
        drop(inner);

        let mut ring = self.shared.ring.lock().unwrap();
        ring.extend(samples);
        drop(ring);

        self.shared
            .frames_pushed
            .fetch_add(frames as u64, Ordering::Relaxed);
        Ok(frames)
    }

    fn buffer_level(&self) -> f32 {
        let capacity = self.shared.capacity.load(Ordering::Acquire);
        if capacity == 0 {
            return 0.0;
        }
        let len = self.shared.ring.lock().unwrap().len();
        (len as f32 / capacity as f32).min(1.0)
    }

    fn buffer_size_bytes(&self) -> u32 {
        (self.shared.capacity.load(Ordering::Acquire) * 4) as u32
    }

    fn buffer_fill_bytes(&self) -> u32 {
        (self.shared.ring.lock().unwrap().len() * 4) as u32
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        tracing::debug!("Sink paused");
    }

    fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        tracing::debug!("Sink resumed");
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    fn is_playing(&self) -> bool {
        self.shared.open.load(Ordering::Acquire) && !self.is_paused()
    }

    fn wait_for_space(&self, timeout: Duration) -> bool {
        let capacity = self.shared.capacity.load(Ordering::Acquire);
        let ring = self.shared.ring.lock().unwrap();
        if ring.len() < capacity {
            return true;
        }
        let (ring, _) = self.shared.space.wait_timeout(ring, timeout).unwrap();
        ring.len() < capacity
    }

    fn set_s24_pack_hint(&self, enabled: bool) {
        self.shared.s24_pack.store(enabled, Ordering::Release);
    }

    fn stop_playback(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.stop_stream(&mut inner);
        tracing::debug!("Sink playback stopped");
    }

    fn dump_stats(&self) {
        let inner = self.inner.lock().unwrap();
        tracing::info!(
            "Sink stats: frames_pushed={} underruns={} level={:.2} transfer={}",
            self.shared.frames_pushed.load(Ordering::Relaxed),
            self.shared.underruns.load(Ordering::Relaxed),
            self.buffer_level(),
            inner.config.transfer_mode.name()
        );
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.stop_stream(&mut inner);
        tracing::debug!("Sink closed");
    }

    fn disable(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.stop_stream(&mut inner);
        inner.enabled = false;
        inner.device_name = None;
        tracing::debug!("Sink disabled");
    }
}

// ----------------------------------------------------------------------
// Stream thread
// ----------------------------------------------------------------------

fn run_output_stream(
    device: cpal::Device,
    sample_rate: u32,
    channels: u32,
    shared: Arc<SinkShared>,
    ready_tx: crossbeam_channel::Sender<Result<(), SinkError>>,
) {
    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let sample_format = pick_sample_format(&device, sample_rate, channels);

    let stream = match sample_format {
        SampleFormat::I32 => {
            let cb_shared = Arc::clone(&shared);
            device.build_output_stream(
                &config,
                move |data: &mut [i32], _: &cpal::OutputCallbackInfo| {
                    cb_shared.fill(data);
                },
                |err| tracing::error!("Sink stream error: {}", err),
                None,
            )
        }
        _ => {
            let cb_shared = Arc::clone(&shared);
            let mut staging: Vec<i32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    staging.resize(data.len(), 0);
                    cb_shared.fill(&mut staging);
                    for (dst, &src) in data.iter_mut().zip(staging.iter()) {
                        *dst = src as f32 / 2_147_483_648.0;
                    }
                },
                |err| tracing::error!("Sink stream error: {}", err),
                None,
            )
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(SinkError::StreamError(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(SinkError::StreamError(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Keep the thread alive while the stream plays; the stream drops with
    // the thread
    while !shared.stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(10));
    }
}

/// Prefer a native 32-bit integer path; fall back to f32 conversion
fn pick_sample_format(device: &cpal::Device, sample_rate: u32, channels: u32) -> SampleFormat {
    let rate = SampleRate(sample_rate);
    let supports_i32 = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| {
                c.sample_format() == SampleFormat::I32
                    && c.channels() as u32 >= channels
                    && rate >= c.min_sample_rate()
                    && rate <= c.max_sample_rate()
            })
        })
        .unwrap_or(false);

    if supports_i32 {
        SampleFormat::I32
    } else {
        SampleFormat::F32
    }
}

// ----------------------------------------------------------------------
// Device selection
// ----------------------------------------------------------------------

fn resolve_output_device(target: usize) -> Result<cpal::Device, SinkError> {
    let host = cpal::default_host();

    if target == 0 {
        return host
            .default_output_device()
            .ok_or_else(|| SinkError::TargetNotFound("no default output device".to_string()));
    }

    let devices = host
        .output_devices()
        .map_err(|e| SinkError::TargetNotFound(e.to_string()))?;
    devices
        .into_iter()
        .nth(target - 1)
        .ok_or_else(|| SinkError::TargetNotFound(format!("target index {}", target)))
}

fn resolve_device_by_name(name: Option<&str>) -> Result<cpal::Device, SinkError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| SinkError::TargetNotFound("no default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| SinkError::TargetNotFound(e.to_string()))?;
    for device in devices {
        if device.name().as_deref().ok() == Some(name) {
            return Ok(device);
        }
    }
    Err(SinkError::TargetNotFound(name.to_string()))
}

/// Print the available output targets with their 1-based indices
pub fn list_targets() {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = match host.output_devices() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to enumerate output devices: {}", e);
            return;
        }
    };

    let mut index = 0;
    for device in devices {
        index += 1;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let default_marker = if Some(&name) == default_name.as_ref() {
            " [DEFAULT]"
        } else {
            ""
        };
        println!("  Target #{}: {}{}", index, name, default_marker);

        if let Ok(configs) = device.supported_output_configs() {
            let mut rates: Vec<u32> = Vec::new();
            let mut channels: Vec<u16> = Vec::new();
            for config in configs {
                for rate in [44_100u32, 48_000, 88_200, 96_000, 176_400, 192_000, 352_800, 384_000]
                {
                    let r = SampleRate(rate);
                    if r >= config.min_sample_rate()
                        && r <= config.max_sample_rate()
                        && !rates.contains(&rate)
                    {
                        rates.push(rate);
                    }
                }
                if !channels.contains(&config.channels()) {
                    channels.push(config.channels());
                }
            }
            rates.sort_unstable();
            channels.sort_unstable();
            println!("    Sample rates: {:?}", rates);
            println!("    Channels: {:?}", channels);
        }
    }

    if index == 0 {
        println!("  No output devices found");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_outputs_silence_when_paused() {
        let shared = SinkShared::new();
        shared.ring.lock().unwrap().extend([1, 2, 3, 4]);
        shared.paused.store(true, Ordering::Release);

        let mut out = [9i32; 4];
        shared.fill(&mut out);
        assert_eq!(out, [0, 0, 0, 0]);
        // Paused fill must not consume queued audio
        assert_eq!(shared.ring.lock().unwrap().len(), 4);
    }

    #[test]
    fn fill_drains_ring_and_pads_silence() {
        let shared = SinkShared::new();
        shared.ring.lock().unwrap().extend([1, 2]);

        let mut out = [9i32; 4];
        shared.fill(&mut out);
        assert_eq!(out, [1, 2, 0, 0]);
        assert!(shared.ring.lock().unwrap().is_empty());
    }

    #[test]
    fn send_before_open_is_rejected() {
        let sink = CpalSink::new();
        assert!(matches!(
            sink.send_audio(&[0; 8], 1),
            Err(SinkError::NotOpen)
        ));
    }

    #[test]
    fn open_before_enable_is_rejected() {
        let sink = CpalSink::new();
        let format = SinkFormat::Pcm {
            sample_rate: 44_100,
            channels: 2,
        };
        assert!(matches!(sink.open(&format), Err(SinkError::NotEnabled)));
    }
}
