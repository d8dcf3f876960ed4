//! Real-time audio sink facade
//!
//! The pipeline only ever talks to this trait. The sink owns its own
//! real-time scheduling; the pipeline's sole obligation is to keep the
//! buffer from under- or overflowing, guided by `buffer_level` and
//! `wait_for_space`. All methods are callable from any thread.

use std::time::Duration;

use crate::config::SinkConfig;
use crate::error::SinkError;

/// Format negotiated when a track opens the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    /// Interleaved 32-bit MSB-aligned PCM
    Pcm { sample_rate: u32, channels: u32 },
    /// Planar 1-bit DSD at the given bit rate
    Dsd {
        rate: u32,
        channels: u32,
        /// DSF-sourced data carries bits LSB-first within each byte
        lsb_first: bool,
    },
}

impl SinkFormat {
    pub fn channels(&self) -> u32 {
        match self {
            Self::Pcm { channels, .. } | Self::Dsd { channels, .. } => *channels,
        }
    }
}

/// Opaque real-time audio sink.
///
/// `send_audio` consumes bytes in the layout of the open format:
/// interleaved native-endian 32-bit words for PCM, planar byte runs for
/// DSD. `frames` counts frames (PCM) or bytes per channel (DSD).
pub trait Sink: Send + Sync {
    /// Bind the sink to its output target. Called once at startup;
    /// failure is process-fatal.
    fn enable(&self, config: &SinkConfig) -> Result<(), SinkError>;

    /// Open for a new track's format. Resets sink state, including the
    /// pack-mode hint, which callers re-apply afterwards.
    fn open(&self, format: &SinkFormat) -> Result<(), SinkError>;

    /// Queue audio; returns the number of frames accepted
    fn send_audio(&self, data: &[u8], frames: usize) -> Result<usize, SinkError>;

    /// Buffer fill ratio in [0.0, 1.0]
    fn buffer_level(&self) -> f32;

    /// Buffer capacity and fill in bytes, for telemetry
    fn buffer_size_bytes(&self) -> u32;
    fn buffer_fill_bytes(&self) -> u32;

    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn is_playing(&self) -> bool;

    /// Block until the sink frees space or the timeout elapses; returns
    /// true when space is available
    fn wait_for_space(&self, timeout: Duration) -> bool;

    /// 24-bit packing hint; `open` resets it, so it must be re-applied
    /// after every open
    fn set_s24_pack_hint(&self, enabled: bool);

    /// Stop the current track but keep the output target bound. Preferred
    /// over `close` between tracks: closing may tear down a persistent
    /// session to the downstream target.
    fn stop_playback(&self);

    /// Log throughput and underrun statistics
    fn dump_stats(&self);

    /// Release the output stream
    fn close(&self);

    /// Release the output target entirely
    fn disable(&self);
}
