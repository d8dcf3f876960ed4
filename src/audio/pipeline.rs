//! Per-track ingestion pipeline
//!
//! Every stream-start command spins up one worker thread that owns the
//! whole track: HTTP fetch, decode, cache, pre-buffer, and flow-controlled
//! delivery into the sink. The worker is cancelled co-operatively through
//! an atomic flag plus an HTTP socket shutdown that unblocks any pending
//! read. Per-track events go to the server strictly in order:
//! STMc -> RESP -> STMh -> STMs -> STMl -> ... -> STMd -> STMu, with STMn
//! replacing the terminal pair on stream-fatal errors.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::cache::DecodeCache;
use crate::audio::sink::{Sink, SinkFormat};
use crate::codec::{create_decoder, Decoder};
use crate::constants::{
    CACHE_MAX_SAMPLES, DSD_BUFFER_MAX, DSD_PUSH_BYTES, HTTP_READ_TIMEOUT, PAUSED_POLL,
    PCM_PUSH_FRAMES, PREBUFFER_MS, SINK_FULL_LEVEL, SINK_WAIT_TIMEOUT, WORKER_JOIN_TIMEOUT,
};
use crate::dsd::DsdStreamReader;
use crate::net::http::{HttpStreamClient, ReadOutcome, ShutdownHandle};
use crate::protocol::client::{SessionCounters, SlimprotoClient};
use crate::protocol::messages::{StatEvent, StreamCommand, StreamSubcommand};

/// Drives pipeline workers in response to stream commands
pub struct StreamEngine {
    client: Arc<SlimprotoClient>,
    sink: Arc<dyn Sink>,
    counters: Arc<SessionCounters>,
    dsd_enabled: bool,
    worker: Mutex<Option<Worker>>,
    skip_ms: Arc<AtomicU32>,
    pause_generation: Arc<AtomicU64>,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    http_shutdown: Arc<Mutex<Option<ShutdownHandle>>>,
    handle: JoinHandle<()>,
}

impl StreamEngine {
    pub fn new(client: Arc<SlimprotoClient>, sink: Arc<dyn Sink>, dsd_enabled: bool) -> Self {
        let counters = client.counters();
        Self {
            client,
            sink,
            counters,
            dsd_enabled,
            worker: Mutex::new(None),
            skip_ms: Arc::new(AtomicU32::new(0)),
            pause_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Entry point for stream commands from the control client
    pub fn handle_command(&self, cmd: StreamCommand, http_request: Vec<u8>) {
        match cmd.command {
            StreamSubcommand::Start => self.start_track(cmd, http_request),
            StreamSubcommand::Stop | StreamSubcommand::Flush => {
                self.teardown_worker();
                self.sink.stop_playback();
                self.client.send_stat(StatEvent::Flushed, 0);
            }
            StreamSubcommand::Pause => self.pause(cmd.replay_gain),
            StreamSubcommand::Unpause => {
                self.pause_generation.fetch_add(1, Ordering::SeqCst);
                self.sink.resume();
                self.client.send_stat(StatEvent::Resumed, 0);
            }
            StreamSubcommand::Skip => {
                self.skip_ms.store(cmd.replay_gain, Ordering::Release);
            }
            // Heartbeats are answered inside the control client
            StreamSubcommand::Status => {}
        }
    }

    /// Stop any running worker and release the sink stream
    pub fn shutdown(&self) {
        self.teardown_worker();
        self.sink.stop_playback();
    }

    fn pause(&self, interval_ms: u32) {
        let generation = self.pause_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.pause();

        if interval_ms == 0 {
            self.client.send_stat(StatEvent::Paused, 0);
            return;
        }

        // Timed pause: resume after the interval unless a newer
        // pause/unpause superseded this one. No STMp is sent; the server
        // does not wait on a confirm for timed pauses.
        let sink = Arc::clone(&self.sink);
        let gen_counter = Arc::clone(&self.pause_generation);
        let _ = thread::Builder::new()
            .name("pause-timer".to_string())
            .spawn(move || {
                thread::sleep(Duration::from_millis(interval_ms as u64));
                if gen_counter.load(Ordering::SeqCst) == generation {
                    sink.resume();
                }
            });
    }

    fn start_track(&self, cmd: StreamCommand, http_request: Vec<u8>) {
        self.teardown_worker();
        self.skip_ms.store(0, Ordering::Release);
        self.sink.resume();

        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let http_shutdown = Arc::new(Mutex::new(None));

        let ctx = TrackContext {
            cmd,
            http_request,
            client: Arc::clone(&self.client),
            sink: Arc::clone(&self.sink),
            counters: Arc::clone(&self.counters),
            cancel: Arc::clone(&cancel),
            done: Arc::clone(&done),
            http_shutdown: Arc::clone(&http_shutdown),
            skip_ms: Arc::clone(&self.skip_ms),
            dsd_enabled: self.dsd_enabled,
        };

        let handle = match thread::Builder::new()
            .name("pipeline-worker".to_string())
            .spawn(move || run_track(ctx))
        {
            Ok(h) => h,
            Err(e) => {
                tracing::error!("Failed to spawn pipeline worker: {}", e);
                self.client.send_stat(StatEvent::NotConnected, 0);
                return;
            }
        };

        *self.worker.lock().unwrap() = Some(Worker {
            cancel,
            done,
            http_shutdown,
            handle,
        });
    }

    /// Cancel the current worker, unblock its HTTP read and wait briefly
    /// for it to acknowledge; detach with a warning past the deadline.
    fn teardown_worker(&self) {
        let Some(worker) = self.worker.lock().unwrap().take() else {
            return;
        };

        worker.cancel.store(true, Ordering::Release);
        if let Some(handle) = worker.http_shutdown.lock().unwrap().take() {
            handle.shutdown();
        }

        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !worker.done.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if worker.done.load(Ordering::Acquire) {
            let _ = worker.handle.join();
        } else {
            tracing::warn!("Pipeline worker did not stop within deadline; detaching");
        }
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------

struct TrackContext {
    cmd: StreamCommand,
    http_request: Vec<u8>,
    client: Arc<SlimprotoClient>,
    sink: Arc<dyn Sink>,
    counters: Arc<SessionCounters>,
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    http_shutdown: Arc<Mutex<Option<ShutdownHandle>>>,
    skip_ms: Arc<AtomicU32>,
    dsd_enabled: bool,
}

impl TrackContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

enum TrackOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

fn run_track(ctx: TrackContext) {
    match stream_track(&ctx) {
        TrackOutcome::Completed => {
            // Terminal pair: decoder drained, then end-of-track underrun
            ctx.client.send_stat(StatEvent::DecoderReady, 0);
            ctx.client.send_stat(StatEvent::Underrun, 0);
            tracing::info!("Track finished");
        }
        TrackOutcome::Cancelled => {
            tracing::debug!("Pipeline worker cancelled");
        }
        TrackOutcome::Failed(reason) => {
            tracing::error!("Stream failed: {}", reason);
            ctx.client.send_stat(StatEvent::NotConnected, 0);
        }
    }
    ctx.done.store(true, Ordering::Release);
}

fn stream_track(ctx: &TrackContext) -> TrackOutcome {
    let ip = if ctx.cmd.server_ip == 0 {
        ctx.client.server_ip()
    } else {
        IpAddr::V4(Ipv4Addr::from(ctx.cmd.server_ip))
    };

    let http = match HttpStreamClient::connect(ip, ctx.cmd.server_port, &ctx.http_request) {
        Ok(h) => h,
        Err(e) => return TrackOutcome::Failed(format!("connect {}:{}: {}", ip, ctx.cmd.server_port, e)),
    };
    *ctx.http_shutdown.lock().unwrap() = http.shutdown_handle().ok();

    ctx.client.send_stat(StatEvent::Connect, 0);
    ctx.client.send_resp(http.response_headers().as_bytes());
    ctx.client.send_stat(StatEvent::HeadersReceived, 0);

    ctx.counters.reset_track();

    if ctx.cmd.format == b'd' {
        if !ctx.dsd_enabled {
            return TrackOutcome::Failed("DSD stream requested but DSD is disabled".to_string());
        }
        stream_dsd(ctx, http)
    } else {
        stream_pcm(ctx, http)
    }
}

/// Feed the decoder from HTTP with a short readiness timeout
fn pump_http(
    ctx: &TrackContext,
    http: &mut HttpStreamClient,
    read_buf: &mut [u8],
    feed: &mut dyn FnMut(&[u8]),
    eof: &mut bool,
) -> Result<(), String> {
    match http.read_with_timeout(read_buf, HTTP_READ_TIMEOUT) {
        Ok(ReadOutcome::Data(n)) => {
            feed(&read_buf[..n]);
            ctx.counters.set_stream_bytes(http.bytes_received());
            Ok(())
        }
        Ok(ReadOutcome::Timeout) => Ok(()),
        Ok(ReadOutcome::Eof) => {
            if !*eof {
                tracing::debug!("HTTP stream ended ({} bytes)", http.bytes_received());
            }
            *eof = true;
            Ok(())
        }
        Err(e) => {
            if ctx.cancelled() {
                Err("cancelled".to_string())
            } else {
                Err(format!("http read: {}", e))
            }
        }
    }
}

// ----------------------------------------------------------------------
// PCM branch
// ----------------------------------------------------------------------

fn stream_pcm(ctx: &TrackContext, mut http: HttpStreamClient) -> TrackOutcome {
    let mut decoder = match create_decoder(ctx.cmd.format) {
        Ok(d) => d,
        Err(e) => return TrackOutcome::Failed(e.to_string()),
    };

    // Headerless streams are described by the command itself
    if ctx.cmd.format == b'p' {
        if let (Some(rate), Some(bits), Some(channels)) = (
            ctx.cmd.sample_rate_hz(),
            ctx.cmd.sample_size_bits(),
            ctx.cmd.channel_count(),
        ) {
            decoder.set_raw_pcm_format(rate, bits, channels, ctx.cmd.big_endian().unwrap_or(false));
        }
    }

    let mut cache = DecodeCache::new();
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut drain_buf = vec![0i32; PCM_PUSH_FRAMES * 8];
    let mut http_eof = false;

    // Pre-buffer ~500 ms of decoded material (or to EOF) before the sink
    // is opened
    loop {
        if ctx.cancelled() {
            return TrackOutcome::Cancelled;
        }

        if let Err(e) = pump_http(
            ctx,
            &mut http,
            &mut read_buf,
            &mut |data| {
                decoder.feed(data);
            },
            &mut http_eof,
        ) {
            return fail_or_cancelled(ctx, e);
        }
        if http_eof {
            decoder.set_eof();
        }

        drain_decoder(decoder.as_mut(), &mut cache, &mut drain_buf);
        if decoder.has_error() {
            return TrackOutcome::Failed("decoder error during pre-buffer".to_string());
        }

        if decoder.format_ready() {
            let format = decoder.format();
            let channels = format.channels.max(1) as usize;
            let target_frames = (format.sample_rate as u64 * PREBUFFER_MS / 1000) as usize;
            if cache.available() / channels >= target_frames
                || (http_eof && decoder.is_finished())
            {
                break;
            }
        } else if http_eof && decoder.is_finished() {
            return TrackOutcome::Failed("stream ended before format was determined".to_string());
        }
    }

    let format = decoder.format();
    if format.channels == 0 || format.sample_rate == 0 {
        return TrackOutcome::Failed("decoder produced no usable format".to_string());
    }
    let channels = format.channels as usize;

    if let Err(e) = ctx.sink.open(&SinkFormat::Pcm {
        sample_rate: format.sample_rate,
        channels: format.channels,
    }) {
        return TrackOutcome::Failed(format!("sink open: {}", e));
    }
    // Open resets sink state, so the pack hint goes in again every track
    ctx.sink.set_s24_pack_hint(format.bit_depth == 24);

    ctx.client.send_stat(StatEvent::TrackStarted, 0);
    ctx.client.send_stat(StatEvent::BufferThreshold, 0);

    // The sink starts empty: the prebuffer cannot overflow it
    let mut consumed_frames: u64 = 0;
    while cache.available() >= channels {
        consumed_frames += push_pcm_chunk(ctx.sink.as_ref(), &mut cache, channels) as u64;
    }

    // Steady state
    loop {
        if ctx.cancelled() {
            return TrackOutcome::Cancelled;
        }

        let skip = ctx.skip_ms.swap(0, Ordering::AcqRel);
        if skip > 0 {
            let frames = (skip as u64 * format.sample_rate as u64 / 1000) as usize;
            let samples = (frames * channels).min(cache.available() / channels * channels);
            cache.advance(samples);
            consumed_frames += (samples / channels) as u64;
            tracing::info!("Skipped ahead {} ms", skip);
        }

        if !http_eof && cache.available() < CACHE_MAX_SAMPLES {
            if let Err(e) = pump_http(
                ctx,
                &mut http,
                &mut read_buf,
                &mut |data| {
                    decoder.feed(data);
                },
                &mut http_eof,
            ) {
                return fail_or_cancelled(ctx, e);
            }
            if http_eof {
                decoder.set_eof();
            }
        }

        drain_decoder(decoder.as_mut(), &mut cache, &mut drain_buf);
        if decoder.has_error() {
            return TrackOutcome::Failed("decoder error".to_string());
        }

        if ctx.sink.is_paused() {
            thread::sleep(PAUSED_POLL);
        } else if cache.available() >= channels {
            if ctx.sink.buffer_level() <= SINK_FULL_LEVEL {
                consumed_frames += push_pcm_chunk(ctx.sink.as_ref(), &mut cache, channels) as u64;
            } else {
                ctx.sink.wait_for_space(SINK_WAIT_TIMEOUT);
            }
        } else if http_eof && decoder.is_finished() {
            break;
        } else if http_eof {
            // Input is done but the decoder still holds frames
            thread::sleep(Duration::from_millis(1));
        }

        // The sink's fill is the ground truth of what the listener hears
        // next, so elapsed time derives from frames actually pushed
        let elapsed_ms = consumed_frames * 1000 / format.sample_rate as u64;
        ctx.counters
            .set_elapsed((elapsed_ms / 1000) as u32, elapsed_ms as u32);
        ctx.counters.set_buffer_state(
            (CACHE_MAX_SAMPLES * 4) as u32,
            (cache.available() * 4) as u32,
            ctx.sink.buffer_size_bytes(),
            ctx.sink.buffer_fill_bytes(),
        );
    }

    TrackOutcome::Completed
}

fn fail_or_cancelled(ctx: &TrackContext, reason: String) -> TrackOutcome {
    if ctx.cancelled() || reason == "cancelled" {
        TrackOutcome::Cancelled
    } else {
        TrackOutcome::Failed(reason)
    }
}

/// Move decoded frames from the decoder into the cache, stopping at the
/// cache bound so a fast decoder cannot grow it without limit
fn drain_decoder(decoder: &mut dyn Decoder, cache: &mut DecodeCache, drain_buf: &mut [i32]) {
    while cache.available() < CACHE_MAX_SAMPLES {
        let frames = decoder.read_decoded(drain_buf, PCM_PUSH_FRAMES);
        if frames == 0 {
            break;
        }
        let channels = decoder.format().channels.max(1) as usize;
        cache.push(&drain_buf[..frames * channels]);
    }
}

/// Push up to one chunk of frames into the sink; returns frames accepted
fn push_pcm_chunk(sink: &dyn Sink, cache: &mut DecodeCache, channels: usize) -> usize {
    let chunk = cache.peek(PCM_PUSH_FRAMES * channels);
    let frames = chunk.len() / channels;
    if frames == 0 {
        return 0;
    }

    let samples = frames * channels;
    let mut bytes = Vec::with_capacity(samples * 4);
    for &sample in &chunk[..samples] {
        bytes.extend_from_slice(&sample.to_ne_bytes());
    }

    match sink.send_audio(&bytes, frames) {
        Ok(accepted) => {
            cache.advance(accepted * channels);
            accepted
        }
        Err(e) => {
            tracing::warn!("Sink push failed: {}", e);
            0
        }
    }
}

// ----------------------------------------------------------------------
// DSD branch
// ----------------------------------------------------------------------

fn stream_dsd(ctx: &TrackContext, mut http: HttpStreamClient) -> TrackOutcome {
    let mut reader = DsdStreamReader::new();

    // Headerless DSD needs outside hints; the rate field carries the DSD
    // bit rate directly for raw streams
    if let (Some(rate), Some(channels)) = (ctx.cmd.sample_rate_hz(), ctx.cmd.channel_count()) {
        reader.set_raw_format(rate, channels);
    }

    let mut read_buf = vec![0u8; 16 * 1024];
    let mut http_eof = false;

    // Pre-buffer: the reader's internal buffer holds the raw prebuffer
    // until the header is parsed and ~500 ms of material is in hand
    loop {
        if ctx.cancelled() {
            return TrackOutcome::Cancelled;
        }

        if let Err(e) = pump_http(
            ctx,
            &mut http,
            &mut read_buf,
            &mut |data| {
                reader.feed(data);
            },
            &mut http_eof,
        ) {
            return fail_or_cancelled(ctx, e);
        }
        if http_eof {
            reader.set_eof();
        }

        if reader.has_error() {
            return TrackOutcome::Failed("DSD container error".to_string());
        }

        if reader.format_ready() {
            let format = reader.format();
            let target = (format.bytes_per_second() * PREBUFFER_MS / 1000) as usize;
            if reader.available_bytes() >= target || http_eof {
                break;
            }
        } else if http_eof {
            return TrackOutcome::Failed("stream ended before DSD header was parsed".to_string());
        }
    }

    let format = reader.format();
    if format.channels == 0 || format.rate == 0 {
        return TrackOutcome::Failed("DSD reader produced no usable format".to_string());
    }

    if let Err(e) = ctx.sink.open(&SinkFormat::Dsd {
        rate: format.rate,
        channels: format.channels,
        lsb_first: format.lsb_first,
    }) {
        return TrackOutcome::Failed(format!("sink open: {}", e));
    }
    ctx.sink.set_s24_pack_hint(false);

    ctx.client.send_stat(StatEvent::TrackStarted, 0);
    ctx.client.send_stat(StatEvent::BufferThreshold, 0);

    // Each read_planar result is planar only within itself, so chunks are
    // re-staged per channel and re-framed for the sink. DSF reads are one
    // block group at a time to keep each read a single planar run.
    let block_group = (format.block_size_per_channel * format.channels) as usize;
    let read_chunk_size = if block_group > 0 {
        block_group
    } else {
        DSD_PUSH_BYTES
    };
    let mut chunk = vec![0u8; read_chunk_size];
    let mut staging = PlanarStaging::new(format.channels as usize);

    // Planar pushes must never split across sink writes: the sink derives
    // the second-channel offset from the accepted push size. Every push
    // is one whole chunk, a multiple of channels x 2 bytes (a DoP frame),
    // and small enough to fit the room guaranteed when fill <= 0.95.
    let push_per_channel = DSD_PUSH_BYTES / format.channels as usize / 2 * 2;
    let mut consumed_bytes: u64 = 0;

    // Flush the prebuffer into the empty sink
    loop {
        let n = reader.read_planar(&mut chunk, read_chunk_size);
        if n == 0 {
            break;
        }
        staging.push_planar(&chunk[..n]);
    }
    while let Some(piece) = staging.take_chunk(push_per_channel) {
        consumed_bytes += push_dsd_chunk(ctx.sink.as_ref(), &piece, format.channels) as u64;
    }

    // Steady state
    loop {
        if ctx.cancelled() {
            return TrackOutcome::Cancelled;
        }

        let skip = ctx.skip_ms.swap(0, Ordering::AcqRel);
        if skip > 0 {
            let per_channel = (skip as u64 * format.rate as u64 / 8000) as usize;
            consumed_bytes += staging.discard(per_channel) as u64;
            tracing::info!("Skipped ahead {} ms", skip);
        }

        if !http_eof && reader.available_bytes() < DSD_BUFFER_MAX {
            if let Err(e) = pump_http(
                ctx,
                &mut http,
                &mut read_buf,
                &mut |data| {
                    reader.feed(data);
                },
                &mut http_eof,
            ) {
                return fail_or_cancelled(ctx, e);
            }
            if http_eof {
                reader.set_eof();
            }
        }

        if reader.has_error() {
            return TrackOutcome::Failed("DSD container error".to_string());
        }

        while staging.total_len() < DSD_BUFFER_MAX {
            let n = reader.read_planar(&mut chunk, read_chunk_size);
            if n == 0 {
                break;
            }
            staging.push_planar(&chunk[..n]);
        }

        if ctx.sink.is_paused() {
            thread::sleep(PAUSED_POLL);
        } else if staging.available_per_channel() >= 2 {
            if ctx.sink.buffer_level() <= SINK_FULL_LEVEL {
                if let Some(piece) = staging.take_chunk(push_per_channel) {
                    consumed_bytes +=
                        push_dsd_chunk(ctx.sink.as_ref(), &piece, format.channels) as u64;
                }
            } else {
                ctx.sink.wait_for_space(SINK_WAIT_TIMEOUT);
            }
        } else if http_eof && reader.is_finished() {
            // Final tail: whatever remains, channel-aligned
            if let Some(piece) = staging.take_tail() {
                consumed_bytes += push_dsd_chunk(ctx.sink.as_ref(), &piece, format.channels) as u64;
            }
            break;
        } else if http_eof {
            thread::sleep(Duration::from_millis(1));
        }

        let elapsed_ms = consumed_bytes * 1000 / format.bytes_per_second().max(1);
        ctx.counters
            .set_elapsed((elapsed_ms / 1000) as u32, elapsed_ms as u32);
        ctx.counters.set_buffer_state(
            DSD_BUFFER_MAX as u32,
            reader.available_bytes() as u32,
            ctx.sink.buffer_size_bytes(),
            ctx.sink.buffer_fill_bytes(),
        );
    }

    TrackOutcome::Completed
}

/// Push one whole planar chunk; returns total bytes accepted
fn push_dsd_chunk(sink: &dyn Sink, piece: &[u8], channels: u32) -> usize {
    let frames = piece.len() / channels as usize;
    match sink.send_audio(piece, frames) {
        Ok(_) => piece.len(),
        Err(e) => {
            tracing::warn!("Sink push failed: {}", e);
            0
        }
    }
}

/// Per-channel staging between the DSD reader and the sink.
///
/// Incoming planar chunks are split into per-channel runs so outgoing
/// pushes can be re-framed to any size while staying planar, regardless of
/// how the reader chunked its output.
struct PlanarStaging {
    channels: usize,
    bufs: Vec<Vec<u8>>,
}

impl PlanarStaging {
    fn new(channels: usize) -> Self {
        Self {
            channels,
            bufs: vec![Vec::new(); channels],
        }
    }

    /// Append one planar chunk (equal-length per-channel runs)
    fn push_planar(&mut self, chunk: &[u8]) {
        let per_channel = chunk.len() / self.channels;
        for (c, buf) in self.bufs.iter_mut().enumerate() {
            buf.extend_from_slice(&chunk[c * per_channel..(c + 1) * per_channel]);
        }
    }

    fn available_per_channel(&self) -> usize {
        self.bufs.first().map(|b| b.len()).unwrap_or(0)
    }

    fn total_len(&self) -> usize {
        self.available_per_channel() * self.channels
    }

    /// Build one planar push of up to `max_per_channel` bytes per channel,
    /// rounded down to whole DoP frames (2 bytes per channel)
    fn take_chunk(&mut self, max_per_channel: usize) -> Option<Vec<u8>> {
        let n = self.available_per_channel().min(max_per_channel) / 2 * 2;
        if n == 0 {
            return None;
        }
        Some(self.take_exact(n))
    }

    /// Drain everything that remains, whole bytes per channel
    fn take_tail(&mut self) -> Option<Vec<u8>> {
        let n = self.available_per_channel();
        if n == 0 {
            return None;
        }
        Some(self.take_exact(n))
    }

    fn take_exact(&mut self, per_channel: usize) -> Vec<u8> {
        let mut piece = Vec::with_capacity(per_channel * self.channels);
        for buf in self.bufs.iter_mut() {
            piece.extend_from_slice(&buf[..per_channel]);
            buf.drain(..per_channel);
        }
        piece
    }

    /// Drop up to `per_channel` bytes from every channel; returns total
    /// bytes discarded
    fn discard(&mut self, per_channel: usize) -> usize {
        let n = self.available_per_channel().min(per_channel) / 2 * 2;
        for buf in self.bufs.iter_mut() {
            buf.drain(..n);
        }
        n * self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_staging_reframes_chunks() {
        let mut staging = PlanarStaging::new(2);
        // Two planar chunks: [L0 L1][R0 R1] and [L2 L3][R2 R3]
        staging.push_planar(&[10, 11, 20, 21]);
        staging.push_planar(&[12, 13, 22, 23]);
        assert_eq!(staging.available_per_channel(), 4);

        // One push of all 4 bytes per channel stays planar end to end
        let piece = staging.take_chunk(4).unwrap();
        assert_eq!(piece, vec![10, 11, 12, 13, 20, 21, 22, 23]);
        assert_eq!(staging.available_per_channel(), 0);
    }

    #[test]
    fn planar_staging_aligns_to_dop_frames() {
        let mut staging = PlanarStaging::new(2);
        staging.push_planar(&[1, 2, 3, 101, 102, 103]);
        // 3 bytes per channel round down to 2 (one DoP frame holds 2)
        let piece = staging.take_chunk(16).unwrap();
        assert_eq!(piece, vec![1, 2, 101, 102]);
        assert_eq!(staging.available_per_channel(), 1);
        // The odd tail only leaves through take_tail
        assert!(staging.take_chunk(16).is_none());
        assert_eq!(staging.take_tail().unwrap(), vec![3, 103]);
    }

    #[test]
    fn planar_staging_discard_counts_all_channels() {
        let mut staging = PlanarStaging::new(2);
        staging.push_planar(&[1, 2, 3, 4, 11, 12, 13, 14]);
        assert_eq!(staging.discard(2), 4);
        assert_eq!(staging.take_tail().unwrap(), vec![3, 4, 13, 14]);
    }
}
