//! Streaming decoder families over symphonia
//!
//! One engine serves the FLAC, MP3, Ogg Vorbis and AAC families. Symphonia
//! pulls from its source, while the pipeline pushes bytes in, so the engine
//! bridges the two: `feed` appends to a shared byte buffer, a dedicated
//! decode thread blocks on that buffer through a `MediaSource` adapter, and
//! decoded frames come back through a bounded channel that `read_decoded`
//! drains without blocking. Chunk-feed sequences are therefore invisible to
//! the decoder: any partition of the input produces identical output.

use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::{DecodedFormat, Decoder};
use crate::constants::{INPUT_COMPACT_BYTES, OGG_PROBE_MIN_BYTES};

/// Decoded chunks buffered between the decode thread and `read_decoded`
const CHUNK_CHANNEL_DEPTH: usize = 32;

/// The four lossy/lossless decoder families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    /// Format 'f': lossless with per-frame CRC
    Flac,
    /// Format 'm': lossy, resynchronises across corruption
    Mp3,
    /// Format 'o': streamed lossless-on-demand, chained streams possible
    OggVorbis,
    /// Format 'a': lossy with ADTS transport sync
    Aac,
}

impl CodecFamily {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::OggVorbis => "ogg",
            Self::Aac => "aac",
        }
    }

    fn probe_extension(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::OggVorbis => "ogg",
            Self::Aac => "aac",
        }
    }

    /// Bytes buffered before probing. Ogg defers so stray open attempts
    /// on a trickling stream don't fail pointlessly.
    fn probe_min_bytes(&self) -> usize {
        match self {
            Self::OggVorbis => OGG_PROBE_MIN_BYTES,
            _ => 0,
        }
    }

    /// Descriptor bit depth when the codec parameters don't carry one.
    /// MP3 output is produced at full 32-bit scale; Vorbis and AAC decode
    /// from 16-bit-equivalent lossy data.
    fn fallback_bit_depth(&self) -> u32 {
        match self {
            Self::Flac => 16,
            Self::Mp3 => 32,
            Self::OggVorbis => 16,
            Self::Aac => 16,
        }
    }
}

// ----------------------------------------------------------------------
// Shared input buffer and its MediaSource adapter
// ----------------------------------------------------------------------

#[derive(Default)]
struct InputState {
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    /// Set on flush/drop to abort a blocked decode thread
    poisoned: bool,
}

struct SharedInput {
    state: Mutex<InputState>,
    cond: Condvar,
}

impl SharedInput {
    fn new() -> Self {
        Self {
            state: Mutex::new(InputState::default()),
            cond: Condvar::new(),
        }
    }

    fn push(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.buf.extend_from_slice(data);
        self.cond.notify_all();
    }

    fn set_eof(&self) {
        let mut state = self.state.lock().unwrap();
        state.eof = true;
        self.cond.notify_all();
    }

    fn poison(&self) {
        let mut state = self.state.lock().unwrap();
        state.poisoned = true;
        self.cond.notify_all();
    }

    /// Block until at least `min` bytes are buffered, EOF, or poison
    fn wait_min_buffered(&self, min: usize) {
        let mut state = self.state.lock().unwrap();
        while state.buf.len() - state.pos < min && !state.eof && !state.poisoned {
            state = self.cond.wait(state).unwrap();
        }
    }
}

/// Blocking reader over the shared input buffer. EOF and poison both read
/// as end-of-stream; consumed input is compacted past a threshold so
/// steady-state memory stays bounded.
struct InputReader {
    shared: Arc<SharedInput>,
    consumed: u64,
}

impl Read for InputReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.poisoned {
                return Ok(0);
            }

            let avail = state.buf.len() - state.pos;
            if avail > 0 {
                let n = avail.min(out.len());
                out[..n].copy_from_slice(&state.buf[state.pos..state.pos + n]);
                state.pos += n;
                self.consumed += n as u64;

                if state.pos > INPUT_COMPACT_BYTES {
                    let pos = state.pos;
                    state.buf.drain(..pos);
                    state.pos = 0;
                }
                return Ok(n);
            }

            if state.eof {
                return Ok(0);
            }

            state = self.shared.cond.wait(state).unwrap();
        }
    }
}

impl Seek for InputReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.consumed),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stream source is not seekable",
            )),
        }
    }
}

impl MediaSource for InputReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

// ----------------------------------------------------------------------
// Decode thread
// ----------------------------------------------------------------------

#[derive(Default)]
struct DecodeShared {
    format: Mutex<DecodedFormat>,
    format_ready: AtomicBool,
    finished: AtomicBool,
    error: AtomicBool,
}

fn decode_thread(
    family: CodecFamily,
    input: Arc<SharedInput>,
    shared: Arc<DecodeShared>,
    tx: Sender<Vec<i32>>,
) {
    if family.probe_min_bytes() > 0 {
        input.wait_min_buffered(family.probe_min_bytes());
    }

    let reader = InputReader {
        shared: Arc::clone(&input),
        consumed: 0,
    };
    let mss = MediaSourceStream::new(Box::new(reader), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(family.probe_extension());

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(p) => p,
        Err(e) => {
            if !input.state.lock().unwrap().poisoned {
                tracing::error!("[{}] failed to open stream: {}", family.name(), e);
                shared.error.store(true, Ordering::Release);
            }
            shared.finished.store(true, Ordering::Release);
            return;
        }
    };

    let mut format = probed.format;
    run_decode_loop(family, &mut format, &input, &shared, &tx);
    shared.finished.store(true, Ordering::Release);
}

fn run_decode_loop(
    family: CodecFamily,
    format: &mut Box<dyn FormatReader>,
    input: &Arc<SharedInput>,
    shared: &Arc<DecodeShared>,
    tx: &Sender<Vec<i32>>,
) {
    let Some(track) = format.default_track() else {
        tracing::error!("[{}] no default audio track", family.name());
        shared.error.store(true, Ordering::Release);
        return;
    };
    let mut track_id = track.id;
    let mut params = track.codec_params.clone();

    let mut decoder =
        match symphonia::default::get_codecs().make(&params, &DecoderOptions::default()) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("[{}] decoder init failed: {}", family.name(), e);
                shared.error.store(true, Ordering::Release);
                return;
            }
        };

    publish_format(family, shared, &params);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // True end of stream, or a truncated final frame
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                // Chained stream: the track list changed, re-read the
                // descriptor and rebuild the decoder
                let Some(track) = format.default_track() else {
                    break;
                };
                track_id = track.id;
                params = track.codec_params.clone();
                decoder = match symphonia::default::get_codecs()
                    .make(&params, &DecoderOptions::default())
                {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("[{}] decoder re-init failed: {}", family.name(), e);
                        shared.error.store(true, Ordering::Release);
                        return;
                    }
                };
                publish_format(family, shared, &params);
                tracing::info!("[{}] chained stream transition", family.name());
                continue;
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Bad framing between packets; the reader resyncs
                tracing::debug!("[{}] {} (resyncing)", family.name(), e);
                continue;
            }
            Err(e) => {
                if !input.state.lock().unwrap().poisoned {
                    tracing::error!("[{}] stream error: {}", family.name(), e);
                    shared.error.store(true, Ordering::Release);
                }
                return;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decode_packet(family, decoder.as_mut(), &packet) {
            DecodeStep::Output(samples, rate, channels) => {
                update_format_from_spec(family, shared, rate, channels);
                // A failed send means the facade was flushed or dropped
                if tx.send(samples).is_err() {
                    return;
                }
            }
            DecodeStep::Skip => {}
            DecodeStep::Reset => {
                decoder = match symphonia::default::get_codecs()
                    .make(&params, &DecoderOptions::default())
                {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("[{}] decoder re-init failed: {}", family.name(), e);
                        shared.error.store(true, Ordering::Release);
                        return;
                    }
                };
            }
            DecodeStep::Fatal(e) => {
                tracing::error!("[{}] decode error: {}", family.name(), e);
                shared.error.store(true, Ordering::Release);
                return;
            }
        }
    }
}

/// Outcome of decoding one packet, owned so the caller can rebuild the
/// decoder without fighting the audio buffer's borrow
enum DecodeStep {
    /// Normalised interleaved samples plus the spec they decoded at
    Output(Vec<i32>, u32, u32),
    Skip,
    Reset,
    Fatal(String),
}

fn decode_packet(
    family: CodecFamily,
    decoder: &mut dyn SymphoniaDecoder,
    packet: &symphonia::core::formats::Packet,
) -> DecodeStep {
    match decoder.decode(packet) {
        Ok(decoded) => {
            if decoded.frames() == 0 {
                return DecodeStep::Skip;
            }
            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            DecodeStep::Output(
                sample_buf.samples().to_vec(),
                spec.rate,
                spec.channels.count() as u32,
            )
        }
        Err(SymphoniaError::DecodeError(e)) => {
            // Lost sync, bad CRC, bad header, transport sync error:
            // recoverable, the next packet re-syncs
            tracing::debug!("[{}] {}", family.name(), e);
            DecodeStep::Skip
        }
        Err(SymphoniaError::ResetRequired) => DecodeStep::Reset,
        Err(e) => DecodeStep::Fatal(e.to_string()),
    }
}

fn publish_format(
    family: CodecFamily,
    shared: &Arc<DecodeShared>,
    params: &symphonia::core::codecs::CodecParameters,
) {
    let mut format = shared.format.lock().unwrap();
    if let Some(rate) = params.sample_rate {
        format.sample_rate = rate;
    }
    if let Some(channels) = params.channels {
        format.channels = channels.count() as u32;
    }
    format.bit_depth = params
        .bits_per_sample
        .unwrap_or_else(|| family.fallback_bit_depth());
    format.total_samples = params.n_frames.unwrap_or(0);

    if format.sample_rate != 0 && format.channels != 0 {
        tracing::info!(
            "[{}] format: {} Hz, {}-bit, {} ch{}",
            family.name(),
            format.sample_rate,
            format.bit_depth,
            format.channels,
            if format.total_samples > 0 {
                format!(", {} samples", format.total_samples)
            } else {
                String::new()
            }
        );
        shared.format_ready.store(true, Ordering::Release);
    }
}

/// Some families only learn the real output rate from the first decoded
/// buffer (SBR doubling, chained Ogg streams); update the descriptor in
/// place when it differs.
fn update_format_from_spec(
    family: CodecFamily,
    shared: &Arc<DecodeShared>,
    rate: u32,
    channels: u32,
) {
    let mut format = shared.format.lock().unwrap();
    if format.sample_rate != rate || format.channels != channels {
        if shared.format_ready.load(Ordering::Acquire) {
            tracing::info!(
                "[{}] format change: {} Hz, {} ch",
                family.name(),
                rate,
                channels
            );
        }
        format.sample_rate = rate;
        format.channels = channels;
        if format.bit_depth == 0 {
            format.bit_depth = family.fallback_bit_depth();
        }
        shared.format_ready.store(true, Ordering::Release);
    } else if !shared.format_ready.load(Ordering::Acquire) {
        shared.format_ready.store(true, Ordering::Release);
    }
}

// ----------------------------------------------------------------------
// Facade
// ----------------------------------------------------------------------

/// Push/pull decoder facade over the symphonia engine
pub struct StreamingDecoder {
    family: CodecFamily,
    input: Arc<SharedInput>,
    shared: Arc<DecodeShared>,
    rx: Receiver<Vec<i32>>,
    handle: Option<JoinHandle<()>>,

    /// Partially consumed chunk carried between reads
    pending: Vec<i32>,
    pending_pos: usize,
    decoded_frames: u64,
}

impl StreamingDecoder {
    pub fn new(family: CodecFamily) -> Self {
        let (input, shared, rx, handle) = Self::spawn_engine(family);
        Self {
            family,
            input,
            shared,
            rx,
            handle,
            pending: Vec::new(),
            pending_pos: 0,
            decoded_frames: 0,
        }
    }

    fn spawn_engine(
        family: CodecFamily,
    ) -> (
        Arc<SharedInput>,
        Arc<DecodeShared>,
        Receiver<Vec<i32>>,
        Option<JoinHandle<()>>,
    ) {
        let input = Arc::new(SharedInput::new());
        let shared = Arc::new(DecodeShared::default());
        let (tx, rx) = bounded(CHUNK_CHANNEL_DEPTH);

        let thread_input = Arc::clone(&input);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("decode-{}", family.name()))
            .spawn(move || decode_thread(family, thread_input, thread_shared, tx));

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!("[{}] failed to spawn decode thread: {}", family.name(), e);
                shared.error.store(true, Ordering::Release);
                shared.finished.store(true, Ordering::Release);
                None
            }
        };

        (input, shared, rx, handle)
    }

    fn stop_engine(&mut self) {
        self.input.poison();
        // Dropping the receiver unblocks a decode thread stuck on send
        let (_, empty_rx) = bounded(1);
        self.rx = empty_rx;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Decoder for StreamingDecoder {
    fn feed(&mut self, data: &[u8]) -> usize {
        self.input.push(data);
        data.len()
    }

    fn set_eof(&mut self) {
        self.input.set_eof();
    }

    fn read_decoded(&mut self, out: &mut [i32], max_frames: usize) -> usize {
        if self.shared.error.load(Ordering::Acquire) {
            return 0;
        }
        if !self.format_ready() {
            return 0;
        }

        let channels = self.format().channels as usize;
        if channels == 0 {
            return 0;
        }

        let max_samples = (max_frames * channels).min(out.len() / channels * channels);
        let mut written = 0;

        while written < max_samples {
            if self.pending_pos >= self.pending.len() {
                match self.rx.try_recv() {
                    Ok(chunk) => {
                        self.pending = chunk;
                        self.pending_pos = 0;
                    }
                    Err(_) => break,
                }
            }

            let avail = self.pending.len() - self.pending_pos;
            let n = avail.min(max_samples - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        // Hand out whole frames only; a partial frame stays pending
        let frames = written / channels;
        let leftover = written - frames * channels;
        if leftover > 0 {
            self.pending_pos -= leftover;
        }

        self.decoded_frames += frames as u64;
        frames
    }

    fn format_ready(&self) -> bool {
        self.shared.format_ready.load(Ordering::Acquire)
    }

    fn format(&self) -> DecodedFormat {
        *self.shared.format.lock().unwrap()
    }

    fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
            && self.pending_pos >= self.pending.len()
            && self.rx.is_empty()
    }

    fn has_error(&self) -> bool {
        self.shared.error.load(Ordering::Acquire)
    }

    fn decoded_samples(&self) -> u64 {
        self.decoded_frames
    }

    fn flush(&mut self) {
        self.stop_engine();

        let (input, shared, rx, handle) = Self::spawn_engine(self.family);
        self.input = input;
        self.shared = shared;
        self.rx = rx;
        self.handle = handle;
        self.pending.clear();
        self.pending_pos = 0;
        self.decoded_frames = 0;
    }
}

impl Drop for StreamingDecoder {
    fn drop(&mut self) {
        self.stop_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn input_reader_blocks_until_fed() {
        let input = Arc::new(SharedInput::new());
        let reader_input = Arc::clone(&input);

        let handle = thread::spawn(move || {
            let mut reader = InputReader {
                shared: reader_input,
                consumed: 0,
            };
            let mut buf = [0u8; 8];
            let n = reader.read(&mut buf).unwrap();
            (n, buf)
        });

        thread::sleep(Duration::from_millis(20));
        input.push(b"abcd");
        let (n, buf) = handle.join().unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn input_reader_eof_reads_zero() {
        let input = Arc::new(SharedInput::new());
        input.push(b"xy");
        input.set_eof();

        let mut reader = InputReader {
            shared: input,
            consumed: 0,
        };
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn input_reader_poison_unblocks() {
        let input = Arc::new(SharedInput::new());
        let reader_input = Arc::clone(&input);

        let handle = thread::spawn(move || {
            let mut reader = InputReader {
                shared: reader_input,
                consumed: 0,
            };
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        thread::sleep(Duration::from_millis(20));
        input.poison();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn garbage_stream_flags_error() {
        let mut dec = StreamingDecoder::new(CodecFamily::Flac);
        dec.feed(&[0u8; 8192]);
        dec.set_eof();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !dec.has_error() && !dec.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(dec.has_error());

        let mut out = [0i32; 64];
        assert_eq!(dec.read_decoded(&mut out, 32), 0);
    }

    #[test]
    fn flush_resets_error_state() {
        let mut dec = StreamingDecoder::new(CodecFamily::Mp3);
        dec.feed(&[0u8; 4096]);
        dec.set_eof();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !dec.has_error() && !dec.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        dec.flush();
        assert!(!dec.has_error());
        assert!(!dec.format_ready());
        assert_eq!(dec.decoded_samples(), 0);

        dec.flush();
        assert!(!dec.has_error());
    }

    #[test]
    fn ogg_probe_waits_for_minimum_buffer() {
        // With almost no data fed and no EOF, the Ogg engine must not
        // flag an error: it is still waiting for its probe threshold.
        let mut dec = StreamingDecoder::new(CodecFamily::OggVorbis);
        dec.feed(b"OggS");
        thread::sleep(Duration::from_millis(50));
        assert!(!dec.has_error());
        assert!(!dec.is_finished());
    }
}
