//! PCM decoder for WAV (RIFF) and AIFF containers
//!
//! A streaming state machine: bytes accumulate in a header buffer until the
//! container is recognised and its header regions are complete; everything
//! past the start of the data chunk is spliced into the data buffer so no
//! input is lost at the boundary. Headerless streams fall back to the raw
//! format configured from the stream command.

use crate::codec::{DecodedFormat, Decoder};

const WAV_MIN_HEADER: usize = 44;
const AIFF_MIN_HEADER: usize = 46;
const MAX_CHANNELS: u32 = 8;

fn read_le16(p: &[u8]) -> u16 {
    u16::from_le_bytes([p[0], p[1]])
}

fn read_le32(p: &[u8]) -> u32 {
    u32::from_le_bytes([p[0], p[1], p[2], p[3]])
}

fn read_be16(p: &[u8]) -> u16 {
    u16::from_be_bytes([p[0], p[1]])
}

fn read_be32(p: &[u8]) -> u32 {
    u32::from_be_bytes([p[0], p[1], p[2], p[3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detect,
    ParseWav,
    ParseAiff,
    Data,
    Error,
}

/// WAV/AIFF container parser presenting the decoder contract
pub struct PcmDecoder {
    state: State,
    header_buf: Vec<u8>,
    data_buf: Vec<u8>,

    format: DecodedFormat,
    format_ready: bool,
    big_endian: bool,
    is_float: bool,
    /// Bits each sample occupies in the container. Can exceed the
    /// descriptor's bit depth: EXTENSIBLE WAV stores e.g. 20 valid bits
    /// MSB-aligned inside 24- or 32-bit words.
    container_bits: u32,
    /// Bytes left in the data chunk; 0 = unbounded (raw stream)
    data_remaining: u64,

    raw_pcm_configured: bool,
    eof: bool,
    error: bool,
    finished: bool,
    decoded_samples: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Detect,
            header_buf: Vec::with_capacity(256),
            data_buf: Vec::with_capacity(32 * 1024),
            format: DecodedFormat::default(),
            format_ready: false,
            big_endian: false,
            is_float: false,
            container_bits: 0,
            data_remaining: 0,
            raw_pcm_configured: false,
            eof: false,
            error: false,
            finished: false,
            decoded_samples: 0,
        }
    }

    fn detect_container(&mut self) -> bool {
        if self.header_buf.len() < 4 {
            return false;
        }

        match &self.header_buf[..4] {
            b"RIFF" => {
                self.state = State::ParseWav;
                tracing::debug!("[pcm] WAV container detected");
                true
            }
            b"FORM" => {
                self.state = State::ParseAiff;
                tracing::debug!("[pcm] AIFF container detected");
                true
            }
            magic => {
                // No container: headerless raw PCM if the stream command
                // supplied the format, otherwise a fatal unknown signature
                if self.raw_pcm_configured {
                    self.format_ready = true;
                    self.data_remaining = 0;
                    let header = std::mem::take(&mut self.header_buf);
                    self.data_buf.extend_from_slice(&header);
                    self.state = State::Data;
                    tracing::info!(
                        "[pcm] raw: {} Hz, {}-bit, {} ch {}",
                        self.format.sample_rate,
                        self.format.bit_depth,
                        self.format.channels,
                        if self.big_endian { "BE" } else { "LE" }
                    );
                    true
                } else {
                    tracing::error!(
                        "[pcm] unknown container magic: {:02x}{:02x}{:02x}{:02x}",
                        magic[0],
                        magic[1],
                        magic[2],
                        magic[3]
                    );
                    self.state = State::Error;
                    self.error = true;
                    false
                }
            }
        }
    }

    fn fail(&mut self, what: &str) -> bool {
        tracing::error!("[pcm] {}", what);
        self.state = State::Error;
        self.error = true;
        false
    }

    fn parse_wav_header(&mut self) -> bool {
        if self.header_buf.len() < WAV_MIN_HEADER {
            return false;
        }

        if &self.header_buf[..4] != b"RIFF" || &self.header_buf[8..12] != b"WAVE" {
            return self.fail("invalid WAV header");
        }

        let buf = &self.header_buf;
        let mut pos = 12;
        let mut found_fmt = false;
        let mut found_data = false;
        let mut data_start = 0usize;
        let mut channels = 0u32;
        let mut sample_rate = 0u32;
        let mut bit_depth = 0u32;
        let mut container_bits = 0u32;
        let mut is_float = false;
        let mut data_len = 0u64;

        while pos + 8 <= buf.len() {
            let chunk_size = read_le32(&buf[pos + 4..]) as usize;

            if &buf[pos..pos + 4] == b"fmt " {
                if pos + 8 + chunk_size > buf.len() {
                    return false; // need more data
                }

                let fmt = &buf[pos + 8..];
                let mut audio_format = read_le16(fmt);
                let extensible = audio_format == 0xFFFE;

                if extensible {
                    if chunk_size < 40 {
                        return self.fail("EXTENSIBLE fmt chunk too small");
                    }
                    // The first two bytes of the SubFormat GUID carry the
                    // real format code
                    audio_format = read_le16(&fmt[24..]);
                }

                match audio_format {
                    1 => is_float = false,
                    3 => is_float = true,
                    other => {
                        return self.fail(&format!("unsupported WAV format: {}", other));
                    }
                }

                channels = read_le16(&fmt[2..]) as u32;
                sample_rate = read_le32(&fmt[4..]);
                container_bits = read_le16(&fmt[14..]) as u32;
                bit_depth = container_bits;

                // EXTENSIBLE: the valid bit count overrides the reported
                // depth; samples still occupy container_bits on the wire
                if extensible {
                    let valid_bits = read_le16(&fmt[18..]) as u32;
                    if valid_bits > 0 {
                        bit_depth = valid_bits;
                    }
                }

                found_fmt = true;
            } else if &buf[pos..pos + 4] == b"data" {
                data_len = chunk_size as u64;
                data_start = pos + 8;
                found_data = true;
            }

            if found_fmt && found_data {
                break;
            }

            // Chunks are word-aligned
            pos += 8 + chunk_size + (chunk_size & 1);
        }

        if !found_fmt || !found_data {
            return false;
        }

        if channels == 0 || channels > MAX_CHANNELS {
            return self.fail(&format!("invalid channel count {}", channels));
        }
        if container_bits == 0 || container_bits % 8 != 0 || container_bits > 32 {
            return self.fail(&format!("invalid sample size {} bits", container_bits));
        }
        if is_float && container_bits != 32 {
            return self.fail(&format!("unsupported float bit depth {}", container_bits));
        }

        self.format.channels = channels;
        self.format.sample_rate = sample_rate;
        self.format.bit_depth = bit_depth;
        self.format.total_samples = data_len / (container_bits as u64 / 8 * channels as u64);
        self.big_endian = false;
        self.is_float = is_float;
        self.container_bits = container_bits;
        self.data_remaining = data_len;
        self.format_ready = true;

        tracing::info!(
            "[pcm] WAV: {} Hz, {}-bit{}, {} ch",
            sample_rate,
            bit_depth,
            if is_float { " float" } else { "" },
            channels
        );

        self.splice_to_data(data_start);
        true
    }

    fn parse_aiff_header(&mut self) -> bool {
        if self.header_buf.len() < AIFF_MIN_HEADER {
            return false;
        }

        if &self.header_buf[..4] != b"FORM"
            || (&self.header_buf[8..12] != b"AIFF" && &self.header_buf[8..12] != b"AIFC")
        {
            return self.fail("invalid AIFF header");
        }

        let buf = &self.header_buf;
        let mut pos = 12;
        let mut found_comm = false;
        let mut found_ssnd = false;
        let mut data_start = 0usize;
        let mut channels = 0u32;
        let mut sample_rate = 0u32;
        let mut bit_depth = 0u32;
        let mut total_samples = 0u64;
        let mut data_len = 0u64;

        while pos + 8 <= buf.len() {
            let chunk_size = read_be32(&buf[pos + 4..]) as usize;

            if &buf[pos..pos + 4] == b"COMM" {
                if pos + 8 + chunk_size > buf.len() {
                    return false;
                }

                channels = read_be16(&buf[pos + 8..]) as u32;
                total_samples = read_be32(&buf[pos + 10..]) as u64;
                bit_depth = read_be16(&buf[pos + 14..]) as u32;
                sample_rate = extended_to_u32(&buf[pos + 16..pos + 26]);
                found_comm = true;
            } else if &buf[pos..pos + 4] == b"SSND" {
                if pos + 16 > buf.len() {
                    return false;
                }

                let offset = read_be32(&buf[pos + 8..]) as usize;
                // Chunk size includes the offset and blockSize fields
                data_len = chunk_size.saturating_sub(8) as u64;
                data_start = pos + 16 + offset;
                found_ssnd = true;
            }

            if found_comm && found_ssnd {
                break;
            }

            pos += 8 + chunk_size + (chunk_size & 1);
        }

        if !found_comm || !found_ssnd {
            return false;
        }

        if channels == 0 || channels > MAX_CHANNELS {
            return self.fail(&format!("invalid channel count {}", channels));
        }
        if bit_depth == 0 || bit_depth % 8 != 0 || bit_depth > 32 {
            return self.fail(&format!("invalid sample size {} bits", bit_depth));
        }

        self.format.channels = channels;
        self.format.sample_rate = sample_rate;
        self.format.bit_depth = bit_depth;
        self.format.total_samples = total_samples;
        self.big_endian = true;
        self.is_float = false;
        self.container_bits = bit_depth;
        self.data_remaining = data_len;
        self.format_ready = true;

        tracing::info!(
            "[pcm] AIFF: {} Hz, {}-bit, {} ch",
            sample_rate,
            bit_depth,
            channels
        );

        self.splice_to_data(data_start);
        true
    }

    /// Move header-buffer bytes past the data-chunk start into the data
    /// buffer and switch to the data state.
    fn splice_to_data(&mut self, data_start: usize) {
        if data_start < self.header_buf.len() {
            let tail = self.header_buf.split_off(data_start);
            self.data_buf.extend_from_slice(&tail);
        }
        self.header_buf.clear();
        self.state = State::Data;
    }

    /// Convert `src_bytes` of container samples into MSB-aligned i32
    fn convert_samples(&self, src: &[u8], dst: &mut [i32], src_bytes: usize) -> usize {
        let bytes_per_sample = (self.container_bits / 8) as usize;
        let n = src_bytes / bytes_per_sample;

        if self.is_float {
            for i in 0..n {
                let f = f32::from_le_bytes([
                    src[i * 4],
                    src[i * 4 + 1],
                    src[i * 4 + 2],
                    src[i * 4 + 3],
                ]);
                dst[i] = (f.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
            }
            return n;
        }

        match (bytes_per_sample, self.big_endian) {
            (1, _) => {
                for i in 0..n {
                    dst[i] = (src[i] as i8 as i32) << 24;
                }
            }
            (2, true) => {
                for i in 0..n {
                    let s = i16::from_be_bytes([src[i * 2], src[i * 2 + 1]]);
                    dst[i] = (s as i32) << 16;
                }
            }
            (2, false) => {
                for i in 0..n {
                    let s = i16::from_le_bytes([src[i * 2], src[i * 2 + 1]]);
                    dst[i] = (s as i32) << 16;
                }
            }
            (3, true) => {
                for i in 0..n {
                    dst[i] = ((src[i * 3] as i32) << 24)
                        | ((src[i * 3 + 1] as i32) << 16)
                        | ((src[i * 3 + 2] as i32) << 8);
                }
            }
            (3, false) => {
                for i in 0..n {
                    dst[i] = ((src[i * 3 + 2] as i32) << 24)
                        | ((src[i * 3 + 1] as i32) << 16)
                        | ((src[i * 3] as i32) << 8);
                }
            }
            (4, true) => {
                for i in 0..n {
                    dst[i] = i32::from_be_bytes([
                        src[i * 4],
                        src[i * 4 + 1],
                        src[i * 4 + 2],
                        src[i * 4 + 3],
                    ]);
                }
            }
            (4, false) => {
                for i in 0..n {
                    dst[i] = i32::from_le_bytes([
                        src[i * 4],
                        src[i * 4 + 1],
                        src[i * 4 + 2],
                        src[i * 4 + 3],
                    ]);
                }
            }
            _ => return 0,
        }

        n
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PcmDecoder {
    fn feed(&mut self, data: &[u8]) -> usize {
        match self.state {
            State::Detect | State::ParseWav | State::ParseAiff => {
                self.header_buf.extend_from_slice(data);
            }
            State::Data => {
                self.data_buf.extend_from_slice(data);
            }
            State::Error => {}
        }
        data.len()
    }

    fn set_eof(&mut self) {
        self.eof = true;
    }

    fn read_decoded(&mut self, out: &mut [i32], max_frames: usize) -> usize {
        if self.error || self.finished {
            return 0;
        }

        if self.state == State::Detect && !self.detect_container() {
            return 0;
        }
        match self.state {
            State::ParseWav => {
                if !self.parse_wav_header() {
                    return 0;
                }
            }
            State::ParseAiff => {
                if !self.parse_aiff_header() {
                    return 0;
                }
            }
            _ => {}
        }
        if self.state != State::Data {
            return 0;
        }

        let bytes_per_sample = (self.container_bits / 8) as usize;
        let bytes_per_frame = bytes_per_sample * self.format.channels as usize;
        if bytes_per_frame == 0 {
            return 0;
        }

        // Limit by available data and the remaining data-chunk length
        let mut avail_bytes = self.data_buf.len();
        if self.data_remaining > 0 {
            avail_bytes = avail_bytes.min(self.data_remaining as usize);
        }

        let frames_avail = avail_bytes / bytes_per_frame;
        let frames = frames_avail
            .min(max_frames)
            .min(out.len() / self.format.channels as usize);
        if frames == 0 {
            // Only finish once no more data can arrive; an empty buffer
            // mid-stream just means the next HTTP read hasn't landed yet
            if self.eof {
                self.finished = true;
            }
            return 0;
        }

        let byte_count = frames * bytes_per_frame;
        self.convert_samples(&self.data_buf, out, byte_count);

        self.data_buf.drain(..byte_count);
        if self.data_remaining > 0 {
            self.data_remaining -= byte_count as u64;
            if self.data_remaining == 0 {
                self.finished = true;
            }
        }

        self.decoded_samples += frames as u64;
        frames
    }

    fn format_ready(&self) -> bool {
        self.format_ready
    }

    fn format(&self) -> DecodedFormat {
        self.format
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn has_error(&self) -> bool {
        self.error
    }

    fn decoded_samples(&self) -> u64 {
        self.decoded_samples
    }

    fn flush(&mut self) {
        self.state = State::Detect;
        self.header_buf.clear();
        self.data_buf.clear();
        self.format = DecodedFormat::default();
        self.format_ready = false;
        self.big_endian = false;
        self.is_float = false;
        self.container_bits = 0;
        self.data_remaining = 0;
        self.raw_pcm_configured = false;
        self.eof = false;
        self.error = false;
        self.finished = false;
        self.decoded_samples = 0;
    }

    fn set_raw_pcm_format(&mut self, rate: u32, bits: u32, channels: u32, big_endian: bool) {
        self.format.sample_rate = rate;
        self.format.bit_depth = bits;
        self.format.channels = channels;
        self.format.total_samples = 0;
        self.big_endian = big_endian;
        self.container_bits = bits;
        self.raw_pcm_configured = true;
    }
}

/// IEEE 754 80-bit extended float to integer Hz: treat the value as
/// mantissa x 2^(exponent - 16383 - 63) and round to nearest.
fn extended_to_u32(bytes: &[u8]) -> u32 {
    let exponent = (((bytes[0] & 0x7F) as i32) << 8) | bytes[1] as i32;
    let mut mantissa = 0u64;
    for &b in &bytes[2..10] {
        mantissa = (mantissa << 8) | b as u64;
    }

    if exponent == 0 && mantissa == 0 {
        return 0;
    }

    let f = mantissa as f64 * 2f64.powi(exponent - 16383 - 63);
    (f + 0.5) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_header(rate: u32, bits: u16, channels: u16, data_len: u32) -> Vec<u8> {
        let byte_rate = rate * bits as u32 / 8 * channels as u32;
        let block_align = bits / 8 * channels;
        let mut h = Vec::new();
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&(36 + data_len).to_le_bytes());
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&16u32.to_le_bytes());
        h.extend_from_slice(&1u16.to_le_bytes());
        h.extend_from_slice(&channels.to_le_bytes());
        h.extend_from_slice(&rate.to_le_bytes());
        h.extend_from_slice(&byte_rate.to_le_bytes());
        h.extend_from_slice(&block_align.to_le_bytes());
        h.extend_from_slice(&bits.to_le_bytes());
        h.extend_from_slice(b"data");
        h.extend_from_slice(&data_len.to_le_bytes());
        h
    }

    #[test]
    fn wav_24bit_sample_identity() {
        // 96 kHz / 24-bit / 2 ch with first frame (0x123456, 0x789ABC)
        let mut input = wav_header(96_000, 24, 2, 6);
        input.extend_from_slice(&[0x56, 0x34, 0x12]);
        input.extend_from_slice(&[0xBC, 0x9A, 0x78]);

        let mut dec = PcmDecoder::new();
        dec.feed(&input);
        dec.set_eof();

        let mut out = [0i32; 8];
        let frames = dec.read_decoded(&mut out, 4);
        assert_eq!(frames, 1);
        assert_eq!(out[0], 0x12345600);
        assert_eq!(out[1], 0x789ABC00u32 as i32);

        let fmt = dec.format();
        assert_eq!(fmt.sample_rate, 96_000);
        assert_eq!(fmt.bit_depth, 24);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.total_samples, 1);
        assert!(dec.is_finished());
    }

    #[test]
    fn wav_16bit_msb_alignment() {
        let mut input = wav_header(44_100, 16, 2, 8);
        for s in [1024i16, 2048, -1, 0] {
            input.extend_from_slice(&s.to_le_bytes());
        }

        let mut dec = PcmDecoder::new();
        dec.feed(&input);
        dec.set_eof();

        let mut out = [0i32; 4];
        assert_eq!(dec.read_decoded(&mut out, 2), 2);
        assert_eq!(out, [1024 << 16, 2048 << 16, -1 << 16, 0]);
    }

    #[test]
    fn wav_extensible_valid_bits_override() {
        // EXTENSIBLE fmt chunk (40 bytes): container 32-bit, valid 24-bit
        let mut h = Vec::new();
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&100u32.to_le_bytes());
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&40u32.to_le_bytes());
        h.extend_from_slice(&0xFFFEu16.to_le_bytes());
        h.extend_from_slice(&2u16.to_le_bytes());
        h.extend_from_slice(&48_000u32.to_le_bytes());
        h.extend_from_slice(&384_000u32.to_le_bytes());
        h.extend_from_slice(&8u16.to_le_bytes());
        h.extend_from_slice(&32u16.to_le_bytes()); // container bits
        h.extend_from_slice(&22u16.to_le_bytes()); // cbSize
        h.extend_from_slice(&24u16.to_le_bytes()); // wValidBitsPerSample
        h.extend_from_slice(&3u32.to_le_bytes()); // channel mask
        h.extend_from_slice(&1u16.to_le_bytes()); // SubFormat: PCM GUID head
        h.extend_from_slice(&[0u8; 14]);
        h.extend_from_slice(b"data");
        h.extend_from_slice(&8u32.to_le_bytes());
        h.extend_from_slice(&[0u8; 8]);

        let mut dec = PcmDecoder::new();
        dec.feed(&h);
        dec.set_eof();
        let mut out = [0i32; 2];
        dec.read_decoded(&mut out, 1);
        assert_eq!(dec.format().bit_depth, 24);
    }

    #[test]
    fn chunked_feed_matches_single_blob() {
        let mut input = wav_header(44_100, 16, 2, 16);
        for s in [100i16, -100, 200, -200, 300, -300, 400, -400] {
            input.extend_from_slice(&s.to_le_bytes());
        }

        let decode_all = |chunk: usize| {
            let mut dec = PcmDecoder::new();
            for piece in input.chunks(chunk) {
                dec.feed(piece);
            }
            dec.set_eof();
            let mut all = Vec::new();
            let mut out = [0i32; 16];
            loop {
                let n = dec.read_decoded(&mut out, 8);
                if n == 0 {
                    break;
                }
                all.extend_from_slice(&out[..n * 2]);
            }
            all
        };

        let whole = decode_all(input.len());
        for chunk in [1, 3, 7, 13] {
            assert_eq!(decode_all(chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn aiff_extended_rate_44100() {
        let bytes = [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0];
        assert_eq!(extended_to_u32(&bytes), 44_100);
    }

    #[test]
    fn aiff_extended_rate_96000() {
        // 96000 = 0x17700 -> exponent 16383+16, mantissa 0xBB80...
        let bytes = [0x40, 0x0F, 0xBB, 0x80, 0, 0, 0, 0, 0, 0];
        assert_eq!(extended_to_u32(&bytes), 96_000);
    }

    #[test]
    fn aiff_parse_and_be_samples() {
        let mut input = Vec::new();
        input.extend_from_slice(b"FORM");
        input.extend_from_slice(&46u32.to_be_bytes());
        input.extend_from_slice(b"AIFF");
        input.extend_from_slice(b"COMM");
        input.extend_from_slice(&18u32.to_be_bytes());
        input.extend_from_slice(&2u16.to_be_bytes()); // channels
        input.extend_from_slice(&1u32.to_be_bytes()); // num frames
        input.extend_from_slice(&16u16.to_be_bytes()); // bits
        input.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);
        input.extend_from_slice(b"SSND");
        input.extend_from_slice(&12u32.to_be_bytes());
        input.extend_from_slice(&0u32.to_be_bytes()); // offset
        input.extend_from_slice(&0u32.to_be_bytes()); // block size
        input.extend_from_slice(&0x1234i16.to_be_bytes());
        input.extend_from_slice(&(-2i16).to_be_bytes());

        let mut dec = PcmDecoder::new();
        dec.feed(&input);
        dec.set_eof();

        let mut out = [0i32; 2];
        assert_eq!(dec.read_decoded(&mut out, 1), 1);
        assert_eq!(out[0], 0x1234 << 16);
        assert_eq!(out[1], -2 << 16);
        assert_eq!(dec.format().sample_rate, 44_100);
    }

    #[test]
    fn unknown_magic_is_fatal_without_raw_hint() {
        let mut dec = PcmDecoder::new();
        dec.feed(b"OggS\0\0\0\0");
        let mut out = [0i32; 2];
        assert_eq!(dec.read_decoded(&mut out, 1), 0);
        assert!(dec.has_error());
    }

    #[test]
    fn raw_pcm_mode_uses_hints() {
        let mut dec = PcmDecoder::new();
        dec.set_raw_pcm_format(48_000, 16, 2, false);
        dec.feed(&[0x00, 0x01, 0x00, 0xFF]); // 256, -256 LE
        let mut out = [0i32; 2];
        assert_eq!(dec.read_decoded(&mut out, 1), 1);
        assert_eq!(out[0], 256 << 16);
        assert_eq!(out[1], -256 << 16);
        assert_eq!(dec.format().sample_rate, 48_000);
        assert!(!dec.is_finished());
    }

    #[test]
    fn flush_is_idempotent() {
        let mut dec = PcmDecoder::new();
        dec.feed(b"RIFF");
        dec.flush();
        let after_one = (dec.format_ready(), dec.has_error(), dec.decoded_samples());
        dec.flush();
        assert_eq!(
            after_one,
            (dec.format_ready(), dec.has_error(), dec.decoded_samples())
        );
        assert!(!dec.format_ready());
    }

    #[test]
    fn float_wav_scales_to_full_range() {
        let mut h = Vec::new();
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&100u32.to_le_bytes());
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&16u32.to_le_bytes());
        h.extend_from_slice(&3u16.to_le_bytes()); // IEEE float
        h.extend_from_slice(&2u16.to_le_bytes());
        h.extend_from_slice(&48_000u32.to_le_bytes());
        h.extend_from_slice(&384_000u32.to_le_bytes());
        h.extend_from_slice(&8u16.to_le_bytes());
        h.extend_from_slice(&32u16.to_le_bytes());
        h.extend_from_slice(b"data");
        h.extend_from_slice(&8u32.to_le_bytes());
        h.extend_from_slice(&1.0f32.to_le_bytes());
        h.extend_from_slice(&(-0.5f32).to_le_bytes());

        let mut dec = PcmDecoder::new();
        dec.feed(&h);
        dec.set_eof();
        let mut out = [0i32; 2];
        assert_eq!(dec.read_decoded(&mut out, 1), 1);
        assert_eq!(out[0], i32::MAX);
        assert_eq!(out[1], -1_073_741_823); // -0.5 of full scale
    }
}
