//! DSF/DFF container parser producing planar DSD
//!
//! A streaming state machine over the two DSD containers plus a headerless
//! raw mode. Output is always planar: all of channel 0's bytes, then all of
//! channel 1's, per read. DSF data is already planar inside each block
//! group; DFF and raw data are byte-interleaved and get de-interleaved.

use crate::dsd::format::{rate_name, DsdContainer, DsdFormat};

const MAX_CHANNELS: u32 = 8;

/// DSF fixed prefix: "DSD " chunk (28) + "fmt " chunk (52) + "data" header (12)
const DSF_MIN_HEADER: usize = 28 + 52 + 12;

fn read_le32(p: &[u8]) -> u32 {
    u32::from_le_bytes([p[0], p[1], p[2], p[3]])
}

fn read_le64(p: &[u8]) -> u64 {
    u64::from_le_bytes([p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]])
}

fn read_be32(p: &[u8]) -> u32 {
    u32::from_be_bytes([p[0], p[1], p[2], p[3]])
}

fn read_be64(p: &[u8]) -> u64 {
    u64::from_be_bytes([p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]])
}

/// Separate byte-interleaved frames into per-channel runs
pub fn deinterleave_to_planar(src: &[u8], dst: &mut [u8], channels: u32) {
    let ch = channels as usize;
    if ch < 2 {
        dst[..src.len()].copy_from_slice(src);
        return;
    }

    let bytes_per_channel = src.len() / ch;
    for i in 0..bytes_per_channel {
        for c in 0..ch {
            dst[c * bytes_per_channel + i] = src[i * ch + c];
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detect,
    ParseDsf,
    ParseDff,
    Data,
    Done,
    Error,
}

/// Streaming DSD reader over DSF, DFF and raw input
pub struct DsdStreamReader {
    state: State,
    header_buf: Vec<u8>,
    data_buf: Vec<u8>,

    format: DsdFormat,
    format_ready: bool,
    raw_configured: bool,
    /// Audio bytes left in the data chunk; 0 = unbounded
    data_remaining: u64,
    total_bytes_output: u64,

    eof: bool,
    error: bool,
    finished: bool,
}

impl DsdStreamReader {
    pub fn new() -> Self {
        Self {
            state: State::Detect,
            header_buf: Vec::with_capacity(256),
            data_buf: Vec::with_capacity(64 * 1024),
            format: DsdFormat::default(),
            format_ready: false,
            raw_configured: false,
            data_remaining: 0,
            total_bytes_output: 0,
            eof: false,
            error: false,
            finished: false,
        }
    }

    pub fn flush(&mut self) {
        self.state = State::Detect;
        self.header_buf.clear();
        self.data_buf.clear();
        self.format = DsdFormat::default();
        self.format_ready = false;
        self.raw_configured = false;
        self.data_remaining = 0;
        self.total_bytes_output = 0;
        self.eof = false;
        self.error = false;
        self.finished = false;
    }

    /// Configure a headerless stream from out-of-band hints
    pub fn set_raw_format(&mut self, dsd_rate: u32, channels: u32) {
        self.format = DsdFormat {
            rate: dsd_rate,
            channels,
            block_size_per_channel: 0,
            total_dsd_bytes: 0,
            container: DsdContainer::Raw,
            // Raw DSD follows the DFF convention
            lsb_first: false,
        };
        self.raw_configured = true;
    }

    pub fn feed(&mut self, data: &[u8]) -> usize {
        if self.state == State::Done || self.state == State::Error {
            return data.len();
        }

        match self.state {
            State::Detect | State::ParseDsf | State::ParseDff => {
                self.header_buf.extend_from_slice(data);

                if self.state == State::Detect {
                    self.detect_container();
                }
                match self.state {
                    State::ParseDsf => {
                        self.parse_dsf_header();
                    }
                    State::ParseDff => {
                        self.parse_dff_header();
                    }
                    _ => {}
                }
            }
            State::Data => {
                let mut take = data.len();
                if self.data_remaining > 0 {
                    take = take.min(self.data_remaining as usize);
                }
                self.data_buf.extend_from_slice(&data[..take]);
                if self.data_remaining > 0 {
                    self.data_remaining -= take as u64;
                }
            }
            _ => {}
        }

        data.len()
    }

    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn format_ready(&self) -> bool {
        self.format_ready
    }

    pub fn format(&self) -> DsdFormat {
        self.format
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Unconsumed bytes buffered internally, for pipeline back-pressure
    pub fn available_bytes(&self) -> usize {
        self.data_buf.len()
    }

    pub fn total_bytes_output(&self) -> u64 {
        self.total_bytes_output
    }

    /// Produce up to `max_bytes` of planar DSD into `out`
    pub fn read_planar(&mut self, out: &mut [u8], max_bytes: usize) -> usize {
        if self.state != State::Data || !self.format_ready {
            return 0;
        }

        let max_bytes = max_bytes.min(out.len());
        let produced = match self.format.container {
            DsdContainer::Dsf => self.read_dsf_blocks(out, max_bytes),
            DsdContainer::Dff | DsdContainer::Raw => self.read_interleaved(out, max_bytes),
        };

        if produced == 0 && self.data_buf.is_empty() && self.eof {
            self.finished = true;
            self.state = State::Done;
        }

        produced
    }

    // ------------------------------------------------------------------
    // Detection and header parsing
    // ------------------------------------------------------------------

    fn fail(&mut self, what: &str) -> bool {
        tracing::error!("[dsd] {}", what);
        self.state = State::Error;
        self.error = true;
        false
    }

    fn detect_container(&mut self) -> bool {
        if self.header_buf.len() < 4 {
            return false;
        }

        match &self.header_buf[..4] {
            b"DSD " => {
                self.state = State::ParseDsf;
                tracing::info!("[dsd] detected DSF container");
                true
            }
            b"FRM8" => {
                self.state = State::ParseDff;
                tracing::info!("[dsd] detected DFF (DSDIFF) container");
                true
            }
            magic => {
                if self.raw_configured {
                    self.format_ready = true;
                    self.data_remaining = 0;
                    let header = std::mem::take(&mut self.header_buf);
                    self.data_buf.extend_from_slice(&header);
                    self.state = State::Data;
                    tracing::info!(
                        "[dsd] raw DSD: {} Hz, {} ch",
                        self.format.rate,
                        self.format.channels
                    );
                    true
                } else {
                    let magic_copy = [magic[0], magic[1], magic[2], magic[3]];
                    self.fail(&format!(
                        "unknown container magic: {:02x?}",
                        magic_copy
                    ))
                }
            }
        }
    }

    fn parse_dsf_header(&mut self) -> bool {
        if self.header_buf.len() < DSF_MIN_HEADER {
            return false;
        }

        let p = &self.header_buf;

        if &p[0..4] != b"DSD " {
            return self.fail("DSF: invalid DSD chunk magic");
        }
        if &p[28..32] != b"fmt " {
            return self.fail("DSF: missing fmt chunk at offset 28");
        }

        let fmt_chunk_size = read_le64(&p[32..]);
        let format_id = read_le32(&p[44..]);
        let channel_count = read_le32(&p[52..]);
        let sample_rate = read_le32(&p[56..]);
        let bits_per_sample = read_le32(&p[60..]);
        let sample_count = read_le64(&p[64..]);
        let block_size = read_le32(&p[72..]);

        if format_id != 0 {
            return self.fail(&format!(
                "DSF: unsupported format ID {} (expected 0 = DSD raw)",
                format_id
            ));
        }
        if bits_per_sample != 1 {
            tracing::warn!("[dsd] DSF: bitsPerSample={} (expected 1)", bits_per_sample);
        }
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return self.fail(&format!("DSF: invalid channel count {}", channel_count));
        }
        if block_size == 0 {
            return self.fail("DSF: invalid block size 0");
        }

        // The fmt chunk size carries the real fmt length; data follows it
        let data_chunk_offset = 28 + fmt_chunk_size as usize;
        if self.header_buf.len() < data_chunk_offset + 12 {
            return false;
        }
        if &p[data_chunk_offset..data_chunk_offset + 4] != b"data" {
            return self.fail(&format!(
                "DSF: missing data chunk at offset {}",
                data_chunk_offset
            ));
        }

        let data_chunk_size = read_le64(&p[data_chunk_offset + 4..]);
        let data_bytes = data_chunk_size.saturating_sub(12);

        self.format = DsdFormat {
            rate: sample_rate,
            channels: channel_count,
            block_size_per_channel: block_size,
            total_dsd_bytes: data_bytes,
            container: DsdContainer::Dsf,
            lsb_first: true,
        };
        self.data_remaining = data_bytes;
        self.format_ready = true;

        tracing::info!(
            "[dsd] DSF: {} ({} Hz), {} ch, block={}, data={} bytes, samples/ch={}",
            rate_name(sample_rate),
            sample_rate,
            channel_count,
            block_size,
            data_bytes,
            sample_count
        );

        self.splice_to_data(data_chunk_offset + 12);
        true
    }

    fn parse_dff_header(&mut self) -> bool {
        if self.header_buf.len() < 16 {
            return false;
        }

        let p = &self.header_buf;
        let buf_len = self.header_buf.len();

        if &p[0..4] != b"FRM8" || &p[12..16] != b"DSD " {
            return self.fail("DFF: invalid FRM8/DSD header");
        }

        let mut sample_rate = 0u32;
        let mut channels = 0u32;
        let mut found_fs = false;
        let mut found_chnl = false;
        let mut data_start = 0usize;
        let mut data_size = 0u64;
        let mut found_data = false;
        let mut compressed = false;

        // Sub-chunks start after the outer FRM8 header
        let mut pos = 16;
        while pos + 12 <= buf_len {
            let chunk_id = &p[pos..pos + 4];
            let chunk_size = read_be64(&p[pos + 4..]) as usize;

            if chunk_id == b"FVER" {
                pos += 12 + chunk_size;
                if pos & 1 != 0 {
                    pos += 1;
                }
                continue;
            }

            if chunk_id == b"PROP" {
                if pos + 16 > buf_len {
                    return false;
                }
                if &p[pos + 12..pos + 16] != b"SND " {
                    pos += 12 + chunk_size;
                    if pos & 1 != 0 {
                        pos += 1;
                    }
                    continue;
                }

                let prop_end = pos + 12 + chunk_size;
                let mut sub_pos = pos + 16;

                while sub_pos + 12 <= buf_len && sub_pos + 12 <= prop_end {
                    let sub_id = &p[sub_pos..sub_pos + 4];
                    let sub_size = read_be64(&p[sub_pos + 4..]) as usize;

                    if sub_id == b"FS  " {
                        if sub_pos + 12 + 4 > buf_len {
                            return false;
                        }
                        sample_rate = read_be32(&p[sub_pos + 12..]);
                        found_fs = true;
                    } else if sub_id == b"CHNL" {
                        if sub_pos + 12 + 2 > buf_len {
                            return false;
                        }
                        channels =
                            ((p[sub_pos + 12] as u32) << 8) | p[sub_pos + 13] as u32;
                        found_chnl = true;
                    } else if sub_id == b"CMPR" {
                        if sub_pos + 12 + 4 > buf_len {
                            return false;
                        }
                        if &p[sub_pos + 12..sub_pos + 16] != b"DSD " {
                            compressed = true;
                        }
                    }

                    sub_pos += 12 + sub_size;
                    // DFF chunks are word-aligned
                    if sub_pos & 1 != 0 {
                        sub_pos += 1;
                    }
                }

                pos = prop_end;
                if pos & 1 != 0 {
                    pos += 1;
                }
                continue;
            }

            if chunk_id == b"DSD " {
                data_size = chunk_size as u64;
                data_start = pos + 12;
                found_data = true;
                break;
            }

            pos += 12 + chunk_size;
            if pos & 1 != 0 {
                pos += 1;
            }
        }

        if compressed {
            return self.fail("DFF: compressed DSD not supported");
        }
        if !found_data {
            return false; // need more header data
        }
        if !found_fs || sample_rate == 0 {
            return self.fail("DFF: missing FS (sample rate) chunk");
        }
        if !found_chnl || channels == 0 {
            return self.fail("DFF: missing CHNL (channels) chunk");
        }
        if channels > MAX_CHANNELS {
            return self.fail(&format!("DFF: invalid channel count {}", channels));
        }

        self.format = DsdFormat {
            rate: sample_rate,
            channels,
            block_size_per_channel: 0,
            total_dsd_bytes: data_size,
            container: DsdContainer::Dff,
            lsb_first: false,
        };
        self.data_remaining = data_size;
        self.format_ready = true;

        tracing::info!(
            "[dsd] DFF: {} ({} Hz), {} ch, data={} bytes",
            rate_name(sample_rate),
            sample_rate,
            channels,
            data_size
        );

        self.splice_to_data(data_start);
        true
    }

    /// Move header bytes past the data-chunk start into the data buffer
    fn splice_to_data(&mut self, data_start: usize) {
        if data_start < self.header_buf.len() {
            let mut tail = self.header_buf.split_off(data_start);
            if self.data_remaining > 0 && tail.len() > self.data_remaining as usize {
                tail.truncate(self.data_remaining as usize);
            }
            if self.data_remaining > 0 {
                self.data_remaining -= tail.len() as u64;
            }
            self.data_buf.extend_from_slice(&tail);
        }
        self.header_buf.clear();
        self.state = State::Data;
    }

    // ------------------------------------------------------------------
    // Data paths
    // ------------------------------------------------------------------

    /// DSF blocks are already planar within each block group
    /// (`block_size` bytes of channel 0, then channel 1, ...); copy whole
    /// groups, or a channel-aligned partial run at true EOF.
    fn read_dsf_blocks(&mut self, out: &mut [u8], max_bytes: usize) -> usize {
        let block_group =
            (self.format.block_size_per_channel * self.format.channels) as usize;
        if block_group == 0 {
            return 0;
        }

        let avail = self.data_buf.len();
        let groups = (max_bytes / block_group).min(avail / block_group);

        if groups == 0 {
            if self.eof && avail > 0 && self.data_remaining == 0 {
                let ch = self.format.channels as usize;
                let mut usable = avail / ch * ch;
                usable = usable.min(max_bytes / ch * ch);
                if usable == 0 {
                    return 0;
                }
                out[..usable].copy_from_slice(&self.data_buf[..usable]);
                self.data_buf.drain(..usable);
                self.total_bytes_output += usable as u64;
                return usable;
            }
            return 0;
        }

        let bytes = groups * block_group;
        out[..bytes].copy_from_slice(&self.data_buf[..bytes]);
        self.data_buf.drain(..bytes);
        self.total_bytes_output += bytes as u64;
        bytes
    }

    /// DFF and raw data are byte-interleaved; de-interleave a
    /// channel-aligned run to planar.
    fn read_interleaved(&mut self, out: &mut [u8], max_bytes: usize) -> usize {
        let avail = self.data_buf.len();
        if avail == 0 {
            return 0;
        }

        let ch = self.format.channels as usize;
        if ch == 0 {
            return 0;
        }

        let usable = avail.min(max_bytes) / ch * ch;
        if usable == 0 {
            return 0;
        }

        deinterleave_to_planar(&self.data_buf[..usable], out, self.format.channels);
        self.data_buf.drain(..usable);
        self.total_bytes_output += usable as u64;
        usable
    }
}

impl Default for DsdStreamReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsf_file(block_size: u32, channels: u32, data: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        // "DSD " chunk: magic + chunk size + total file size + metadata offset
        f.extend_from_slice(b"DSD ");
        f.extend_from_slice(&28u64.to_le_bytes());
        f.extend_from_slice(&0u64.to_le_bytes());
        f.extend_from_slice(&0u64.to_le_bytes());
        // "fmt " chunk
        f.extend_from_slice(b"fmt ");
        f.extend_from_slice(&52u64.to_le_bytes());
        f.extend_from_slice(&1u32.to_le_bytes()); // format version
        f.extend_from_slice(&0u32.to_le_bytes()); // format ID: DSD raw
        f.extend_from_slice(&2u32.to_le_bytes()); // channel type: stereo
        f.extend_from_slice(&channels.to_le_bytes());
        f.extend_from_slice(&2_822_400u32.to_le_bytes());
        f.extend_from_slice(&1u32.to_le_bytes()); // bits per sample
        f.extend_from_slice(&((data.len() as u64 / channels as u64 * 8).to_le_bytes()));
        f.extend_from_slice(&block_size.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes()); // reserved
        // "data" chunk
        f.extend_from_slice(b"data");
        f.extend_from_slice(&(12 + data.len() as u64).to_le_bytes());
        f.extend_from_slice(data);
        f
    }

    fn dff_file(data: &[u8]) -> Vec<u8> {
        let mut prop = Vec::new();
        prop.extend_from_slice(b"SND ");
        prop.extend_from_slice(b"FS  ");
        prop.extend_from_slice(&4u64.to_be_bytes());
        prop.extend_from_slice(&2_822_400u32.to_be_bytes());
        prop.extend_from_slice(b"CHNL");
        prop.extend_from_slice(&10u64.to_be_bytes());
        prop.extend_from_slice(&2u16.to_be_bytes());
        prop.extend_from_slice(b"SLFTSRGT"); // channel IDs
        prop.extend_from_slice(b"CMPR");
        prop.extend_from_slice(&4u64.to_be_bytes());
        prop.extend_from_slice(b"DSD ");

        let mut f = Vec::new();
        f.extend_from_slice(b"FRM8");
        f.extend_from_slice(&0u64.to_be_bytes()); // outer size: readers don't rely on it
        f.extend_from_slice(b"DSD ");
        f.extend_from_slice(b"FVER");
        f.extend_from_slice(&4u64.to_be_bytes());
        f.extend_from_slice(&0x01050000u32.to_be_bytes());
        f.extend_from_slice(b"PROP");
        f.extend_from_slice(&(prop.len() as u64).to_be_bytes());
        f.extend_from_slice(&prop);
        f.extend_from_slice(b"DSD ");
        f.extend_from_slice(&(data.len() as u64).to_be_bytes());
        f.extend_from_slice(data);
        f
    }

    #[test]
    fn dsf_blocks_stay_planar() {
        // Block size 4, 2 channels: [L0 L1 L2 L3][R0 R1 R2 R3] x 2 groups
        let data: Vec<u8> = (0u8..16).collect();
        let file = dsf_file(4, 2, &data);

        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        reader.set_eof();

        let fmt = reader.format();
        assert_eq!(fmt.container, DsdContainer::Dsf);
        assert_eq!(fmt.rate, 2_822_400);
        assert_eq!(fmt.block_size_per_channel, 4);
        assert!(fmt.lsb_first);

        let mut out = [0u8; 64];
        let n = reader.read_planar(&mut out, 64);
        assert_eq!(n, 16);
        // Input order is preserved verbatim: DSF is planar per block pair
        assert_eq!(&out[..16], &data[..]);
    }

    #[test]
    fn dff_deinterleaves_to_planar() {
        // Interleaved [L0 R0 L1 R1 L2 R2 L3 R3]
        let data = [1u8, 101, 2, 102, 3, 103, 4, 104];
        let file = dff_file(&data);

        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        reader.set_eof();

        let fmt = reader.format();
        assert_eq!(fmt.container, DsdContainer::Dff);
        assert_eq!(fmt.channels, 2);
        assert!(!fmt.lsb_first);

        let mut out = [0u8; 16];
        let n = reader.read_planar(&mut out, 16);
        assert_eq!(n, 8);
        assert_eq!(&out[..8], &[1, 2, 3, 4, 101, 102, 103, 104]);
    }

    #[test]
    fn dsf_partial_final_group_is_channel_aligned() {
        // 11 bytes of data with block size 4 x 2ch: one full group (8),
        // then a 3-byte tail that must round down to 2 bytes at EOF
        let data: Vec<u8> = (0u8..11).collect();
        let file = dsf_file(4, 2, &data);

        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        reader.set_eof();

        let mut out = [0u8; 64];
        assert_eq!(reader.read_planar(&mut out, 64), 8);
        assert_eq!(reader.read_planar(&mut out, 64), 2);
        assert_eq!(reader.read_planar(&mut out, 64), 0);
    }

    #[test]
    fn chunked_feed_matches_single_blob() {
        let data: Vec<u8> = (0u8..32).collect();
        let file = dsf_file(8, 2, &data);

        let read_all = |chunk: usize| {
            let mut reader = DsdStreamReader::new();
            for piece in file.chunks(chunk) {
                reader.feed(piece);
            }
            reader.set_eof();
            let mut all = Vec::new();
            let mut out = [0u8; 64];
            loop {
                let n = reader.read_planar(&mut out, 64);
                if n == 0 {
                    break;
                }
                all.extend_from_slice(&out[..n]);
            }
            all
        };

        let whole = read_all(file.len());
        for chunk in [1, 5, 17] {
            assert_eq!(read_all(chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn dsf_zero_block_size_is_fatal() {
        let file = dsf_file(0, 2, &[0u8; 8]);
        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        assert!(reader.has_error());
    }

    #[test]
    fn compressed_dff_is_fatal() {
        let data = [0u8; 4];
        let mut file = dff_file(&data);
        // Patch the CMPR compression tag from "DSD " to "DST "
        let pos = file
            .windows(4)
            .position(|w| w == b"CMPR")
            .expect("CMPR chunk present");
        file[pos + 12..pos + 16].copy_from_slice(b"DST ");

        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        assert!(reader.has_error());
    }

    #[test]
    fn unknown_magic_without_raw_hint_is_fatal() {
        let mut reader = DsdStreamReader::new();
        reader.feed(b"RIFF\0\0\0\0");
        assert!(reader.has_error());
    }

    #[test]
    fn raw_mode_deinterleaves() {
        let mut reader = DsdStreamReader::new();
        reader.set_raw_format(2_822_400, 2);
        reader.feed(&[10, 20, 11, 21]);

        let mut out = [0u8; 8];
        let n = reader.read_planar(&mut out, 8);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[10, 11, 20, 21]);
        assert_eq!(reader.format().container, DsdContainer::Raw);
    }

    #[test]
    fn available_bytes_tracks_buffer() {
        let data: Vec<u8> = (0u8..16).collect();
        let file = dsf_file(4, 2, &data);
        let mut reader = DsdStreamReader::new();
        reader.feed(&file);
        assert_eq!(reader.available_bytes(), 16);

        let mut out = [0u8; 8];
        reader.read_planar(&mut out, 8);
        assert_eq!(reader.available_bytes(), 8);
    }
}
