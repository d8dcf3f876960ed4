//! Binary message definitions for the slimproto control protocol
//!
//! All multi-byte fields are network byte order (big-endian).
//!
//! Framing is asymmetric:
//! - Client -> Server: `[4-byte opcode][4-byte length BE][payload]`
//! - Server -> Client: `[2-byte length BE][4-byte opcode][payload]`,
//!   where the length covers opcode + payload.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Device IDs reported in HELO
pub const DEVICE_ID_SQUEEZEBOX2: u8 = 4;
pub const DEVICE_ID_TRANSPORTER: u8 = 5;
pub const DEVICE_ID_SQUEEZESLAVE: u8 = 8;
pub const DEVICE_ID_SQUEEZEPLAY: u8 = 12;

/// Fixed size of the strm command header, before the HTTP request blob
pub const STRM_HEADER_LEN: usize = 24;

/// Fixed size of the audg command payload (without the v7 sequence field)
pub const AUDG_LEN: usize = 18;

/// Fixed size of the HELO payload before the capability string
pub const HELO_FIXED_LEN: usize = 36;

/// Fixed size of the STAT payload
pub const STAT_LEN: usize = 53;

/// Convert a strm sample-rate code character to Hz.
/// Returns `None` for `'?'` (self-describing stream).
pub fn sample_rate_from_code(code: u8) -> Option<u32> {
    match code {
        b'0' => Some(11_025),
        b'1' => Some(22_050),
        b'2' => Some(32_000),
        b'3' => Some(44_100),
        b'4' => Some(48_000),
        b'5' => Some(8_000),
        b'6' => Some(12_000),
        b'7' => Some(16_000),
        b'8' => Some(24_000),
        b'9' => Some(96_000),
        _ => None,
    }
}

/// Convert a strm sample-size code character to bits.
/// Returns `None` for `'?'` (self-describing stream).
pub fn sample_size_from_code(code: u8) -> Option<u32> {
    match code {
        b'0' => Some(8),
        b'1' => Some(16),
        b'2' => Some(20),
        b'3' => Some(24),
        b'4' => Some(32),
        _ => None,
    }
}

/// strm sub-commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSubcommand {
    Start,
    Stop,
    Pause,
    Unpause,
    Flush,
    Status,
    Skip,
}

impl StreamSubcommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b's' => Some(Self::Start),
            b'q' => Some(Self::Stop),
            b'p' => Some(Self::Pause),
            b'u' => Some(Self::Unpause),
            b'f' => Some(Self::Flush),
            b't' => Some(Self::Status),
            b'a' => Some(Self::Skip),
            _ => None,
        }
    }
}

/// STAT event codes the player emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// STMa — autostart
    Autostart,
    /// STMc — stream connection opened
    Connect,
    /// STMd — decoder finished
    DecoderReady,
    /// STMe — connection established
    Established,
    /// STMf — flushed / stopped
    Flushed,
    /// STMh — HTTP response headers received
    HeadersReceived,
    /// STMl — buffer threshold reached
    BufferThreshold,
    /// STMn — not connected / decoder error
    NotConnected,
    /// STMo — output underrun
    OutputUnderrun,
    /// STMp — pause confirmed
    Paused,
    /// STMr — resume confirmed
    Resumed,
    /// STMs — track started
    TrackStarted,
    /// STMt — heartbeat response
    Heartbeat,
    /// STMu — underrun / end of track
    Underrun,
}

impl StatEvent {
    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            Self::Autostart => b"STMa",
            Self::Connect => b"STMc",
            Self::DecoderReady => b"STMd",
            Self::Established => b"STMe",
            Self::Flushed => b"STMf",
            Self::HeadersReceived => b"STMh",
            Self::BufferThreshold => b"STMl",
            Self::NotConnected => b"STMn",
            Self::OutputUnderrun => b"STMo",
            Self::Paused => b"STMp",
            Self::Resumed => b"STMr",
            Self::TrackStarted => b"STMs",
            Self::Heartbeat => b"STMt",
            Self::Underrun => b"STMu",
        }
    }
}

/// Parsed strm command header (24 bytes on the wire)
#[derive(Debug, Clone)]
pub struct StreamCommand {
    pub command: StreamSubcommand,
    /// '0'-'3'
    pub autostart: u8,
    /// 'p', 'f', 'm', 'o', 'a', 'd', ...
    pub format: u8,
    pub pcm_sample_size: u8,
    pub pcm_sample_rate: u8,
    pub pcm_channels: u8,
    pub pcm_endian: u8,
    /// KB of input before autostart
    pub threshold: u8,
    pub spdif_enable: u8,
    /// Fade period in seconds
    pub trans_period: u8,
    pub trans_type: u8,
    /// 0x80 = loop, 0x40 = no-restart; exposed but not acted upon
    pub flags: u8,
    /// Output buffer threshold, tenths of a second
    pub output_threshold: u8,
    pub reserved: u8,
    /// Replay gain (16.16 fixed point) for 's'; interval or server
    /// timestamp for 'p'/'u'/'t'/'a'
    pub replay_gain: u32,
    pub server_port: u16,
    /// IPv4 of the stream server; 0 = reuse the control connection peer
    pub server_ip: u32,
}

impl StreamCommand {
    /// Parse a strm payload. Returns the fixed header and the trailing
    /// HTTP request blob (empty for most sub-commands).
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if payload.len() < STRM_HEADER_LEN {
            return Err(ProtocolError::ShortMessage {
                opcode: "strm".to_string(),
                len: payload.len(),
            });
        }

        let mut buf = payload;
        let command_code = buf.get_u8();
        let command = StreamSubcommand::from_code(command_code)
            .ok_or(ProtocolError::UnknownSubcommand(command_code as char))?;

        let cmd = Self {
            command,
            autostart: buf.get_u8(),
            format: buf.get_u8(),
            pcm_sample_size: buf.get_u8(),
            pcm_sample_rate: buf.get_u8(),
            pcm_channels: buf.get_u8(),
            pcm_endian: buf.get_u8(),
            threshold: buf.get_u8(),
            spdif_enable: buf.get_u8(),
            trans_period: buf.get_u8(),
            trans_type: buf.get_u8(),
            flags: buf.get_u8(),
            output_threshold: buf.get_u8(),
            reserved: buf.get_u8(),
            replay_gain: buf.get_u32(),
            server_port: buf.get_u16(),
            server_ip: buf.get_u32(),
        };

        Ok((cmd, &payload[STRM_HEADER_LEN..]))
    }

    /// Sample rate in Hz from the rate code; `None` = self-describing
    pub fn sample_rate_hz(&self) -> Option<u32> {
        sample_rate_from_code(self.pcm_sample_rate)
    }

    /// Sample size in bits from the size code; `None` = self-describing
    pub fn sample_size_bits(&self) -> Option<u32> {
        sample_size_from_code(self.pcm_sample_size)
    }

    /// Channel count from the channel code; `None` = self-describing
    pub fn channel_count(&self) -> Option<u32> {
        match self.pcm_channels {
            b'1' => Some(1),
            b'2' => Some(2),
            _ => None,
        }
    }

    /// True when the PCM payload is big-endian ('0'); `None` = self-describing
    pub fn big_endian(&self) -> Option<bool> {
        match self.pcm_endian {
            b'0' => Some(true),
            b'1' => Some(false),
            _ => None,
        }
    }

    /// Loop flag bit (no side effects are attached to it)
    pub fn loop_flag(&self) -> bool {
        self.flags & 0x80 != 0
    }

    /// No-restart flag bit (no side effects are attached to it)
    pub fn no_restart_flag(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

/// Parsed audg command (server volume change)
#[derive(Debug, Clone, Copy)]
pub struct GainCommand {
    /// Legacy 0-128 gain
    pub old_gain_left: u32,
    pub old_gain_right: u32,
    /// Digital volume control flag
    pub dvc: u8,
    /// 255 = silent, 0 = full
    pub preamp: u8,
    /// 16.16 fixed point
    pub new_gain_left: u32,
    pub new_gain_right: u32,
}

impl GainCommand {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < AUDG_LEN {
            return Err(ProtocolError::ShortMessage {
                opcode: "audg".to_string(),
                len: payload.len(),
            });
        }

        let mut buf = payload;
        Ok(Self {
            old_gain_left: buf.get_u32(),
            old_gain_right: buf.get_u32(),
            dvc: buf.get_u8(),
            preamp: buf.get_u8(),
            new_gain_left: buf.get_u32(),
            new_gain_right: buf.get_u32(),
        })
    }
}

/// Telemetry snapshot carried by a STAT message
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReport {
    pub stream_buf_size: u32,
    pub stream_buf_full: u32,
    pub bytes_received: u64,
    pub jiffies: u32,
    pub output_buf_size: u32,
    pub output_buf_full: u32,
    pub elapsed_seconds: u32,
    pub elapsed_ms: u32,
    pub server_timestamp: u32,
    pub error_code: u16,
}

impl StatusReport {
    /// Encode the 53-byte STAT payload for the given event
    pub fn encode(&self, event: StatEvent) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STAT_LEN);
        buf.put_slice(event.code());
        // crlf, mas_init, mas_mode
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u32(self.stream_buf_size);
        buf.put_u32(self.stream_buf_full);
        buf.put_u32((self.bytes_received >> 32) as u32);
        buf.put_u32(self.bytes_received as u32);
        // Signal strength: 0xFFFF means wired connection
        buf.put_u16(0xFFFF);
        buf.put_u32(self.jiffies);
        buf.put_u32(self.output_buf_size);
        buf.put_u32(self.output_buf_full);
        buf.put_u32(self.elapsed_seconds);
        // Voltage: always 0
        buf.put_u16(0);
        buf.put_u32(self.elapsed_ms);
        buf.put_u32(self.server_timestamp);
        buf.put_u16(self.error_code);
        debug_assert_eq!(buf.len(), STAT_LEN);
        buf
    }
}

/// Encode the HELO payload: 36 fixed bytes followed by the capability string
pub fn encode_helo(device_id: u8, revision: u8, mac: &[u8; 6], capabilities: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HELO_FIXED_LEN + capabilities.len());
    buf.put_u8(device_id);
    buf.put_u8(revision);
    buf.put_slice(mac);
    // UUID: all zeros is accepted
    buf.put_slice(&[0u8; 16]);
    // WLAN channel list: 0 for wired
    buf.put_u16(0);
    // Bytes received hi/lo
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(b"en");
    debug_assert_eq!(buf.len(), HELO_FIXED_LEN);
    buf.put_slice(capabilities.as_bytes());
    buf
}

/// Frame a client -> server message: `[4 opcode][4 length BE][payload]`
pub fn client_frame(opcode: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.put_slice(opcode);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strm_payload(sub: u8, replay_gain: u32) -> Vec<u8> {
        let mut p = vec![sub, b'0', b'f', b'?', b'?', b'?', b'?'];
        p.extend_from_slice(&[255, b'0', 0, b'0', 0, 0, 0]);
        p.extend_from_slice(&replay_gain.to_be_bytes());
        p.extend_from_slice(&9000u16.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        p
    }

    #[test]
    fn strm_header_is_24_bytes() {
        assert_eq!(strm_payload(b't', 0).len(), STRM_HEADER_LEN);
    }

    #[test]
    fn parse_heartbeat_echoes_timestamp() {
        let payload = strm_payload(b't', 0xDEAD_BEEF);
        let (cmd, rest) = StreamCommand::parse(&payload).unwrap();
        assert_eq!(cmd.command, StreamSubcommand::Status);
        assert_eq!(cmd.replay_gain, 0xDEAD_BEEF);
        assert!(rest.is_empty());
    }

    #[test]
    fn parse_start_with_http_request() {
        let mut payload = strm_payload(b's', 0);
        payload.extend_from_slice(b"GET /stream.flac HTTP/1.0\r\n\r\n");
        let (cmd, request) = StreamCommand::parse(&payload).unwrap();
        assert_eq!(cmd.command, StreamSubcommand::Start);
        assert_eq!(cmd.format, b'f');
        assert_eq!(cmd.server_port, 9000);
        assert_eq!(request, b"GET /stream.flac HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn parse_strm_too_short() {
        assert!(StreamCommand::parse(&[b's', b'0']).is_err());
    }

    #[test]
    fn sample_rate_table() {
        assert_eq!(sample_rate_from_code(b'0'), Some(11_025));
        assert_eq!(sample_rate_from_code(b'3'), Some(44_100));
        assert_eq!(sample_rate_from_code(b'5'), Some(8_000));
        assert_eq!(sample_rate_from_code(b'9'), Some(96_000));
        assert_eq!(sample_rate_from_code(b'?'), None);
    }

    #[test]
    fn sample_size_table() {
        assert_eq!(sample_size_from_code(b'0'), Some(8));
        assert_eq!(sample_size_from_code(b'3'), Some(24));
        assert_eq!(sample_size_from_code(b'4'), Some(32));
        assert_eq!(sample_size_from_code(b'?'), None);
    }

    #[test]
    fn stat_payload_layout() {
        let report = StatusReport {
            stream_buf_size: 0x11223344,
            stream_buf_full: 0x55667788,
            bytes_received: 0x0102030405060708,
            jiffies: 42,
            output_buf_size: 1000,
            output_buf_full: 500,
            elapsed_seconds: 7,
            elapsed_ms: 7500,
            server_timestamp: 0xDEAD_BEEF,
            error_code: 0,
        };
        let buf = report.encode(StatEvent::Heartbeat);
        assert_eq!(buf.len(), STAT_LEN);
        assert_eq!(&buf[0..4], b"STMt");
        // Three zero bytes after the event code
        assert_eq!(&buf[4..7], &[0, 0, 0]);
        assert_eq!(&buf[7..11], &0x11223344u32.to_be_bytes());
        // bytes-received split hi/lo
        assert_eq!(&buf[15..19], &0x01020304u32.to_be_bytes());
        assert_eq!(&buf[19..23], &0x05060708u32.to_be_bytes());
        // Wired connection marker
        assert_eq!(&buf[23..25], &[0xFF, 0xFF]);
        // Server timestamp echo at offset 47
        assert_eq!(&buf[47..51], &0xDEAD_BEEFu32.to_be_bytes());
    }

    #[test]
    fn helo_payload_layout() {
        let mac = [0x02, 1, 2, 3, 4, 5];
        let buf = encode_helo(DEVICE_ID_SQUEEZEPLAY, 0, &mac, "flc,pcm");
        assert_eq!(buf.len(), HELO_FIXED_LEN + 7);
        assert_eq!(buf[0], DEVICE_ID_SQUEEZEPLAY);
        assert_eq!(&buf[2..8], &mac);
        assert_eq!(&buf[34..36], b"en");
        assert_eq!(&buf[36..], b"flc,pcm");
    }

    #[test]
    fn client_frame_layout() {
        let frame = client_frame(b"STAT", &[1, 2, 3]);
        assert_eq!(&frame[0..4], b"STAT");
        assert_eq!(&frame[4..8], &3u32.to_be_bytes());
        assert_eq!(&frame[8..], &[1, 2, 3]);
    }

    #[test]
    fn audg_parses_new_gain() {
        let mut p = Vec::new();
        p.extend_from_slice(&100u32.to_be_bytes());
        p.extend_from_slice(&100u32.to_be_bytes());
        p.push(1);
        p.push(255);
        p.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        p.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        let gain = GainCommand::parse(&p).unwrap();
        assert_eq!(gain.new_gain_left, 0x0001_0000);
        assert_eq!(gain.preamp, 255);
    }
}
