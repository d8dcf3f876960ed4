//! Slimproto control-protocol client
//!
//! Registers as a player with the music server, runs the receive loop on a
//! dedicated thread, answers heartbeats synchronously and hands stream and
//! volume commands to registered callbacks. Socket writes are serialised by
//! a mutex so telemetry never interleaves with command responses.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::Config;
use crate::error::ProtocolError;
use crate::protocol::messages::{
    client_frame, encode_helo, GainCommand, StatEvent, StatusReport, StreamCommand,
    StreamSubcommand, DEVICE_ID_SQUEEZEPLAY,
};

/// Callback invoked for every stream command except heartbeats
pub type StreamCallback = Box<dyn Fn(StreamCommand, Vec<u8>) + Send + Sync>;

/// Callback invoked for server volume changes (new gain left/right)
pub type VolumeCallback = Box<dyn Fn(u32, u32) + Send + Sync>;

/// Cross-thread telemetry counters reported in STAT messages.
///
/// Written by the pipeline worker, read by the send side. The
/// bytes-received counter is track-local and reset on every start command.
#[derive(Debug, Default)]
pub struct SessionCounters {
    bytes_received: AtomicU64,
    elapsed_seconds: AtomicU32,
    elapsed_ms: AtomicU32,
    stream_buf_size: AtomicU32,
    stream_buf_full: AtomicU32,
    output_buf_size: AtomicU32,
    output_buf_full: AtomicU32,
}

impl SessionCounters {
    /// Reset the track-local values at the start of a new stream
    pub fn reset_track(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.elapsed_seconds.store(0, Ordering::Relaxed);
        self.elapsed_ms.store(0, Ordering::Relaxed);
        self.stream_buf_full.store(0, Ordering::Relaxed);
        self.output_buf_full.store(0, Ordering::Relaxed);
    }

    pub fn set_stream_bytes(&self, bytes: u64) {
        self.bytes_received.store(bytes, Ordering::Relaxed);
    }

    pub fn set_elapsed(&self, seconds: u32, milliseconds: u32) {
        self.elapsed_seconds.store(seconds, Ordering::Relaxed);
        self.elapsed_ms.store(milliseconds, Ordering::Relaxed);
    }

    pub fn set_buffer_state(
        &self,
        stream_buf_size: u32,
        stream_buf_full: u32,
        output_buf_size: u32,
        output_buf_full: u32,
    ) {
        self.stream_buf_size.store(stream_buf_size, Ordering::Relaxed);
        self.stream_buf_full.store(stream_buf_full, Ordering::Relaxed);
        self.output_buf_size.store(output_buf_size, Ordering::Relaxed);
        self.output_buf_full.store(output_buf_full, Ordering::Relaxed);
    }
}

/// Control-protocol session: owns the TCP socket from connect to disconnect
pub struct SlimprotoClient {
    socket: TcpStream,
    send_lock: Mutex<()>,
    running: AtomicBool,
    connected: AtomicBool,
    server_ip: IpAddr,
    start_time: Instant,
    counters: Arc<SessionCounters>,
    mac: [u8; 6],
    player_name: String,
    capabilities: String,
    stream_cb: Mutex<Option<StreamCallback>>,
    volume_cb: Mutex<Option<VolumeCallback>>,
    last_heartbeat_log: AtomicU32,
}

impl SlimprotoClient {
    /// Connect to the server, send HELO and the player name
    pub fn connect(server: &str, port: u16, config: &Config) -> Result<Self, ProtocolError> {
        let mac = match &config.mac_address {
            Some(s) => parse_mac(s)?,
            None => derive_mac(&config.player_name),
        };
        tracing::info!(
            "Player MAC: {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );

        let addr = (server, port)
            .to_socket_addrs()
            .map_err(|_| ProtocolError::InvalidAddress(server.to_string()))?
            .next()
            .ok_or_else(|| ProtocolError::InvalidAddress(server.to_string()))?;

        tracing::info!("Connecting to server at {}...", addr);
        let socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;
        let server_ip = socket.peer_addr()?.ip();
        tracing::info!("Connected to server");

        let client = Self {
            socket,
            send_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            server_ip,
            start_time: Instant::now(),
            counters: Arc::new(SessionCounters::default()),
            mac,
            player_name: config.player_name.clone(),
            capabilities: build_capabilities(config),
            stream_cb: Mutex::new(None),
            volume_cb: Mutex::new(None),
            last_heartbeat_log: AtomicU32::new(0),
        };

        client.send_helo()?;
        client.send_setd(0, client.player_name.as_bytes())?;

        Ok(client)
    }

    /// Register the stream-command callback (set before `run`)
    pub fn on_stream(&self, cb: StreamCallback) {
        *self.stream_cb.lock().unwrap() = Some(cb);
    }

    /// Register the volume callback (set before `run`)
    pub fn on_volume(&self, cb: VolumeCallback) {
        *self.volume_cb.lock().unwrap() = Some(cb);
    }

    /// Telemetry counters shared with the pipeline worker
    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    /// Peer address of the control connection (used when strm carries IP 0)
    pub fn server_ip(&self) -> IpAddr {
        self.server_ip
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Receive loop: blocks until disconnect or error. Call from a
    /// dedicated thread.
    pub fn run(&self) {
        self.running.store(true, Ordering::Release);
        tracing::debug!("[slimproto] receive loop started");

        while self.running.load(Ordering::Acquire) {
            // Server -> client frame: [2-byte length BE][4-byte opcode][payload]
            let mut len_buf = [0u8; 2];
            if self.read_exact(&mut len_buf).is_err() {
                if self.running.load(Ordering::Acquire) {
                    tracing::warn!("Lost connection to server");
                }
                break;
            }
            let frame_len = u16::from_be_bytes(len_buf) as usize;

            if frame_len < 4 {
                tracing::warn!("[slimproto] invalid frame length: {}", frame_len);
                continue;
            }

            let mut opcode = [0u8; 4];
            if self.read_exact(&mut opcode).is_err() {
                break;
            }

            let mut payload = vec![0u8; frame_len - 4];
            if !payload.is_empty() && self.read_exact(&mut payload).is_err() {
                break;
            }

            self.dispatch(&opcode, &payload);
        }

        tracing::debug!("[slimproto] receive loop ended");
        self.connected.store(false, Ordering::Release);
    }

    /// Unblock the receive loop and stop the session
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    /// Graceful disconnect: BYE then socket shutdown
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.send_message(b"BYE!", &[0]);
            tracing::debug!("[slimproto] BYE sent");
        }
        self.running.store(false, Ordering::Release);
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn dispatch(&self, opcode: &[u8; 4], payload: &[u8]) {
        match opcode {
            b"strm" => self.handle_strm(payload),
            b"audg" => self.handle_audg(payload),
            b"setd" => self.handle_setd(payload),
            b"serv" => {
                if payload.len() >= 4 {
                    let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
                    tracing::info!("[slimproto] server redirect to {}", ip);
                }
            }
            b"vers" => {
                tracing::info!("Server version: {}", String::from_utf8_lossy(payload));
            }
            b"aude" => {
                tracing::debug!("[slimproto] aude received (audio enable)");
            }
            // Display and visualisation commands: no screen, silently ignore
            b"vfdc" | b"grfe" | b"grfb" => {}
            _ => {
                tracing::debug!(
                    "[slimproto] unknown command: {} ({} bytes)",
                    String::from_utf8_lossy(opcode),
                    payload.len()
                );
            }
        }
    }

    fn handle_strm(&self, payload: &[u8]) {
        let (cmd, http_request) = match StreamCommand::parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("[slimproto] bad strm: {}", e);
                return;
            }
        };

        match cmd.command {
            StreamSubcommand::Status => {
                // Heartbeat: answer synchronously with STMt echoing the
                // server timestamp; the stream callback is not invoked.
                let ts = cmd.replay_gain;
                self.send_stat(StatEvent::Heartbeat, ts);

                // Heartbeats arrive every couple of seconds; log at most
                // one per minute.
                let last = self.last_heartbeat_log.load(Ordering::Relaxed);
                if ts == 0 || ts >= last.wrapping_add(60_000) {
                    tracing::debug!("[slimproto] heartbeat (ts={})", ts);
                    self.last_heartbeat_log.store(ts, Ordering::Relaxed);
                }
                return;
            }
            StreamSubcommand::Start => {
                tracing::info!(
                    "[slimproto] strm-s: format={} rate={} size={} ch={} port={}",
                    cmd.format as char,
                    cmd.pcm_sample_rate as char,
                    cmd.pcm_sample_size as char,
                    cmd.pcm_channels as char,
                    cmd.server_port
                );
                tracing::debug!(
                    "[slimproto] HTTP request: {}",
                    String::from_utf8_lossy(&http_request[..http_request.len().min(120)])
                );
            }
            StreamSubcommand::Stop => tracing::info!("[slimproto] strm-q: stop"),
            StreamSubcommand::Pause => {
                if cmd.replay_gain > 0 {
                    tracing::info!("[slimproto] strm-p: pause for {} ms", cmd.replay_gain);
                } else {
                    tracing::info!("[slimproto] strm-p: pause");
                }
            }
            StreamSubcommand::Unpause => tracing::info!("[slimproto] strm-u: unpause"),
            StreamSubcommand::Flush => tracing::info!("[slimproto] strm-f: flush"),
            StreamSubcommand::Skip => tracing::info!("[slimproto] strm-a: skip"),
        }

        if let Some(cb) = self.stream_cb.lock().unwrap().as_ref() {
            cb(cmd, http_request.to_vec());
        }
    }

    fn handle_audg(&self, payload: &[u8]) {
        let gain = match GainCommand::parse(payload) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!("[slimproto] bad audg: {}", e);
                return;
            }
        };

        tracing::debug!(
            "[slimproto] audg: gainL={:#x} gainR={:#x} (ignored - bit-perfect mode)",
            gain.new_gain_left,
            gain.new_gain_right
        );

        if let Some(cb) = self.volume_cb.lock().unwrap().as_ref() {
            cb(gain.new_gain_left, gain.new_gain_right);
        }
    }

    fn handle_setd(&self, payload: &[u8]) {
        let Some((&id, data)) = payload.split_first() else {
            return;
        };

        if id == 0 && !data.is_empty() {
            let name = String::from_utf8_lossy(data);
            let name = name.trim_end_matches('\0');
            tracing::info!("[slimproto] player name set to: {}", name);
        } else if id == 0 {
            // Server queries the player name
            let _ = self.send_setd(0, self.player_name.as_bytes());
        } else {
            tracing::debug!("[slimproto] setd id={} ({} bytes)", id, data.len());
        }
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    fn send_helo(&self) -> Result<(), ProtocolError> {
        let payload = encode_helo(DEVICE_ID_SQUEEZEPLAY, 0, &self.mac, &self.capabilities);
        self.send_message(b"HELO", &payload)?;
        tracing::info!("HELO sent (capabilities: {})", self.capabilities);
        Ok(())
    }

    fn send_setd(&self, id: u8, data: &[u8]) -> Result<(), ProtocolError> {
        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(id);
        payload.extend_from_slice(data);
        self.send_message(b"SETD", &payload)?;
        tracing::debug!(
            "[slimproto] setd sent: id={} data={:?}",
            id,
            String::from_utf8_lossy(data)
        );
        Ok(())
    }

    /// Send a STAT report for the given event (thread-safe)
    pub fn send_stat(&self, event: StatEvent, server_timestamp: u32) {
        let c = &self.counters;
        let report = StatusReport {
            stream_buf_size: c.stream_buf_size.load(Ordering::Relaxed),
            stream_buf_full: c.stream_buf_full.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            jiffies: self.jiffies(),
            output_buf_size: c.output_buf_size.load(Ordering::Relaxed),
            output_buf_full: c.output_buf_full.load(Ordering::Relaxed),
            elapsed_seconds: c.elapsed_seconds.load(Ordering::Relaxed),
            elapsed_ms: c.elapsed_ms.load(Ordering::Relaxed),
            server_timestamp,
            error_code: 0,
        };

        if self.send_message(b"STAT", &report.encode(event)).is_err() {
            return;
        }

        // Heartbeat responses would flood the log (one every 2s or so)
        if event != StatEvent::Heartbeat {
            tracing::debug!(
                "[slimproto] STAT sent: {}",
                String::from_utf8_lossy(event.code())
            );
        }
    }

    /// Forward the HTTP response headers to the server (thread-safe)
    pub fn send_resp(&self, headers: &[u8]) {
        if self.send_message(b"RESP", headers).is_ok() {
            tracing::debug!("[slimproto] RESP sent ({} bytes)", headers.len());
        }
    }

    fn send_message(&self, opcode: &[u8; 4], payload: &[u8]) -> Result<(), ProtocolError> {
        // One frame per write so telemetry and responses never interleave
        let _guard = self.send_lock.lock().unwrap();
        let frame = client_frame(opcode, payload);
        (&self.socket).write_all(&frame)?;
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8]) -> std::io::Result<()> {
        (&self.socket).read_exact(buf)
    }

    /// Milliseconds since the session was established
    pub fn jiffies(&self) -> u32 {
        self.start_time.elapsed().as_millis() as u32
    }
}

impl Drop for SlimprotoClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Derive a stable MAC from the player name: locally-administered unicast
/// prefix, remaining bytes from a hash of the name.
pub fn derive_mac(player_name: &str) -> [u8; 6] {
    let mut hasher = DefaultHasher::new();
    player_name.hash(&mut hasher);
    let h = hasher.finish();

    [
        0x02,
        h as u8,
        (h >> 8) as u8,
        (h >> 16) as u8,
        (h >> 24) as u8,
        (h >> 32) as u8,
    ]
}

/// Parse `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`
pub fn parse_mac(s: &str) -> Result<[u8; 6], ProtocolError> {
    let sep = if s.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 6 {
        return Err(ProtocolError::InvalidMac(s.to_string()));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] =
            u8::from_str_radix(part, 16).map_err(|_| ProtocolError::InvalidMac(s.to_string()))?;
    }
    Ok(mac)
}

/// Comma-separated capability string sent in HELO.
/// The server splits on commas and matches codec names first.
fn build_capabilities(config: &Config) -> String {
    let mut caps = String::from("flc,pcm,aif,wav,mp3,ogg,aac");
    if config.dsd_enabled {
        caps.push_str(",dsf,dff");
    }

    caps.push_str(&format!(",MaxSampleRate={}", config.max_sample_rate));
    caps.push_str(",Model=slimplay");
    caps.push_str(",ModelName=slimplay");
    caps.push_str(",AccuratePlayPoints=1");
    caps.push_str(",HasDigitalOut=1");
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_mac_is_locally_administered_and_stable() {
        let a = derive_mac("Living Room");
        let b = derive_mac("Living Room");
        let c = derive_mac("Kitchen");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0], 0x02);
    }

    #[test]
    fn parse_mac_colon_and_dash() {
        assert_eq!(
            parse_mac("02:0a:0b:0c:0d:0e").unwrap(),
            [0x02, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e]
        );
        assert_eq!(
            parse_mac("02-0a-0b-0c-0d-0e").unwrap(),
            [0x02, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e]
        );
    }

    #[test]
    fn parse_mac_rejects_garbage() {
        assert!(parse_mac("not-a-mac").is_err());
        assert!(parse_mac("02:0a:0b:0c:0d").is_err());
        assert!(parse_mac("zz:0a:0b:0c:0d:0e").is_err());
    }

    #[test]
    fn capabilities_reflect_config() {
        let mut config = Config::default();
        config.max_sample_rate = 192_000;
        let caps = build_capabilities(&config);
        assert!(caps.starts_with("flc,pcm,aif,wav,mp3,ogg,aac,dsf,dff"));
        assert!(caps.contains("MaxSampleRate=192000"));
        assert!(caps.contains("AccuratePlayPoints=1"));

        config.dsd_enabled = false;
        let caps = build_capabilities(&config);
        assert!(!caps.contains("dsf"));
        assert!(!caps.contains("dff"));
    }

    #[test]
    fn counters_reset_is_track_local() {
        let counters = SessionCounters::default();
        counters.set_stream_bytes(1234);
        counters.set_elapsed(10, 10_500);
        counters.set_buffer_state(100, 50, 200, 150);
        counters.reset_track();
        assert_eq!(counters.bytes_received.load(Ordering::Relaxed), 0);
        assert_eq!(counters.elapsed_seconds.load(Ordering::Relaxed), 0);
        assert_eq!(counters.elapsed_ms.load(Ordering::Relaxed), 0);
        // Buffer sizes describe capacity, not track progress
        assert_eq!(counters.stream_buf_size.load(Ordering::Relaxed), 100);
        assert_eq!(counters.output_buf_size.load(Ordering::Relaxed), 200);
    }
}
