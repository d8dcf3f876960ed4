//! End-to-end pipeline test: control command to sink delivery
//!
//! Stands up an in-process control server and HTTP fixture, runs the real
//! client + engine + pipeline against them with a recording sink, and
//! checks the full per-track event sequence plus bit-perfect delivery.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slimplay::audio::pipeline::StreamEngine;
use slimplay::audio::sink::{Sink, SinkFormat};
use slimplay::config::{Config, SinkConfig};
use slimplay::error::SinkError;
use slimplay::protocol::client::SlimprotoClient;

// ----------------------------------------------------------------------
// Recording sink
// ----------------------------------------------------------------------

#[derive(Default)]
struct TestSink {
    opened: Mutex<Vec<SinkFormat>>,
    data: Mutex<Vec<u8>>,
    paused: AtomicBool,
    s24_hint: AtomicBool,
}

impl Sink for TestSink {
    fn enable(&self, _config: &SinkConfig) -> Result<(), SinkError> {
        Ok(())
    }

    fn open(&self, format: &SinkFormat) -> Result<(), SinkError> {
        self.opened.lock().unwrap().push(*format);
        self.s24_hint.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send_audio(&self, data: &[u8], frames: usize) -> Result<usize, SinkError> {
        self.data.lock().unwrap().extend_from_slice(data);
        Ok(frames)
    }

    fn buffer_level(&self) -> f32 {
        0.0
    }

    fn buffer_size_bytes(&self) -> u32 {
        1 << 20
    }

    fn buffer_fill_bytes(&self) -> u32 {
        0
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        !self.is_paused()
    }

    fn wait_for_space(&self, _timeout: Duration) -> bool {
        true
    }

    fn set_s24_pack_hint(&self, enabled: bool) {
        self.s24_hint.store(enabled, Ordering::SeqCst);
    }

    fn stop_playback(&self) {}

    fn dump_stats(&self) {}

    fn close(&self) {}

    fn disable(&self) {}
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

/// 96 kHz / 24-bit / stereo WAV with one frame: (0x123456, 0x789ABC)
fn wav_fixture() -> Vec<u8> {
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&42u32.to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&96_000u32.to_le_bytes());
    wav.extend_from_slice(&576_000u32.to_le_bytes());
    wav.extend_from_slice(&6u16.to_le_bytes());
    wav.extend_from_slice(&24u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&6u32.to_le_bytes());
    wav.extend_from_slice(&[0x56, 0x34, 0x12]);
    wav.extend_from_slice(&[0xBC, 0x9A, 0x78]);
    wav
}

/// Serve one HTTP request with the given body, then close
fn spawn_http_fixture(body: Vec<u8>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 1024];
        let _ = stream.read(&mut request).unwrap();
        stream
            .write_all(b"HTTP/1.0 200 OK\r\nContent-Type: audio/wav\r\n\r\n")
            .unwrap();
        stream.write_all(&body).unwrap();
    });
    port
}

fn read_client_frame(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).ok()?;
    let opcode = String::from_utf8_lossy(&header[0..4]).into_owned();
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    Some((opcode, payload))
}

fn send_server_frame(stream: &mut TcpStream, opcode: &[u8; 4], payload: &[u8]) {
    let len = (4 + payload.len()) as u16;
    let mut frame = Vec::new();
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(opcode);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
}

/// strm-s for a self-describing PCM stream pointed at 127.0.0.1:http_port
fn strm_start(http_port: u16, request: &[u8]) -> Vec<u8> {
    let mut p = vec![b's', b'1', b'p', b'?', b'?', b'?', b'?'];
    p.extend_from_slice(&[255, b'0', 0, b'0', 0, 0, 0]);
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&http_port.to_be_bytes());
    p.extend_from_slice(&u32::from(std::net::Ipv4Addr::new(127, 0, 0, 1)).to_be_bytes());
    p.extend_from_slice(request);
    p
}

/// Event labels extracted from client frames: STAT events by code, plus RESP
fn event_log(frames: &[(String, Vec<u8>)]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|(opcode, payload)| match opcode.as_str() {
            "STAT" => Some(String::from_utf8_lossy(&payload[0..4]).into_owned()),
            "RESP" => Some("RESP".to_string()),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------
// The test
// ----------------------------------------------------------------------

#[test]
fn start_command_plays_wav_and_reports_full_sequence() {
    let http_port = spawn_http_fixture(wav_fixture());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let control_port = listener.local_addr().unwrap().port();

    let frames = Arc::new(Mutex::new(Vec::<(String, Vec<u8>)>::new()));
    let server_frames = Arc::clone(&frames);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        // Registration
        for _ in 0..2 {
            let frame = read_client_frame(&mut stream).unwrap();
            server_frames.lock().unwrap().push(frame);
        }

        send_server_frame(
            &mut stream,
            b"strm",
            &strm_start(http_port, b"GET /stream.wav HTTP/1.0\r\n\r\n"),
        );

        // Collect until the end-of-track underrun report
        loop {
            let Some(frame) = read_client_frame(&mut stream) else {
                break;
            };
            let is_underrun = frame.0 == "STAT" && &frame.1[0..4] == b"STMu";
            server_frames.lock().unwrap().push(frame);
            if is_underrun {
                break;
            }
        }
    });

    let config = Config::default();
    let client = Arc::new(SlimprotoClient::connect("127.0.0.1", control_port, &config).unwrap());
    let sink: Arc<TestSink> = Arc::new(TestSink::default());
    let engine = Arc::new(StreamEngine::new(
        Arc::clone(&client),
        Arc::clone(&sink) as Arc<dyn Sink>,
        true,
    ));

    let cb_engine = Arc::clone(&engine);
    client.on_stream(Box::new(move |cmd, request| {
        cb_engine.handle_command(cmd, request);
    }));

    let run_client = Arc::clone(&client);
    let run_handle = thread::spawn(move || run_client.run());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let done = event_log(&frames.lock().unwrap())
            .iter()
            .any(|e| e == "STMu");
        if done || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    engine.shutdown();
    client.stop();
    run_handle.join().unwrap();
    server.join().unwrap();

    // Ordered per-track event sequence
    let events = event_log(&frames.lock().unwrap());
    let expected = ["STMc", "RESP", "STMh", "STMs", "STMl", "STMd", "STMu"];
    let mut cursor = 0;
    for event in &events {
        if cursor < expected.len() && event == expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected.len(),
        "incomplete event sequence: {:?}",
        events
    );

    // Exactly one terminal pair, no error report
    assert_eq!(events.iter().filter(|e| *e == "STMu").count(), 1);
    assert!(!events.iter().any(|e| e == "STMn"));

    // The sink saw the container format and the S24 hint
    let opened = sink.opened.lock().unwrap();
    assert_eq!(
        opened.as_slice(),
        &[SinkFormat::Pcm {
            sample_rate: 96_000,
            channels: 2
        }]
    );
    assert!(sink.s24_hint.load(Ordering::SeqCst));

    // Bit-perfect identity: x << (32 - 24)
    let data = sink.data.lock().unwrap();
    assert_eq!(data.len(), 8);
    let left = i32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    let right = i32::from_ne_bytes([data[4], data[5], data[6], data[7]]);
    assert_eq!(left, 0x12345600);
    assert_eq!(right, 0x789ABC00u32 as i32);
}
