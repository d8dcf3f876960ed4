//! HTTP stream client
//!
//! Single-shot request-then-body client: the server hands us a complete
//! HTTP request blob in the strm command, we send it verbatim and stream
//! the response body. Shoutcast-style in-band metadata (`icy-metaint`) is
//! detected from the response headers and stripped from the payload.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::constants::{HTTP_HEADER_LIMIT, HTTP_RECV_BUFFER};
use crate::error::HttpError;

/// Cloned socket handle that lets another thread force a blocked read to
/// fail during teardown
pub struct ShutdownHandle {
    socket: TcpStream,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

/// Result of a timed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were read into the buffer
    Data(usize),
    /// No data became available within the timeout
    Timeout,
    /// Server closed the connection (end of stream)
    Eof,
}

/// Streaming HTTP client for a single audio fetch
pub struct HttpStreamClient {
    socket: TcpStream,
    connected: AtomicBool,
    response_headers: String,
    status: u16,
    bytes_received: u64,

    /// Metadata interval in bytes; 0 = no in-band metadata
    icy_metaint: u32,
    /// Payload bytes remaining before the next metadata block
    icy_until_meta: u32,
    /// Mid-metadata skip state, so a timed read interrupted inside a
    /// metadata block resumes where it left off
    icy_in_meta: bool,
    icy_meta_remaining: usize,

    /// Currently applied socket read timeout
    timeout_applied: Option<Duration>,
}

impl HttpStreamClient {
    /// Connect, send the request blob verbatim and read the response
    /// headers. The body is then available through `read`.
    pub fn connect(ip: IpAddr, port: u16, request: &[u8]) -> Result<Self, HttpError> {
        let addr = SocketAddr::new(ip, port);

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let raw = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        // Streaming wants a deep kernel receive buffer
        raw.set_recv_buffer_size(HTTP_RECV_BUFFER)?;
        raw.connect(&addr.into())?;
        let socket: TcpStream = raw.into();
        socket.set_nodelay(true)?;

        tracing::debug!("[http] connected to {}, sending request", addr);

        let mut client = Self {
            socket,
            connected: AtomicBool::new(false),
            response_headers: String::new(),
            status: 0,
            bytes_received: 0,
            icy_metaint: 0,
            icy_until_meta: 0,
            icy_in_meta: false,
            icy_meta_remaining: 0,
            timeout_applied: None,
        };

        client.send_all(request)?;
        client.read_response_headers()?;
        client.connected.store(true, Ordering::Release);

        tracing::info!("[http] stream connected (status {})", client.status);
        tracing::debug!("[http] response headers:\n{}", client.response_headers);

        Ok(client)
    }

    /// Handle for tearing the connection down from another thread
    pub fn shutdown_handle(&self) -> std::io::Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            socket: self.socket.try_clone()?,
        })
    }

    /// Shut down both directions and release the socket
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Raw response headers, preserved for forwarding to the control server
    pub fn response_headers(&self) -> &str {
        &self.response_headers
    }

    /// HTTP status code from the first response line
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Audio payload bytes received so far (metadata excluded)
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Metadata interval announced by the server; 0 = none
    pub fn icy_metaint(&self) -> u32 {
        self.icy_metaint
    }

    /// Blocking read of payload bytes. Ok(0) means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.apply_timeout(None)?;
        self.read_payload(buf)
    }

    /// Read with a bounded wait so the caller's loop never stalls.
    pub fn read_with_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, HttpError> {
        self.apply_timeout(Some(timeout))?;
        match self.read_payload(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(HttpError::Io(e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                Ok(ReadOutcome::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn apply_timeout(&mut self, timeout: Option<Duration>) -> Result<(), HttpError> {
        if self.timeout_applied != timeout {
            self.socket.set_read_timeout(timeout)?;
            self.timeout_applied = timeout;
        }
        Ok(())
    }

    /// Read payload bytes, transparently skipping in-band metadata blocks
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if self.icy_metaint == 0 {
            let n = self.read_raw(buf)?;
            self.bytes_received += n as u64;
            if n == 0 {
                self.connected.store(false, Ordering::Release);
            }
            return Ok(n);
        }

        if self.icy_until_meta == 0 {
            self.skip_icy_metadata()?;
        }

        let window = (self.icy_until_meta as usize).min(buf.len());
        let n = self.read_raw(&mut buf[..window])?;
        if n == 0 {
            self.connected.store(false, Ordering::Release);
            return Ok(0);
        }
        self.icy_until_meta -= n as u32;
        self.bytes_received += n as u64;
        Ok(n)
    }

    /// Discard one metadata block: a length byte (x16 = byte count)
    /// followed by that many metadata bytes. A timed read can interrupt
    /// at any point; the skip state persists so the next call resumes.
    fn skip_icy_metadata(&mut self) -> Result<(), HttpError> {
        if !self.icy_in_meta {
            let mut len_byte = [0u8; 1];
            self.read_exact_raw(&mut len_byte)?;
            self.icy_in_meta = true;
            self.icy_meta_remaining = len_byte[0] as usize * 16;
        }

        let mut discard = [0u8; 256];
        while self.icy_meta_remaining > 0 {
            let chunk = self.icy_meta_remaining.min(discard.len());
            let n = self.read_raw(&mut discard[..chunk])?;
            if n == 0 {
                self.connected.store(false, Ordering::Release);
                return Err(HttpError::HeadersTruncated);
            }
            self.icy_meta_remaining -= n;
        }

        self.icy_in_meta = false;
        self.icy_until_meta = self.icy_metaint;
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        loop {
            match self.socket.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact_raw(&mut self, buf: &mut [u8]) -> Result<(), HttpError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_raw(&mut buf[filled..])? {
                0 => {
                    self.connected.store(false, Ordering::Release);
                    return Err(HttpError::HeadersTruncated);
                }
                n => filled += n,
            }
        }
        Ok(())
    }

    fn send_all(&mut self, data: &[u8]) -> Result<(), HttpError> {
        let mut remaining = data;
        while !remaining.is_empty() {
            match self.socket.write(remaining) {
                Ok(0) => return Err(HttpError::NotConnected),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read byte-by-byte until CRLFCRLF; the server speaks HTTP/1.0 so
    /// headers are small and simple.
    fn read_response_headers(&mut self) -> Result<(), HttpError> {
        let mut header_buf = Vec::with_capacity(4096);
        let mut end_seq = 0u8;

        loop {
            let mut byte = [0u8; 1];
            match self.read_raw(&mut byte)? {
                0 => return Err(HttpError::HeadersTruncated),
                _ => {}
            }
            let c = byte[0];
            header_buf.push(c);

            end_seq = match (c, end_seq) {
                (b'\r', 0) | (b'\r', 2) => end_seq + 1,
                (b'\n', 1) | (b'\n', 3) => end_seq + 1,
                _ => 0,
            };
            if end_seq == 4 {
                break;
            }

            if header_buf.len() > HTTP_HEADER_LIMIT {
                return Err(HttpError::HeadersTooLarge);
            }
        }

        self.response_headers = String::from_utf8_lossy(&header_buf).into_owned();

        // Status line: "HTTP/1.0 200 OK" or "ICY 200 OK"
        self.status = self
            .response_headers
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        if self.status != 200 {
            tracing::warn!("[http] unexpected status: {}", self.status);
        }

        self.icy_metaint = header_value(&self.response_headers, "icy-metaint")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        self.icy_until_meta = self.icy_metaint;
        if self.icy_metaint > 0 {
            tracing::info!("[http] in-band metadata every {} bytes", self.icy_metaint);
        }

        Ok(())
    }
}

impl Drop for HttpStreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Case-insensitive header lookup over the raw header block
fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    for line in headers.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    fn serve_once(response: Vec<u8>) -> (IpAddr, u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; 1024];
            let n = stream.read(&mut request).unwrap();
            request.truncate(n);
            stream.write_all(&response).unwrap();
            request
        });
        (IpAddr::V4(Ipv4Addr::LOCALHOST), port, handle)
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = "HTTP/1.0 200 OK\r\nContent-Type: audio/flac\r\nIcy-MetaInt: 8192\r\n\r\n";
        assert_eq!(header_value(headers, "icy-metaint"), Some("8192"));
        assert_eq!(header_value(headers, "content-type"), Some("audio/flac"));
        assert_eq!(header_value(headers, "missing"), None);
    }

    #[test]
    fn request_sent_verbatim_and_status_parsed() {
        let response = b"HTTP/1.0 200 OK\r\nContent-Type: audio/flac\r\n\r\nabcd".to_vec();
        let (ip, port, server) = serve_once(response);

        let request = b"GET /stream.flac?player=02 HTTP/1.0\r\n\r\n";
        let mut client = HttpStreamClient::connect(ip, port, request).unwrap();

        assert_eq!(client.status(), 200);
        assert!(client.response_headers().contains("audio/flac"));

        let mut body = [0u8; 16];
        let n = client.read(&mut body).unwrap();
        assert_eq!(&body[..n], b"abcd");
        assert_eq!(client.read(&mut body).unwrap(), 0);
        assert_eq!(client.bytes_received(), 4);

        let seen = server.join().unwrap();
        assert_eq!(&seen, request);
    }

    #[test]
    fn icy_metadata_is_stripped_from_payload() {
        // 8 payload bytes, then a 16-byte metadata block, then 8 more
        let mut response = b"ICY 200 OK\r\nicy-metaint: 8\r\n\r\n".to_vec();
        response.extend_from_slice(b"AAAABBBB");
        response.push(1);
        response.extend_from_slice(&[b'x'; 16]);
        response.extend_from_slice(b"CCCCDDDD");
        let (ip, port, _server) = serve_once(response);

        let mut client = HttpStreamClient::connect(ip, port, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(client.icy_metaint(), 8);

        let mut payload = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match client.read(&mut buf).unwrap() {
                0 => break,
                n => payload.extend_from_slice(&buf[..n]),
            }
        }

        assert_eq!(&payload, b"AAAABBBBCCCCDDDD");
        assert_eq!(client.bytes_received(), 16);
    }

    #[test]
    fn zero_length_metadata_block() {
        let mut response = b"ICY 200 OK\r\nIcy-Metaint: 4\r\n\r\n".to_vec();
        response.extend_from_slice(b"AAAA");
        response.push(0);
        response.extend_from_slice(b"BBBB");
        let (ip, port, _server) = serve_once(response);

        let mut client = HttpStreamClient::connect(ip, port, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let mut payload = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match client.read(&mut buf).unwrap() {
                0 => break,
                n => payload.extend_from_slice(&buf[..n]),
            }
        }
        assert_eq!(&payload, b"AAAABBBB");
    }

    #[test]
    fn timed_read_reports_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut req = [0u8; 256];
            let _ = stream.read(&mut req).unwrap();
            stream
                .write_all(b"HTTP/1.0 200 OK\r\n\r\n")
                .unwrap();
            // Hold the connection open without sending body bytes
            thread::sleep(Duration::from_millis(100));
        });

        let mut client = HttpStreamClient::connect(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            b"GET / HTTP/1.0\r\n\r\n",
        )
        .unwrap();

        let mut buf = [0u8; 16];
        let outcome = client
            .read_with_timeout(&mut buf, Duration::from_millis(10))
            .unwrap();
        assert_eq!(outcome, ReadOutcome::Timeout);
        server.join().unwrap();
    }
}
