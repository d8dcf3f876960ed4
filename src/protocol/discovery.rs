//! Server discovery via UDP broadcast
//!
//! A single `'e'` byte broadcast to port 3483; any reply identifies the
//! server by its source address.

use std::net::{IpAddr, UdpSocket};

use crate::constants::{DISCOVERY_TIMEOUT, DISCOVERY_TRIES, SLIMPROTO_PORT};
use crate::error::DiscoveryError;

/// Broadcast for a server and return the first responder's address
pub fn discover() -> Result<IpAddr, DiscoveryError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(DISCOVERY_TIMEOUT))?;

    let mut reply = [0u8; 128];

    for attempt in 1..=DISCOVERY_TRIES {
        tracing::info!(
            "Discovering server (broadcast, attempt {}/{})...",
            attempt,
            DISCOVERY_TRIES
        );
        socket.send_to(b"e", ("255.255.255.255", SLIMPROTO_PORT))?;

        match socket.recv_from(&mut reply) {
            Ok((len, from)) => {
                tracing::info!("Server discovered at {} ({} byte reply)", from.ip(), len);
                return Ok(from.ip());
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(DiscoveryError::NoReply)
}
