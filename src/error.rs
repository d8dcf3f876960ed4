//! Error types for the player

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("HTTP stream error: {0}")]
    Http(#[from] HttpError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control-protocol (slimproto) errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Invalid MAC address format: {0}")]
    InvalidMac(String),

    #[error("Connection to server lost")]
    ConnectionLost,

    #[error("Message too short: {opcode} ({len} bytes)")]
    ShortMessage { opcode: String, len: usize },

    #[error("Unknown strm sub-command: {0:?}")]
    UnknownSubcommand(char),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP stream client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Connection closed while reading headers")]
    HeadersTruncated,

    #[error("Response headers too large (>16KB)")]
    HeadersTooLarge,

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder and container-parser errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown container signature: {0:02x?}")]
    UnknownContainer([u8; 4]),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Unsupported stream format code: {0:?}")]
    UnsupportedFormat(char),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u32),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
}

/// Audio sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink target not found: {0}")]
    TargetNotFound(String),

    #[error("Unsupported sink format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Sink is not open")]
    NotOpen,

    #[error("Sink is not enabled")]
    NotEnabled,
}

/// Server discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No server replied to discovery broadcast")]
    NoReply,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the main error type
pub type Result<T> = std::result::Result<T, Error>;
