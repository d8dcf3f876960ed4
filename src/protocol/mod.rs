//! Slimproto control protocol: binary codec, session client, discovery

pub mod client;
pub mod discovery;
pub mod messages;

pub use client::{SessionCounters, SlimprotoClient};
pub use messages::{StatEvent, StreamCommand, StreamSubcommand};
