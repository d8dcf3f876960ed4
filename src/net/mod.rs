//! Network subsystem: HTTP stream fetching

pub mod http;

pub use http::{HttpStreamClient, ReadOutcome, ShutdownHandle};
