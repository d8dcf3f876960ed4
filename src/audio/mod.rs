//! Audio subsystem: decode cache, ingestion pipeline, sink adapters

pub mod cache;
pub mod cpal_sink;
pub mod pipeline;
pub mod sink;

pub use cache::DecodeCache;
pub use cpal_sink::CpalSink;
pub use pipeline::StreamEngine;
pub use sink::{Sink, SinkFormat};
