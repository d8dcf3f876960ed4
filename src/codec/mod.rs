//! Streaming audio decoders
//!
//! Every decoder normalises its output to 32-bit signed interleaved
//! samples, MSB-aligned within the word. This is the single representation
//! the sink consumes, regardless of the source codec.

pub mod pcm;
pub mod streaming;

pub use pcm::PcmDecoder;
pub use streaming::{CodecFamily, StreamingDecoder};

use crate::error::CodecError;

/// Format of a decoded stream, valid once `format_ready` returns true
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedFormat {
    pub sample_rate: u32,
    /// Original encoding depth; output words are always 32-bit
    pub bit_depth: u32,
    pub channels: u32,
    /// Per channel; 0 when unknown (live streams)
    pub total_samples: u64,
}

/// Push/pull streaming decoder contract.
///
/// `feed` always consumes the full input (buffering is internal).
/// `read_decoded` returning 0 means either "need more input" or
/// "finished"; `is_finished` and `has_error` disambiguate.
pub trait Decoder: Send {
    /// Append encoded bytes; returns the number consumed (the full length)
    fn feed(&mut self, data: &[u8]) -> usize;

    /// Signal that no more input will arrive
    fn set_eof(&mut self);

    /// Produce up to `max_frames` of normalised frames into `out`
    /// (which must hold `max_frames * channels` samples); returns the
    /// number of frames written
    fn read_decoded(&mut self, out: &mut [i32], max_frames: usize) -> usize;

    /// True once the stream format has been determined
    fn format_ready(&self) -> bool;

    /// The stream format; valid after `format_ready`
    fn format(&self) -> DecodedFormat;

    /// True when all input has been decoded and drained
    fn is_finished(&self) -> bool;

    /// True after a fatal decode error
    fn has_error(&self) -> bool;

    /// Total frames handed out through `read_decoded`
    fn decoded_samples(&self) -> u64;

    /// Reset for a new stream
    fn flush(&mut self);

    /// Configure a headerless raw-PCM stream from out-of-band hints.
    /// Only meaningful for the PCM variant; a no-op elsewhere.
    fn set_raw_pcm_format(&mut self, _rate: u32, _bits: u32, _channels: u32, _big_endian: bool) {}
}

/// Create the decoder for a server stream-format character.
///
/// 'd' (DSD) is intentionally absent: DSD streams bypass the decoders and
/// go through the DSD stream reader.
pub fn create_decoder(format_code: u8) -> Result<Box<dyn Decoder>, CodecError> {
    match format_code {
        b'f' => Ok(Box::new(StreamingDecoder::new(CodecFamily::Flac))),
        b'm' => Ok(Box::new(StreamingDecoder::new(CodecFamily::Mp3))),
        b'o' => Ok(Box::new(StreamingDecoder::new(CodecFamily::OggVorbis))),
        b'a' => Ok(Box::new(StreamingDecoder::new(CodecFamily::Aac))),
        b'p' => Ok(Box::new(PcmDecoder::new())),
        other => Err(CodecError::UnsupportedFormat(other as char)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_maps_format_codes() {
        assert!(create_decoder(b'f').is_ok());
        assert!(create_decoder(b'm').is_ok());
        assert!(create_decoder(b'o').is_ok());
        assert!(create_decoder(b'a').is_ok());
        assert!(create_decoder(b'p').is_ok());
        assert!(create_decoder(b'd').is_err());
        assert!(create_decoder(b'w').is_err());
    }
}
