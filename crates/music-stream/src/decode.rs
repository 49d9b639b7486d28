//! Single-frame MPEG audio decoding.
//!
//! The player hands the decoder a window that starts at a frame header; the decoder
//! consumes exactly one frame and reports what it produced. [`SymphoniaMp3Decoder`] wraps
//! symphonia's MPEG audio codec and feeds it one frame per packet.

use std::fmt;
use std::sync::Arc;

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::frame::{FrameHeader, parse_header};

/// Why a frame could not be decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The window ends before the frame does.
    Incomplete,
    /// The bytes at the cursor are not a decodable frame.
    Invalid,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete frame"),
            Self::Invalid => f.write_str("invalid frame"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Output of one decoded frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Bytes of the window taken by this frame.
    pub consumed: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved PCM; its length is the output sample count across all channels.
    pub samples: Vec<i16>,
}

impl DecodedFrame {
    /// Frame duration in milliseconds, or `None` when rate or channel count is zero.
    pub fn duration_ms(&self) -> Option<u64> {
        let denom = u64::from(self.sample_rate) * u64::from(self.channels);
        if denom == 0 {
            return None;
        }
        Some(self.samples.len() as u64 * 1000 / denom)
    }
}

/// Decodes one compressed frame at a time.
pub trait FrameDecoder: Send {
    /// Decode the frame at the start of `window`.
    fn decode_frame(&mut self, window: &[u8]) -> Result<DecodedFrame, DecodeError>;
}

/// Creates a fresh decoder for each player thread.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn FrameDecoder> + Send + Sync>;

pub fn symphonia_decoder_factory() -> DecoderFactory {
    Arc::new(|| Box::new(SymphoniaMp3Decoder::new()) as Box<dyn FrameDecoder>)
}

/// MPEG audio decoder built on symphonia.
///
/// The codec keeps its bit reservoir across frames, so one instance must see the frames of
/// a stream in order. It is rebuilt when the stream's rate or channel layout changes.
#[derive(Default)]
pub struct SymphoniaMp3Decoder {
    codec: Option<ActiveCodec>,
}

struct ActiveCodec {
    decoder: Box<dyn Decoder>,
    sample_rate: u32,
    channels: u16,
}

impl SymphoniaMp3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn codec_for(&mut self, header: &FrameHeader) -> Result<&mut ActiveCodec, DecodeError> {
        let stale = self
            .codec
            .as_ref()
            .map(|c| c.sample_rate != header.sample_rate || c.channels != header.channels)
            .unwrap_or(true);
        if stale {
            let layout = if header.channels == 1 {
                Channels::FRONT_CENTRE
            } else {
                Channels::FRONT_LEFT | Channels::FRONT_RIGHT
            };
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate)
                .with_channels(layout)
                .with_max_frames_per_packet(u64::from(header.samples_per_frame));
            let decoder = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| {
                    tracing::warn!(error = %e, "mp3 codec unavailable");
                    DecodeError::Invalid
                })?;
            tracing::debug!(
                sample_rate = header.sample_rate,
                channels = header.channels,
                "mp3 decoder (re)initialised"
            );
            self.codec = Some(ActiveCodec {
                decoder,
                sample_rate: header.sample_rate,
                channels: header.channels,
            });
        }
        self.codec.as_mut().ok_or(DecodeError::Invalid)
    }
}

impl FrameDecoder for SymphoniaMp3Decoder {
    fn decode_frame(&mut self, window: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let header = parse_header(window).ok_or(DecodeError::Invalid)?;
        if window.len() < header.frame_len {
            return Err(DecodeError::Incomplete);
        }

        let codec = self.codec_for(&header)?;
        let packet = Packet::new_from_slice(
            0,
            0,
            u64::from(header.samples_per_frame),
            &window[..header.frame_len],
        );
        let decoded = match codec.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::Unsupported(feature)) => {
                tracing::debug!(feature, "unsupported frame skipped");
                return Err(DecodeError::Invalid);
            }
            Err(e) => {
                tracing::trace!(error = %e, "frame rejected by decoder");
                return Err(DecodeError::Invalid);
            }
        };

        let spec = *decoded.spec();
        let mut samples = Vec::new();
        if decoded.frames() > 0 {
            let mut buf = SampleBuffer::<i16>::new(decoded.frames() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        Ok(DecodedFrame {
            consumed: header.frame_len,
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_uses_interleaved_sample_count() {
        let frame = DecodedFrame {
            consumed: 417,
            sample_rate: 44_100,
            channels: 2,
            samples: vec![0; 2304],
        };
        assert_eq!(frame.duration_ms(), Some(26));
    }

    #[test]
    fn duration_guards_zero_metadata() {
        let frame = DecodedFrame {
            samples: vec![0; 10],
            ..Default::default()
        };
        assert_eq!(frame.duration_ms(), None);
    }

    #[test]
    fn decodes_consecutive_frames() {
        let data = crate::testing::frames(5);
        let mut dec = SymphoniaMp3Decoder::new();
        let mut offset = 0;
        for _ in 0..5 {
            let out = dec.decode_frame(&data[offset..]).unwrap();
            assert_eq!(out.consumed, 417);
            assert_eq!(out.sample_rate, 44_100);
            assert_eq!(out.channels, 2);
            assert_eq!(out.samples.len(), 2304);
            assert_eq!(out.duration_ms(), Some(26));
            offset += out.consumed;
        }
        assert_eq!(offset, data.len());
    }

    #[test]
    fn garbage_is_invalid() {
        let mut dec = SymphoniaMp3Decoder::new();
        assert_eq!(dec.decode_frame(&[0u8; 512]), Err(DecodeError::Invalid));
        assert_eq!(dec.decode_frame(&[]), Err(DecodeError::Invalid));
    }

    #[test]
    fn truncated_frame_is_incomplete() {
        let mut dec = SymphoniaMp3Decoder::new();
        let mut data = vec![0xFF, 0xFB, 0x90, 0x00];
        data.resize(200, 0);
        assert_eq!(dec.decode_frame(&data), Err(DecodeError::Incomplete));
    }

    #[test]
    fn factory_builds_decoders() {
        let factory = symphonia_decoder_factory();
        let mut dec = factory();
        assert_eq!(dec.decode_frame(&[1, 2, 3]), Err(DecodeError::Invalid));
    }
}
