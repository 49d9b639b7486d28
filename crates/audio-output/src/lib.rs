//! Local audio output for decoded packets.
//!
//! [`CpalSink`] implements [`music_stream::AudioSink`] on top of cpal, resampling with
//! Rubato when the stream and device rates differ.

pub mod config;
pub mod device;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod sink;

pub use config::OutputConfig;
pub use sink::CpalSink;
