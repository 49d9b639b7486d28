//! Contracts for everything the engine talks to but does not own.
//!
//! The controller receives these as one [`Capabilities`] bundle at construction; nothing in
//! the crate reaches for process-wide singletons.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::decode::{DecoderFactory, symphonia_decoder_factory};

/// Blocking HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Issue a GET request. Non-2xx statuses are returned as responses, not errors.
    ///
    /// `timeout` bounds the whole call including the body read. Song streams pass `None`
    /// so a long body is never cut off.
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse>;
}

/// An open HTTP response. Dropping it closes the connection.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// First header value with a case-insensitive name match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Read for HttpResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One block of mono PCM handed to the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPacket {
    pub sample_rate: u32,
    /// Nominal duration stamped on every packet, independent of the decoded frame length.
    pub frame_duration_ms: u32,
    /// Little-endian signed 16-bit samples.
    pub payload: Vec<u8>,
}

/// Downstream audio output.
pub trait AudioSink: Send + Sync {
    fn output_enabled(&self) -> bool;
    /// Queue a packet. Must return within a bounded time; `false` means the packet was dropped.
    fn enqueue(&self, packet: AudioPacket) -> bool;
    fn output_sample_rate(&self) -> u32;
    fn original_output_sample_rate(&self) -> u32;
    /// Override the output rate, or restore the original one with `None`.
    fn set_output_sample_rate(&self, rate: Option<u32>) -> bool;
}

/// Coarse activity of the host device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceActivity {
    Idle,
    Listening,
    Busy,
}

/// Host device state that music playback must yield to.
pub trait DeviceStateSource: Send + Sync {
    fn activity(&self) -> DeviceActivity;
    /// Ask the device to leave its listening state.
    fn toggle_chat_state(&self);
}

/// Fire-and-forget display surface.
pub trait Display: Send + Sync {
    fn set_music_info(&self, text: &str);
    fn set_chat_message(&self, role: &str, text: &str);
}

/// Raw search result plus the track id extracted from its first hit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchResponse {
    pub raw: String,
    pub track_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub stream_url: String,
    pub lyric_url: String,
}

/// Song search and track resolution.
pub trait SongCatalog: Send + Sync {
    fn search(&self, song_name: &str) -> Result<SearchResponse>;
    fn resolve(&self, track_id: &str) -> Result<ResolvedTrack>;
}

/// Collaborators injected into [`crate::MusicPlayer`].
#[derive(Clone)]
pub struct Capabilities {
    pub http: Arc<dyn HttpClient>,
    pub sink: Arc<dyn AudioSink>,
    pub device: Arc<dyn DeviceStateSource>,
    pub display: Arc<dyn Display>,
    pub catalog: Arc<dyn SongCatalog>,
    pub decoder: DecoderFactory,
}

impl Capabilities {
    /// Bundle collaborators with the default MPEG audio decoder.
    pub fn new(
        http: Arc<dyn HttpClient>,
        sink: Arc<dyn AudioSink>,
        device: Arc<dyn DeviceStateSource>,
        display: Arc<dyn Display>,
        catalog: Arc<dyn SongCatalog>,
    ) -> Self {
        Self {
            http,
            sink,
            device,
            display,
            catalog,
            decoder: symphonia_decoder_factory(),
        }
    }

    pub fn with_decoder(mut self, decoder: DecoderFactory) -> Self {
        self.decoder = decoder;
        self
    }
}
