//! In-memory collaborators shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::decode::{DecodeError, DecodedFrame, DecoderFactory, FrameDecoder};
use crate::frame::parse_header;
use crate::services::{
    AudioPacket, AudioSink, DeviceActivity, DeviceStateSource, Display, HttpClient, HttpResponse,
    ResolvedTrack, SearchResponse, SongCatalog,
};
use crate::worker::Latch;

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo.
pub(crate) const FRAME: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
pub(crate) const FRAME_LEN: usize = 417;

/// One complete frame: a valid header followed by zeroed side info and data.
pub(crate) fn frame() -> Vec<u8> {
    let mut f = FRAME.to_vec();
    f.resize(FRAME_LEN, 0);
    f
}

pub(crate) fn frames(n: usize) -> Vec<u8> {
    frame().repeat(n)
}

/// An ID3v2.4 tag whose body is `body_len` bytes of `fill` repeated.
pub(crate) fn id3_tag(body_len: usize, fill: &[u8]) -> Vec<u8> {
    let size = [
        ((body_len >> 21) & 0x7F) as u8,
        ((body_len >> 14) & 0x7F) as u8,
        ((body_len >> 7) & 0x7F) as u8,
        (body_len & 0x7F) as u8,
    ];
    let mut tag = vec![b'I', b'D', b'3', 4, 0, 0];
    tag.extend(size);
    tag.extend(fill.iter().copied().cycle().take(body_len));
    tag
}

const KEPT_PACKETS: usize = 1024;

/// Records the first packets it receives and counts all of them.
#[derive(Default)]
pub(crate) struct FakeSink {
    pub(crate) packets: Mutex<Vec<AudioPacket>>,
    pub(crate) enqueued: AtomicUsize,
    pub(crate) disabled: AtomicBool,
    pub(crate) rate: AtomicU32,
    pub(crate) resets: AtomicUsize,
}

impl FakeSink {
    pub(crate) fn packet_count(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }
}

impl AudioSink for FakeSink {
    fn output_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    fn enqueue(&self, packet: AudioPacket) -> bool {
        let mut packets = self.packets.lock().unwrap();
        if packets.len() < KEPT_PACKETS {
            packets.push(packet);
        }
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn output_sample_rate(&self) -> u32 {
        match self.rate.load(Ordering::SeqCst) {
            0 => 24_000,
            rate => rate,
        }
    }

    fn original_output_sample_rate(&self) -> u32 {
        24_000
    }

    fn set_output_sample_rate(&self, rate: Option<u32>) -> bool {
        if rate.is_none() {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
        self.rate.store(rate.unwrap_or(0), Ordering::SeqCst);
        true
    }
}

/// Reports scripted activities in order, then idle.
#[derive(Default)]
pub(crate) struct FakeDevice {
    pub(crate) script: Mutex<VecDeque<DeviceActivity>>,
    pub(crate) toggles: AtomicUsize,
}

impl DeviceStateSource for FakeDevice {
    fn activity(&self) -> DeviceActivity {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeviceActivity::Idle)
    }

    fn toggle_chat_state(&self) {
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeDisplay {
    pub(crate) music_info: Mutex<Vec<String>>,
    pub(crate) chat: Mutex<Vec<(String, String)>>,
}

impl Display for FakeDisplay {
    fn set_music_info(&self, text: &str) {
        self.music_info.lock().unwrap().push(text.to_string());
    }

    fn set_chat_message(&self, role: &str, text: &str) {
        self.chat
            .lock()
            .unwrap()
            .push((role.to_string(), text.to_string()));
    }
}

/// Transport and catalog that refuse every call.
pub(crate) struct NoNetwork;

impl HttpClient for NoNetwork {
    fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        bail!("network disabled: {url}")
    }
}

impl SongCatalog for NoNetwork {
    fn search(&self, song_name: &str) -> Result<SearchResponse> {
        bail!("catalog disabled: {song_name}")
    }

    fn resolve(&self, track_id: &str) -> Result<ResolvedTrack> {
        bail!("catalog disabled: {track_id}")
    }
}

/// Canned body for [`RouteHttp`].
#[derive(Clone)]
pub(crate) enum Route {
    Bytes(u16, Vec<u8>),
    /// Valid frames forever.
    EndlessFrames,
    /// One byte, then a read that blocks until the latch is set, then EOF.
    Stall(Arc<Latch>),
}

/// Serves fixed routes by exact URL and records every request.
#[derive(Default)]
pub(crate) struct RouteHttp {
    pub(crate) routes: Mutex<HashMap<String, Route>>,
    pub(crate) requests: Mutex<Vec<(String, Option<Duration>)>>,
}

impl RouteHttp {
    pub(crate) fn with(self, url: &str, route: Route) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), route);
        self
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.as_str() == url)
            .count()
    }

    /// Timeout passed with the latest request for `url`.
    pub(crate) fn timeout_for(&self, url: &str) -> Option<Option<Duration>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u.as_str() == url)
            .map(|(_, t)| *t)
    }
}

impl HttpClient for RouteHttp {
    fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), timeout));
        let route = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no route for {url}"))?;
        let (status, body): (u16, Box<dyn Read + Send>) = match route {
            Route::Bytes(status, body) => (status, Box::new(io::Cursor::new(body))),
            Route::EndlessFrames => (200, Box::new(FrameLoop { pos: 0 })),
            Route::Stall(release) => (
                200,
                Box::new(StallingBody {
                    sent: false,
                    release,
                }),
            ),
        };
        Ok(HttpResponse::new(status, Vec::new(), body))
    }
}

struct FrameLoop {
    pos: usize,
}

impl Read for FrameLoop {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let f = frame();
        for b in buf.iter_mut() {
            *b = f[self.pos];
            self.pos = (self.pos + 1) % FRAME_LEN;
        }
        Ok(buf.len())
    }
}

struct StallingBody {
    sent: bool,
    release: Arc<Latch>,
}

impl Read for StallingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.sent && !buf.is_empty() {
            self.sent = true;
            buf[0] = b'{';
            return Ok(1);
        }
        self.release.wait();
        Ok(0)
    }
}

/// Catalog backed by two lookup tables.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    pub(crate) searches: Mutex<HashMap<String, SearchResponse>>,
    pub(crate) tracks: Mutex<HashMap<String, ResolvedTrack>>,
}

impl FakeCatalog {
    pub(crate) fn with_song(self, name: &str, id: &str, stream_url: &str, lyric_url: &str) -> Self {
        self.searches.lock().unwrap().insert(
            name.to_string(),
            SearchResponse {
                raw: format!("{{\"abslist\":[{{\"DC_TARGETID\":\"{id}\"}}]}}"),
                track_id: Some(id.to_string()),
            },
        );
        self.with_track(id, stream_url, lyric_url)
    }

    pub(crate) fn with_track(self, id: &str, stream_url: &str, lyric_url: &str) -> Self {
        self.tracks.lock().unwrap().insert(
            id.to_string(),
            ResolvedTrack {
                stream_url: stream_url.to_string(),
                lyric_url: lyric_url.to_string(),
            },
        );
        self
    }
}

impl SongCatalog for FakeCatalog {
    fn search(&self, song_name: &str) -> Result<SearchResponse> {
        Ok(self
            .searches
            .lock()
            .unwrap()
            .get(song_name)
            .cloned()
            .unwrap_or_default())
    }

    fn resolve(&self, track_id: &str) -> Result<ResolvedTrack> {
        self.tracks
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown track {track_id}"))
    }
}

/// Decodes anything with a valid header into a fixed stereo frame.
pub(crate) struct FakeDecoder;

impl FrameDecoder for FakeDecoder {
    fn decode_frame(&mut self, data: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let header = parse_header(data).ok_or(DecodeError::Invalid)?;
        if data.len() < header.frame_len {
            return Err(DecodeError::Incomplete);
        }
        Ok(DecodedFrame {
            consumed: header.frame_len,
            sample_rate: header.sample_rate,
            channels: 2,
            samples: [100i16, 200].repeat(header.samples_per_frame as usize),
        })
    }
}

pub(crate) fn fake_decoder() -> DecoderFactory {
    Arc::new(|| Box::new(FakeDecoder) as Box<dyn FrameDecoder>)
}
