//! Playback session controller.
//!
//! [`MusicPlayer`] resolves songs through the catalog, owns the downloader/player pair of
//! the current stream and the lyric thread of the current song, and runs a long-lived
//! watcher that starts the recommended next song when a stream ends on its own.
//!
//! Lock order: `restart`, then `stream`, then `lyric`. Restarts, stops and drop serialize on
//! `restart` and hold it across teardown; the `stream` slot itself is only held briefly, so
//! status reads never wait for a join. Worker threads take neither `restart` nor `stream`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use anyhow::{Context, Result, bail};

use crate::config::StreamConfig;
use crate::downloader::run_downloader;
use crate::lyrics::{LyricLine, LyricTrack, download_lyrics, parse_lyrics, parse_recommended_song};
use crate::player::{PlaybackEnd, PlayerContext, reset_sample_rate, run_player};
use crate::services::Capabilities;
use crate::status::PlayerStatus;
use crate::stream::StreamState;
use crate::worker::{Latch, Worker, lock};

#[derive(Default)]
struct SessionInfo {
    song_name: String,
    stream_url: String,
    lyric_url: String,
    last_search: String,
}

#[derive(Default)]
struct Recommendations {
    played: HashSet<String>,
    next: Option<String>,
}

struct ActiveStream {
    state: Arc<StreamState>,
    downloader: Worker,
    player: Worker,
}

struct LyricSession {
    /// Generation of the stream these lyrics belong to.
    generation: u64,
    stop: Arc<Latch>,
    active: Arc<AtomicBool>,
    worker: Worker,
}

#[derive(Default)]
struct AdvanceState {
    pending: Option<u64>,
    shutdown: bool,
}

/// Hand-off from a finishing player thread to the watcher.
#[derive(Default)]
struct AdvanceSignal {
    state: Mutex<AdvanceState>,
    cv: Condvar,
}

impl AdvanceSignal {
    fn request(&self, generation: u64) {
        lock(&self.state).pending = Some(generation);
        self.cv.notify_all();
    }

    fn shutdown(&self) {
        lock(&self.state).shutdown = true;
        self.cv.notify_all();
    }

    /// Next requested generation, or `None` once shut down.
    fn wait(&self) -> Option<u64> {
        let g = lock(&self.state);
        let mut g = self
            .cv
            .wait_while(g, |s| s.pending.is_none() && !s.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        if g.shutdown {
            return None;
        }
        g.pending.take()
    }
}

struct PlayerInner {
    caps: Capabilities,
    cfg: StreamConfig,
    session: Mutex<SessionInfo>,
    recommend: Mutex<Recommendations>,
    restart: Mutex<()>,
    stream: Mutex<Option<ActiveStream>>,
    lyric: Mutex<Option<LyricSession>>,
    lyrics: Arc<LyricTrack>,
    generation: AtomicU64,
    advance: AdvanceSignal,
    closed: AtomicBool,
}

/// Streams songs found through a [`crate::SongCatalog`] to an [`crate::AudioSink`].
///
/// All operations are safe to call from any thread. Dropping the player stops everything
/// with bounded waits.
pub struct MusicPlayer {
    inner: Arc<PlayerInner>,
    watcher: Mutex<Option<Worker>>,
}

impl MusicPlayer {
    pub fn new(caps: Capabilities, cfg: StreamConfig) -> Result<Self> {
        let inner = Arc::new(PlayerInner {
            caps,
            cfg,
            session: Mutex::new(SessionInfo::default()),
            recommend: Mutex::new(Recommendations::default()),
            restart: Mutex::new(()),
            stream: Mutex::new(None),
            lyric: Mutex::new(None),
            lyrics: Arc::new(LyricTrack::new()),
            generation: AtomicU64::new(0),
            advance: AdvanceSignal::default(),
            closed: AtomicBool::new(false),
        });
        let watcher = {
            let inner = inner.clone();
            Worker::spawn("music-advance", move || run_watcher(&inner))?
        };
        Ok(Self {
            inner,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Search for `song_name`, then stream the first hit and fetch its lyrics.
    pub fn download(&self, song_name: &str) -> bool {
        let song_name = song_name.trim();
        if song_name.is_empty() {
            tracing::warn!("download called with an empty song name");
            return false;
        }
        tracing::info!(song = %song_name, "looking up song");

        let found = match self.inner.caps.catalog.search(song_name) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(song = %song_name, "song search failed: {e:#}");
                return false;
            }
        };
        lock(&self.inner.session).last_search = found.raw;
        let Some(track_id) = found.track_id else {
            tracing::warn!(song = %song_name, "no track found");
            return false;
        };
        lock(&self.inner.recommend).played.insert(track_id.clone());
        self.inner.play_track(&track_id, song_name)
    }

    /// Restart the current song's stream unless something is already playing.
    pub fn play(&self) -> bool {
        if self.is_playing() {
            tracing::info!("already playing");
            return true;
        }
        let url = {
            let session = lock(&self.inner.session);
            if session.last_search.is_empty() {
                tracing::warn!("nothing to play, no song has been looked up");
                return false;
            }
            session.stream_url.clone()
        };
        self.start_streaming(&url)
    }

    /// Stop playback and wait (bounded) for the stream threads. Also true when idle.
    pub fn stop(&self) -> bool {
        let _restart = lock(&self.inner.restart);
        let active = lock(&self.inner.stream).take();
        match active {
            Some(active) => {
                tracing::info!(generation = active.state.generation, "stopping playback");
                self.inner.teardown(active);
            }
            None => tracing::debug!("stop requested while idle"),
        }
        self.inner.stop_lyrics();
        reset_sample_rate(self.inner.caps.sink.as_ref());
        true
    }

    /// Replace any running stream with a fresh one for `url`.
    pub fn start_streaming(&self, url: &str) -> bool {
        let song_name = lock(&self.inner.session).song_name.clone();
        match self.inner.start_stream(url, &song_name) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(url = %url, "failed to start streaming: {e:#}");
                false
            }
        }
    }

    /// Signal the current stream to stop without waiting for its threads.
    ///
    /// The threads are joined by the next [`start_streaming`](Self::start_streaming),
    /// [`stop`](Self::stop) or drop.
    pub fn stop_streaming(&self) -> bool {
        reset_sample_rate(self.inner.caps.sink.as_ref());
        let slot = lock(&self.inner.stream);
        let Some(active) = slot.as_ref() else {
            return true;
        };
        if !active.state.is_downloading() && !active.state.is_playing() {
            return true;
        }
        tracing::info!(generation = active.state.generation, "signalling stream to stop");
        active.state.cancel();
        self.inner.caps.display.set_music_info("");
        true
    }

    /// Stream the pending recommended song, if any.
    pub fn play_next_song(&self) -> bool {
        self.inner.play_next_song()
    }

    /// Raw body of the last search response.
    pub fn download_result(&self) -> String {
        lock(&self.inner.session).last_search.clone()
    }

    /// Compressed bytes waiting between the downloader and the player.
    pub fn buffer_size(&self) -> usize {
        self.inner
            .current_stream()
            .map(|s| s.buffer.len_bytes())
            .unwrap_or(0)
    }

    pub fn is_downloading(&self) -> bool {
        self.inner
            .current_stream()
            .is_some_and(|s| s.is_downloading())
    }

    pub fn is_playing(&self) -> bool {
        self.inner.current_stream().is_some_and(|s| s.is_playing())
    }

    pub fn status(&self) -> PlayerStatus {
        let inner = &self.inner;
        let stream = inner.current_stream();
        let lyric_active = lock(&inner.lyric)
            .as_ref()
            .is_some_and(|l| l.active.load(Ordering::SeqCst));
        let next_song = lock(&inner.recommend).next.clone();
        let status = PlayerStatus {
            generation: inner.generation.load(Ordering::SeqCst),
            lyric_active,
            current_lyric: inner.lyrics.current_text(),
            next_song,
            ..PlayerStatus::default()
        };
        let status = match stream {
            Some(s) => PlayerStatus {
                playing: s.is_playing(),
                downloading: s.is_downloading(),
                played_ms: s.played_ms.load(Ordering::Relaxed),
                frames_decoded: s.frames_decoded.load(Ordering::Relaxed),
                buffered_bytes: s.buffer.len_bytes(),
                bytes_downloaded: s.bytes_downloaded.load(Ordering::Relaxed),
                ..status
            },
            None => status,
        };
        let session = lock(&inner.session);
        status.with_session(&session.song_name, &session.stream_url, &session.lyric_url)
    }
}

impl Drop for MusicPlayer {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.advance.shutdown();

        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            watcher.join_within(inner.cfg.downloader_join_timeout(), || inner.advance.shutdown());
        }
        let _restart = lock(&inner.restart);
        let active = lock(&inner.stream).take();
        if let Some(active) = active {
            inner.teardown(active);
        }
        inner.stop_lyrics();
        reset_sample_rate(inner.caps.sink.as_ref());
        tracing::info!("music player shut down");
    }
}

fn run_watcher(inner: &Arc<PlayerInner>) {
    while let Some(generation) = inner.advance.wait() {
        let current = inner.generation.load(Ordering::SeqCst);
        if generation != current || inner.closed.load(Ordering::SeqCst) {
            tracing::debug!(generation, current, "ignoring stale advance request");
            continue;
        }
        tracing::info!(generation, "song finished, advancing");
        if !inner.play_next_song() {
            tracing::info!("no next song, playback idle");
        }
    }
    tracing::debug!("advance watcher exiting");
}

impl PlayerInner {
    fn current_stream(&self) -> Option<Arc<StreamState>> {
        lock(&self.stream).as_ref().map(|a| a.state.clone())
    }

    fn play_next_song(self: &Arc<Self>) -> bool {
        let Some(track_id) = lock(&self.recommend).next.take() else {
            tracing::info!("no recommended song pending");
            return false;
        };
        tracing::info!(track_id = %track_id, "playing recommended song");
        self.play_track(&track_id, "")
    }

    /// Resolve `track_id`, stream it and restart lyrics for it.
    ///
    /// The session's song name and URLs change only once the new stream has started.
    fn play_track(self: &Arc<Self>, track_id: &str, song_name: &str) -> bool {
        let track = match self.caps.catalog.resolve(track_id) {
            Ok(track) => track,
            Err(e) => {
                tracing::error!(track_id = %track_id, "failed to resolve track: {e:#}");
                return false;
            }
        };

        self.stop_lyrics();
        self.lyrics.reset();
        let state = match self.start_stream(&track.stream_url, song_name) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(track_id = %track_id, "failed to start streaming: {e:#}");
                return false;
            }
        };
        {
            let mut session = lock(&self.session);
            session.song_name = song_name.to_string();
            session.stream_url = track.stream_url.clone();
            session.lyric_url = track.lyric_url.clone();
        }
        if track.lyric_url.is_empty() {
            tracing::info!(track_id = %track_id, "track has no lyrics");
        } else if let Err(e) = self.start_lyrics(&track.lyric_url, &state) {
            tracing::warn!(track_id = %track_id, "lyrics not started: {e:#}");
        }
        true
    }

    fn start_stream(self: &Arc<Self>, url: &str, song_name: &str) -> Result<Arc<StreamState>> {
        if url.is_empty() {
            bail!("stream url is empty");
        }

        let _restart = lock(&self.restart);
        if self.closed.load(Ordering::SeqCst) {
            bail!("player is shutting down");
        }
        let previous = lock(&self.stream).take();
        if let Some(previous) = previous {
            tracing::info!(generation = previous.state.generation, "replacing running stream");
            self.teardown(previous);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = Arc::new(StreamState::new(generation, &self.cfg));
        state.downloading.store(true, Ordering::SeqCst);
        state.playing.store(true, Ordering::SeqCst);
        tracing::info!(generation, url = %url, "starting stream");

        let downloader = {
            let http = self.caps.http.clone();
            let url = url.to_string();
            let state = state.clone();
            let cfg = self.cfg.clone();
            Worker::spawn("music-download", move || {
                run_downloader(http.as_ref(), &url, &state, &cfg)
            })
            .context("start downloader")?
        };

        let ctx = PlayerContext {
            stream: state.clone(),
            caps: self.caps.clone(),
            lyrics: self.lyrics.clone(),
            song_name: song_name.to_string(),
            cfg: self.cfg.clone(),
        };
        let inner = self.clone();
        let player = match Worker::spawn("music-player", move || {
            let end = run_player(&ctx);
            inner.on_playback_end(&ctx.stream, end);
        }) {
            Ok(player) => player,
            Err(e) => {
                state.cancel();
                downloader.join_within(self.cfg.downloader_join_timeout(), || state.buffer.cancel());
                return Err(e.context("start player"));
            }
        };

        *lock(&self.stream) = Some(ActiveStream {
            state: state.clone(),
            downloader,
            player,
        });
        Ok(state)
    }

    /// Cancel a stream, join its threads within the configured bounds and free its buffer.
    fn teardown(&self, active: ActiveStream) {
        let ActiveStream {
            state,
            downloader,
            player,
        } = active;
        state.cancel();
        let nudge = || state.buffer.cancel();
        let downloader_done = downloader.join_within(self.cfg.downloader_join_timeout(), nudge);
        let player_done = player.join_within(self.cfg.player_join_timeout(), nudge);
        let freed = state.buffer.clear();
        tracing::debug!(
            generation = state.generation,
            downloader_done,
            player_done,
            freed_bytes = freed,
            "stream torn down"
        );
    }

    /// Runs on the player thread after its termination step.
    fn on_playback_end(&self, state: &StreamState, end: PlaybackEnd) {
        {
            let lyric = lock(&self.lyric);
            state.ended.store(true, Ordering::SeqCst);
            if let Some(session) = lyric.as_ref().filter(|s| s.generation == state.generation) {
                session.stop.set();
            }
        }
        if end == PlaybackEnd::Finished && !self.closed.load(Ordering::SeqCst) {
            self.advance.request(state.generation);
        }
    }

    fn start_lyrics(self: &Arc<Self>, url: &str, state: &StreamState) -> Result<()> {
        let stop = Arc::new(Latch::new());
        let active = Arc::new(AtomicBool::new(true));
        let generation = state.generation;

        let previous = {
            let mut slot = lock(&self.lyric);
            if state.ended.load(Ordering::SeqCst) {
                stop.set();
            }
            let worker = {
                let inner = self.clone();
                let url = url.to_string();
                let stop = stop.clone();
                let active = active.clone();
                Worker::spawn("music-lyrics", move || {
                    inner.run_lyrics(generation, &url, &stop);
                    active.store(false, Ordering::SeqCst);
                })?
            };
            slot.replace(LyricSession {
                generation,
                stop,
                active,
                worker,
            })
        };
        if let Some(previous) = previous {
            self.join_lyrics(previous);
        }
        Ok(())
    }

    /// Lyric thread body: fetch once, then idle until the song's stream ends or lyrics stop.
    fn run_lyrics(&self, generation: u64, url: &str, stop: &Latch) {
        let lines = download_lyrics(self.caps.http.as_ref(), url, &self.cfg, stop).and_then(|body| {
            if self.owns_lyrics(generation) {
                let mut rec = lock(&self.recommend);
                let rec = &mut *rec;
                if let Some(next) = parse_recommended_song(&body, &mut rec.played) {
                    rec.next = Some(next);
                }
            }
            parse_lyrics(&body)
        });
        match lines {
            Ok(lines) => {
                tracing::info!(generation, lines = lines.len(), "lyrics loaded");
                self.install_lyrics(generation, lines);
                stop.wait();
            }
            Err(e) => tracing::warn!(generation, url = %url, "lyrics unavailable: {e:#}"),
        }
        tracing::debug!(generation, "lyric thread exiting");
    }

    /// Whether the lyric slot still belongs to `generation`. A detached lyric thread from an
    /// earlier song fails this and leaves shared state alone.
    fn owns_lyrics(&self, generation: u64) -> bool {
        lock(&self.lyric)
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn install_lyrics(&self, generation: u64, lines: Vec<LyricLine>) {
        let slot = lock(&self.lyric);
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            self.lyrics.replace(lines);
        }
    }

    fn stop_lyrics(&self) {
        let session = lock(&self.lyric).take();
        if let Some(session) = session {
            self.join_lyrics(session);
        }
    }

    /// Stop a lyric session and join its thread within the configured bound.
    fn join_lyrics(&self, session: LyricSession) {
        let LyricSession {
            generation,
            stop,
            worker,
            ..
        } = session;
        stop.set();
        if !worker.join_within(self.cfg.lyric_join_timeout(), || stop.set()) {
            tracing::warn!(generation, "lyric thread still busy, left to finish on its own");
        }
    }
}
