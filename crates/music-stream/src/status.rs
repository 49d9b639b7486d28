use serde::Serialize;

/// Point-in-time view of a [`crate::MusicPlayer`], for logging or a status endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlayerStatus {
    pub song_name: Option<String>,
    pub stream_url: Option<String>,
    pub lyric_url: Option<String>,
    /// Streams started so far; 0 before the first one.
    pub generation: u64,
    pub playing: bool,
    pub downloading: bool,
    pub lyric_active: bool,
    pub played_ms: u64,
    pub frames_decoded: u64,
    pub buffered_bytes: usize,
    pub bytes_downloaded: u64,
    pub current_lyric: Option<String>,
    pub next_song: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl PlayerStatus {
    pub(crate) fn with_session(mut self, song_name: &str, stream_url: &str, lyric_url: &str) -> Self {
        self.song_name = non_empty(song_name);
        self.stream_url = non_empty(stream_url);
        self.lyric_url = non_empty(lyric_url);
        self
    }
}
