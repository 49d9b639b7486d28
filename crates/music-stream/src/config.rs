use std::time::Duration;

use serde::Deserialize;

/// Tuning parameters for one streaming engine instance.
///
/// Every field has a default, so a TOML table only needs to name the values it overrides.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Byte cap of the compressed-audio buffer; the downloader waits above it.
    pub max_buffer_bytes: usize,
    /// Buffered bytes required before decoding starts.
    pub min_start_bytes: usize,
    /// Bytes requested per network read.
    pub download_chunk_bytes: usize,
    /// Capacity of the player's decode window.
    pub decode_window_bytes: usize,
    /// The player pulls another chunk when fewer undecoded bytes remain.
    pub refill_threshold_bytes: usize,
    /// Added to played time before the lyric lookup to account for sink buffering.
    pub lyric_latency_ms: u64,
    /// Nominal frame duration stamped on every emitted packet.
    pub packet_frame_duration_ms: u32,
    /// Wait after asking a listening device to go idle.
    pub listening_toggle_wait_ms: u64,
    /// Wait between device-state checks while the device is busy.
    pub busy_poll_ms: u64,
    /// Bounded join for the downloader during teardown.
    pub downloader_join_timeout_ms: u64,
    /// Bounded join for the player during teardown.
    pub player_join_timeout_ms: u64,
    /// Attempts made to fetch the lyric document.
    pub lyric_max_retries: u32,
    /// Pause between lyric download attempts.
    pub lyric_retry_backoff_ms: u64,
    /// Redirect responses tolerated before the lyric download gives up.
    pub lyric_max_redirects: u32,
    /// Whole-call limit for one lyric request, body included.
    pub lyric_request_timeout_ms: u64,
    /// Bounded join for the lyric thread when lyrics stop or change.
    pub lyric_join_timeout_ms: u64,
    /// User-Agent sent with stream requests.
    pub user_agent: String,
    /// TCP/TLS connect timeout for every request.
    pub http_connect_timeout_ms: u64,
    /// Timeout for the response status line and headers.
    pub http_response_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 512 * 1024,
            min_start_bytes: 64 * 1024,
            download_chunk_bytes: 4096,
            decode_window_bytes: 8192,
            refill_threshold_bytes: 4096,
            lyric_latency_ms: 600,
            packet_frame_duration_ms: 60,
            listening_toggle_wait_ms: 300,
            busy_poll_ms: 50,
            downloader_join_timeout_ms: 5000,
            player_join_timeout_ms: 3000,
            lyric_max_retries: 3,
            lyric_retry_backoff_ms: 500,
            lyric_max_redirects: 5,
            lyric_request_timeout_ms: 10_000,
            lyric_join_timeout_ms: 1000,
            user_agent: "music-stream/0.1".to_string(),
            http_connect_timeout_ms: 10_000,
            http_response_timeout_ms: 15_000,
        }
    }
}

impl StreamConfig {
    pub(crate) fn downloader_join_timeout(&self) -> Duration {
        Duration::from_millis(self.downloader_join_timeout_ms)
    }

    pub(crate) fn player_join_timeout(&self) -> Duration {
        Duration::from_millis(self.player_join_timeout_ms)
    }

    pub(crate) fn listening_toggle_wait(&self) -> Duration {
        Duration::from_millis(self.listening_toggle_wait_ms)
    }

    pub(crate) fn busy_poll(&self) -> Duration {
        Duration::from_millis(self.busy_poll_ms)
    }

    pub(crate) fn lyric_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lyric_retry_backoff_ms)
    }

    pub(crate) fn lyric_request_timeout(&self) -> Duration {
        Duration::from_millis(self.lyric_request_timeout_ms)
    }

    pub(crate) fn lyric_join_timeout(&self) -> Duration {
        Duration::from_millis(self.lyric_join_timeout_ms)
    }
}
