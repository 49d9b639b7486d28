use serde::Deserialize;

/// Output tuning for [`crate::CpalSink`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Case-insensitive substring of the output device name; default device when unset.
    pub device: Option<String>,
    /// Target duration of the sample queue feeding the output callback.
    pub buffer_seconds: f32,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Packets allowed in flight between the player and the output thread.
    pub packet_queue: usize,
    /// Longest `enqueue` may wait for room before dropping a packet.
    pub enqueue_timeout_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_seconds: 1.0,
            chunk_frames: 1024,
            refill_max_frames: 4096,
            packet_queue: 16,
            enqueue_timeout_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: OutputConfig = serde_json::from_str(r#"{"device":"usb","packet_queue":4}"#).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("usb"));
        assert_eq!(cfg.packet_queue, 4);
        assert_eq!(cfg.chunk_frames, 1024);
        assert_eq!(cfg.enqueue_timeout_ms, 3000);
    }
}
