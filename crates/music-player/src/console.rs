//! Terminal stand-ins for the host device's display and chat state.

use std::sync::{Mutex, PoisonError};

use music_stream::{DeviceActivity, DeviceStateSource, Display};

/// Writes now-playing text and lyric lines to the log.
#[derive(Default)]
pub struct LogDisplay {
    last_lyric: Mutex<String>,
}

impl Display for LogDisplay {
    fn set_music_info(&self, text: &str) {
        if text.is_empty() {
            tracing::debug!("music info cleared");
        } else {
            tracing::info!(info = %text, "now playing");
        }
    }

    fn set_chat_message(&self, role: &str, text: &str) {
        let mut last = self.last_lyric.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == text {
            return;
        }
        *last = text.to_string();
        tracing::info!(role, "{text}");
    }
}

/// A standalone player has no voice session to yield to.
pub struct AlwaysIdle;

impl DeviceStateSource for AlwaysIdle {
    fn activity(&self) -> DeviceActivity {
        DeviceActivity::Idle
    }

    fn toggle_chat_state(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lyric_is_remembered_once() {
        let display = LogDisplay::default();
        display.set_chat_message("lyric", "first line");
        display.set_chat_message("lyric", "first line");
        assert_eq!(*display.last_lyric.lock().unwrap(), "first line");
        display.set_chat_message("lyric", "second line");
        assert_eq!(*display.last_lyric.lock().unwrap(), "second line");
    }

    #[test]
    fn device_never_blocks_playback() {
        assert_eq!(AlwaysIdle.activity(), DeviceActivity::Idle);
    }
}
