//! Buffer → decode → sink stage.
//!
//! One player thread per stream. It waits for the start threshold, yields to the host
//! device while it is busy, keeps the decode window topped up from the chunk buffer, decodes
//! one MPEG frame at a time, downmixes to mono and hands fixed-format packets to the sink.
//! Lyric selection piggybacks on the decoded-time counter.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Result, bail};

use crate::buffer::{AudioChunk, ChunkBuffer};
use crate::config::StreamConfig;
use crate::decode::{DecodeError, DecodedFrame};
use crate::frame::{ID3_HEADER_LEN, find_frame_sync, id3_tag_len, partial_header_len};
use crate::lyrics::LyricTrack;
use crate::pcm::{downmix_to_mono, to_le_bytes};
use crate::services::{AudioPacket, AudioSink, Capabilities, DeviceActivity};
use crate::stream::StreamState;
use crate::window::DecodeWindow;

/// How a player thread ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PlaybackEnd {
    /// The downloader finished and every buffered byte was decoded.
    Finished,
    /// The stream was stopped or replaced.
    Cancelled,
    /// Playback could not start or continue.
    Failed,
}

/// Everything a player thread needs; owned by the thread.
pub(crate) struct PlayerContext {
    pub(crate) stream: Arc<StreamState>,
    pub(crate) caps: Capabilities,
    pub(crate) lyrics: Arc<LyricTrack>,
    pub(crate) song_name: String,
    pub(crate) cfg: StreamConfig,
}

/// Player thread body, including the termination step.
pub(crate) fn run_player(ctx: &PlayerContext) -> PlaybackEnd {
    let stream = &ctx.stream;
    let end = match play_stream(ctx) {
        Ok(end) => end,
        Err(e) => {
            tracing::error!(generation = stream.generation, "playback failed: {e:#}");
            stream.cancel();
            PlaybackEnd::Failed
        }
    };

    ctx.caps.display.set_music_info("");
    reset_sample_rate(ctx.caps.sink.as_ref());
    stream.playing.store(false, Ordering::SeqCst);
    tracing::info!(
        generation = stream.generation,
        played_ms = stream.played_ms.load(Ordering::Relaxed),
        frames = stream.frames_decoded.load(Ordering::Relaxed),
        end = ?end,
        "playback stopped"
    );
    end
}

/// Put the sink back on its original rate if something changed it.
pub(crate) fn reset_sample_rate(sink: &dyn AudioSink) {
    let original = sink.original_output_sample_rate();
    let current = sink.output_sample_rate();
    if original == 0 || current == original {
        return;
    }
    if sink.set_output_sample_rate(None) {
        tracing::info!(from = current, to = original, "output sample rate restored");
    } else {
        tracing::warn!(from = current, to = original, "failed to restore output sample rate");
    }
}

fn play_stream(ctx: &PlayerContext) -> Result<PlaybackEnd> {
    let stream = &ctx.stream;
    let cfg = &ctx.cfg;

    if !ctx.caps.sink.output_enabled() {
        bail!("audio output is not enabled");
    }
    if !stream.buffer.wait_for_start() {
        if stream.is_cancelled() {
            return Ok(PlaybackEnd::Cancelled);
        }
        bail!("stream ended before any audio arrived");
    }
    tracing::info!(
        generation = stream.generation,
        buffered = stream.buffer.len_bytes(),
        "starting playback"
    );

    let mut feeder = WindowFeeder::new(cfg.decode_window_bytes)?;
    let mut decoder = (ctx.caps.decoder)();
    let mut announced = false;
    let mut need_data = false;
    let mut packets = 0u64;

    loop {
        if stream.is_cancelled() {
            return Ok(PlaybackEnd::Cancelled);
        }
        if !device_ready(ctx) {
            continue;
        }
        if !announced {
            announced = true;
            if !ctx.song_name.is_empty() {
                let label = format!("Now playing: {}", ctx.song_name);
                tracing::info!(label = %label, "showing song name");
                ctx.caps.display.set_music_info(&label);
            }
        }

        if !feeder.drained && (need_data || feeder.window.remaining() < cfg.refill_threshold_bytes) {
            need_data = false;
            if feeder.refill(&stream.buffer) == Refill::Cancelled {
                return Ok(PlaybackEnd::Cancelled);
            }
        }

        if feeder.window.remaining() == 0 {
            if feeder.drained {
                break;
            }
            continue;
        }

        let Some(offset) = find_frame_sync(feeder.window.bytes()) else {
            let keep = if feeder.drained {
                0
            } else {
                partial_header_len(feeder.window.bytes())
            };
            tracing::debug!(bytes = feeder.window.remaining() - keep, "no frame sync, discarding window");
            feeder.window.consume(feeder.window.remaining() - keep);
            need_data = keep > 0;
            continue;
        };
        feeder.window.consume(offset);

        match decoder.decode_frame(feeder.window.bytes()) {
            Ok(frame) => {
                feeder.window.consume(frame.consumed.max(1));
                if emit_frame(ctx, frame) {
                    packets += 1;
                }
            }
            Err(DecodeError::Incomplete) if feeder.drained => {
                tracing::debug!(
                    bytes = feeder.window.remaining(),
                    "dropping incomplete frame at end of stream"
                );
                feeder.window.clear();
            }
            Err(DecodeError::Incomplete) if feeder.window.is_full() => feeder.window.consume(1),
            Err(DecodeError::Incomplete) => need_data = true,
            Err(DecodeError::Invalid) => feeder.window.consume(1),
        }
    }

    tracing::info!(generation = stream.generation, packets, "stream fully decoded");
    Ok(PlaybackEnd::Finished)
}

/// Check the host device; returns `true` when music may play.
///
/// Non-idle states cost one bounded wait that returns early on cancellation.
fn device_ready(ctx: &PlayerContext) -> bool {
    let buffer = &ctx.stream.buffer;
    match ctx.caps.device.activity() {
        DeviceActivity::Idle => true,
        DeviceActivity::Listening => {
            tracing::info!("device is listening, switching it to idle for music");
            ctx.caps.device.toggle_chat_state();
            buffer.wait_cancelled(ctx.cfg.listening_toggle_wait());
            false
        }
        DeviceActivity::Busy => {
            tracing::trace!("device busy, holding playback");
            buffer.wait_cancelled(ctx.cfg.busy_poll());
            false
        }
    }
}

/// Account for a decoded frame and forward its audio. Returns whether a packet was sent.
fn emit_frame(ctx: &PlayerContext, frame: DecodedFrame) -> bool {
    let stream = &ctx.stream;
    stream.frames_decoded.fetch_add(1, Ordering::Relaxed);

    let Some(duration_ms) = frame.duration_ms() else {
        tracing::warn!(
            sample_rate = frame.sample_rate,
            channels = frame.channels,
            "frame with invalid metadata skipped"
        );
        return false;
    };
    let played_ms = stream.played_ms.fetch_add(duration_ms, Ordering::Relaxed) + duration_ms;

    if let Some(text) = ctx.lyrics.select(played_ms + ctx.cfg.lyric_latency_ms) {
        ctx.caps.display.set_chat_message("lyric", &text);
    }

    if frame.samples.is_empty() {
        return false;
    }
    let mono = downmix_to_mono(&frame.samples, frame.channels);
    let packet = AudioPacket {
        sample_rate: frame.sample_rate,
        frame_duration_ms: ctx.cfg.packet_frame_duration_ms,
        payload: to_le_bytes(&mono),
    };
    if !ctx.caps.sink.enqueue(packet) {
        tracing::trace!("sink dropped packet");
    }
    true
}

#[derive(Debug, PartialEq, Eq)]
enum Refill {
    Appended(usize),
    Drained,
    Cancelled,
}

/// Moves chunks from the buffer into the decode window.
///
/// A chunk that does not fit is carried over to the next refill. An ID3v2 tag at the very
/// start of the stream is skipped once, including the part that spills past the window.
struct WindowFeeder {
    window: DecodeWindow,
    carry: Option<(AudioChunk, usize)>,
    tag_checked: bool,
    skip_pending: usize,
    drained: bool,
}

impl WindowFeeder {
    fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            window: DecodeWindow::new(capacity)?,
            carry: None,
            tag_checked: false,
            skip_pending: 0,
            drained: false,
        })
    }

    fn refill(&mut self, buffer: &ChunkBuffer) -> Refill {
        let (chunk, mut offset) = match self.carry.take() {
            Some(carried) => carried,
            None => match buffer.pop() {
                Some(chunk) => (chunk, 0),
                None if buffer.is_cancelled() => return Refill::Cancelled,
                None => {
                    self.drained = true;
                    return Refill::Drained;
                }
            },
        };

        if self.skip_pending > 0 {
            let skip = self.skip_pending.min(chunk.len() - offset);
            offset += skip;
            self.skip_pending -= skip;
        }

        let taken = self.window.append(&chunk.as_slice()[offset..]);
        if offset + taken < chunk.len() {
            self.carry = Some((chunk, offset + taken));
        }

        if !self.tag_checked && self.window.remaining() >= ID3_HEADER_LEN {
            self.tag_checked = true;
            if let Some(tag_len) = id3_tag_len(self.window.bytes()) {
                let in_window = tag_len.min(self.window.remaining());
                self.window.consume(in_window);
                self.skip_pending = tag_len - in_window;
                tracing::info!(bytes = tag_len, "skipped ID3 tag");
            }
        }
        Refill::Appended(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecoderFactory;
    use crate::lyrics::LyricLine;
    use crate::testing::{FRAME, FakeDevice, FakeDisplay, FakeSink, NoNetwork, fake_decoder, frame, frames, id3_tag};
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        sink: Arc<FakeSink>,
        device: Arc<FakeDevice>,
        display: Arc<FakeDisplay>,
        lyrics: Arc<LyricTrack>,
        /// `None` keeps the decoder [`Capabilities::new`] installs.
        decoder: Option<DecoderFactory>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                sink: Arc::new(FakeSink::default()),
                device: Arc::new(FakeDevice::default()),
                display: Arc::new(FakeDisplay::default()),
                lyrics: Arc::new(LyricTrack::new()),
                decoder: Some(fake_decoder()),
            }
        }

        fn with_default_decoder() -> Self {
            Self {
                decoder: None,
                ..Self::new()
            }
        }

        fn context(&self, stream: Arc<StreamState>) -> PlayerContext {
            let caps = Capabilities::new(
                Arc::new(NoNetwork),
                self.sink.clone(),
                self.device.clone(),
                self.display.clone(),
                Arc::new(NoNetwork),
            );
            let caps = match &self.decoder {
                Some(decoder) => caps.with_decoder(decoder.clone()),
                None => caps,
            };
            PlayerContext {
                stream,
                caps,
                lyrics: self.lyrics.clone(),
                song_name: "test song".to_string(),
                cfg: test_config(),
            }
        }

        fn packets(&self) -> Vec<AudioPacket> {
            self.sink.packets.lock().unwrap().clone()
        }

        /// Queue `data` in `chunk`-sized pieces, finish the stream and play it to the end.
        fn play_bytes(&self, data: &[u8], chunk: usize) -> (PlaybackEnd, Arc<StreamState>) {
            let stream = Arc::new(StreamState::new(1, &test_config()));
            for piece in data.chunks(chunk) {
                assert!(stream.buffer.push(AudioChunk::from(piece)));
            }
            stream.buffer.finish();
            stream.playing.store(true, Ordering::SeqCst);
            let end = run_player(&self.context(stream.clone()));
            (end, stream)
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig {
            max_buffer_bytes: 4 * 1024 * 1024,
            min_start_bytes: 1,
            listening_toggle_wait_ms: 5,
            busy_poll_ms: 5,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn garbage_stream_terminates_without_packets() {
        let h = Harness::new();
        let garbage: Vec<u8> = (0..50_000u32).map(|i| (i % 200) as u8).collect();
        let started = Instant::now();
        let (end, stream) = h.play_bytes(&garbage, 4096);
        assert_eq!(end, PlaybackEnd::Finished);
        assert!(h.packets().is_empty());
        assert_eq!(stream.frames_decoded.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn valid_frames_become_mono_packets() {
        let h = Harness::new();
        let (end, stream) = h.play_bytes(&frames(10), 4096);
        assert_eq!(end, PlaybackEnd::Finished);

        let packets = h.packets();
        assert_eq!(packets.len(), 10);
        for p in &packets {
            assert_eq!(p.sample_rate, 44_100);
            assert_eq!(p.frame_duration_ms, 60);
            assert_eq!(p.payload.len(), 1152 * 2);
            assert_eq!(&p.payload[..4], &[150, 0, 150, 0]);
        }
        assert_eq!(stream.frames_decoded.load(Ordering::SeqCst), 10);
        assert_eq!(stream.played_ms.load(Ordering::SeqCst), 10 * (2304 * 1000 / (44_100 * 2)));
        assert!(!stream.is_playing());
    }

    #[test]
    fn default_decoder_plays_real_frames() {
        let h = Harness::with_default_decoder();
        let (end, stream) = h.play_bytes(&frames(10), 1000);
        assert_eq!(end, PlaybackEnd::Finished);

        let packets = h.packets();
        assert_eq!(packets.len(), 10);
        for p in &packets {
            assert_eq!(p.sample_rate, 44_100);
            assert_eq!(p.payload.len(), 1152 * 2);
        }
        assert_eq!(stream.frames_decoded.load(Ordering::SeqCst), 10);
        assert_eq!(stream.played_ms.load(Ordering::SeqCst), 260);
    }

    #[test]
    fn resyncs_after_garbage_between_frames() {
        let h = Harness::new();
        let mut data = vec![0x01; 100];
        data.extend(frame());
        data.extend([0xFF, 0x00, 0x13]);
        data.extend(frame());
        let (_, _) = h.play_bytes(&data, 97);
        assert_eq!(h.packets().len(), 2);
    }

    #[test]
    fn incomplete_tail_is_dropped() {
        let h = Harness::new();
        let mut data = frames(3);
        data.extend(&frame()[..200]);
        let (end, _) = h.play_bytes(&data, 4096);
        assert_eq!(end, PlaybackEnd::Finished);
        assert_eq!(h.packets().len(), 3);
    }

    #[test]
    fn frames_split_across_small_chunks_decode() {
        let h = Harness::new();
        let (_, _) = h.play_bytes(&frames(25), 100);
        assert_eq!(h.packets().len(), 25);
    }

    #[test]
    fn oversized_chunks_are_carried_over() {
        let h = Harness::new();
        let (_, _) = h.play_bytes(&frames(60), 20_000);
        assert_eq!(h.packets().len(), 60);
    }

    #[test]
    fn id3_tag_is_skipped() {
        let h = Harness::new();
        let mut data = id3_tag(1000, &FRAME);
        data.extend(frames(4));
        let (_, _) = h.play_bytes(&data, 4096);
        assert_eq!(h.packets().len(), 4);
    }

    #[test]
    fn id3_tag_larger_than_window_is_skipped() {
        let h = Harness::new();
        let mut data = id3_tag(20_000, &frame());
        data.extend(frames(4));
        let (_, _) = h.play_bytes(&data, 4096);
        assert_eq!(h.packets().len(), 4);
    }

    #[test]
    fn first_refill_skips_tag_header_and_body() {
        let buffer = ChunkBuffer::new(1 << 20, 1);
        let mut data = id3_tag(20, &[0xAA]);
        data.extend(1..=50u8);
        assert!(buffer.push(AudioChunk::new(data)));
        buffer.finish();

        let mut feeder = WindowFeeder::new(8192).unwrap();
        assert_eq!(feeder.refill(&buffer), Refill::Appended(80));
        assert_eq!(feeder.window.bytes(), (1..=50u8).collect::<Vec<_>>().as_slice());
        assert_eq!(feeder.refill(&buffer), Refill::Drained);
        assert!(feeder.drained);
    }

    #[test]
    fn tag_longer_than_data_consumes_everything() {
        let buffer = ChunkBuffer::new(1 << 20, 1);
        let mut data = id3_tag(100, &[0xAA]);
        data.truncate(30);
        assert!(buffer.push(AudioChunk::new(data)));
        assert!(buffer.push(AudioChunk::new(vec![0xAA; 80])));
        assert!(buffer.push(AudioChunk::new(vec![7; 5])));

        let mut feeder = WindowFeeder::new(8192).unwrap();
        feeder.refill(&buffer);
        assert_eq!(feeder.window.remaining(), 0);
        assert_eq!(feeder.skip_pending, 80);
        feeder.refill(&buffer);
        assert_eq!(feeder.window.remaining(), 0);
        feeder.refill(&buffer);
        assert_eq!(feeder.window.bytes(), &[7; 5]);
    }

    #[test]
    fn feeder_reports_cancellation() {
        let buffer = ChunkBuffer::new(1024, 1);
        buffer.cancel();
        let mut feeder = WindowFeeder::new(64).unwrap();
        assert_eq!(feeder.refill(&buffer), Refill::Cancelled);
        assert!(!feeder.drained);
    }

    #[test]
    fn lyrics_follow_decoded_time() {
        let h = Harness::new();
        h.lyrics.replace(
            [0u64, 700, 5_000]
                .iter()
                .map(|&ms| LyricLine {
                    timestamp_ms: ms,
                    text: format!("line {ms}"),
                })
                .collect(),
        );
        let (_, _) = h.play_bytes(&frames(10), 4096);
        let chat = h.display.chat.lock().unwrap().clone();
        assert_eq!(
            chat,
            vec![
                ("lyric".to_string(), "line 0".to_string()),
                ("lyric".to_string(), "line 700".to_string()),
            ]
        );
    }

    #[test]
    fn song_label_is_shown_then_cleared() {
        let h = Harness::new();
        let (_, _) = h.play_bytes(&frames(2), 4096);
        let info = h.display.music_info.lock().unwrap().clone();
        assert_eq!(info, vec!["Now playing: test song".to_string(), String::new()]);
    }

    #[test]
    fn device_gate_waits_for_idle() {
        let h = Harness::new();
        h.device.script.lock().unwrap().extend([
            DeviceActivity::Listening,
            DeviceActivity::Busy,
            DeviceActivity::Busy,
        ]);
        let (end, _) = h.play_bytes(&frames(3), 4096);
        assert_eq!(end, PlaybackEnd::Finished);
        assert_eq!(h.device.toggles.load(Ordering::SeqCst), 1);
        assert_eq!(h.packets().len(), 3);
    }

    #[test]
    fn sample_rate_override_is_restored() {
        let h = Harness::new();
        h.sink.set_output_sample_rate(Some(16_000));
        let (_, _) = h.play_bytes(&frames(1), 4096);
        assert_eq!(h.sink.resets.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.output_sample_rate(), 24_000);
    }

    #[test]
    fn disabled_output_fails_and_cancels_stream() {
        let h = Harness::new();
        h.sink.disabled.store(true, Ordering::SeqCst);
        let (end, stream) = h.play_bytes(&frames(3), 4096);
        assert_eq!(end, PlaybackEnd::Failed);
        assert!(h.packets().is_empty());
        assert!(stream.is_cancelled());
    }

    #[test]
    fn empty_stream_fails() {
        let h = Harness::new();
        let (end, _) = h.play_bytes(&[], 4096);
        assert_eq!(end, PlaybackEnd::Failed);
    }

    #[test]
    fn cancel_wakes_player_waiting_for_data() {
        let h = Harness::new();
        let stream = Arc::new(StreamState::new(1, &test_config()));
        assert!(stream.buffer.push(AudioChunk::new(frames(2))));
        let ctx = h.context(stream.clone());
        let player = thread::spawn(move || run_player(&ctx));

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.packets().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // The second frame stays in the window while the player waits for more data.
        assert_eq!(h.packets().len(), 1);

        let started = Instant::now();
        stream.cancel();
        assert_eq!(player.join().unwrap(), PlaybackEnd::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
