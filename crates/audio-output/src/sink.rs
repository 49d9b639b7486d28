//! [`AudioSink`] backed by a cpal output stream.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated output thread. The
//! sink talks to it over a bounded command channel; packets are converted to `f32`,
//! resampled to the device rate when needed and pushed into the [`SampleQueue`] the
//! callback drains. A full queue blocks the output thread, a full channel blocks
//! [`AudioSink::enqueue`] up to the configured timeout, and that backpressure paces the
//! decoder to real time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use music_stream::{AudioPacket, AudioSink};

use crate::config::OutputConfig;
use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::playback::{PlaybackCounters, build_output_stream};
use crate::queue::{SampleQueue, capacity_for};
use crate::resample::PacketResampler;

enum Command {
    Packet(AudioPacket),
    SetRate {
        rate: Option<u32>,
        reply: Sender<Result<u32>>,
    },
    Shutdown,
}

struct Opened {
    device_name: String,
    rate: u32,
    queue: Arc<SampleQueue>,
}

pub struct CpalSink {
    tx: Sender<Command>,
    enabled: Arc<AtomicBool>,
    current_rate: Arc<AtomicU32>,
    original_rate: u32,
    device_name: String,
    queue: Arc<SampleQueue>,
    counters: Arc<PlaybackCounters>,
    timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalSink {
    /// Open the configured device at its default rate and start the output thread.
    pub fn open(cfg: OutputConfig) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(cfg.packet_queue.max(1));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let enabled = Arc::new(AtomicBool::new(false));
        let current_rate = Arc::new(AtomicU32::new(0));
        let counters = Arc::new(PlaybackCounters::default());
        let timeout = Duration::from_millis(cfg.enqueue_timeout_ms);

        let thread = {
            let enabled = enabled.clone();
            let current_rate = current_rate.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || run_output(cfg, rx, ready_tx, &enabled, &current_rate, &counters))
                .context("spawn audio output thread")?
        };

        let opened: Opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio output thread exited during startup"))??;
        tracing::info!(
            device = %opened.device_name,
            rate = opened.rate,
            "audio output ready"
        );

        Ok(Self {
            tx,
            enabled,
            current_rate,
            original_rate: opened.rate,
            device_name: opened.device_name,
            queue: opened.queue,
            counters,
            timeout,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// `(events, frames)` of silence written because the queue ran dry.
    pub fn underruns(&self) -> (u64, u64) {
        (
            self.counters.underrun_events.load(Ordering::Relaxed),
            self.counters.underrun_frames.load(Ordering::Relaxed),
        )
    }

    /// Wait for queued audio to reach the device; returns whether the queue drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        self.queue.wait_drained(timeout)
    }
}

impl AudioSink for CpalSink {
    fn output_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn enqueue(&self, packet: AudioPacket) -> bool {
        if !self.output_enabled() {
            return false;
        }
        self.tx.send_timeout(Command::Packet(packet), self.timeout).is_ok()
    }

    fn output_sample_rate(&self) -> u32 {
        self.current_rate.load(Ordering::SeqCst)
    }

    fn original_output_sample_rate(&self) -> u32 {
        self.original_rate
    }

    fn set_output_sample_rate(&self, rate: Option<u32>) -> bool {
        let (reply, result) = crossbeam_channel::bounded(1);
        if self
            .tx
            .send_timeout(Command::SetRate { rate, reply }, self.timeout)
            .is_err()
        {
            tracing::warn!("audio output busy, sample rate unchanged");
            return false;
        }
        match result.recv_timeout(self.timeout) {
            Ok(Ok(actual)) => {
                tracing::info!(requested = ?rate, actual, "output sample rate set");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(requested = ?rate, "failed to change output sample rate: {e:#}");
                false
            }
            Err(_) => {
                tracing::warn!(requested = ?rate, "audio output did not answer rate change");
                false
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.queue.close();
        let _ = self.tx.send_timeout(Command::Shutdown, self.timeout);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("audio output thread panicked");
            }
        }
    }
}

/// Little-endian i16 PCM to `f32` in `[-1, 1)`. A trailing odd byte is ignored.
pub fn pcm_to_f32(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
        .collect()
}

struct Output {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    rate: u32,
}

fn open_stream(
    device: &cpal::Device,
    rate: u32,
    queue: &Arc<SampleQueue>,
    cfg: &OutputConfig,
    counters: &Arc<PlaybackCounters>,
) -> Result<(cpal::Stream, u32)> {
    let supported = pick_output_config(device, Some(rate))?;
    let actual = supported.sample_rate();
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = pick_buffer_size(&supported) {
        config.buffer_size = buffer_size;
    }
    let stream = build_output_stream(
        device,
        &config,
        sample_format,
        queue,
        cfg.refill_max_frames,
        counters,
    )?;
    stream.play().context("start output stream")?;
    tracing::debug!(
        rate = actual,
        channels = config.channels,
        format = ?sample_format,
        "output stream opened"
    );
    Ok((stream, actual))
}

fn run_output(
    cfg: OutputConfig,
    rx: Receiver<Command>,
    ready: Sender<Result<Opened>>,
    enabled: &AtomicBool,
    current_rate: &AtomicU32,
    counters: &Arc<PlaybackCounters>,
) {
    let setup = || -> Result<(Output, Arc<SampleQueue>, String)> {
        let host = cpal::default_host();
        let device = pick_device(&host, cfg.device.as_deref())?;
        let name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let default_rate = device
            .default_output_config()
            .context("default output config")?
            .sample_rate();
        let queue = Arc::new(SampleQueue::new(capacity_for(default_rate, cfg.buffer_seconds)));
        let (stream, rate) = open_stream(&device, default_rate, &queue, &cfg, counters)?;
        Ok((
            Output {
                device,
                stream: Some(stream),
                rate,
            },
            queue,
            name,
        ))
    };

    let (mut output, queue, device_name) = match setup() {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let original_rate = output.rate;
    current_rate.store(original_rate, Ordering::SeqCst);
    enabled.store(true, Ordering::SeqCst);
    let _ = ready.send(Ok(Opened {
        device_name,
        rate: original_rate,
        queue: queue.clone(),
    }));

    let mut resampler: Option<PacketResampler> = None;
    let mut resampled = Vec::new();

    for cmd in rx.iter() {
        match cmd {
            Command::Packet(packet) => {
                let samples = pcm_to_f32(&packet.payload);
                let out = if packet.sample_rate == output.rate || packet.sample_rate == 0 {
                    &samples
                } else {
                    let stale = resampler
                        .as_ref()
                        .is_none_or(|r| r.in_rate() != packet.sample_rate || r.out_rate() != output.rate);
                    if stale {
                        match PacketResampler::new(packet.sample_rate, output.rate, cfg.chunk_frames) {
                            Ok(r) => {
                                tracing::info!(from = packet.sample_rate, to = output.rate, "resampling output");
                                resampler = Some(r);
                            }
                            Err(e) => {
                                tracing::error!("resampler init error: {e:#}");
                                continue;
                            }
                        }
                    }
                    resampled.clear();
                    if let Some(r) = resampler.as_mut() {
                        if let Err(e) = r.process(&samples, &mut resampled) {
                            tracing::warn!("dropping packet: {e:#}");
                            resampler = None;
                            continue;
                        }
                    }
                    &resampled
                };
                if !queue.push(out) {
                    break;
                }
            }
            Command::SetRate { rate, reply } => {
                let wanted = rate.unwrap_or(original_rate);
                let result = if wanted == output.rate {
                    Ok(output.rate)
                } else {
                    reopen(&mut output, wanted, &queue, &cfg, counters)
                };
                match &result {
                    Ok(actual) => current_rate.store(*actual, Ordering::SeqCst),
                    Err(_) if output.stream.is_none() => enabled.store(false, Ordering::SeqCst),
                    Err(_) => {}
                }
                resampler = None;
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }

    enabled.store(false, Ordering::SeqCst);
    queue.close();
    drop(output.stream.take());
    tracing::debug!("audio output thread exiting");
}

/// Reopen the stream at `rate`, falling back to the previous rate on failure.
fn reopen(
    output: &mut Output,
    rate: u32,
    queue: &Arc<SampleQueue>,
    cfg: &OutputConfig,
    counters: &Arc<PlaybackCounters>,
) -> Result<u32> {
    drop(output.stream.take());
    queue.clear();
    match open_stream(&output.device, rate, queue, cfg, counters) {
        Ok((stream, actual)) => {
            output.stream = Some(stream);
            output.rate = actual;
            Ok(actual)
        }
        Err(e) => {
            match open_stream(&output.device, output.rate, queue, cfg, counters) {
                Ok((stream, _)) => output.stream = Some(stream),
                Err(e2) => tracing::error!("failed to reopen output stream: {e2:#}"),
            }
            Err(e.context(format!("open output at {rate} Hz")))
        }
    }
}
