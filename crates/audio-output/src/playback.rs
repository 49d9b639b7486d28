//! cpal output stream fed from a mono [`SampleQueue`].
//!
//! The callback refills a small local buffer without blocking, copies each mono sample
//! into every device channel and writes silence on underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SampleQueue;

/// Underrun counters updated by the callback.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    counters: &Arc<PlaybackCounters>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, refill_max_frames, counters),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, refill_max_frames, counters),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, refill_max_frames, counters),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, refill_max_frames, counters),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    counters: &Arc<PlaybackCounters>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let mut local = LocalBuffer::default();
    let queue = queue.clone();
    let counters = counters.clone();
    let refill = refill_max_frames.max(1);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let filled = local.fill(data, channels_out, |max| queue.pop_up_to(max), refill);
            counters
                .played_frames
                .fetch_add(filled as u64, Ordering::Relaxed);
            if filled < frames {
                counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                counters
                    .underrun_frames
                    .fetch_add((frames - filled) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Samples already taken from the queue but not yet written to the device.
#[derive(Default)]
struct LocalBuffer {
    pos: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    /// Fill `data` frame by frame; returns how many frames carried audio.
    fn fill<T>(
        &mut self,
        data: &mut [T],
        channels: usize,
        mut pop: impl FnMut(usize) -> Option<Vec<f32>>,
        refill: usize,
    ) -> usize
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let mut filled = 0;
        for frame in data.chunks_mut(channels) {
            if self.pos >= self.src.len() {
                match pop(refill) {
                    Some(v) => {
                        self.src = v;
                        self.pos = 0;
                    }
                    None => {
                        self.src.clear();
                        self.pos = 0;
                        frame.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                        continue;
                    }
                }
            }
            frame.fill(<T as cpal::Sample>::from_sample::<f32>(self.src[self.pos]));
            self.pos += 1;
            filled += 1;
        }
        filled
    }
}
