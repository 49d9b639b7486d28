//! Mono sample-rate conversion for incoming packets.
//!
//! Packets arrive in small blocks at the stream's rate; [`PacketResampler`] collects them
//! into fixed input chunks for Rubato's sinc resampler and emits whatever output each
//! chunk produces.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct PacketResampler {
    in_rate: u32,
    out_rate: u32,
    chunk_frames: usize,
    resampler: Box<dyn Resampler<f32>>,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl PacketResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_frames: usize) -> Result<Self> {
        if in_rate == 0 || out_rate == 0 {
            return Err(anyhow!("invalid resample rates {in_rate} -> {out_rate}"));
        }
        let chunk_frames = chunk_frames.max(1);

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let resampler = Async::<f32>::new_sinc(
            out_rate as f64 / in_rate as f64,
            1.1,
            &params,
            chunk_frames,
            1,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        let out = vec![0.0f32; resampler.output_frames_max()];

        Ok(Self {
            in_rate,
            out_rate,
            chunk_frames,
            resampler: Box::new(resampler),
            pending: Vec::with_capacity(chunk_frames * 2),
            out,
        })
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Feed `input` and append every completed output chunk to `dst`.
    pub fn process(&mut self, input: &[f32], dst: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_frames {
            let chunk = &self.pending[consumed..consumed + self.chunk_frames];
            let produced = run_chunk(self.resampler.as_mut(), chunk, &mut self.out, None)?;
            dst.extend_from_slice(&self.out[..produced]);
            consumed += self.chunk_frames;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Push the partial input chunk through, e.g. at the end of a stream.
    pub fn flush(&mut self, dst: &mut Vec<f32>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tail = std::mem::take(&mut self.pending);
        let mut chunk = tail.clone();
        chunk.resize(self.chunk_frames, 0.0);
        let produced = run_chunk(self.resampler.as_mut(), &chunk, &mut self.out, Some(tail.len()))?;
        dst.extend_from_slice(&self.out[..produced]);
        Ok(())
    }
}

fn run_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    out: &mut [f32],
    partial_len: Option<usize>,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, 1, input.len())
        .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
    let out_frames = out.len();
    let mut output_adapter = InterleavedSlice::new_mut(out, 1, out_frames)
        .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;
    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| anyhow!("resampler process: {e}"))?;
    Ok(nbr_out)
}
