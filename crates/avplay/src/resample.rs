//! Sample-rate conversion between decoded audio and the output device.
//!
//! Wraps Rubato's streaming sinc resampler. Input arrives in arbitrary-sized
//! decoded frames; the resampler consumes fixed chunks, so the remainder is
//! carried to the next call.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let chunk_frames = chunk_frames.max(1);
        let channels = channels.max(1);
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
            dst_rate as f64 / src_rate as f64,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; channels * chunk_frames * 3],
        })
    }

    /// Feed interleaved input; returns whatever full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = self.pending[consumed..consumed + chunk_samples].to_vec();
            self.run(&chunk, None, &mut produced)?;
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(produced)
    }

    /// Push the carried remainder through; used at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut produced = Vec::new();
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            let mut tail = std::mem::take(&mut self.pending);
            tail.resize(self.chunk_frames * self.channels, 0.0);
            self.run(&tail, Some(tail_frames), &mut produced)?;
        }
        self.pending.clear();
        Ok(produced)
    }

    fn run(&mut self, chunk: &[f32], partial_len: Option<usize>, produced: &mut Vec<f32>) -> Result<()> {
        let input = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
            .map_err(|e| anyhow!("resampler input: {e}"))?;
        let out_frames = self.out.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
            .map_err(|e| anyhow!("resampler output: {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_, nbr_out) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        produced.extend_from_slice(&self.out[..nbr_out * self.channels]);
        Ok(())
    }
}
