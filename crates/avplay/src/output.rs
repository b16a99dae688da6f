//! Device output stage.
//!
//! A feeder thread pulls decoded audio from the player, converts it to the
//! device rate and pushes it into an [`OutputBuffer`]. The CPAL callback drains
//! that buffer without blocking; the feeder reports the media time of what the
//! callback actually consumed back to the player clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::DeviceTrait;
use playback_engine::MediaPlayer;
use playback_types::PlaybackState;

use crate::resample::StreamResampler;

/// Bounded interleaved sample buffer between the feeder and the callback.
pub struct OutputBuffer {
    inner: Mutex<Inner>,
    space: Condvar,
    channels: usize,
    max_samples: usize,
}

struct Inner {
    samples: VecDeque<f32>,
    /// `(total samples pushed when a chunk ended, media seconds at its end)`.
    marks: VecDeque<(u64, f64)>,
    pushed: u64,
    popped: u64,
    played_seconds: Option<f64>,
    closed: bool,
}

impl OutputBuffer {
    pub fn new(channels: usize, rate: u32, seconds: f32) -> Self {
        let channels = channels.max(1);
        let frames = ((rate as f32 * seconds.max(0.05)) as usize).max(1024);
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(frames * channels),
                marks: VecDeque::new(),
                pushed: 0,
                popped: 0,
                played_seconds: None,
                closed: false,
            }),
            space: Condvar::new(),
            channels,
            max_samples: frames * channels,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Append samples ending at `end_seconds` of media time, blocking while full.
    /// Returns `false` once the buffer is closed.
    pub fn push(&self, samples: &[f32], end_seconds: f64) -> bool {
        let mut g = self.lock();
        while !g.closed && !g.samples.is_empty() && g.samples.len() + samples.len() > self.max_samples
        {
            g = self
                .space
                .wait_timeout(g, Duration::from_millis(50))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if g.closed {
            return false;
        }
        g.samples.extend(samples.iter().copied());
        g.pushed += samples.len() as u64;
        let pushed = g.pushed;
        g.marks.push_back((pushed, end_seconds));
        true
    }

    /// Move up to `max` samples into `out` without blocking.
    pub fn pop_into(&self, out: &mut Vec<f32>, max: usize) -> usize {
        let mut g = self.lock();
        let n = max.min(g.samples.len());
        out.extend(g.samples.drain(..n));
        g.popped += n as u64;
        while let Some(&(end, seconds)) = g.marks.front() {
            if end > g.popped {
                break;
            }
            g.played_seconds = Some(seconds);
            g.marks.pop_front();
        }
        if n > 0 {
            self.space.notify_all();
        }
        n
    }

    /// Media time of the last fully consumed chunk.
    pub fn played_seconds(&self) -> Option<f64> {
        self.lock().played_seconds
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.space.notify_all();
    }
}

/// Start the thread that moves audio from the player into `buffer`.
pub fn spawn_feeder(
    player: Arc<MediaPlayer>,
    buffer: Arc<OutputBuffer>,
    mut resampler: Option<StreamResampler>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("avplay-feeder".into())
        .spawn(move || {
            let mut reported = None;
            while !stop.load(Ordering::Relaxed) {
                let played = buffer.played_seconds();
                if played.is_some() && played != reported {
                    reported = played;
                    if let Some(seconds) = played {
                        player.set_audio_time(seconds);
                    }
                }

                let Some(frame) = player.get_audio_frame() else {
                    if matches!(
                        player.playback_state(),
                        PlaybackState::Finished | PlaybackState::Stopped
                    ) {
                        if let Some(rs) = resampler.as_mut() {
                            match rs.flush() {
                                Ok(tail) if !tail.is_empty() => {
                                    buffer.push(&tail, player.duration());
                                }
                                Ok(_) => {}
                                Err(e) => tracing::warn!("resampler flush failed: {e:#}"),
                            }
                        }
                        // Keep reporting until the device drains the tail.
                        if buffer.is_empty() {
                            break;
                        }
                    }
                    thread::sleep(Duration::from_millis(5));
                    continue;
                };
                let Some(audio) = frame.as_audio() else {
                    continue;
                };
                if audio.channels as usize != buffer.channels() {
                    tracing::warn!(
                        channels = audio.channels,
                        expected = buffer.channels(),
                        "channel layout changed; frame skipped"
                    );
                    continue;
                }
                let converted = match resampler.as_mut() {
                    Some(rs) => match rs.process(&audio.samples) {
                        Ok(out) => out,
                        Err(e) => {
                            tracing::error!("resampler failed: {e:#}");
                            break;
                        }
                    },
                    None => audio.samples.clone(),
                };
                if !converted.is_empty() && !buffer.push(&converted, frame.end_seconds()) {
                    break;
                }
            }
            tracing::debug!("feeder exited");
        })
        .context("spawn feeder thread")
}

/// Build a CPAL output stream draining `buffer`.
///
/// Missing audio is written as silence and counted in `underruns`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    buffer: &Arc<OutputBuffer>,
    underruns: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, buffer, underruns),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, buffer, underruns),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, buffer, underruns),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, buffer, underruns),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: &Arc<OutputBuffer>,
    underruns: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let src_channels = buffer.channels();
    let buffer = buffer.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / dst_channels.max(1);
            scratch.clear();
            let got = buffer.pop_into(&mut scratch, frames * src_channels) / src_channels;
            if got < frames {
                underruns.fetch_add(1, Ordering::Relaxed);
            }
            for frame in 0..frames {
                for ch in 0..dst_channels {
                    let sample = if frame < got {
                        map_channel(&scratch[frame * src_channels..], src_channels, dst_channels, ch)
                    } else {
                        0.0
                    };
                    data[frame * dst_channels + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        |err| tracing::warn!("stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

/// Output sample for `dst_ch` from one interleaved source frame.
///
/// Mono is duplicated, stereo folds to mono by averaging, other layouts clamp
/// to the last available channel.
fn map_channel(src: &[f32], src_channels: usize, dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src_channels, dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        _ => get(dst_ch.min(src_channels.saturating_sub(1))),
    }
}
