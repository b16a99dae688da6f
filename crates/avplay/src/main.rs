//! avplay: play a local media file through the playback engine.
//!
//! ## Pipeline
//! 1. **Engine**: the player's reading thread demuxes with Symphonia and feeds
//!    per-track decode pipelines.
//! 2. **Feeder**: a background thread pulls due audio frames from the player,
//!    resamples them with Rubato when the device rate differs, and queues them.
//! 3. **Output**: the CPAL callback drains the queue and the media time it
//!    reaches drives the player clock.

mod cli;
mod device;
mod output;
mod resample;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use playback_engine::demux::OpenOptions;
use playback_engine::track::{MediaKind, Track};
use playback_engine::{EngineConfig, EngineEvent, EventSink, MediaPlayer, SymphoniaEngine};
use playback_types::PlaybackState;
use tracing_subscriber::EnvFilter;

use output::OutputBuffer;
use resample::StreamResampler;

/// How long a finished session may take to drain the device buffer.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playback_engine=info,avplay=info")
        }))
        .init();
    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }

    let Some(cli::Command::Play {
        path,
        start,
        loop_playback,
        accurate_seek,
        sync_decode,
        format,
    }) = &args.cmd
    else {
        bail!("nothing to play; try `avplay play <path>`");
    };

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.loop_playback |= *loop_playback;
    config.accurate_seek |= *accurate_seek;
    if *sync_decode {
        config.sync_decode_audio = true;
        config.sync_decode_video = true;
    }
    let options = OpenOptions {
        format_hint: format.clone(),
        track_selector: None,
        start_seconds: *start,
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    let device = device::pick_device(&host, args.device.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");
    play_file(&device, &args, path, options, config, &stop)
}

fn play_file(
    device: &cpal::Device,
    args: &cli::Args,
    path: &Path,
    options: OpenOptions,
    config: EngineConfig,
    stop: &Arc<AtomicBool>,
) -> Result<()> {
    let (events, rx) = EventSink::channel();
    let url = path.to_string_lossy().into_owned();
    let player = Arc::new(MediaPlayer::new(
        Arc::new(SymphoniaEngine),
        url.clone(),
        options,
        config,
        events,
    ));
    player.prepare_to_play()?;
    let audio = wait_for_audio_track(&rx, stop)?;
    let src_rate = audio
        .codec_params
        .sample_rate
        .context("audio track has no sample rate")?;
    let src_channels = audio.codec_params.channels.unwrap_or(2).max(1) as usize;

    let supported = device::pick_output_config(device, Some(src_rate))?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = size;
    }
    let dst_rate = stream_config.sample_rate;
    tracing::info!(
        url = %url,
        codec = audio.codec_params.codec.as_deref().unwrap_or("unknown"),
        src_rate,
        dst_rate,
        src_channels,
        dst_channels = stream_config.channels,
        format = ?supported.sample_format(),
        "starting playback"
    );

    let buffer = Arc::new(OutputBuffer::new(
        src_channels,
        dst_rate,
        args.output_buffer_seconds,
    ));
    let resampler = if src_rate != dst_rate {
        Some(StreamResampler::new(
            src_rate,
            dst_rate,
            src_channels,
            args.chunk_frames,
        )?)
    } else {
        None
    };
    let feeder = output::spawn_feeder(player.clone(), buffer.clone(), resampler, stop.clone())?;
    let underruns = Arc::new(AtomicU64::new(0));
    let stream = output::build_output_stream(
        device,
        &stream_config,
        supported.sample_format(),
        &buffer,
        underruns.clone(),
    )?;
    stream.play()?;
    player.play();

    let result = run_until_done(&player, &rx, &buffer, stop, args, &underruns);

    stop.store(true, Ordering::SeqCst);
    buffer.close();
    if feeder.join().is_err() {
        tracing::warn!("feeder thread panicked");
    }
    drop(stream);
    player.shutdown();
    result
}

/// Block until the source reports its tracks.
fn wait_for_audio_track(rx: &Receiver<EngineEvent>, stop: &AtomicBool) -> Result<Track> {
    loop {
        if stop.load(Ordering::SeqCst) {
            bail!("interrupted while opening");
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineEvent::Opened { tracks, duration }) => {
                tracing::debug!(tracks = tracks.len(), duration, "media opened");
                return tracks
                    .into_iter()
                    .find(|t| t.kind == MediaKind::Audio && t.enabled)
                    .context("media has no audio track");
            }
            Ok(EngineEvent::Error(e)) => return Err(anyhow::Error::new(e).context("open media")),
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("engine event channel closed"),
        }
    }
}

fn run_until_done(
    player: &MediaPlayer,
    rx: &Receiver<EngineEvent>,
    buffer: &OutputBuffer,
    stop: &AtomicBool,
    args: &cli::Args,
    underruns: &AtomicU64,
) -> Result<()> {
    let interval = (args.status_interval_ms > 0).then(|| Duration::from_millis(args.status_interval_ms));
    let mut last_status = Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::info!("interrupted");
            return Ok(());
        }
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        match player.playback_state() {
            PlaybackState::Finished => {
                let deadline = Instant::now() + DRAIN_TIMEOUT;
                while !buffer.is_empty() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(20));
                }
                tracing::info!("playback finished");
                return Ok(());
            }
            PlaybackState::Stopped => {
                return match player.error() {
                    Some(e) => Err(anyhow!(e).context("playback failed")),
                    None => Ok(()),
                };
            }
            _ => {}
        }

        if let Some(interval) = interval {
            if last_status.elapsed() >= interval {
                report_status(player, args.json_status, underruns.load(Ordering::Relaxed))?;
                last_status = Instant::now();
            }
        }
    }
}

fn report_status(player: &MediaPlayer, json: bool, underruns: u64) -> Result<()> {
    let status = player.status();
    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }
    tracing::info!(
        state = ?status.playback_state,
        load = ?status.load_state,
        position = %format!("{:.1}", status.current_seconds),
        duration = %format!("{:.1}", status.duration_seconds),
        buffered = %format!("{:.1}", status.loaded_seconds),
        progress = status.buffering_progress,
        underruns,
        "status"
    );
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(state) => tracing::debug!(%state, "source state"),
        EngineEvent::Opened { tracks, duration } => {
            tracing::debug!(tracks = tracks.len(), duration, "opened")
        }
        EngineEvent::LoadingChanged(loading) => {
            tracing::trace!(progress = loading.progress(), playable = loading.is_playable, "loading")
        }
        EngineEvent::SeekCompleted { seconds, success } => {
            tracing::info!(seconds, success, "seek completed")
        }
        EngineEvent::TrackFailed { track_id, error } => {
            tracing::warn!(track_id, "track failed: {error}")
        }
        EngineEvent::TrackFinished { track_id } => tracing::debug!(track_id, "track finished"),
        EngineEvent::LoopRestarted { iteration } => tracing::info!(iteration, "loop restarted"),
        EngineEvent::BitrateSwitched { from, to } => tracing::info!(from, to, "bitrate switched"),
        EngineEvent::Error(e) => tracing::error!("engine error: {e}"),
    }
}
