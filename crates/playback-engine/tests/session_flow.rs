mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{AUDIO_ID, MockEngine, VIDEO_ID, wait_until};
use playback_engine::demux::OpenOptions;
use playback_engine::error::{EngineError, OpenStage};
use playback_engine::{EngineConfig, EngineEvent, EventSink, MediaPlayer};
use playback_types::{LoadState, PlaybackEndReason, PlaybackState};

const TIMEOUT: Duration = Duration::from_secs(5);

fn player(engine: MockEngine, config: EngineConfig) -> MediaPlayer {
    MediaPlayer::new(
        Arc::new(engine),
        "mock://clip",
        OpenOptions::default(),
        config,
        EventSink::disabled(),
    )
}

fn start(player: &MediaPlayer) {
    player.prepare_to_play().unwrap();
    assert!(wait_until(TIMEOUT, || player.load_state() == LoadState::Playable));
    player.play();
}

fn next_audio(player: &MediaPlayer) -> i64 {
    let mut position = None;
    assert!(wait_until(TIMEOUT, || {
        position = player.get_audio_frame().map(|f| f.position);
        position.is_some()
    }));
    position.unwrap()
}

#[test]
fn opens_buffers_and_delivers_audio_in_order() {
    let (events, rx) = EventSink::channel();
    let player = MediaPlayer::new(
        Arc::new(MockEngine::audio(2_000)),
        "mock://clip",
        OpenOptions::default(),
        EngineConfig::default(),
        events,
    );
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert!(player.get_audio_frame().is_none());

    start(&player);
    assert_eq!(player.playback_state(), PlaybackState::Playing);
    assert_eq!(player.duration(), 2.0);

    let positions: Vec<i64> = (0..5).map(|_| next_audio(&player)).collect();
    assert_eq!(positions, vec![0, 100, 200, 300, 400]);

    let opened = rx
        .iter()
        .find_map(|e| match e {
            EngineEvent::Opened { tracks, duration } => Some((tracks, duration)),
            _ => None,
        })
        .unwrap();
    assert_eq!(opened.0.len(), 1);
    assert_eq!(opened.0[0].id, AUDIO_ID);
    assert_eq!(opened.1, 2.0);
}

#[test]
fn plays_to_the_end_and_reports_eof() {
    let player = player(MockEngine::audio(500), EngineConfig::default());
    start(&player);
    let mut positions = Vec::new();
    assert!(wait_until(TIMEOUT, || {
        if let Some(frame) = player.get_audio_frame() {
            positions.push(frame.position);
        }
        player.playback_state() == PlaybackState::Finished
    }));
    assert_eq!(positions, vec![0, 100, 200, 300, 400]);
    assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Eof));
}

#[test]
fn accurate_seek_discards_pre_roll() {
    let mut engine = MockEngine::audio(10_000);
    engine.keyframe_ms = 2_000;
    let config = EngineConfig {
        accurate_seek: true,
        ..EngineConfig::default()
    };
    let player = player(engine, config);
    start(&player);
    next_audio(&player);

    let (tx, rx) = crossbeam_channel::bounded(1);
    player.seek(
        5.0,
        Some(Box::new(move |ok: bool| {
            let _ = tx.send(ok);
        })),
    );
    assert_eq!(rx.recv_timeout(TIMEOUT), Ok(true));
    assert!(wait_until(TIMEOUT, || player.playback_state() == PlaybackState::Playing));

    // The demuxer landed on the 4 s keyframe; nothing before 5 s is shown.
    assert_eq!(next_audio(&player), 5_000);
    assert_eq!(next_audio(&player), 5_100);
}

#[test]
fn inaccurate_seek_starts_at_keyframe() {
    let mut engine = MockEngine::audio(10_000);
    engine.keyframe_ms = 2_000;
    let player = player(engine, EngineConfig::default());
    start(&player);

    let (tx, rx) = crossbeam_channel::bounded(1);
    player.seek(
        5.0,
        Some(Box::new(move |ok: bool| {
            let _ = tx.send(ok);
        })),
    );
    assert_eq!(rx.recv_timeout(TIMEOUT), Ok(true));
    assert_eq!(next_audio(&player), 4_000);
}

#[test]
fn seek_before_prepare_completes_unsuccessfully() {
    let player = player(MockEngine::audio(1_000), EngineConfig::default());
    let (tx, rx) = crossbeam_channel::bounded(1);
    player.seek(
        0.5,
        Some(Box::new(move |ok: bool| {
            let _ = tx.send(ok);
        })),
    );
    assert_eq!(rx.recv_timeout(TIMEOUT), Ok(false));
    assert_eq!(player.playback_state(), PlaybackState::Idle);
}

#[test]
fn looping_keeps_positions_increasing() {
    let config = EngineConfig {
        loop_playback: true,
        ..EngineConfig::default()
    };
    let player = player(MockEngine::audio(1_000), config);
    start(&player);

    let positions: Vec<i64> = (0..25).map(|_| next_audio(&player)).collect();
    let expected: Vec<i64> = (0..25).map(|i| i * 100).collect();
    assert_eq!(positions, expected);
    assert_eq!(player.playback_state(), PlaybackState::Playing);
}

#[test]
fn video_frames_follow_the_audio_clock() {
    let player = player(MockEngine::audio(2_000).with_video(), EngineConfig::default());
    start(&player);
    assert_eq!(player.tracks().len(), 2);

    let mut frame = None;
    assert!(wait_until(TIMEOUT, || {
        frame = player.get_video_frame(false);
        frame.is_some()
    }));
    let frame = frame.unwrap();
    assert_eq!(frame.track_id, VIDEO_ID);
    assert_eq!(frame.position, 0);

    // 1.5 s of audio played: stale video is dropped, the due frame shown.
    player.set_audio_time(1.5);
    let mut shown = None;
    assert!(wait_until(TIMEOUT, || {
        shown = player.get_video_frame(false);
        shown.is_some()
    }));
    let shown = shown.unwrap();
    assert!(shown.seconds() <= 1.5);
    assert!(shown.seconds() > 1.05, "shown {}", shown.seconds());
}

#[test]
fn forced_video_frame_is_available_while_paused() {
    let player = player(MockEngine::audio(1_000).with_video(), EngineConfig::default());
    player.prepare_to_play().unwrap();
    assert!(wait_until(TIMEOUT, || player.load_state() == LoadState::Playable));
    assert_eq!(player.playback_state(), PlaybackState::Paused);
    assert!(player.get_video_frame(false).is_none());
    let mut frame = None;
    assert!(wait_until(TIMEOUT, || {
        frame = player.get_video_frame(true);
        frame.is_some()
    }));
    assert_eq!(frame.unwrap().position, 0);
}

#[test]
fn open_failure_stops_with_error() {
    let player = player(MockEngine::failing(), EngineConfig::default());
    player.prepare_to_play().unwrap();
    assert!(wait_until(TIMEOUT, || player.playback_state() == PlaybackState::Stopped));
    assert!(matches!(
        player.error(),
        Some(EngineError::Open {
            stage: OpenStage::OpenInput,
            ..
        })
    ));
    let status = player.status();
    assert_eq!(status.end_reason, Some(PlaybackEndReason::Error));
    assert!(status.error.unwrap().contains("mock://clip"));
}

#[test]
fn shutdown_is_idempotent_and_closes_once() {
    let engine = MockEngine::audio(5_000);
    let closes = engine.closes.clone();
    let player = player(engine, EngineConfig::default());
    start(&player);

    player.shutdown();
    player.shutdown();
    assert_eq!(player.playback_state(), PlaybackState::Stopped);
    assert_eq!(player.status().end_reason, Some(PlaybackEndReason::Stopped));
    assert!(wait_until(TIMEOUT, || closes.load(Ordering::SeqCst) == 1));
    assert_eq!(player.prepare_to_play(), Err(EngineError::Closed));
    assert!(player.get_audio_frame().is_none());

    drop(player);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn replace_switches_media() {
    let engine = MockEngine::audio(3_000);
    let opens = engine.opens.clone();
    let closes = engine.closes.clone();
    let player = player(engine, EngineConfig::default());
    start(&player);
    next_audio(&player);

    player.replace("mock://other", OpenOptions::default());
    assert!(wait_until(TIMEOUT, || closes.load(Ordering::SeqCst) == 1));
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert_eq!(player.status().url.as_deref(), Some("mock://other"));

    start(&player);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(next_audio(&player), 0);
}
