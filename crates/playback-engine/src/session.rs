//! Public playback session.
//!
//! [`MediaPlayer`] wraps one [`Source`] at a time and exposes the pull API the
//! renderers call from their own threads: audio pulls the next frame, video
//! pulls the frame due at the master clock.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use playback_types::{LoadState, PlaybackEndReason, PlaybackState, PlaybackStatus, TrackStatus};

use crate::config::EngineConfig;
use crate::demux::{DemuxEngine, OpenOptions};
use crate::error::EngineError;
use crate::events::EventSink;
use crate::frame::Frame;
use crate::source::{SeekCompletion, Source, SourceState};
use crate::sync::{PlaybackClock, SyncController, SyncDecision};
use crate::track::{MediaKind, Track};

struct Session {
    url: String,
    source: Arc<Source>,
    playback_state: PlaybackState,
    /// State to return to once a seek completes.
    resume_state: PlaybackState,
    end_reason: Option<PlaybackEndReason>,
    error: Option<EngineError>,
    clock: PlaybackClock,
    /// Clock to fall back to if the pending seek fails.
    pre_seek_clock: Option<PlaybackClock>,
    /// Bumped per seek; only the latest seek's completion updates the session.
    seek_serial: u64,
    sync: SyncController,
}

impl Session {
    fn new(
        engine: &Arc<dyn DemuxEngine>,
        url: String,
        options: OpenOptions,
        config: &EngineConfig,
        events: &EventSink,
    ) -> Self {
        let source = Arc::new(Source::new(
            engine.clone(),
            url.clone(),
            options,
            config.clone(),
            events.clone(),
        ));
        Self {
            url,
            source,
            playback_state: PlaybackState::Idle,
            resume_state: PlaybackState::Paused,
            end_reason: None,
            error: None,
            clock: PlaybackClock::new(false),
            pre_seek_clock: None,
            seek_serial: 0,
            sync: SyncController::new(config),
        }
    }

    /// Fold source progress into the playback state and clock.
    fn refresh(&mut self, now: Instant) {
        match self.source.state() {
            SourceState::Failed(error) => {
                if self.end_reason.is_none() {
                    tracing::error!(url = %self.url, "playback failed: {error}");
                    self.playback_state = PlaybackState::Stopped;
                    self.end_reason = Some(PlaybackEndReason::Error);
                    self.error = Some(error);
                    self.clock.pause(now);
                }
                return;
            }
            SourceState::Finished
                if matches!(
                    self.playback_state,
                    PlaybackState::Playing | PlaybackState::Paused
                ) =>
            {
                let drained = self
                    .source
                    .pipelines()
                    .iter()
                    .filter(|p| p.is_enabled() && p.kind() != MediaKind::Subtitle)
                    .all(|p| p.is_drained());
                if drained {
                    tracing::info!(url = %self.url, "playback finished");
                    self.playback_state = PlaybackState::Finished;
                    self.end_reason = Some(PlaybackEndReason::Eof);
                    self.clock.pause(now);
                    return;
                }
            }
            _ => {}
        }

        self.clock
            .set_audio_driven(self.source.pipeline(MediaKind::Audio).is_some());
        let running = self.playback_state == PlaybackState::Playing
            && self.source.load_state() == LoadState::Playable;
        if running {
            self.clock.run(now);
        } else {
            self.clock.pause(now);
        }
    }

    fn can_render(&self) -> bool {
        self.playback_state == PlaybackState::Playing
            && self.source.load_state() == LoadState::Playable
    }

    fn current_time(&self, now: Instant) -> f64 {
        let time = self.clock.time(now);
        let duration = self.source.duration();
        if self.source.config().loop_playback && duration > 0.0 {
            time % duration
        } else {
            time
        }
    }
}

/// A playback session over one media URL at a time.
pub struct MediaPlayer {
    engine: Arc<dyn DemuxEngine>,
    config: EngineConfig,
    events: EventSink,
    session: Arc<Mutex<Session>>,
}

impl MediaPlayer {
    pub fn new(
        engine: Arc<dyn DemuxEngine>,
        url: impl Into<String>,
        options: OpenOptions,
        config: EngineConfig,
        events: EventSink,
    ) -> Self {
        let session = Session::new(&engine, url.into(), options, &config, &events);
        Self {
            engine,
            config,
            events,
            session: Arc::new(Mutex::new(session)),
        }
    }

    fn source(&self) -> Arc<Source> {
        self.session.lock().source.clone()
    }

    /// Open the media and start buffering; playback starts with [`play`](Self::play).
    pub fn prepare_to_play(&self) -> Result<(), EngineError> {
        let source = {
            let mut s = self.session.lock();
            if s.playback_state == PlaybackState::Stopped {
                return Err(EngineError::Closed);
            }
            if s.playback_state == PlaybackState::Idle {
                s.playback_state = PlaybackState::Paused;
            }
            s.source.clone()
        };
        source.prepare()
    }

    pub fn play(&self) {
        let restart = {
            let mut s = self.session.lock();
            match s.playback_state {
                PlaybackState::Stopped => return,
                PlaybackState::Seeking => {
                    s.resume_state = PlaybackState::Playing;
                    false
                }
                PlaybackState::Finished => {
                    s.playback_state = PlaybackState::Playing;
                    s.end_reason = None;
                    true
                }
                _ => {
                    s.playback_state = PlaybackState::Playing;
                    s.refresh(Instant::now());
                    false
                }
            }
        };
        if restart {
            self.seek(0.0, None);
        }
    }

    pub fn pause(&self) {
        let mut s = self.session.lock();
        match s.playback_state {
            PlaybackState::Playing => {
                s.playback_state = PlaybackState::Paused;
                s.clock.pause(Instant::now());
            }
            PlaybackState::Seeking => s.resume_state = PlaybackState::Paused,
            _ => {}
        }
    }

    /// Seek to `seconds`; `completion` runs with the outcome on the reading thread.
    pub fn seek(&self, seconds: f64, completion: Option<SeekCompletion>) {
        let (source, serial, target) = {
            let mut s = self.session.lock();
            if matches!(s.playback_state, PlaybackState::Stopped | PlaybackState::Idle) {
                drop(s);
                if let Some(completion) = completion {
                    completion(false);
                }
                return;
            }
            let now = Instant::now();
            if s.playback_state != PlaybackState::Seeking {
                s.resume_state = match s.playback_state {
                    PlaybackState::Playing | PlaybackState::Finished => PlaybackState::Playing,
                    _ => PlaybackState::Paused,
                };
                let mut saved = s.clock.clone();
                saved.pause(now);
                s.pre_seek_clock = Some(saved);
            }
            s.playback_state = PlaybackState::Seeking;
            s.end_reason = None;
            s.seek_serial += 1;
            let target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
            s.clock.reset_to(target, now);
            s.sync.reset();
            (s.source.clone(), s.seek_serial, target)
        };

        let session = Arc::downgrade(&self.session);
        let source_for_completion = Arc::downgrade(&source);
        let accurate = self.config.accurate_seek;
        source.seek(
            seconds,
            accurate,
            Some(Box::new(move |success: bool| {
                if let (Some(session), Some(source)) =
                    (session.upgrade(), source_for_completion.upgrade())
                {
                    let mut s = session.lock();
                    let current = Arc::ptr_eq(&s.source, &source);
                    if current && s.seek_serial != serial && success {
                        // An earlier seek of the chain moved the stream; a later
                        // failure falls back to its target.
                        if let Some(clock) = s.pre_seek_clock.as_mut() {
                            clock.reset_to(target, Instant::now());
                        }
                    }
                    // A replaced source or a superseded seek must not touch the session.
                    if current
                        && s.seek_serial == serial
                        && s.playback_state == PlaybackState::Seeking
                    {
                        let saved = s.pre_seek_clock.take();
                        if !success {
                            if let Some(clock) = saved {
                                s.clock = clock;
                            }
                        }
                        s.playback_state = s.resume_state;
                        s.refresh(Instant::now());
                    }
                }
                if let Some(completion) = completion {
                    completion(success);
                }
            })),
        );
    }

    /// Switch to another track; see [`Source::select_track`].
    pub fn select_track(&self, track_id: i32) -> bool {
        let source = {
            let mut s = self.session.lock();
            let now = Instant::now();
            let time = s.clock.time(now);
            s.source.set_current_time(time);
            s.sync.reset();
            s.source.clone()
        };
        source.select_track(track_id)
    }

    /// Close the current media and switch to `url`. Call
    /// [`prepare_to_play`](Self::prepare_to_play) to open it.
    pub fn replace(&self, url: impl Into<String>, options: OpenOptions) {
        let url = url.into();
        let fresh = Session::new(&self.engine, url.clone(), options, &self.config, &self.events);
        let old = {
            let mut s = self.session.lock();
            std::mem::replace(&mut *s, fresh)
        };
        tracing::info!(from = %old.url, to = %url, "media replaced");
        old.source.shutdown();
    }

    /// Stop playback and release the source. Idempotent.
    pub fn shutdown(&self) {
        let source = {
            let mut s = self.session.lock();
            if s.playback_state != PlaybackState::Stopped {
                s.playback_state = PlaybackState::Stopped;
                s.end_reason.get_or_insert(PlaybackEndReason::Stopped);
                s.clock.pause(Instant::now());
            }
            s.source.clone()
        };
        source.shutdown();
    }

    /// Current playback position in seconds.
    pub fn current_time(&self) -> f64 {
        let mut s = self.session.lock();
        let now = Instant::now();
        s.refresh(now);
        s.current_time(now)
    }

    pub fn duration(&self) -> f64 {
        self.source().duration()
    }

    pub fn buffering_progress(&self) -> u8 {
        self.source().loading_state().progress()
    }

    pub fn load_state(&self) -> LoadState {
        self.source().load_state()
    }

    pub fn playback_state(&self) -> PlaybackState {
        let mut s = self.session.lock();
        s.refresh(Instant::now());
        s.playback_state
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.source().tracks()
    }

    /// Last fatal error of the current media, if any.
    pub fn error(&self) -> Option<EngineError> {
        let mut s = self.session.lock();
        s.refresh(Instant::now());
        s.error.clone()
    }

    /// Next audio frame, if playing and buffered.
    pub fn get_audio_frame(&self) -> Option<Frame> {
        let source = {
            let mut s = self.session.lock();
            s.refresh(Instant::now());
            if !s.can_render() {
                return None;
            }
            s.source.clone()
        };
        source.pipeline(MediaKind::Audio)?.frames().pop(false, None)
    }

    /// The video frame due now.
    ///
    /// Frames behind the clock are dropped; when video lags hopelessly the
    /// queue is flushed and decoding skips ahead to the clock. `force` bypasses
    /// both the clock and the playing/buffered gate (e.g. to show a frame
    /// while paused).
    pub fn get_video_frame(&self, force: bool) -> Option<Frame> {
        let mut s = self.session.lock();
        let now = Instant::now();
        s.refresh(now);
        let video = s.source.pipeline(MediaKind::Video)?;
        if force {
            drop(s);
            return video.frames().pop(false, None);
        }
        if !s.can_render() {
            return None;
        }

        let clock = s.clock.time(now);
        let due = |frame: &Frame| frame.seconds() <= clock;
        while let Some(frame) = video.frames().pop(false, Some(&due)) {
            match s.sync.decide(clock, frame.seconds()) {
                SyncDecision::Show => return Some(frame),
                SyncDecision::Drop => {
                    tracing::trace!(seconds = frame.seconds(), clock, "video frame dropped");
                }
                SyncDecision::Seek => {
                    tracing::debug!(clock, "video behind clock; skipping ahead");
                    video.frames().flush();
                    video.set_seek_time(clock);
                    return None;
                }
            }
        }
        None
    }

    /// Presentation time of the audio the renderer just played.
    pub fn set_audio_time(&self, seconds: f64) {
        let source = {
            let mut s = self.session.lock();
            s.clock.set_audio_time(seconds);
            s.source.clone()
        };
        source.set_current_time(seconds);
    }

    /// Presentation time of the video frame the renderer just showed.
    pub fn set_video_time(&self, seconds: f64) {
        let source = {
            let s = self.session.lock();
            if s.clock.is_audio_driven() {
                return;
            }
            s.source.clone()
        };
        source.set_current_time(seconds);
    }

    /// Serializable snapshot of the session.
    pub fn status(&self) -> PlaybackStatus {
        let (url, playback_state, current_seconds, error, end_reason, source) = {
            let mut s = self.session.lock();
            let now = Instant::now();
            s.refresh(now);
            (
                s.url.clone(),
                s.playback_state,
                s.current_time(now),
                s.error.as_ref().map(|e| e.to_string()),
                s.end_reason,
                s.source.clone(),
            )
        };
        let loading = source.loading_state();
        let tracks = source
            .pipelines()
            .iter()
            .map(|p| {
                let load = p.load();
                let track = p.track();
                TrackStatus {
                    id: track.id,
                    kind: track.kind,
                    bit_rate: track.bit_rate,
                    enabled: p.is_enabled(),
                    state: format!("{:?}", p.state()).to_lowercase(),
                    packet_count: load.packet_count,
                    frame_count: load.frame_count,
                    loop_pending: p.is_loop_model(),
                    language: track.language.clone(),
                }
            })
            .collect();

        PlaybackStatus {
            url: Some(url),
            playback_state,
            load_state: source.load_state(),
            current_seconds,
            duration_seconds: source.duration(),
            loaded_seconds: loading.loaded_time,
            buffering_progress: loading.progress(),
            tracks,
            error,
            end_reason,
        }
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
