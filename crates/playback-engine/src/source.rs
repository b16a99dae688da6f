//! Reading loop.
//!
//! A [`Source`] owns the demux handle on its own reading thread, fans packets
//! out to one [`DecodePipeline`] per track, and drives open/seek/loop/close.
//! Other threads talk to the reading thread through the status lock and its
//! condition variable; they never touch the handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffering::{BufferingPolicy, LoadingState, ReadingAction, TrackLoad};
use crate::config::EngineConfig;
use crate::demux::{DemuxEngine, DemuxHandle, Interrupt, OpenOptions, ReadOutcome, SeekFlags};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::frame::Packet;
use crate::pipeline::{DecodePipeline, PipelineState};
use crate::sync::{AdaptationState, SyncController};
use crate::track::{MediaKind, ProbedTrack, Track, TrackCandidate, TrackSelector, choose_track};
use playback_types::LoadState;

/// How often a paused or finished reading thread re-evaluates buffering.
const RECHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of a [`Source`].
#[derive(Clone, Debug, PartialEq)]
pub enum SourceState {
    Idle,
    Opening,
    Opened,
    Reading,
    Seeking,
    /// Reading suspended because enough is buffered.
    Paused,
    Finished,
    Closed,
    Failed(EngineError),
}

impl SourceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceState::Closed | SourceState::Failed(_))
    }

    /// States in which in-flight engine I/O is aborted.
    fn interrupts_io(&self) -> bool {
        matches!(
            self,
            SourceState::Finished | SourceState::Closed | SourceState::Failed(_)
        )
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Idle => f.write_str("idle"),
            SourceState::Opening => f.write_str("opening"),
            SourceState::Opened => f.write_str("opened"),
            SourceState::Reading => f.write_str("reading"),
            SourceState::Seeking => f.write_str("seeking"),
            SourceState::Paused => f.write_str("paused"),
            SourceState::Finished => f.write_str("finished"),
            SourceState::Closed => f.write_str("closed"),
            SourceState::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Called once with the outcome of a seek.
pub type SeekCompletion = Box<dyn FnOnce(bool) + Send>;

struct PendingSeek {
    seconds: f64,
    accurate: bool,
    completion: Option<SeekCompletion>,
}

impl PendingSeek {
    fn complete(self, success: bool) {
        if let Some(completion) = self.completion {
            completion(success);
        }
    }
}

struct Status {
    state: SourceState,
    duration: f64,
    loading: LoadingState,
    load_state: LoadState,
    is_first: bool,
    is_seek: bool,
    /// Single slot: a newer request supersedes the pending one.
    pending_seek: Option<PendingSeek>,
    abr: Option<AdaptationState>,
    /// Latest playback position reported by the session.
    current_time: f64,
    loop_iteration: u32,
}

struct Shared {
    url: String,
    options: OpenOptions,
    config: EngineConfig,
    engine: Arc<dyn DemuxEngine>,
    events: EventSink,
    interrupt: Interrupt,
    policy: BufferingPolicy,
    sync: SyncController,
    status: Mutex<Status>,
    changed: Condvar,
    pipelines: Mutex<Vec<Arc<DecodePipeline>>>,
}

/// One open media resource and its reading thread.
pub struct Source {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Source {
    pub fn new(
        engine: Arc<dyn DemuxEngine>,
        url: impl Into<String>,
        options: OpenOptions,
        config: EngineConfig,
        events: EventSink,
    ) -> Self {
        let shared = Arc::new(Shared {
            url: url.into(),
            options,
            policy: BufferingPolicy::from_config(&config),
            sync: SyncController::new(&config),
            config,
            engine,
            events,
            interrupt: Interrupt::new(),
            status: Mutex::new(Status {
                state: SourceState::Idle,
                duration: 0.0,
                loading: LoadingState::default(),
                load_state: LoadState::Idle,
                is_first: true,
                is_seek: false,
                pending_seek: None,
                abr: None,
                current_time: 0.0,
                loop_iteration: 0,
            }),
            changed: Condvar::new(),
            pipelines: Mutex::new(Vec::new()),
        });
        Self {
            shared,
            reader: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Open the resource on a new reading thread. A no-op unless idle.
    pub fn prepare(&self) -> Result<(), EngineError> {
        {
            let mut st = self.shared.status.lock();
            if st.state != SourceState::Idle {
                return Ok(());
            }
            self.shared.set_state(&mut st, SourceState::Opening);
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("source-reader".to_string())
            .spawn(move || read_thread_main(shared));
        match spawned {
            Ok(handle) => {
                *self.reader.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let error = EngineError::open(crate::error::OpenStage::Allocate, e);
                self.shared.fail(error.clone());
                Err(error)
            }
        }
    }

    pub fn state(&self) -> SourceState {
        self.shared.status.lock().state.clone()
    }

    pub fn duration(&self) -> f64 {
        self.shared.status.lock().duration
    }

    pub fn loading_state(&self) -> LoadingState {
        self.shared.status.lock().loading
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.status.lock().load_state
    }

    pub fn loop_iteration(&self) -> u32 {
        self.shared.status.lock().loop_iteration
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Every track, with its current enabled flag.
    pub fn tracks(&self) -> Vec<Track> {
        self.pipelines()
            .iter()
            .map(|p| {
                let mut track = p.track().clone();
                track.enabled = p.is_enabled();
                track
            })
            .collect()
    }

    pub fn pipelines(&self) -> Vec<Arc<DecodePipeline>> {
        self.shared.pipelines.lock().clone()
    }

    /// The enabled pipeline of `kind`.
    pub fn pipeline(&self, kind: MediaKind) -> Option<Arc<DecodePipeline>> {
        self.shared
            .pipelines
            .lock()
            .iter()
            .find(|p| p.kind() == kind && p.is_enabled())
            .cloned()
    }

    /// Latest playback position, used to re-seek after a track switch.
    pub fn set_current_time(&self, seconds: f64) {
        self.shared.status.lock().current_time = seconds;
    }

    /// Request a seek; `completion` runs on the reading thread.
    ///
    /// A request still pending when a new one arrives completes with `false`.
    pub fn seek(&self, seconds: f64, accurate: bool, completion: Option<SeekCompletion>) {
        self.shared.request_seek(PendingSeek {
            seconds,
            accurate,
            completion,
        });
    }

    /// Switch to `track_id`. Audio/video replace the enabled track of their
    /// kind and re-seek to the current time; subtitles toggle.
    ///
    /// Returns whether anything changed.
    pub fn select_track(&self, track_id: i32) -> bool {
        let pipelines = self.pipelines();
        let Some(target) = pipelines.iter().find(|p| p.id() == track_id) else {
            tracing::warn!(track_id, "select_track: unknown track");
            return false;
        };
        if target.kind() == MediaKind::Subtitle {
            let enabled = !target.is_enabled();
            target.set_enabled(enabled);
            tracing::info!(track_id, enabled, "subtitle track toggled");
            return true;
        }
        if target.is_enabled() {
            return false;
        }
        for p in pipelines.iter().filter(|p| p.kind() == target.kind()) {
            p.set_enabled(p.id() == track_id);
        }
        let current_time = {
            let mut st = self.shared.status.lock();
            if let Some(abr) = st.abr.as_mut() {
                if target.kind() == MediaKind::Video {
                    abr.record(target.track().bit_rate, Instant::now());
                }
            }
            st.current_time
        };
        tracing::info!(track_id, kind = ?target.kind(), "track selected");
        self.seek(current_time, true, None);
        true
    }

    /// Re-run the buffering policy; safe from any thread.
    pub fn check_buffering(&self) {
        self.shared.check_buffering();
    }

    /// Close the source. Idempotent; safe from any thread, including the
    /// reading thread itself.
    pub fn shutdown(&self) {
        let pending = {
            let mut st = self.shared.status.lock();
            if !st.state.is_terminal() {
                self.shared.set_state(&mut st, SourceState::Closed);
            }
            st.pending_seek.take()
        };
        self.shared.interrupt.set();
        self.shared.changed.notify_all();
        if let Some(seek) = pending {
            seek.complete(false);
        }

        for pipeline in self.pipelines() {
            pipeline.shutdown();
        }

        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("reading thread panicked");
            }
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Step {
    Exit,
    Seek { seek: PendingSeek, prior: SourceState },
    Recheck,
    Read,
}

impl Shared {
    fn set_state(&self, st: &mut Status, state: SourceState) {
        if st.state == state {
            return;
        }
        tracing::debug!(from = %st.state, to = %state, "source state");
        if state.interrupts_io() {
            self.interrupt.set();
        }
        st.state = state.clone();
        self.events.emit(EngineEvent::StateChanged(state));
        self.changed.notify_all();
    }

    fn fail(&self, error: EngineError) {
        {
            let mut st = self.status.lock();
            if st.state.is_terminal() {
                return;
            }
            self.set_state(&mut st, SourceState::Failed(error.clone()));
        }
        tracing::error!(url = %self.url, "source failed: {error}");
        self.events.emit(EngineEvent::Error(error));
    }

    fn request_seek(&self, seek: PendingSeek) {
        let superseded = {
            let mut st = self.status.lock();
            if matches!(st.state, SourceState::Idle) || st.state.is_terminal() {
                drop(st);
                tracing::debug!(seconds = seek.seconds, "seek ignored; source not running");
                seek.complete(false);
                return;
            }
            st.pending_seek.replace(seek)
        };
        if let Some(old) = superseded {
            tracing::debug!(seconds = old.seconds, "pending seek superseded");
            old.complete(false);
        }
        // A synchronous pipeline may hold the reading thread on a full frame
        // queue. Frames stay queued until the seek actually succeeds.
        for pipeline in self.pipelines.lock().iter() {
            pipeline.release_writer();
        }
        self.changed.notify_all();
    }

    fn enabled_pipelines(&self) -> Vec<Arc<DecodePipeline>> {
        self.pipelines
            .lock()
            .iter()
            .filter(|p| p.is_enabled())
            .cloned()
            .collect()
    }

    /// Open the handle, probe it and build the pipelines.
    fn open(&self) -> Result<(Box<dyn DemuxHandle>, Vec<Arc<DecodePipeline>>), EngineError> {
        let mut handle = self
            .engine
            .open(&self.url, &self.options, self.interrupt.clone())?;
        let probed = match handle.probe() {
            Ok(probed) => probed,
            Err(e) => {
                handle.close();
                return Err(e);
            }
        };
        let duration = handle.duration();
        let probed = select_tracks(probed, self.options.track_selector.as_ref());

        let mut pipelines = Vec::with_capacity(probed.len());
        for track in probed {
            let track_id = track.track.id;
            match DecodePipeline::new(track, &self.config, duration, self.events.clone()) {
                Ok(pipeline) => pipelines.push(Arc::new(pipeline)),
                Err(e) => tracing::warn!(track_id, "track skipped: {e}"),
            }
        }
        ensure_one_enabled(&pipelines, MediaKind::Audio);
        ensure_one_enabled(&pipelines, MediaKind::Video);

        if !pipelines
            .iter()
            .any(|p| matches!(p.kind(), MediaKind::Audio | MediaKind::Video))
        {
            handle.close();
            return Err(EngineError::NoTracks);
        }

        let start = self.options.start_seconds;
        if start.is_finite() && start > 0.0 {
            match seek_handle(handle.as_mut(), start) {
                Ok(()) => {
                    let trim = self.config.accurate_seek.then_some(start);
                    for p in &pipelines {
                        p.seek(trim);
                    }
                }
                Err(e) => tracing::warn!(seconds = start, "start position ignored: {e}"),
            }
        }

        let tracks: Vec<Track> = pipelines
            .iter()
            .map(|p| {
                let mut track = p.track().clone();
                track.enabled = p.is_enabled();
                track
            })
            .collect();
        tracing::info!(
            url = %self.url,
            duration,
            tracks = tracks.len(),
            "source opened"
        );

        {
            let mut st = self.status.lock();
            st.duration = duration;
            st.abr = adaptation_state(&self.config, &tracks);
        }
        self.events.emit(EngineEvent::Opened { tracks, duration });
        Ok((handle, pipelines))
    }

    fn next_step(&self) -> Step {
        let mut st = self.status.lock();
        loop {
            if st.state.is_terminal() {
                return Step::Exit;
            }
            if let Some(seek) = st.pending_seek.take() {
                let prior = st.state.clone();
                self.set_state(&mut st, SourceState::Seeking);
                return Step::Seek { seek, prior };
            }
            match st.state {
                SourceState::Opened => {
                    self.set_state(&mut st, SourceState::Reading);
                    return Step::Read;
                }
                SourceState::Paused | SourceState::Finished => {
                    self.changed.wait_for(&mut st, RECHECK_INTERVAL);
                    if st.pending_seek.is_some() || st.state.is_terminal() {
                        continue;
                    }
                    return Step::Recheck;
                }
                _ => return Step::Read,
            }
        }
    }

    fn route(&self, pipelines: &[Arc<DecodePipeline>], packet: Packet) {
        match pipelines.iter().find(|p| p.id() == packet.track_id) {
            Some(pipeline) if pipeline.is_enabled() => pipeline.put_packet(packet),
            Some(_) => {}
            None => tracing::trace!(track_id = packet.track_id, "packet for unknown track"),
        }
    }

    fn on_end_of_file(&self, handle: &mut dyn DemuxHandle, pipelines: &[Arc<DecodePipeline>]) {
        if self.config.loop_playback {
            for p in pipelines.iter().filter(|p| p.is_enabled()) {
                p.begin_loop();
            }
            match seek_handle(handle, 0.0) {
                Ok(()) => {
                    let iteration = {
                        let mut st = self.status.lock();
                        st.loop_iteration += 1;
                        st.loop_iteration
                    };
                    tracing::info!(iteration, "looping to start");
                    self.events.emit(EngineEvent::LoopRestarted { iteration });
                    return;
                }
                Err(e) => tracing::warn!("loop seek failed, finishing: {e}"),
            }
        }

        for p in pipelines {
            p.mark_end_of_file();
        }
        let mut st = self.status.lock();
        if !st.state.is_terminal() && st.pending_seek.is_none() {
            tracing::info!(url = %self.url, "end of file");
            self.set_state(&mut st, SourceState::Finished);
        }
    }

    fn perform_seek(
        &self,
        handle: &mut dyn DemuxHandle,
        pipelines: &[Arc<DecodePipeline>],
        seek: PendingSeek,
        prior: SourceState,
    ) {
        self.interrupt.clear();
        let duration = self.status.lock().duration;
        let mut target = if seek.seconds.is_finite() {
            seek.seconds.max(0.0)
        } else {
            0.0
        };
        if self.config.loop_playback && duration > 0.0 && target >= duration {
            target = 0.0;
        }

        let result = seek_handle(handle, target);
        let success = result.is_ok();
        if success {
            let trim = seek.accurate.then_some(target);
            for p in pipelines {
                p.seek(trim);
            }
        }
        for p in pipelines {
            p.resume_writer();
        }

        {
            let mut st = self.status.lock();
            if success {
                st.is_seek = true;
                st.loop_iteration = 0;
                st.current_time = target;
                st.loading = LoadingState::default();
                st.load_state = LoadState::Loading;
            }
            if st.state == SourceState::Seeking {
                let next = match (success, prior) {
                    (true, _) => SourceState::Reading,
                    (false, SourceState::Seeking | SourceState::Opened) => SourceState::Reading,
                    (false, prior) => prior,
                };
                self.set_state(&mut st, next);
            }
        }

        match &result {
            Ok(()) => tracing::info!(seconds = target, accurate = seek.accurate, "seek completed"),
            Err(e) => tracing::warn!(seconds = target, "seek failed: {e}"),
        }
        self.events.emit(EngineEvent::SeekCompleted {
            seconds: target,
            success,
        });
        seek.complete(success);
    }

    fn check_buffering(&self) {
        let pipelines = self.enabled_pipelines();
        if pipelines.is_empty() {
            return;
        }
        let loads: Vec<TrackLoad> = pipelines.iter().map(|p| p.load()).collect();
        let all_failed = pipelines.iter().all(|p| p.state() == PipelineState::Failed);

        let mut st = self.status.lock();
        if st.state.is_terminal() {
            return;
        }
        let loading = self.policy.evaluate(&loads, st.is_first, st.is_seek);
        let underrun = loads
            .iter()
            .any(|l| !l.is_end_of_file && l.packet_count + l.frame_count == 0);
        let load_state = if loading.is_playable || (st.load_state == LoadState::Playable && !underrun)
        {
            LoadState::Playable
        } else {
            LoadState::Loading
        };
        if loading.is_playable {
            st.is_first = false;
            st.is_seek = false;
        }

        let previous = st.loading;
        st.loading = loading;
        if st.load_state != load_state {
            tracing::debug!(?load_state, loaded = loading.loaded_time, "load state");
            st.load_state = load_state;
        }

        let paused = st.state == SourceState::Paused;
        match self.policy.reading_action(&loading, paused) {
            ReadingAction::Pause if st.state == SourceState::Reading => {
                self.set_state(&mut st, SourceState::Paused);
            }
            ReadingAction::Resume if paused => {
                self.set_state(&mut st, SourceState::Reading);
            }
            _ => {}
        }

        let switch = self.adapt(&mut st, &pipelines, &loads, loading.is_playable);
        drop(st);

        if previous.progress() != loading.progress()
            || previous.is_playable != loading.is_playable
            || previous.is_end_of_file != loading.is_end_of_file
        {
            self.events.emit(EngineEvent::LoadingChanged(loading));
        }
        if let Some((from, to, seconds)) = switch {
            self.switch_bitrate(from, to, seconds);
        }
        if all_failed {
            let track_id = pipelines.first().map(|p| p.id()).unwrap_or_default();
            self.fail(EngineError::decode(track_id, "every enabled track failed"));
        }
    }

    /// Run the bitrate ladder; returns `(from, to, resume_at)` when it steps.
    fn adapt(
        &self,
        st: &mut Status,
        pipelines: &[Arc<DecodePipeline>],
        loads: &[TrackLoad],
        is_playable: bool,
    ) -> Option<(i64, i64, f64)> {
        if !self.config.adaptive_bitrate || st.pending_seek.is_some() {
            return None;
        }
        let current_time = st.current_time;
        let abr = st.abr.as_mut()?;
        let (video, load) = pipelines
            .iter()
            .zip(loads)
            .find(|(p, _)| p.kind() == MediaKind::Video)?;
        abr.fps = video.track().fps();
        abr.loaded_count = load.packet_count + load.frame_count;
        abr.current_time = current_time;
        abr.is_playable = is_playable;

        let now = Instant::now();
        let (from, to) = self.sync.adaptable(abr, now)?;
        abr.record(to, now);
        Some((from, to, current_time))
    }

    fn switch_bitrate(&self, from: i64, to: i64, seconds: f64) {
        let pipelines = self.pipelines.lock().clone();
        let Some(target) = pipelines
            .iter()
            .find(|p| p.kind() == MediaKind::Video && p.track().bit_rate == to)
        else {
            return;
        };
        let target_id = target.id();
        for p in pipelines.iter().filter(|p| p.kind() == MediaKind::Video) {
            p.set_enabled(p.id() == target_id);
        }
        tracing::info!(from, to, track_id = target_id, "bitrate switched");
        self.events.emit(EngineEvent::BitrateSwitched { from, to });
        self.request_seek(PendingSeek {
            seconds,
            accurate: true,
            completion: None,
        });
    }
}

fn read_thread_main(shared: Arc<Shared>) {
    let (mut handle, pipelines) = match shared.open() {
        Ok(opened) => opened,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };

    {
        let mut st = shared.status.lock();
        *shared.pipelines.lock() = pipelines.clone();
        if !st.state.is_terminal() {
            st.load_state = LoadState::Loading;
            shared.set_state(&mut st, SourceState::Opened);
        }
    }

    loop {
        match shared.next_step() {
            Step::Exit => break,
            Step::Seek { seek, prior } => {
                shared.perform_seek(handle.as_mut(), &pipelines, seek, prior);
                shared.check_buffering();
            }
            Step::Recheck => shared.check_buffering(),
            Step::Read => {
                match handle.read_packet() {
                    Ok(ReadOutcome::Packet(packet)) => shared.route(&pipelines, packet),
                    Ok(ReadOutcome::EndOfFile) => shared.on_end_of_file(handle.as_mut(), &pipelines),
                    Err(EngineError::Interrupted) => {
                        tracing::debug!("read interrupted");
                    }
                    Err(e) => {
                        let error = if e.is_fatal() {
                            e
                        } else {
                            EngineError::Read(e.to_string())
                        };
                        shared.fail(error);
                        break;
                    }
                }
                shared.check_buffering();
            }
        }
    }

    for pipeline in &pipelines {
        pipeline.shutdown();
    }
    handle.close();
    tracing::debug!(url = %shared.url, "reading thread exited");
}

/// Seek the handle, retrying without the backward flag.
fn seek_handle(handle: &mut dyn DemuxHandle, seconds: f64) -> Result<(), EngineError> {
    match handle.seek(seconds, SeekFlags { backward: true }) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(seconds, "seek failed, retrying without backward flag: {e}");
            handle.seek(seconds, SeekFlags { backward: false })
        }
    }
}

/// Enable exactly one preferred audio and video track; subtitles follow the
/// demuxer's default flag.
fn select_tracks(mut probed: Vec<ProbedTrack>, selector: Option<&TrackSelector>) -> Vec<ProbedTrack> {
    let mut by_kind: HashMap<MediaKind, Vec<usize>> = HashMap::new();
    for (idx, p) in probed.iter().enumerate() {
        by_kind.entry(p.track.kind).or_default().push(idx);
    }
    for kind in [MediaKind::Audio, MediaKind::Video] {
        let Some(indices) = by_kind.get(&kind) else {
            continue;
        };
        let candidates: Vec<TrackCandidate> = indices
            .iter()
            .map(|&idx| TrackCandidate {
                id: probed[idx].track.id,
                bit_rate: probed[idx].track.bit_rate,
                language: probed[idx].track.language.clone(),
                is_default: probed[idx].is_default,
            })
            .collect();
        let chosen = choose_track(kind, &candidates, selector);
        for (pos, &idx) in indices.iter().enumerate() {
            probed[idx].track.enabled = Some(pos) == chosen;
        }
    }
    if let Some(indices) = by_kind.get(&MediaKind::Subtitle) {
        for &idx in indices {
            probed[idx].track.enabled = probed[idx].is_default;
        }
    }
    probed
}

/// A skipped track can leave a kind without an enabled pipeline.
fn ensure_one_enabled(pipelines: &[Arc<DecodePipeline>], kind: MediaKind) {
    let mut of_kind = pipelines.iter().filter(|p| p.kind() == kind);
    if pipelines.iter().any(|p| p.kind() == kind && p.is_enabled()) {
        return;
    }
    if let Some(first) = of_kind.next() {
        first.set_enabled(true);
    }
}

/// Bitrate ladder over alternate video encodes, when there is more than one rung.
fn adaptation_state(config: &EngineConfig, tracks: &[Track]) -> Option<AdaptationState> {
    if !config.adaptive_bitrate {
        return None;
    }
    let videos: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.kind == MediaKind::Video && t.bit_rate > 0)
        .collect();
    let current = videos.iter().find(|t| t.enabled)?;
    let state = AdaptationState::new(
        videos.iter().map(|t| t.bit_rate),
        current.bit_rate,
        current.fps(),
        Instant::now(),
    );
    (state.bitrate_ladder.len() > 1).then_some(state)
}
