//! Audio/video synchronization and adaptive bitrate decisions.

use std::time::Instant;

use crate::config::EngineConfig;

/// What to do with the next due video frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDecision {
    /// Render it.
    Show,
    /// Discard it and wait for the next one.
    Drop,
    /// The decoder fell hopelessly behind: flush and reposition video to the clock.
    Seek,
}

/// A bitrate switch in the adaptation history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BitrateSwitch {
    pub bit_rate: i64,
    pub at: Instant,
}

/// Inputs of the adaptive bitrate decision; one per playback session.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptationState {
    /// Distinct bitrates of the alternate video encodes, ascending.
    pub bitrate_ladder: Vec<i64>,
    pub duration: f64,
    pub fps: f32,
    /// Switch history; the last entry is the bitrate currently playing.
    pub history: Vec<BitrateSwitch>,
    /// Video packets + frames currently queued.
    pub loaded_count: usize,
    pub current_time: f64,
    pub is_playable: bool,
}

impl AdaptationState {
    pub fn new(bitrates: impl IntoIterator<Item = i64>, current: i64, fps: f32, at: Instant) -> Self {
        let mut bitrate_ladder: Vec<i64> = bitrates.into_iter().collect();
        bitrate_ladder.sort_unstable();
        bitrate_ladder.dedup();
        Self {
            bitrate_ladder,
            duration: 0.0,
            fps,
            history: vec![BitrateSwitch {
                bit_rate: current,
                at,
            }],
            loaded_count: 0,
            current_time: 0.0,
            is_playable: false,
        }
    }

    pub fn current_bitrate(&self) -> Option<i64> {
        self.history.last().map(|s| s.bit_rate)
    }

    pub fn record(&mut self, bit_rate: i64, at: Instant) {
        self.history.push(BitrateSwitch { bit_rate, at });
    }
}

/// Decides show/drop/seek for video and runs the bitrate ladder.
#[derive(Clone, Debug)]
pub struct SyncController {
    show_threshold: f64,
    seek_threshold: f64,
    seek_after_drops: u32,
    max_buffer_seconds: f64,
    drop_streak: u32,
}

impl SyncController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            show_threshold: config.sync_show_threshold_seconds,
            seek_threshold: config.sync_seek_threshold_seconds,
            seek_after_drops: config.sync_seek_after_drops,
            max_buffer_seconds: config.max_buffer_seconds,
            drop_streak: 0,
        }
    }

    /// Compare the master clock with the candidate frame's presentation time.
    pub fn decide(&mut self, audio_clock: f64, video_seconds: f64) -> SyncDecision {
        let delta = audio_clock - video_seconds;
        if delta <= self.show_threshold {
            self.drop_streak = 0;
            SyncDecision::Show
        } else if delta <= self.seek_threshold {
            SyncDecision::Drop
        } else {
            self.drop_streak += 1;
            if self.drop_streak > self.seek_after_drops {
                tracing::debug!(delta, streak = self.drop_streak, "video too far behind; seeking");
                self.drop_streak = 0;
                SyncDecision::Seek
            } else {
                SyncDecision::Drop
            }
        }
    }

    pub fn drop_streak(&self) -> u32 {
        self.drop_streak
    }

    pub fn reset(&mut self) {
        self.drop_streak = 0;
    }

    /// Next rung of the bitrate ladder, as `(from, to)`, or `None` to stay.
    ///
    /// Only reconsidered once the last switch is older than half the max
    /// buffer; a step is taken only when the buffer-health direction agrees
    /// with the current playable state.
    pub fn adaptable(&self, state: &AdaptationState, now: Instant) -> Option<(i64, i64)> {
        let last = state.history.last()?;
        let since = now.saturating_duration_since(last.at).as_secs_f64();
        if since <= self.max_buffer_seconds / 2.0 {
            return None;
        }
        let index = state.bitrate_ladder.iter().position(|b| *b == last.bit_rate)?;
        let is_up = state.loaded_count as f64 > state.fps as f64 * self.max_buffer_seconds / 2.0;
        if is_up != state.is_playable {
            return None;
        }
        let target = if is_up {
            state.bitrate_ladder.get(index + 1)
        } else {
            index
                .checked_sub(1)
                .and_then(|i| state.bitrate_ladder.get(i))
        }?;
        Some((last.bit_rate, *target))
    }
}

/// Session clock: the renderer-pushed audio time when audio drives playback,
/// otherwise wall time that advances only while running.
#[derive(Clone, Debug, Default)]
pub struct PlaybackClock {
    audio_driven: bool,
    audio_time: f64,
    base: f64,
    started: Option<Instant>,
}

impl PlaybackClock {
    pub fn new(audio_driven: bool) -> Self {
        Self {
            audio_driven,
            ..Self::default()
        }
    }

    pub fn set_audio_driven(&mut self, audio_driven: bool) {
        self.audio_driven = audio_driven;
    }

    pub fn is_audio_driven(&self) -> bool {
        self.audio_driven
    }

    /// Master time in seconds.
    pub fn time(&self, now: Instant) -> f64 {
        if self.audio_driven {
            return self.audio_time;
        }
        match self.started {
            Some(start) => self.base + now.saturating_duration_since(start).as_secs_f64(),
            None => self.base,
        }
    }

    pub fn set_audio_time(&mut self, seconds: f64) {
        self.audio_time = seconds;
    }

    pub fn run(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        self.base = self.time(now);
        self.started = None;
    }

    /// Jump every clock to `seconds`, keeping the running state.
    pub fn reset_to(&mut self, seconds: f64, now: Instant) {
        self.audio_time = seconds;
        self.base = seconds;
        if self.started.is_some() {
            self.started = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller() -> SyncController {
        SyncController::new(&EngineConfig::default())
    }

    #[test]
    fn decision_table() {
        let mut sync = controller();
        assert_eq!(sync.decide(10.0, 9.7), SyncDecision::Show);
        assert_eq!(sync.decide(10.0, 9.0), SyncDecision::Drop);
        assert_eq!(sync.decide(10.0, 10.5), SyncDecision::Show);
    }

    #[test]
    fn eleventh_far_behind_frame_seeks() {
        let mut sync = controller();
        for call in 1..=10 {
            assert_eq!(sync.decide(10.0, 7.5), SyncDecision::Drop, "call {call}");
        }
        assert_eq!(sync.decide(10.0, 7.5), SyncDecision::Seek);
        assert_eq!(sync.drop_streak(), 0);
    }

    #[test]
    fn show_resets_streak_but_moderate_drop_does_not() {
        let mut sync = controller();
        for _ in 0..5 {
            sync.decide(10.0, 7.5);
        }
        sync.decide(10.0, 9.0);
        assert_eq!(sync.drop_streak(), 5);
        sync.decide(10.0, 9.9);
        assert_eq!(sync.drop_streak(), 0);
    }

    fn ladder_state(loaded: usize, playable: bool, at: Instant) -> AdaptationState {
        let mut state = AdaptationState::new([2_000, 500, 1_000, 1_000], 1_000, 30.0, at);
        state.loaded_count = loaded;
        state.is_playable = playable;
        state
    }

    #[test]
    fn ladder_is_sorted_and_deduplicated() {
        let state = ladder_state(0, false, Instant::now());
        assert_eq!(state.bitrate_ladder, vec![500, 1_000, 2_000]);
        assert_eq!(state.current_bitrate(), Some(1_000));
    }

    #[test]
    fn healthy_buffer_steps_up() {
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(20);
        // 30 fps * 30 s / 2 = 450 units.
        let state = ladder_state(451, true, t0);
        assert_eq!(controller().adaptable(&state, now), Some((1_000, 2_000)));
    }

    #[test]
    fn starving_buffer_steps_down() {
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(20);
        let state = ladder_state(100, false, t0);
        assert_eq!(controller().adaptable(&state, now), Some((1_000, 500)));
    }

    #[test]
    fn disagreeing_direction_holds() {
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(20);
        assert_eq!(controller().adaptable(&ladder_state(451, false, t0), now), None);
        assert_eq!(controller().adaptable(&ladder_state(100, true, t0), now), None);
    }

    #[test]
    fn recent_switch_holds() {
        let t0 = Instant::now();
        let state = ladder_state(451, true, t0);
        assert_eq!(controller().adaptable(&state, t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn ladder_ends_hold() {
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(20);
        let mut top = ladder_state(451, true, t0);
        top.record(2_000, t0);
        assert_eq!(controller().adaptable(&top, now), None);
        let mut bottom = ladder_state(10, false, t0);
        bottom.record(500, t0);
        assert_eq!(controller().adaptable(&bottom, now), None);
    }

    #[test]
    fn wall_clock_advances_only_while_running() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(false);
        assert_eq!(clock.time(t0), 0.0);
        clock.run(t0);
        let t1 = t0 + Duration::from_millis(1500);
        assert!((clock.time(t1) - 1.5).abs() < 1e-9);
        clock.pause(t1);
        assert!((clock.time(t1 + Duration::from_secs(5)) - 1.5).abs() < 1e-9);
        clock.reset_to(10.0, t1);
        assert_eq!(clock.time(t1), 10.0);
    }

    #[test]
    fn audio_driven_clock_follows_renderer() {
        let mut clock = PlaybackClock::new(true);
        clock.run(Instant::now());
        clock.set_audio_time(4.25);
        assert_eq!(clock.time(Instant::now()), 4.25);
    }
}
