//! "Is it safe to play" decision.
//!
//! Pure functions over per-track queue depths. Cold starts and seeks use a
//! fast rule (audio warms up first); steady state requires a full forward
//! buffer on every track.

use crate::config::EngineConfig;
use crate::track::MediaKind;

/// Queue depths of one active pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackLoad {
    pub kind: MediaKind,
    pub packet_count: usize,
    pub frame_count: usize,
    pub frame_max_count: usize,
    pub fps: f32,
    pub is_end_of_file: bool,
}

impl TrackLoad {
    fn queued(&self) -> usize {
        self.packet_count + self.frame_count
    }

    fn fps(&self) -> f64 {
        if self.fps.is_finite() && self.fps >= 1.0 {
            self.fps as f64
        } else {
            1.0
        }
    }

    /// Seconds of media queued on this track.
    pub fn loaded_time(&self) -> f64 {
        self.queued() as f64 / self.fps()
    }
}

/// Snapshot of buffering health, recomputed on every capacity change.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoadingState {
    /// Seconds buffered on the slowest track.
    pub loaded_time: f64,
    /// `loaded_time` relative to the preferred forward buffer, in percent.
    pub progress_percent: f64,
    /// Fewest packets queued on any track.
    pub packet_count: usize,
    /// Fewest frames queued on any track.
    pub frame_count: usize,
    pub is_end_of_file: bool,
    pub is_playable: bool,
    pub is_first: bool,
    pub is_seek: bool,
}

impl LoadingState {
    /// Progress clamped to `0..=100`.
    pub fn progress(&self) -> u8 {
        self.progress_percent.clamp(0.0, 100.0) as u8
    }
}

/// What the reading thread should do after a buffering check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadingAction {
    Continue,
    Pause,
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferingPolicy {
    pub preferred_forward_buffer_seconds: f64,
    pub max_buffer_seconds: f64,
}

impl BufferingPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            preferred_forward_buffer_seconds: config.preferred_forward_buffer_seconds,
            max_buffer_seconds: config.max_buffer_seconds,
        }
    }

    /// Decide the load state over every active track.
    pub fn evaluate(&self, loads: &[TrackLoad], is_first: bool, is_seek: bool) -> LoadingState {
        let loaded_time = loads
            .iter()
            .map(TrackLoad::loaded_time)
            .reduce(f64::min)
            .unwrap_or(0.0);
        let progress_percent = if self.preferred_forward_buffer_seconds > 0.0 {
            loaded_time * 100.0 / self.preferred_forward_buffer_seconds
        } else {
            100.0
        };
        let is_playable = !loads.is_empty()
            && loads
                .iter()
                .all(|load| self.track_playable(load, is_first, is_seek));

        LoadingState {
            loaded_time,
            progress_percent,
            packet_count: loads.iter().map(|l| l.packet_count).min().unwrap_or(0),
            frame_count: loads.iter().map(|l| l.frame_count).min().unwrap_or(0),
            is_end_of_file: !loads.is_empty() && loads.iter().all(|l| l.is_end_of_file),
            is_playable,
            is_first,
            is_seek,
        }
    }

    /// Whether one track has buffered enough on its own.
    pub fn track_playable(&self, load: &TrackLoad, is_first: bool, is_seek: bool) -> bool {
        if load.is_end_of_file && load.packet_count == 0 {
            return true;
        }
        if load.frame_count >= load.frame_max_count >> 2 && load.frame_max_count > 0 {
            return true;
        }
        if load.kind == MediaKind::Audio {
            if is_first && load.queued() >= 1 {
                return true;
            }
            if is_seek && load.queued() as f64 >= load.fps() {
                return true;
            }
        }
        load.queued() as f64 >= load.fps() * self.preferred_forward_buffer_seconds
    }

    /// Backpressure band: pause above `max`, resume below `max / 2`.
    pub fn reading_action(&self, state: &LoadingState, reading_paused: bool) -> ReadingAction {
        if reading_paused {
            if state.loaded_time < self.max_buffer_seconds / 2.0 || state.is_end_of_file {
                ReadingAction::Resume
            } else {
                ReadingAction::Continue
            }
        } else if state.is_playable && state.loaded_time > self.max_buffer_seconds {
            ReadingAction::Pause
        } else {
            ReadingAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BufferingPolicy {
        BufferingPolicy {
            preferred_forward_buffer_seconds: 12.0,
            max_buffer_seconds: 30.0,
        }
    }

    fn audio(packets: usize, frames: usize) -> TrackLoad {
        TrackLoad {
            kind: MediaKind::Audio,
            packet_count: packets,
            frame_count: frames,
            frame_max_count: 16,
            fps: 44.0,
            is_end_of_file: false,
        }
    }

    fn video(packets: usize, frames: usize) -> TrackLoad {
        TrackLoad {
            kind: MediaKind::Video,
            packet_count: packets,
            frame_count: frames,
            frame_max_count: 16,
            fps: 30.0,
            is_end_of_file: false,
        }
    }

    #[test]
    fn cold_start_needs_one_audio_packet_and_quarter_video_frames() {
        let p = policy();
        assert!(!p.evaluate(&[audio(0, 0), video(10, 4)], true, false).is_playable);
        assert!(!p.evaluate(&[audio(1, 0), video(10, 3)], true, false).is_playable);
        let state = p.evaluate(&[audio(1, 0), video(10, 4)], true, false);
        assert!(state.is_playable);
        assert!(state.is_first);
    }

    #[test]
    fn warm_state_needs_full_forward_buffer() {
        let p = policy();
        // 44 * 12 = 528 audio units, 30 * 12 = 360 video units.
        assert!(!p.evaluate(&[audio(1, 0), video(10, 3)], false, false).is_playable);
        assert!(!p.evaluate(&[audio(527, 0), video(360, 0)], false, false).is_playable);
        assert!(!p.evaluate(&[audio(528, 0), video(359, 0)], false, false).is_playable);
        assert!(p.evaluate(&[audio(528, 0), video(360, 0)], false, false).is_playable);
    }

    #[test]
    fn seek_needs_one_second_of_audio() {
        let p = policy();
        assert!(!p.evaluate(&[audio(43, 0), video(0, 4)], false, true).is_playable);
        assert!(p.evaluate(&[audio(44, 0), video(0, 4)], false, true).is_playable);
    }

    #[test]
    fn end_of_file_with_no_packets_is_playable() {
        let p = policy();
        let mut v = video(0, 1);
        v.is_end_of_file = true;
        let mut a = audio(0, 0);
        a.is_end_of_file = true;
        let state = p.evaluate(&[a, v], false, false);
        assert!(state.is_playable);
        assert!(state.is_end_of_file);
    }

    #[test]
    fn loaded_time_is_minimum_over_tracks() {
        let p = policy();
        let state = p.evaluate(&[audio(88, 0), video(30, 30)], false, false);
        assert!((state.loaded_time - 2.0).abs() < 1e-9);
        assert!((state.progress_percent - 2.0 * 100.0 / 12.0).abs() < 1e-9);
        assert_eq!(state.packet_count, 30);
        assert_eq!(state.frame_count, 0);
        assert_eq!(state.progress(), 16);
    }

    #[test]
    fn no_tracks_is_not_playable() {
        let state = policy().evaluate(&[], true, false);
        assert!(!state.is_playable);
        assert_eq!(state.loaded_time, 0.0);
    }

    #[test]
    fn reading_pauses_above_max_and_resumes_below_half() {
        let p = policy();
        let mut state = LoadingState {
            loaded_time: 31.0,
            is_playable: true,
            ..LoadingState::default()
        };
        assert_eq!(p.reading_action(&state, false), ReadingAction::Pause);
        state.loaded_time = 20.0;
        assert_eq!(p.reading_action(&state, true), ReadingAction::Continue);
        assert_eq!(p.reading_action(&state, false), ReadingAction::Continue);
        state.loaded_time = 14.9;
        assert_eq!(p.reading_action(&state, true), ReadingAction::Resume);
    }

    #[test]
    fn unplayable_buffer_never_pauses_reading() {
        let state = LoadingState {
            loaded_time: 40.0,
            is_playable: false,
            ..LoadingState::default()
        };
        assert_eq!(policy().reading_action(&state, false), ReadingAction::Continue);
    }
}
