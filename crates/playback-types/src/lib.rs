use serde::{Deserialize, Serialize};

/// Kind of elementary stream carried by a track.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
}

/// Coarse buffering state derived from the pipelines' queue depths.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Nothing opened yet.
    #[default]
    Idle,
    /// Opened, but not enough buffered to play without stalling.
    Loading,
    /// Enough buffered on every active track.
    Playable,
}

/// User-facing playback state of a session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Seeking,
    Finished,
    Stopped,
}

/// Reason why playback ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream.
    Eof,
    /// Open, read or decode error ended the session.
    Error,
    /// Playback was explicitly stopped.
    Stopped,
}

/// Per-track entry of a [`PlaybackStatus`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackStatus {
    pub id: i32,
    pub kind: MediaKind,
    pub bit_rate: i64,
    pub enabled: bool,
    /// Decode pipeline state (`decoding`, `finished`, `failed`, ...).
    pub state: String,
    /// Packets waiting to be decoded.
    pub packet_count: usize,
    /// Decoded frames waiting to be rendered.
    pub frame_count: usize,
    /// Packets of a later loop iteration wait behind the current one.
    pub loop_pending: bool,
    pub language: Option<String>,
}

/// Session-level snapshot exposed to front-ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackStatus {
    /// Media URL of the current session.
    pub url: Option<String>,
    pub playback_state: PlaybackState,
    pub load_state: LoadState,
    /// Current playback position in seconds.
    pub current_seconds: f64,
    /// Total media duration in seconds (0 when unknown).
    pub duration_seconds: f64,
    /// Seconds of media buffered ahead on the slowest track.
    pub loaded_seconds: f64,
    /// Buffering progress (0..=100).
    pub buffering_progress: u8,
    pub tracks: Vec<TrackStatus>,
    /// Last fatal error message, if any.
    pub error: Option<String>,
    /// End reason once playback reached a terminal state.
    pub end_reason: Option<PlaybackEndReason>,
}

impl PlaybackStatus {
    /// Tracks of one kind that currently receive packets.
    pub fn enabled_tracks(&self, kind: MediaKind) -> impl Iterator<Item = &TrackStatus> {
        self.tracks
            .iter()
            .filter(move |t| t.kind == kind && t.enabled)
    }
}
