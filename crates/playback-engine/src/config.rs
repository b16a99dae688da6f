//! Engine tuning parameters.
//!
//! Loaded from TOML; every field is optional and falls back to [`Default`].

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::queue::power_of_two_capacity;
use crate::track::MediaKind;

/// Playback tuning shared by the Source, pipelines and sync controller.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds buffered ahead before a warm session counts as playable.
    pub preferred_forward_buffer_seconds: f64,
    /// Upper bound of buffered seconds; reading pauses above it.
    pub max_buffer_seconds: f64,
    /// Discard decoded frames that end before a seek target.
    pub accurate_seek: bool,
    /// Restart from the beginning at end of file.
    pub loop_playback: bool,
    /// Decode audio inline on the reading thread.
    pub sync_decode_audio: bool,
    /// Decode video inline on the reading thread.
    pub sync_decode_video: bool,
    /// Try the hardware decoder kind first.
    pub hardware_decode: bool,
    /// Switch between alternate video encodes based on buffer health.
    pub adaptive_bitrate: bool,
    pub audio_frame_capacity: usize,
    pub video_frame_capacity: usize,
    pub subtitle_frame_capacity: usize,
    /// Initial capacity of the (expanding) packet queues.
    pub packet_queue_capacity: usize,
    /// Audio ahead of video by at most this many seconds still shows the frame.
    pub sync_show_threshold_seconds: f64,
    /// Above this lag frames count towards a re-sync seek.
    pub sync_seek_threshold_seconds: f64,
    /// Consecutive over-threshold frames before a re-sync seek.
    pub sync_seek_after_drops: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred_forward_buffer_seconds: 3.0,
            max_buffer_seconds: 30.0,
            accurate_seek: false,
            loop_playback: false,
            sync_decode_audio: false,
            sync_decode_video: false,
            hardware_decode: true,
            adaptive_bitrate: true,
            audio_frame_capacity: 16,
            video_frame_capacity: 16,
            subtitle_frame_capacity: 64,
            packet_queue_capacity: 256,
            sync_show_threshold_seconds: 0.4,
            sync_seek_threshold_seconds: 2.0,
            sync_seek_after_drops: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<EngineConfig>(raw)?;
        Ok(cfg.sanitized())
    }

    /// Replace non-finite or non-positive durations with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();
        let fix = |v: f64, d: f64| if v.is_finite() && v > 0.0 { v } else { d };
        self.preferred_forward_buffer_seconds = fix(
            self.preferred_forward_buffer_seconds,
            defaults.preferred_forward_buffer_seconds,
        );
        self.max_buffer_seconds = fix(self.max_buffer_seconds, defaults.max_buffer_seconds);
        self.sync_show_threshold_seconds = fix(
            self.sync_show_threshold_seconds,
            defaults.sync_show_threshold_seconds,
        );
        self.sync_seek_threshold_seconds = fix(
            self.sync_seek_threshold_seconds,
            defaults.sync_seek_threshold_seconds,
        )
        .max(self.sync_show_threshold_seconds);
        self
    }

    /// Frame-queue capacity for a track kind (power of two).
    pub fn frame_capacity(&self, kind: MediaKind) -> usize {
        let requested = match kind {
            MediaKind::Audio => self.audio_frame_capacity,
            MediaKind::Video => self.video_frame_capacity,
            MediaKind::Subtitle => self.subtitle_frame_capacity,
        };
        power_of_two_capacity(requested)
    }

    /// Whether pipelines of `kind` decode inline on the reading thread.
    pub fn sync_decode(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.sync_decode_audio,
            MediaKind::Video => self.sync_decode_video,
            MediaKind::Subtitle => true,
        }
    }
}
