//! Packets and decoded frames.
//!
//! Payloads are plain owned buffers. Ownership moves Source → pipeline →
//! frame queue → renderer; nothing aliases them.

use crate::track::{MediaKind, Timebase};

/// Anything the [`FrameQueue`](crate::queue::FrameQueue) can order by position.
pub trait Timed {
    fn position(&self) -> i64;
}

/// A compressed, timestamped unit of one track.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub track_id: i32,
    pub position: i64,
    pub duration: i64,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(track_id: i32, position: i64, duration: i64, payload: Vec<u8>) -> Self {
        Self {
            track_id,
            position,
            duration,
            payload,
        }
    }

    pub fn size(&self) -> i32 {
        i32::try_from(self.payload.len()).unwrap_or(i32::MAX)
    }
}

impl Timed for Packet {
    fn position(&self) -> i64 {
        self.position
    }
}

/// Interleaved `f32` PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Raw picture data in whatever layout the decoder produced.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleFrame {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameData {
    Audio(AudioFrame),
    Video(VideoFrame),
    Subtitle(SubtitleFrame),
}

/// A decoded, timestamped unit of one track.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub track_id: i32,
    pub position: i64,
    pub duration: i64,
    pub timebase: Timebase,
    pub data: FrameData,
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self.data {
            FrameData::Audio(_) => MediaKind::Audio,
            FrameData::Video(_) => MediaKind::Video,
            FrameData::Subtitle(_) => MediaKind::Subtitle,
        }
    }

    /// Presentation time in seconds.
    pub fn seconds(&self) -> f64 {
        self.timebase.to_seconds(self.position)
    }

    /// End of presentation in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.timebase
            .to_seconds(self.position.saturating_add(self.duration))
    }

    pub fn size(&self) -> i32 {
        let bytes = match &self.data {
            FrameData::Audio(a) => a.samples.len() * std::mem::size_of::<f32>(),
            FrameData::Video(v) => v.data.len(),
            FrameData::Subtitle(s) => s.text.len(),
        };
        i32::try_from(bytes).unwrap_or(i32::MAX)
    }

    pub fn as_audio(&self) -> Option<&AudioFrame> {
        match &self.data {
            FrameData::Audio(a) => Some(a),
            _ => None,
        }
    }
}

impl Timed for Frame {
    fn position(&self) -> i64 {
        self.position
    }
}
