//! Elementary stream descriptions.

use std::sync::Arc;

pub use playback_types::MediaKind;

use crate::decoder::DecoderFactory;

/// Rational time unit used to convert integer positions into seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    pub const MILLISECONDS: Timebase = Timebase { num: 1, den: 1000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Convert a position in this timebase into seconds.
    ///
    /// A degenerate timebase (zero denominator) maps everything to `0.0`.
    pub fn to_seconds(&self, position: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        position as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds into the nearest position in this timebase.
    pub fn from_seconds(&self, seconds: f64) -> i64 {
        if self.num == 0 || !seconds.is_finite() {
            return 0;
        }
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Timebase::MILLISECONDS
    }
}

/// Codec parameters the engine reports for a track.
///
/// Anything decoder-specific stays behind the track's [`DecoderFactory`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodecParams {
    /// Codec label (best-effort).
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Immutable description of one elementary stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: i32,
    pub kind: MediaKind,
    pub timebase: Timebase,
    pub bit_rate: i64,
    /// Frames (video) or packets (audio) per second; drives buffering math.
    pub nominal_frame_rate: f32,
    /// Whether packets of this track are routed to its decode pipeline.
    pub enabled: bool,
    pub codec_params: CodecParams,
    pub language: Option<String>,
}

impl Track {
    /// Frame rate used by the buffering policy, never below one.
    pub fn fps(&self) -> f32 {
        if self.nominal_frame_rate.is_finite() && self.nominal_frame_rate >= 1.0 {
            self.nominal_frame_rate
        } else {
            1.0
        }
    }
}

/// A track as reported by the decode engine's probe.
#[derive(Clone)]
pub struct ProbedTrack {
    pub track: Track,
    /// Demuxer's own "default stream" disposition.
    pub is_default: bool,
    /// Builds decoders for this track.
    pub decoders: Arc<dyn DecoderFactory>,
}

impl std::fmt::Debug for ProbedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbedTrack")
            .field("track", &self.track)
            .field("is_default", &self.is_default)
            .finish_non_exhaustive()
    }
}

/// What a [`TrackSelector`] sees for each candidate track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackCandidate {
    pub id: i32,
    pub bit_rate: i64,
    pub language: Option<String>,
    pub is_default: bool,
}

/// Chooses the preferred track of a kind at open time.
///
/// Returns an index into the candidate slice, or `None` for the default choice.
pub type TrackSelector = Arc<dyn Fn(MediaKind, &[TrackCandidate]) -> Option<usize> + Send + Sync>;

/// Default preferred-track choice: the demuxer default, else the highest
/// bitrate video or the first audio track.
pub fn default_track_choice(kind: MediaKind, candidates: &[TrackCandidate]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    if let Some(idx) = candidates.iter().position(|c| c.is_default) {
        return Some(idx);
    }
    match kind {
        MediaKind::Video => candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.bit_rate)
            .map(|(idx, _)| idx),
        _ => Some(0),
    }
}

/// Pick the preferred track among `candidates`, honouring an optional selector.
pub(crate) fn choose_track(
    kind: MediaKind,
    candidates: &[TrackCandidate],
    selector: Option<&TrackSelector>,
) -> Option<usize> {
    let chosen = selector.and_then(|select| select(kind, candidates));
    match chosen {
        Some(idx) if idx < candidates.len() => Some(idx),
        Some(idx) => {
            tracing::warn!(?kind, idx, "track selector returned out-of-range index");
            default_track_choice(kind, candidates)
        }
        None => default_track_choice(kind, candidates),
    }
}
