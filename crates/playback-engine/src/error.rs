//! Engine error taxonomy.
//!
//! Open errors are fatal to the session, read errors other than end-of-file are
//! fatal, decode errors are scoped to one track, and seek errors are reported
//! through the seek completion only.

use std::fmt;

use thiserror::Error;

use crate::decoder::DecoderKind;

/// Stage of `open` that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenStage {
    /// Demux handle allocation.
    Allocate,
    /// Opening the input resource.
    OpenInput,
    /// Probing stream information.
    StreamInfo,
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OpenStage::Allocate => "allocate",
            OpenStage::OpenInput => "open input",
            OpenStage::StreamInfo => "stream info",
        };
        f.write_str(label)
    }
}

/// Errors reported by the engine and its collaborators.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum EngineError {
    /// Opening the media resource failed.
    #[error("open failed ({stage}): {reason}")]
    Open { stage: OpenStage, reason: String },

    /// The resource opened but contains no playable elementary stream.
    #[error("no playable tracks")]
    NoTracks,

    /// Non end-of-file I/O failure while reading packets.
    #[error("read failed: {0}")]
    Read(String),

    /// A decoder rejected a packet.
    #[error("decode failed on track {track_id}: {reason}")]
    Decode { track_id: i32, reason: String },

    /// No decoder of the requested kind exists for the track.
    #[error("no {kind} decoder for track {track_id}")]
    DecoderUnavailable { track_id: i32, kind: DecoderKind },

    /// Low-level seek failed.
    #[error("seek to {seconds:.3}s failed: {reason}")]
    Seek { seconds: f64, reason: String },

    /// In-flight I/O was aborted by the interrupt flag.
    #[error("interrupted")]
    Interrupted,

    /// The source was shut down.
    #[error("source closed")]
    Closed,
}

impl EngineError {
    pub fn open(stage: OpenStage, reason: impl fmt::Display) -> Self {
        EngineError::Open {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn decode(track_id: i32, reason: impl fmt::Display) -> Self {
        EngineError::Decode {
            track_id,
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Open { .. } | EngineError::NoTracks | EngineError::Read(_)
        )
    }
}
