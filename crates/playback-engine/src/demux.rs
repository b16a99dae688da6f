//! Contract with the external decode engine.
//!
//! The engine turns a URL into per-track packets and hands out a
//! [`DecoderFactory`](crate::decoder::DecoderFactory) per track through the
//! probe. The reading thread is the only user of a [`DemuxHandle`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EngineError;
use crate::frame::Packet;
use crate::track::{ProbedTrack, TrackSelector};

/// Shared abort flag for in-flight engine I/O.
///
/// Set by the Source once it is finished, closed or failed; engines poll it
/// from blocking reads and return [`EngineError::Interrupted`].
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-open options.
#[derive(Clone, Default)]
pub struct OpenOptions {
    /// Container hint (usually the file extension) for probing.
    pub format_hint: Option<String>,
    /// Overrides the preferred audio/video track choice.
    pub track_selector: Option<TrackSelector>,
    /// Position to start reading from, in seconds.
    pub start_seconds: f64,
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("format_hint", &self.format_hint)
            .field("track_selector", &self.track_selector.is_some())
            .field("start_seconds", &self.start_seconds)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// Land on the closest seek point at or before the target.
    pub backward: bool,
}

/// Result of one packet read.
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Packet(Packet),
    EndOfFile,
}

/// Opens media resources.
pub trait DemuxEngine: Send + Sync {
    fn open(
        &self,
        url: &str,
        options: &OpenOptions,
        interrupt: Interrupt,
    ) -> Result<Box<dyn DemuxHandle>, EngineError>;
}

/// An open media resource.
pub trait DemuxHandle: Send {
    /// Describe every elementary stream.
    fn probe(&mut self) -> Result<Vec<ProbedTrack>, EngineError>;

    /// Total duration in seconds, `0.0` when unknown.
    fn duration(&self) -> f64;

    /// Read the next packet of any track. Positions are in the track's timebase.
    fn read_packet(&mut self) -> Result<ReadOutcome, EngineError>;

    /// Reposition reading to `seconds`.
    fn seek(&mut self, seconds: f64, flags: SeekFlags) -> Result<(), EngineError>;

    /// Release the resource. Called once, last.
    fn close(&mut self);
}
