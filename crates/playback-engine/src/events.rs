//! Structured engine events.
//!
//! The channel is injected at construction; nothing in the engine reports
//! through global hooks.

use crossbeam_channel::{Receiver, Sender};

use crate::buffering::LoadingState;
use crate::error::EngineError;
use crate::source::SourceState;
use crate::track::Track;

/// Something observable happened inside the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    StateChanged(SourceState),
    Opened { tracks: Vec<Track>, duration: f64 },
    LoadingChanged(LoadingState),
    SeekCompleted { seconds: f64, success: bool },
    TrackFailed { track_id: i32, error: EngineError },
    TrackFinished { track_id: i32 },
    LoopRestarted { iteration: u32 },
    BitrateSwitched { from: i64, to: i64 },
    Error(EngineError),
}

/// Sending half of the event channel.
///
/// Cheap to clone; a dropped receiver silently discards events.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<Sender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink with no receiver.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("engine event dropped; receiver gone");
            }
        }
    }
}
