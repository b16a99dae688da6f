//! Media playback engine: per-track decode pipelines, buffering, A/V sync and
//! a player state machine over a pluggable demux/decode engine.

pub mod buffering;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod events;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod source;
pub mod symphonia_demux;
pub mod sync;
pub mod track;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{EngineEvent, EventSink};
pub use session::MediaPlayer;
pub use source::{SeekCompletion, Source, SourceState};
pub use symphonia_demux::SymphoniaEngine;
