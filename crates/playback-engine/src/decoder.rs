//! Pluggable per-track decoders.
//!
//! A pipeline picks its decoder kind once, at construction. The only transition
//! afterwards is the single hardware → software fallback.

use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::frame::{Frame, Packet};
use crate::track::Track;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    Software,
    Hardware,
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderKind::Software => f.write_str("software"),
            DecoderKind::Hardware => f.write_str("hardware"),
        }
    }
}

/// Turns packets of one track into frames.
pub trait Decoder: Send {
    /// Decode one packet. A packet may yield zero or more frames.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>, EngineError>;

    /// Drop decoder-internal state (reference frames, pending output).
    fn flush(&mut self);

    /// Release decoder resources. Called once, from the thread that owns it.
    fn shutdown(&mut self) {}
}

/// Builds decoders for one track; supplied by the decode engine's probe.
pub trait DecoderFactory: Send + Sync {
    fn make(&self, track: &Track, kind: DecoderKind) -> Result<Box<dyn Decoder>, EngineError>;
}

/// The decoder a pipeline owns.
pub enum TrackDecoder {
    /// Hardware decoder, keeping the factory around for the fallback.
    Hardware {
        decoder: Box<dyn Decoder>,
        factory: Arc<dyn DecoderFactory>,
    },
    Software(Box<dyn Decoder>),
}

impl TrackDecoder {
    /// Build the decoder for `track`, preferring hardware when asked.
    ///
    /// A hardware decoder that cannot be constructed is replaced by a software
    /// one straight away.
    pub fn open(
        track: &Track,
        factory: Arc<dyn DecoderFactory>,
        prefer_hardware: bool,
    ) -> Result<Self, EngineError> {
        if prefer_hardware {
            match factory.make(track, DecoderKind::Hardware) {
                Ok(decoder) => {
                    tracing::debug!(track_id = track.id, "hardware decoder opened");
                    return Ok(TrackDecoder::Hardware { decoder, factory });
                }
                Err(e) => {
                    tracing::debug!(track_id = track.id, "hardware decoder unavailable: {e}");
                }
            }
        }
        let decoder = factory.make(track, DecoderKind::Software)?;
        Ok(TrackDecoder::Software(decoder))
    }

    pub fn kind(&self) -> DecoderKind {
        match self {
            TrackDecoder::Hardware { .. } => DecoderKind::Hardware,
            TrackDecoder::Software(_) => DecoderKind::Software,
        }
    }

    /// Decode `packet`; a hardware failure falls back to software once and
    /// retries the same packet. A software failure is returned as-is.
    pub fn decode(&mut self, track: &Track, packet: &Packet) -> Result<Vec<Frame>, EngineError> {
        let mut fallback = match self {
            TrackDecoder::Software(decoder) => return decoder.decode(packet),
            TrackDecoder::Hardware { decoder, factory } => match decoder.decode(packet) {
                Ok(frames) => return Ok(frames),
                Err(e) => {
                    tracing::warn!(
                        track_id = track.id,
                        "hardware decode failed, falling back to software: {e}"
                    );
                    decoder.shutdown();
                    factory.make(track, DecoderKind::Software)?
                }
            },
        };
        let result = fallback.decode(packet);
        *self = TrackDecoder::Software(fallback);
        result
    }

    pub fn flush(&mut self) {
        match self {
            TrackDecoder::Hardware { decoder, .. } | TrackDecoder::Software(decoder) => {
                decoder.flush()
            }
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            TrackDecoder::Hardware { decoder, .. } | TrackDecoder::Software(decoder) => {
                decoder.shutdown()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::{FrameData, SubtitleFrame};
    use crate::track::{CodecParams, MediaKind, Timebase};
    use parking_lot::Mutex;

    pub(crate) fn track(id: i32, kind: MediaKind) -> Track {
        Track {
            id,
            kind,
            timebase: Timebase::MILLISECONDS,
            bit_rate: 0,
            nominal_frame_rate: 25.0,
            enabled: true,
            codec_params: CodecParams::default(),
            language: None,
        }
    }

    /// Emits one frame per packet mirroring its timing; fails on request.
    pub(crate) struct EchoDecoder {
        pub(crate) fail: bool,
        pub(crate) seen: Arc<Mutex<Vec<i64>>>,
    }

    impl Decoder for EchoDecoder {
        fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>, EngineError> {
            if self.fail {
                return Err(EngineError::decode(packet.track_id, "broken"));
            }
            self.seen.lock().push(packet.position);
            Ok(vec![Frame {
                track_id: packet.track_id,
                position: packet.position,
                duration: packet.duration,
                timebase: Timebase::MILLISECONDS,
                data: FrameData::Subtitle(SubtitleFrame {
                    text: String::new(),
                }),
            }])
        }

        fn flush(&mut self) {}
    }

    pub(crate) struct EchoFactory {
        pub(crate) hardware: Option<bool>,
        pub(crate) software_fails: bool,
        pub(crate) seen: Arc<Mutex<Vec<i64>>>,
    }

    impl DecoderFactory for EchoFactory {
        fn make(&self, track: &Track, kind: DecoderKind) -> Result<Box<dyn Decoder>, EngineError> {
            let fail = match kind {
                DecoderKind::Hardware => match self.hardware {
                    Some(fails) => fails,
                    None => {
                        return Err(EngineError::DecoderUnavailable {
                            track_id: track.id,
                            kind,
                        });
                    }
                },
                DecoderKind::Software => self.software_fails,
            };
            Ok(Box::new(EchoDecoder {
                fail,
                seen: self.seen.clone(),
            }))
        }
    }

    fn factory(hardware: Option<bool>, software_fails: bool) -> Arc<EchoFactory> {
        Arc::new(EchoFactory {
            hardware,
            software_fails,
            seen: Arc::new(Mutex::new(Vec::new())),
        })
    }

    #[test]
    fn missing_hardware_opens_software() {
        let t = track(1, MediaKind::Video);
        let dec = TrackDecoder::open(&t, factory(None, false), true).unwrap();
        assert_eq!(dec.kind(), DecoderKind::Software);
    }

    #[test]
    fn hardware_failure_falls_back_and_retries_packet() {
        let t = track(1, MediaKind::Video);
        let f = factory(Some(true), false);
        let mut dec = TrackDecoder::open(&t, f.clone(), true).unwrap();
        assert_eq!(dec.kind(), DecoderKind::Hardware);

        let frames = dec.decode(&t, &Packet::new(1, 40, 40, vec![])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(dec.kind(), DecoderKind::Software);
        assert_eq!(*f.seen.lock(), vec![40]);
    }

    #[test]
    fn second_failure_is_reported() {
        let t = track(1, MediaKind::Video);
        let mut dec = TrackDecoder::open(&t, factory(Some(true), true), true).unwrap();
        let err = dec.decode(&t, &Packet::new(1, 0, 40, vec![])).unwrap_err();
        assert_eq!(err, EngineError::decode(1, "broken"));
        assert_eq!(dec.kind(), DecoderKind::Software);
    }

    #[test]
    fn software_preference_skips_hardware() {
        let t = track(2, MediaKind::Audio);
        let dec = TrackDecoder::open(&t, factory(Some(false), false), false).unwrap();
        assert_eq!(dec.kind(), DecoderKind::Software);
    }
}
