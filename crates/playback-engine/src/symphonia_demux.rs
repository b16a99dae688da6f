//! Decode engine backed by Symphonia.
//!
//! Opens local files (plain paths or `file://` URLs), exposes every decodable
//! audio track, and decodes packets to interleaved `f32`. Symphonia has no
//! hardware decoders; asking for one reports [`EngineError::DecoderUnavailable`].

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::decoder::{Decoder, DecoderFactory, DecoderKind};
use crate::demux::{DemuxEngine, DemuxHandle, Interrupt, OpenOptions, ReadOutcome, SeekFlags};
use crate::error::{EngineError, OpenStage};
use crate::frame::{AudioFrame, Frame, FrameData, Packet};
use crate::track::{CodecParams, MediaKind, ProbedTrack, Timebase, Track};

/// Samples per packet assumed when the container does not say.
const DEFAULT_FRAMES_PER_PACKET: u64 = 1024;

/// [`DemuxEngine`] over local files.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaEngine;

impl DemuxEngine for SymphoniaEngine {
    fn open(
        &self,
        url: &str,
        options: &OpenOptions,
        interrupt: Interrupt,
    ) -> Result<Box<dyn DemuxHandle>, EngineError> {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        let file = File::open(path).map_err(|e| EngineError::open(OpenStage::OpenInput, e))?;
        let byte_len = file.metadata().ok().map(|m| m.len());

        let mut hint = Hint::new();
        match options.format_hint.as_deref() {
            Some(ext) => {
                hint.with_extension(ext);
            }
            None => {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
            }
        }

        let source = InterruptibleFile {
            file,
            byte_len,
            interrupt: interrupt.clone(),
        };
        let mss = MediaSourceStream::new(Box::new(source), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::open(OpenStage::StreamInfo, e))?;

        let format = probed.format;
        let duration = format
            .default_track()
            .and_then(|t| duration_seconds(&t.codec_params))
            .unwrap_or(0.0);
        tracing::debug!(url, duration, tracks = format.tracks().len(), "symphonia probe");

        Ok(Box::new(SymphoniaHandle {
            format,
            interrupt,
            duration,
        }))
    }
}

/// File that fails reads once the interrupt flag is set.
struct InterruptibleFile {
    file: File,
    byte_len: Option<u64>,
    interrupt: Interrupt,
}

impl Read for InterruptibleFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.interrupt.is_set() {
            // Not `Interrupted`: readers retry on that kind.
            return Err(io::Error::other("read interrupted"));
        }
        self.file.read(buf)
    }
}

impl Seek for InterruptibleFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl MediaSource for InterruptibleFile {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }
}

struct SymphoniaHandle {
    format: Box<dyn FormatReader>,
    interrupt: Interrupt,
    duration: f64,
}

impl DemuxHandle for SymphoniaHandle {
    fn probe(&mut self) -> Result<Vec<ProbedTrack>, EngineError> {
        let default_id = self.format.default_track().map(|t| t.id);
        let tracks = self
            .format
            .tracks()
            .iter()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .filter_map(|t| {
                let params = &t.codec_params;
                let rate = params.sample_rate.filter(|r| *r > 0)?;
                let timebase = params
                    .time_base
                    .and_then(|tb| {
                        Some(Timebase::new(
                            i32::try_from(tb.numer).ok()?,
                            i32::try_from(tb.denom).ok()?,
                        ))
                    })
                    .unwrap_or(Timebase::new(1, i32::try_from(rate).ok()?));
                let frames_per_packet = params
                    .max_frames_per_packet
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_FRAMES_PER_PACKET);
                let channels = params.channels.map(|c| c.count() as u16);
                let is_default = Some(t.id) == default_id;
                let track = Track {
                    id: track_id(t.id),
                    kind: MediaKind::Audio,
                    timebase,
                    bit_rate: bit_rate(params),
                    nominal_frame_rate: rate as f32 / frames_per_packet as f32,
                    enabled: is_default,
                    codec_params: CodecParams {
                        codec: codec_name(params),
                        sample_rate: Some(rate),
                        channels,
                        width: None,
                        height: None,
                    },
                    language: t.language.clone(),
                };
                Some(ProbedTrack {
                    track,
                    is_default,
                    decoders: Arc::new(SymphoniaDecoders {
                        source_track_id: t.id,
                        params: params.clone(),
                    }),
                })
            })
            .collect();
        Ok(tracks)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, EngineError> {
        loop {
            match self.format.next_packet() {
                Ok(packet) => {
                    return Ok(ReadOutcome::Packet(Packet::new(
                        track_id(packet.track_id()),
                        i64::try_from(packet.ts()).unwrap_or(i64::MAX),
                        i64::try_from(packet.dur()).unwrap_or(i64::MAX),
                        packet.buf().to_vec(),
                    )));
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(ReadOutcome::EndOfFile);
                }
                Err(SymphoniaError::IoError(_)) if self.interrupt.is_set() => {
                    return Err(EngineError::Interrupted);
                }
                Err(SymphoniaError::ResetRequired) => {
                    tracing::warn!("stream parameters changed mid-stream; ending");
                    return Ok(ReadOutcome::EndOfFile);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("skipping corrupt packet: {e}");
                }
                Err(e) => return Err(EngineError::Read(e.to_string())),
            }
        }
    }

    fn seek(&mut self, seconds: f64, flags: SeekFlags) -> Result<(), EngineError> {
        let seconds = seconds.max(0.0);
        let mode = if flags.backward {
            SeekMode::Accurate
        } else {
            SeekMode::Coarse
        };
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        self.format
            .seek(
                mode,
                SeekTo::Time {
                    time,
                    track_id: None,
                },
            )
            .map(|seeked| {
                tracing::debug!(
                    seconds,
                    actual_ts = seeked.actual_ts,
                    required_ts = seeked.required_ts,
                    "symphonia seek"
                );
            })
            .map_err(|e| EngineError::Seek {
                seconds,
                reason: e.to_string(),
            })
    }

    fn close(&mut self) {
        tracing::debug!("symphonia handle closed");
    }
}

struct SymphoniaDecoders {
    source_track_id: u32,
    params: CodecParameters,
}

impl DecoderFactory for SymphoniaDecoders {
    fn make(&self, track: &Track, kind: DecoderKind) -> Result<Box<dyn Decoder>, EngineError> {
        if kind == DecoderKind::Hardware {
            return Err(EngineError::DecoderUnavailable {
                track_id: track.id,
                kind,
            });
        }
        let decoder = symphonia::default::get_codecs()
            .make(&self.params, &DecoderOptions::default())
            .map_err(|e| EngineError::decode(track.id, e))?;
        Ok(Box::new(SymphoniaDecoder {
            decoder,
            source_track_id: self.source_track_id,
            track_id: track.id,
            timebase: track.timebase,
        }))
    }
}

struct SymphoniaDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    source_track_id: u32,
    track_id: i32,
    timebase: Timebase,
}

impl Decoder for SymphoniaDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>, EngineError> {
        let source_packet = symphonia::core::formats::Packet::new_from_slice(
            self.source_track_id,
            packet.position.max(0) as u64,
            packet.duration.max(0) as u64,
            &packet.payload,
        );
        let decoded = match self.decoder.decode(&source_packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(track_id = self.track_id, "skipping undecodable packet: {e}");
                return Ok(Vec::new());
            }
            Err(e) => return Err(EngineError::decode(self.track_id, e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(Vec::new());
        }
        let mut samples = SampleBuffer::<f32>::new(frames as u64, spec);
        samples.copy_interleaved_ref(decoded);

        let duration = if packet.duration > 0 {
            packet.duration
        } else {
            self.timebase
                .from_seconds(frames as f64 / spec.rate.max(1) as f64)
        };
        Ok(vec![Frame {
            track_id: self.track_id,
            position: packet.position,
            duration,
            timebase: self.timebase,
            data: FrameData::Audio(AudioFrame {
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
                samples: samples.samples().to_vec(),
            }),
        }])
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}

fn track_id(id: u32) -> i32 {
    i32::try_from(id).unwrap_or(i32::MAX)
}

/// Best-effort duration in seconds from codec metadata.
fn duration_seconds(params: &CodecParameters) -> Option<f64> {
    let frames = params.n_frames?;
    let rate = params.sample_rate.filter(|r| *r > 0)?;
    Some(frames as f64 / rate as f64)
}

/// Nominal bitrate for uncompressed layouts; 0 when unknown.
fn bit_rate(params: &CodecParameters) -> i64 {
    match (params.sample_rate, params.channels, params.bits_per_sample) {
        (Some(rate), Some(channels), Some(bits)) => {
            rate as i64 * channels.count() as i64 * bits as i64
        }
        _ => 0,
    }
}

/// Best-effort codec label used for status payloads.
fn codec_name(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// Mono 16-bit PCM WAV of `seconds` at `rate`, written to a unique temp path.
    fn write_wav(name: &str, rate: u32, seconds: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "playback-engine-{name}-{}-{}.wav",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let samples = rate * seconds;
        let data_len = samples * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..samples {
            let v = ((i % 100) as i16 - 50) * 100;
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut file = File::create(&path).unwrap();
        file.write_all(&bytes).unwrap();
        path
    }

    fn open(path: &Path) -> Box<dyn DemuxHandle> {
        SymphoniaEngine
            .open(
                path.to_str().unwrap(),
                &OpenOptions::default(),
                Interrupt::new(),
            )
            .unwrap()
    }

    #[test]
    fn probes_wav_track() {
        let path = write_wav("probe", 8_000, 1);
        let mut handle = open(&path);
        let tracks = handle.probe().unwrap();
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0].track;
        assert_eq!(track.kind, MediaKind::Audio);
        assert!(track.enabled);
        assert!(tracks[0].is_default);
        assert_eq!(track.codec_params.sample_rate, Some(8_000));
        assert_eq!(track.codec_params.channels, Some(1));
        assert_eq!(track.codec_params.codec.as_deref(), Some("PCM_S16"));
        assert_eq!(track.bit_rate, 128_000);
        assert!((handle.duration() - 1.0).abs() < 1e-6);
        handle.close();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn reads_and_decodes_every_sample() {
        let path = write_wav("decode", 8_000, 1);
        let mut handle = open(&path);
        let tracks = handle.probe().unwrap();
        let probed = &tracks[0];
        let mut decoder = probed
            .decoders
            .make(&probed.track, DecoderKind::Software)
            .unwrap();

        let mut total = 0;
        let mut last_position = -1;
        while let ReadOutcome::Packet(packet) = handle.read_packet().unwrap() {
            assert!(packet.position > last_position);
            last_position = packet.position;
            for frame in decoder.decode(&packet).unwrap() {
                let audio = frame.as_audio().unwrap();
                assert_eq!(audio.sample_rate, 8_000);
                total += audio.frames();
            }
        }
        assert_eq!(total, 8_000);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn seek_repositions_reading() {
        let path = write_wav("seek", 8_000, 2);
        let mut handle = open(&path);
        let tracks = handle.probe().unwrap();
        let timebase = tracks[0].track.timebase;
        handle.seek(1.0, SeekFlags { backward: true }).unwrap();
        let ReadOutcome::Packet(packet) = handle.read_packet().unwrap() else {
            panic!("expected a packet after seek");
        };
        let seconds = timebase.to_seconds(packet.position);
        assert!((0.5..=1.0).contains(&seconds), "landed at {seconds}");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn interrupt_aborts_reads() {
        let path = write_wav("interrupt", 8_000, 12);
        let interrupt = Interrupt::new();
        let mut handle = SymphoniaEngine
            .open(path.to_str().unwrap(), &OpenOptions::default(), interrupt.clone())
            .unwrap();
        handle.probe().unwrap();
        interrupt.set();
        let mut outcome = Ok(ReadOutcome::EndOfFile);
        // Already-buffered bytes may still yield a few packets.
        for _ in 0..1_000 {
            outcome = handle.read_packet();
            if !matches!(outcome, Ok(ReadOutcome::Packet(_))) {
                break;
            }
        }
        assert_eq!(outcome, Err(EngineError::Interrupted));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_fails_open_input() {
        let err = SymphoniaEngine
            .open(
                "file:///definitely/not/here.flac",
                &OpenOptions::default(),
                Interrupt::new(),
            )
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngineError::Open {
                stage: OpenStage::OpenInput,
                ..
            }
        ));
    }

    #[test]
    fn no_hardware_decoders() {
        let path = write_wav("hw", 8_000, 1);
        let mut handle = open(&path);
        let tracks = handle.probe().unwrap();
        let err = tracks[0]
            .decoders
            .make(&tracks[0].track, DecoderKind::Hardware)
            .err()
            .unwrap();
        assert_eq!(
            err,
            EngineError::DecoderUnavailable {
                track_id: tracks[0].track.id,
                kind: DecoderKind::Hardware
            }
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn codec_names_and_duration() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_seconds(&params), Some(2.0));
        params.sample_rate = Some(0);
        assert_eq!(duration_seconds(&params), None);
        assert!(codec_name(&params).is_none());
        params.codec = symphonia::core::codecs::CODEC_TYPE_FLAC;
        assert_eq!(codec_name(&params).as_deref(), Some("FLAC"));
    }
}
