#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use playback_engine::decoder::{Decoder, DecoderFactory, DecoderKind};
use playback_engine::demux::{
    DemuxEngine, DemuxHandle, Interrupt, OpenOptions, ReadOutcome, SeekFlags,
};
use playback_engine::error::{EngineError, OpenStage};
use playback_engine::frame::{AudioFrame, Frame, FrameData, Packet, SubtitleFrame, VideoFrame};
use playback_engine::track::{CodecParams, MediaKind, ProbedTrack, Timebase, Track};

pub const AUDIO_ID: i32 = 1;
/// First video track; alternate encodes follow as `VIDEO_ID + 1`, ...
pub const VIDEO_ID: i32 = 2;
pub const SUBTITLE_ID: i32 = 20;

/// Scripted in-memory media: fixed-length packets on a millisecond timebase.
#[derive(Clone, Debug)]
pub struct MockEngine {
    pub duration_ms: i64,
    pub packet_ms: i64,
    /// Seeks land on multiples of this.
    pub keyframe_ms: i64,
    /// One video track per entry; the first is the demuxer default.
    pub video_bitrates: Vec<i64>,
    pub with_subtitles: bool,
    pub fail_open: bool,
    pub fail_seek: bool,
    /// Time every handle seek takes.
    pub seek_delay: Duration,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    /// `(seconds, backward)` of every handle seek, in call order.
    pub seeks: Arc<Mutex<Vec<(f64, bool)>>>,
}

impl MockEngine {
    pub fn audio(duration_ms: i64) -> Self {
        Self {
            duration_ms,
            packet_ms: 100,
            keyframe_ms: 1_000,
            video_bitrates: Vec::new(),
            with_subtitles: false,
            fail_open: false,
            fail_seek: false,
            seek_delay: Duration::ZERO,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_video(self) -> Self {
        self.with_video_ladder(&[128_000])
    }

    pub fn with_video_ladder(mut self, bitrates: &[i64]) -> Self {
        self.video_bitrates = bitrates.to_vec();
        self
    }

    pub fn with_subtitles(mut self) -> Self {
        self.with_subtitles = true;
        self
    }

    pub fn failing_seeks(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    fn track_ids(&self) -> Vec<i32> {
        let mut ids = vec![AUDIO_ID];
        ids.extend((0..self.video_bitrates.len()).map(|i| VIDEO_ID + i as i32));
        if self.with_subtitles {
            ids.push(SUBTITLE_ID);
        }
        ids
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::audio(1_000)
        }
    }
}

impl DemuxEngine for MockEngine {
    fn open(
        &self,
        url: &str,
        _options: &OpenOptions,
        interrupt: Interrupt,
    ) -> Result<Box<dyn DemuxHandle>, EngineError> {
        if self.fail_open {
            return Err(EngineError::open(
                OpenStage::OpenInput,
                format!("no such media: {url}"),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let ids = self.track_ids();
        let mut packets = Vec::new();
        let mut position = 0;
        while position < self.duration_ms {
            for &id in &ids {
                packets.push(Packet::new(id, position, self.packet_ms, vec![id as u8; 4]));
            }
            position += self.packet_ms;
        }
        Ok(Box::new(MockHandle {
            engine: self.clone(),
            packets,
            cursor: 0,
            interrupt,
        }))
    }
}

pub struct MockHandle {
    engine: MockEngine,
    packets: Vec<Packet>,
    cursor: usize,
    interrupt: Interrupt,
}

impl DemuxHandle for MockHandle {
    fn probe(&mut self) -> Result<Vec<ProbedTrack>, EngineError> {
        let fps = 1_000.0 / self.engine.packet_ms as f32;
        let mut tracks = vec![mock_track(AUDIO_ID, MediaKind::Audio, fps, 128_000, true)];
        for (i, &bit_rate) in self.engine.video_bitrates.iter().enumerate() {
            tracks.push(mock_track(VIDEO_ID + i as i32, MediaKind::Video, fps, bit_rate, i == 0));
        }
        if self.engine.with_subtitles {
            tracks.push(mock_track(SUBTITLE_ID, MediaKind::Subtitle, fps, 0, false));
        }
        Ok(tracks)
    }

    fn duration(&self) -> f64 {
        self.engine.duration_ms as f64 / 1_000.0
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, EngineError> {
        if self.interrupt.is_set() {
            return Err(EngineError::Interrupted);
        }
        match self.packets.get(self.cursor) {
            Some(packet) => {
                self.cursor += 1;
                Ok(ReadOutcome::Packet(packet.clone()))
            }
            None => Ok(ReadOutcome::EndOfFile),
        }
    }

    fn seek(&mut self, seconds: f64, flags: SeekFlags) -> Result<(), EngineError> {
        self.engine.seeks.lock().push((seconds, flags.backward));
        if !self.engine.seek_delay.is_zero() {
            std::thread::sleep(self.engine.seek_delay);
        }
        if self.engine.fail_seek {
            return Err(EngineError::Seek {
                seconds,
                reason: "not seekable".into(),
            });
        }
        let target_ms = (seconds * 1_000.0).round() as i64;
        let keyframe = target_ms - target_ms.rem_euclid(self.engine.keyframe_ms);
        self.cursor = self
            .packets
            .iter()
            .position(|p| p.position >= keyframe)
            .unwrap_or(self.packets.len());
        Ok(())
    }

    fn close(&mut self) {
        self.engine.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn mock_track(id: i32, kind: MediaKind, fps: f32, bit_rate: i64, is_default: bool) -> ProbedTrack {
    ProbedTrack {
        track: Track {
            id,
            kind,
            timebase: Timebase::MILLISECONDS,
            bit_rate,
            nominal_frame_rate: fps,
            enabled: true,
            codec_params: CodecParams {
                codec: Some("mock".into()),
                sample_rate: (kind == MediaKind::Audio).then_some(1_000),
                channels: (kind == MediaKind::Audio).then_some(1),
                width: (kind == MediaKind::Video).then_some(2),
                height: (kind == MediaKind::Video).then_some(2),
            },
            language: None,
        },
        is_default,
        decoders: Arc::new(MockDecoders),
    }
}

struct MockDecoders;

impl DecoderFactory for MockDecoders {
    fn make(&self, track: &Track, kind: DecoderKind) -> Result<Box<dyn Decoder>, EngineError> {
        if kind == DecoderKind::Hardware {
            return Err(EngineError::DecoderUnavailable {
                track_id: track.id,
                kind,
            });
        }
        Ok(Box::new(MockDecoder {
            track_id: track.id,
            kind: track.kind,
        }))
    }
}

struct MockDecoder {
    track_id: i32,
    kind: MediaKind,
}

impl Decoder for MockDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>, EngineError> {
        let data = match self.kind {
            MediaKind::Video => FrameData::Video(VideoFrame {
                width: 2,
                height: 2,
                data: packet.payload.clone(),
            }),
            MediaKind::Subtitle => FrameData::Subtitle(SubtitleFrame {
                text: format!("cue {}", packet.position),
            }),
            MediaKind::Audio => FrameData::Audio(AudioFrame {
                sample_rate: 1_000,
                channels: 1,
                samples: vec![0.0; packet.duration as usize],
            }),
        };
        Ok(vec![Frame {
            track_id: self.track_id,
            position: packet.position,
            duration: packet.duration,
            timebase: Timebase::MILLISECONDS,
            data,
        }])
    }

    fn flush(&mut self) {}
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
