//! Per-track decode state machine.
//!
//! Two variants share one state machine:
//! - synchronous: `put_packet` decodes inline on the reading thread
//! - asynchronous: `put_packet` queues the packet; a dedicated decode thread
//!   drains the queue into the frame queue
//!
//! Packets are grouped in runs, one per loop iteration. A loop boundary closes
//! the run being written and opens a new one, so the decode thread always
//! drains one iteration completely before it sees a packet of the next.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffering::TrackLoad;
use crate::config::EngineConfig;
use crate::decoder::TrackDecoder;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::frame::{Frame, Packet};
use crate::queue::FrameQueue;
use crate::track::{MediaKind, ProbedTrack, Track};

/// How long the decode thread waits for a packet before re-checking its state.
/// The timeout is how it notices a completed run, a swapped-in loop run or end
/// of file; a plain blocking pop would never see them.
const PACKET_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Decoding,
    Flush,
    Closed,
    Failed,
    Finished,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Closed | PipelineState::Failed)
    }
}

/// Packets of one loop iteration.
struct PacketRun {
    queue: FrameQueue<Packet>,
    /// No more packets will be written to this run.
    complete: AtomicBool,
}

impl PacketRun {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: FrameQueue::packets(capacity),
            complete: AtomicBool::new(false),
        })
    }

    fn is_drained(&self) -> bool {
        self.complete.load(Ordering::SeqCst) && self.queue.is_empty()
    }
}

struct Control {
    state: PipelineState,
    /// Frames ending at or before this time (seconds) are discarded; 0 disables.
    seek_time: f64,
    iteration: u32,
    /// Timeline offset added to frames of the current iteration.
    offset: i64,
    /// Highest raw frame end seen, in track timebase units.
    max_raw_end: i64,
    /// End of file reached (synchronous variant).
    end_of_file: bool,
    /// Run the decode thread drains.
    active: Arc<PacketRun>,
    /// Runs of later loop iterations, oldest first.
    pending: VecDeque<Arc<PacketRun>>,
}

impl Control {
    /// Run the reading thread writes into.
    fn writing(&self) -> &Arc<PacketRun> {
        self.pending.back().unwrap_or(&self.active)
    }

    fn shutdown_runs(&mut self) {
        self.active.queue.shutdown();
        for run in self.pending.drain(..) {
            run.queue.shutdown();
        }
    }

    fn packet_count(&self) -> usize {
        self.active.queue.count() + self.pending.iter().map(|r| r.queue.count()).sum::<usize>()
    }
}

struct Shared {
    track: Track,
    enabled: AtomicBool,
    synchronous: bool,
    /// Loop iteration length from the container duration, in track units.
    loop_span: i64,
    packet_capacity: usize,
    frames: FrameQueue<Frame>,
    control: Mutex<Control>,
    wake: Condvar,
    /// Bumped by every seek; frames decoded under an older generation are stale.
    generation: AtomicU64,
    events: EventSink,
}

impl Shared {
    fn decode_frame(
        &self,
        decoder: &mut TrackDecoder,
        packet: &Packet,
    ) -> Result<Vec<Frame>, EngineError> {
        decoder.decode(&self.track, packet)
    }

    fn decode_and_deliver(&self, decoder: &mut TrackDecoder, packet: &Packet, generation: u64) {
        match self.decode_frame(decoder, packet) {
            Ok(frames) => self.deliver(frames, generation),
            Err(e) => self.fail(e),
        }
    }

    fn deliver(&self, frames: Vec<Frame>, generation: u64) {
        let evict_oldest = self.synchronous && self.track.kind == MediaKind::Subtitle;
        for mut frame in frames {
            {
                let mut c = self.control.lock();
                if self.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let raw_end = frame.position.saturating_add(frame.duration);
                c.max_raw_end = c.max_raw_end.max(raw_end);
                frame.position = frame.position.saturating_add(c.offset);
                if c.seek_time > 0.0 {
                    if frame.end_seconds() <= c.seek_time {
                        tracing::trace!(
                            track_id = self.track.id,
                            seconds = frame.seconds(),
                            "pre-roll frame discarded"
                        );
                        continue;
                    }
                    c.seek_time = 0.0;
                }
            }
            // Nothing guarantees subtitle cues get consumed; never block reading on them.
            if evict_oldest && self.frames.count() + 1 >= self.frames.max_count() {
                self.frames.pop(false, None);
            }
            let pushed = self.frames.push_if(frame, || {
                self.generation.load(Ordering::SeqCst) == generation
            });
            if !pushed {
                return;
            }
        }
    }

    fn fail(&self, error: EngineError) {
        {
            let mut c = self.control.lock();
            if c.state.is_terminal() {
                return;
            }
            c.state = PipelineState::Failed;
            c.shutdown_runs();
        }
        tracing::error!(track_id = self.track.id, "track decode failed: {error}");
        self.events.emit(EngineEvent::TrackFailed {
            track_id: self.track.id,
            error,
        });
    }

    fn iteration_span(&self, c: &Control) -> i64 {
        self.loop_span.max(c.max_raw_end)
    }

    /// Swap in the next loop iteration once `drained` is exhausted, or finish.
    fn advance_run(&self, drained: &Arc<PacketRun>) {
        if !drained.is_drained() {
            return;
        }
        let mut c = self.control.lock();
        if !Arc::ptr_eq(&c.active, drained) || c.state != PipelineState::Decoding {
            return;
        }
        match c.pending.pop_front() {
            Some(next) => {
                c.active = next;
                c.iteration += 1;
                let span = self.iteration_span(&c);
                c.offset = c.offset.saturating_add(span);
                tracing::debug!(
                    track_id = self.track.id,
                    iteration = c.iteration,
                    "next loop iteration"
                );
            }
            None => {
                c.state = PipelineState::Finished;
                drop(c);
                tracing::debug!(track_id = self.track.id, "track finished");
                self.events.emit(EngineEvent::TrackFinished {
                    track_id: self.track.id,
                });
            }
        }
    }

    fn is_end_of_file(&self, c: &Control) -> bool {
        if c.state == PipelineState::Failed {
            return true;
        }
        if self.synchronous {
            c.end_of_file
        } else {
            c.active.complete.load(Ordering::SeqCst) && c.pending.is_empty()
        }
    }
}

/// Turns the packets of one track into queued frames.
pub struct DecodePipeline {
    shared: Arc<Shared>,
    /// Decoder of the synchronous variant; the asynchronous one owns it on its thread.
    decoder: Option<Mutex<TrackDecoder>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DecodePipeline {
    /// Build the pipeline for a probed track; `duration` is the container
    /// duration used to lay loop iterations end to end.
    pub fn new(
        probed: ProbedTrack,
        config: &EngineConfig,
        duration: f64,
        events: EventSink,
    ) -> Result<Self, EngineError> {
        let ProbedTrack {
            track, decoders, ..
        } = probed;
        let decoder = TrackDecoder::open(&track, decoders, config.hardware_decode)?;
        let synchronous = config.sync_decode(track.kind);
        let track_id = track.id;

        tracing::debug!(
            track_id,
            kind = ?track.kind,
            synchronous,
            decoder = %decoder.kind(),
            "decode pipeline created"
        );

        let packet_capacity = config.packet_queue_capacity;
        let shared = Arc::new(Shared {
            enabled: AtomicBool::new(track.enabled),
            synchronous,
            loop_span: track.timebase.from_seconds(duration).max(0),
            packet_capacity,
            frames: FrameQueue::frames(config.frame_capacity(track.kind)),
            control: Mutex::new(Control {
                state: if synchronous {
                    PipelineState::Idle
                } else {
                    PipelineState::Decoding
                },
                seek_time: 0.0,
                iteration: 0,
                offset: 0,
                max_raw_end: 0,
                end_of_file: false,
                active: PacketRun::new(packet_capacity),
                pending: VecDeque::new(),
            }),
            wake: Condvar::new(),
            generation: AtomicU64::new(0),
            events,
            track,
        });

        if synchronous {
            return Ok(Self {
                shared,
                decoder: Some(Mutex::new(decoder)),
                worker: Mutex::new(None),
            });
        }

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("decode-{track_id}"))
            .spawn(move || decode_thread_main(worker_shared, decoder))
            .map_err(|e| EngineError::decode(track_id, format!("spawn decode thread: {e}")))?;

        Ok(Self {
            shared,
            decoder: None,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn track(&self) -> &Track {
        &self.shared.track
    }

    pub fn id(&self) -> i32 {
        self.shared.track.id
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.track.kind
    }

    pub fn is_synchronous(&self) -> bool {
        self.shared.synchronous
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn state(&self) -> PipelineState {
        self.shared.control.lock().state
    }

    /// Current loop iteration (0 before the first loop boundary is drained).
    pub fn iteration(&self) -> u32 {
        self.shared.control.lock().iteration
    }

    /// Whether packets of a later loop iteration are waiting behind the current one.
    pub fn is_loop_model(&self) -> bool {
        !self.shared.control.lock().pending.is_empty()
    }

    /// Decoded frames, for the renderer to pull.
    pub fn frames(&self) -> &FrameQueue<Frame> {
        &self.shared.frames
    }

    /// Hand one packet to the pipeline.
    pub fn put_packet(&self, packet: Packet) {
        match &self.decoder {
            Some(decoder) => self.decode_inline(decoder, packet),
            None => {
                let run = {
                    let c = self.shared.control.lock();
                    if c.state.is_terminal() {
                        return;
                    }
                    c.writing().clone()
                };
                run.queue.push(packet);
            }
        }
    }

    fn decode_inline(&self, decoder: &Mutex<TrackDecoder>, packet: Packet) {
        let mut decoder = decoder.lock();
        let generation = {
            let mut c = self.shared.control.lock();
            match c.state {
                PipelineState::Closed | PipelineState::Failed => return,
                PipelineState::Flush => {
                    decoder.flush();
                    c.state = PipelineState::Decoding;
                }
                PipelineState::Idle | PipelineState::Finished => {
                    c.state = PipelineState::Decoding;
                }
                PipelineState::Decoding => {}
            }
            self.shared.generation.load(Ordering::SeqCst)
        };
        self.shared
            .decode_and_deliver(&mut decoder, &packet, generation);
    }

    /// No more packets until the next seek.
    pub fn mark_end_of_file(&self) {
        let mut c = self.shared.control.lock();
        if c.state.is_terminal() {
            return;
        }
        if !self.shared.synchronous {
            c.writing().complete.store(true, Ordering::SeqCst);
            return;
        }
        c.end_of_file = true;
        if c.state == PipelineState::Finished {
            return;
        }
        c.state = PipelineState::Finished;
        drop(c);
        self.shared.events.emit(EngineEvent::TrackFinished {
            track_id: self.id(),
        });
    }

    /// The reading position jumped back to the start for another iteration.
    ///
    /// Packets written from now on belong to the next iteration; the current
    /// ones drain first.
    pub fn begin_loop(&self) {
        let mut c = self.shared.control.lock();
        if c.state.is_terminal() {
            return;
        }
        if self.shared.synchronous {
            c.iteration += 1;
            let span = self.shared.iteration_span(&c);
            c.offset = c.offset.saturating_add(span);
        } else {
            c.writing().complete.store(true, Ordering::SeqCst);
            c.pending
                .push_back(PacketRun::new(self.shared.packet_capacity));
        }
        tracing::debug!(track_id = self.id(), pending = c.pending.len(), "loop boundary");
    }

    /// Drop everything queued and restart decoding from the next packet.
    ///
    /// With `seek_time`, frames ending at or before it are trimmed.
    pub fn seek(&self, seek_time: Option<f64>) {
        {
            let mut c = self.shared.control.lock();
            if c.state.is_terminal() {
                return;
            }
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            c.state = PipelineState::Flush;
            c.seek_time = seek_time.filter(|t| t.is_finite() && *t > 0.0).unwrap_or(0.0);
            c.iteration = 0;
            c.offset = 0;
            c.end_of_file = false;
            c.shutdown_runs();
            c.active = PacketRun::new(self.shared.packet_capacity);
        }
        self.shared.frames.flush();
        self.shared.wake.notify_all();
    }

    /// Discard decoded frames until one ends after `seconds`.
    pub fn set_seek_time(&self, seconds: f64) {
        self.shared.control.lock().seek_time = seconds.max(0.0);
    }

    /// Let a reading thread blocked on a full frame queue return without
    /// dropping what is queued. Only synchronous pipelines hold the reading thread.
    pub(crate) fn release_writer(&self) {
        if self.shared.synchronous {
            self.shared.frames.release_writers();
        }
    }

    pub(crate) fn resume_writer(&self) {
        self.shared.frames.resume_writers();
    }

    pub fn is_end_of_file(&self) -> bool {
        let c = self.shared.control.lock();
        self.shared.is_end_of_file(&c)
    }

    /// Finished (or failed) with nothing left to render.
    pub fn is_drained(&self) -> bool {
        matches!(
            self.state(),
            PipelineState::Finished | PipelineState::Failed
        ) && self.shared.frames.is_empty()
    }

    /// Queue depths for the buffering policy.
    pub fn load(&self) -> TrackLoad {
        let (packet_count, is_end_of_file) = {
            let c = self.shared.control.lock();
            (c.packet_count(), self.shared.is_end_of_file(&c))
        };
        TrackLoad {
            kind: self.kind(),
            packet_count,
            frame_count: self.shared.frames.count(),
            frame_max_count: self.shared.frames.max_count(),
            fps: self.shared.track.fps(),
            is_end_of_file,
        }
    }

    /// Stop decoding and release every waiter. Idempotent.
    pub fn shutdown(&self) {
        let first = {
            let mut c = self.shared.control.lock();
            let first = c.state != PipelineState::Closed;
            c.state = PipelineState::Closed;
            c.shutdown_runs();
            first
        };
        self.shared.frames.shutdown();
        self.shared.wake.notify_all();

        if first {
            if let Some(decoder) = &self.decoder {
                decoder.lock().shutdown();
            }
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(track_id = self.id(), "decode thread panicked");
            }
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn decode_thread_main(shared: Arc<Shared>, mut decoder: TrackDecoder) {
    loop {
        let (state, generation, run) = {
            let mut c = shared.control.lock();
            if c.state == PipelineState::Finished {
                shared.wake.wait(&mut c);
                continue;
            }
            (
                c.state,
                shared.generation.load(Ordering::SeqCst),
                c.active.clone(),
            )
        };

        match state {
            PipelineState::Idle | PipelineState::Closed | PipelineState::Failed => {
                decoder.shutdown();
                break;
            }
            PipelineState::Flush => {
                decoder.flush();
                let mut c = shared.control.lock();
                if c.state == PipelineState::Flush {
                    c.state = PipelineState::Decoding;
                }
            }
            PipelineState::Finished => {}
            PipelineState::Decoding => match run.queue.pop_timeout(PACKET_POLL, None) {
                Some(packet) => shared.decode_and_deliver(&mut decoder, &packet, generation),
                None => shared.advance_run(&run),
            },
        }
    }
    tracing::debug!(track_id = shared.track.id, "decode thread exited");
}
