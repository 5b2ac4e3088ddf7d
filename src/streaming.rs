// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! The background buffer-streaming engine. One low-priority thread wakes at
//! a fixed rate; each tick it snapshots the active-stream set, then refills
//! every stream with free ring slots: decode a chunk, convert to 16-bit PCM
//! with saturation, resubmit to the stream's voice. Looped streams reopen
//! their decoder at end-of-data; finished streams leave the set and a
//! completion event is queued for the caller thread. Stop is never
//! cooperative: a caller stopping a voice relies on the generation check in
//! the voice router to discard any in-flight fill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{debug, warn};

use crate::backend::BufferDescriptor;
use crate::voice::{VoiceHandle, VoiceRouter};

pub mod decoder;

pub use decoder::{StreamDecoder, SymphoniaDecoder};

/// Sent to the caller thread when a stream has delivered all of its data.
/// The engine pump hands the voice over to end-of-playback polling.
#[derive(Clone, Copy, Debug)]
pub struct StreamEvent {
    pub sound: usize,
    pub voice: VoiceHandle,
}

struct StreamControl {
    stopped: bool,
    looped: bool,
}

/// One active stream: a decoder cursor feeding ring buffers into a voice.
/// The decoder mutex serializes prepare/fill work, the control mutex
/// serializes stop requests against the fill thread; together they guard
/// the Play/Stop/Dispose races.
pub struct StreamingSession {
    voice: VoiceHandle,
    sound: usize,
    decoder: Mutex<Box<dyn StreamDecoder>>,
    control: Mutex<StreamControl>,
}

impl StreamingSession {
    pub(crate) fn new(
        voice: VoiceHandle,
        sound: usize,
        decoder: Box<dyn StreamDecoder>,
        looped: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            voice,
            sound,
            decoder: Mutex::new(decoder),
            control: Mutex::new(StreamControl {
                stopped: false,
                looped,
            }),
        })
    }

    pub(crate) fn voice(&self) -> VoiceHandle {
        self.voice
    }

    fn mark_stopped(&self) {
        self.control.lock().stopped = true;
    }
}

struct Shared {
    streams: Mutex<Vec<Arc<StreamingSession>>>,
    running: AtomicBool,
}

/// Owns the active-stream set and the background fill thread.
pub struct Streamer {
    shared: Arc<Shared>,
    router: Arc<VoiceRouter>,
    events: Sender<StreamEvent>,
    tick_interval: Duration,
    ring_size: usize,
    chunk_frames: usize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Streamer {
    pub(crate) fn new(
        router: Arc<VoiceRouter>,
        events: Sender<StreamEvent>,
        tick_interval: Duration,
        ring_size: usize,
        chunk_frames: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                streams: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
            router,
            events,
            tick_interval,
            ring_size,
            chunk_frames,
            thread: Mutex::new(None),
        }
    }

    /// Starts the background fill thread.
    pub(crate) fn spawn(&self) {
        let shared = self.shared.clone();
        let router = self.router.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;
        let ring_size = self.ring_size;
        let chunk_frames = self.chunk_frames;

        shared.running.store(true, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name("stream-fill".to_string())
            .spawn(move || {
                // Filling is elastic; playback must never wait on it, so the
                // thread runs below normal priority.
                if set_current_thread_priority(ThreadPriority::Min).is_err() {
                    debug!("could not lower stream-fill thread priority");
                }
                while shared.running.load(Ordering::Relaxed) {
                    fill_streams(&shared, &router, &events, ring_size, chunk_frames);
                    thread::sleep(tick_interval);
                }
            })
            .expect("spawning the stream-fill thread");
        *self.thread.lock() = Some(handle);
    }

    /// Stops the fill thread and waits for it to exit.
    pub(crate) fn stop(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("stream-fill thread panicked");
            }
        }
    }

    /// Adds a stream to the active set. The next tick begins filling it.
    pub(crate) fn register(&self, session: Arc<StreamingSession>) {
        self.shared.streams.lock().push(session);
    }

    /// Synchronously removes the stream bound to a voice. Any fill already
    /// in flight for it dies against the voice generation check.
    pub(crate) fn unregister(&self, voice: VoiceHandle) {
        let mut streams = self.shared.streams.lock();
        for session in streams.iter() {
            if session.voice == voice {
                session.mark_stopped();
            }
        }
        streams.retain(|s| s.voice != voice);
    }

    pub(crate) fn active_streams(&self) -> usize {
        self.shared.streams.lock().len()
    }

    /// One fill pass, the same work the background thread does per tick.
    #[cfg(test)]
    pub(crate) fn tick(&self) {
        fill_streams(
            &self.shared,
            &self.router,
            &self.events,
            self.ring_size,
            self.chunk_frames,
        );
    }
}

fn fill_streams(
    shared: &Shared,
    router: &VoiceRouter,
    events: &Sender<StreamEvent>,
    ring_size: usize,
    chunk_frames: usize,
) {
    // Snapshot under the set lock, then fill without holding it so callers
    // can register and stop streams while decoding runs.
    let snapshot: Vec<Arc<StreamingSession>> = shared.streams.lock().clone();
    let mut finished: Vec<VoiceHandle> = Vec::new();

    for session in snapshot {
        if session.control.lock().stopped {
            finished.push(session.voice);
            continue;
        }

        let mut decoder = session.decoder.lock();
        while router.queued(session.voice) < ring_size {
            match decoder.next_chunk(chunk_frames) {
                Ok(Some(samples)) => {
                    let data = samples_to_pcm16(&samples);
                    let buffer = BufferDescriptor {
                        data: &data,
                        looped: false,
                        loop_region: None,
                    };
                    if router.bind(session.voice, &buffer).is_err() {
                        // The caller stopped this voice and the slot moved
                        // on; drop the stream without a completion event.
                        session.mark_stopped();
                        finished.push(session.voice);
                        break;
                    }
                }
                Ok(None) => {
                    let looped = session.control.lock().looped;
                    if looped {
                        // Close and reopen at the start; filling continues
                        // in this same pass.
                        if let Err(err) = decoder.reset() {
                            warn!(err = %err, "failed to rewind looped stream");
                            session.mark_stopped();
                            finished.push(session.voice);
                            break;
                        }
                    } else {
                        session.mark_stopped();
                        finished.push(session.voice);
                        let _ = events.send(StreamEvent {
                            sound: session.sound,
                            voice: session.voice,
                        });
                        break;
                    }
                }
                Err(err) => {
                    warn!(err = %err, "stream decode failed");
                    session.mark_stopped();
                    finished.push(session.voice);
                    break;
                }
            }
        }
    }

    if !finished.is_empty() {
        shared
            .streams
            .lock()
            .retain(|s| !finished.contains(&s.voice));
    }
}

/// Converts interleaved f32 samples to 16-bit PCM bytes, saturating out of
/// range values instead of wrapping.
pub(crate) fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use super::decoder::test_support::ScriptedDecoder;
    use super::*;
    use crate::backend::{mock, Codec, VoiceBackend, VoiceFormat};

    fn format() -> VoiceFormat {
        VoiceFormat {
            codec: Codec::Pcm,
            channels: 1,
            sample_rate: 44100,
            block_align: 2,
            bits_per_sample: 16,
        }
    }

    fn streamer_with_backend(ring: usize) -> (Streamer, Arc<mock::Backend>, crossbeam_channel::Receiver<StreamEvent>) {
        let backend = Arc::new(mock::Backend::new(8));
        let router = Arc::new(VoiceRouter::new(Box::new(backend.clone()), 8));
        let (tx, rx) = crossbeam_channel::unbounded();
        let streamer = Streamer::new(router, tx, Duration::from_millis(100), ring, 256);
        (streamer, backend, rx)
    }

    #[test]
    fn test_looping_stream_reopens_at_start_and_keeps_filling() {
        let (streamer, backend, _rx) = streamer_with_backend(2);
        let voice = streamer.router.reserve(&format()).unwrap();

        let resets = Arc::new(AtomicUsize::new(0));
        let decoder = ScriptedDecoder::new(
            vec![vec![0.1f32; 16], vec![0.2f32; 16]],
            format(),
            resets.clone(),
        );
        let session = StreamingSession::new(voice, 0, Box::new(decoder), true);
        streamer.register(session);

        // Many ticks with the hardware consuming buffers in between: the
        // two-chunk decoder must deliver indefinitely.
        let mut delivered = 0;
        for _ in 0..8 {
            streamer.tick();
            let backend_voice = backend.voices_in_state(crate::backend::VoiceState::Stopped)[0];
            while backend.queued(backend_voice) > 0 {
                backend.consume_buffer(backend_voice);
                delivered += 1;
            }
        }

        assert!(delivered >= 8, "only {} buffers delivered", delivered);
        assert!(resets.load(Ordering::Relaxed) >= 3);
        // The active set never lost the entry.
        assert_eq!(streamer.active_streams(), 1);
    }

    #[test]
    fn test_finite_stream_completes_with_event() {
        let (streamer, _backend, rx) = streamer_with_backend(8);
        let voice = streamer.router.reserve(&format()).unwrap();

        let decoder = ScriptedDecoder::new(
            vec![vec![0.1f32; 4], vec![0.2f32; 4]],
            format(),
            Arc::new(AtomicUsize::new(0)),
        );
        let session = StreamingSession::new(voice, 7, Box::new(decoder), false);
        streamer.register(session);

        streamer.tick();
        assert_eq!(streamer.active_streams(), 0);
        let event = rx.try_recv().expect("completion event");
        assert_eq!(event.sound, 7);
        assert_eq!(event.voice, voice);
    }

    #[test]
    fn test_stale_voice_drops_stream_without_event() {
        let (streamer, _backend, rx) = streamer_with_backend(4);
        let voice = streamer.router.reserve(&format()).unwrap();

        let decoder = ScriptedDecoder::new(
            vec![vec![0.0f32; 4]; 100],
            format(),
            Arc::new(AtomicUsize::new(0)),
        );
        let session = StreamingSession::new(voice, 0, Box::new(decoder), false);
        streamer.register(session);

        // The caller stops the voice; the slot is reused by someone else.
        streamer.router.release(voice);
        let _other = streamer.router.reserve(&format()).unwrap();

        streamer.tick();
        assert_eq!(streamer.active_streams(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unregister_is_synchronous() {
        let (streamer, _backend, rx) = streamer_with_backend(4);
        let voice = streamer.router.reserve(&format()).unwrap();

        let decoder = ScriptedDecoder::new(
            vec![vec![0.0f32; 4]; 100],
            format(),
            Arc::new(AtomicUsize::new(0)),
        );
        streamer.register(StreamingSession::new(voice, 0, Box::new(decoder), true));
        assert_eq!(streamer.active_streams(), 1);

        streamer.unregister(voice);
        assert_eq!(streamer.active_streams(), 0);

        streamer.tick();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fill_respects_ring_size() {
        let (streamer, backend, _rx) = streamer_with_backend(3);
        let voice = streamer.router.reserve(&format()).unwrap();

        let decoder = ScriptedDecoder::new(
            vec![vec![0.0f32; 4]; 100],
            format(),
            Arc::new(AtomicUsize::new(0)),
        );
        streamer.register(StreamingSession::new(voice, 0, Box::new(decoder), false));

        streamer.tick();
        let backend_voice = backend.voices_in_state(crate::backend::VoiceState::Stopped)[0];
        assert_eq!(backend.queued(backend_voice), 3);

        // Nothing more fits until the hardware consumes a buffer.
        streamer.tick();
        assert_eq!(backend.queued(backend_voice), 3);
        backend.consume_buffer(backend_voice);
        streamer.tick();
        assert_eq!(backend.queued(backend_voice), 3);
    }

    #[test]
    fn test_background_thread_fills_without_help() {
        let backend = Arc::new(mock::Backend::new(4));
        let router = Arc::new(VoiceRouter::new(Box::new(backend.clone()), 4));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let streamer = Streamer::new(router.clone(), tx, Duration::from_millis(10), 2, 64);
        streamer.spawn();

        let voice = router.reserve(&format()).unwrap();
        let decoder = ScriptedDecoder::new(
            vec![vec![0.5f32; 8], vec![-0.5f32; 8]],
            format(),
            Arc::new(AtomicUsize::new(0)),
        );
        streamer.register(StreamingSession::new(voice, 0, Box::new(decoder), true));

        let probe = backend.clone();
        crate::test::eventually(
            || {
                probe
                    .voices_in_state(crate::backend::VoiceState::Stopped)
                    .first()
                    .map(|&v| probe.queued(v) >= 2)
                    .unwrap_or(false)
            },
            "fill thread never filled the ring",
        );

        streamer.stop();
    }

    #[test]
    fn test_samples_to_pcm16_saturates() {
        let bytes = samples_to_pcm16(&[0.0, 1.0, -1.0, 2.0, -2.0]);
        let decoded: Vec<i16> = bytes
            .chunks(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded[0], 0);
        assert_eq!(decoded[1], 32767);
        assert_eq!(decoded[2], -32767);
        assert_eq!(decoded[3], 32767);
        assert_eq!(decoded[4], -32768);
    }
}
