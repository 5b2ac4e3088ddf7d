// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::AudioError;

use super::{BackendVoice, BufferDescriptor, Codec, VoiceBackend, VoiceFormat, VoiceState};

/// A mock backend. Doesn't produce any audio; records every call so tests
/// (and the CLI, when no hardware backend is linked in) can observe what
/// the runtime did to its voices.
pub struct Backend {
    name: String,
    available: bool,
    max_voices: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_voice: BackendVoice,
    voices: HashMap<BackendVoice, MockVoice>,
}

struct MockVoice {
    format: VoiceFormat,
    state: VoiceState,
    gain: f32,
    pitch: f32,
    pan: f32,
    queued: Vec<SubmittedBuffer>,
}

/// A copy of one submitted buffer.
#[derive(Clone)]
pub struct SubmittedBuffer {
    pub data: Vec<u8>,
    pub looped: bool,
}

impl Backend {
    /// Gets a mock backend with the given voice ceiling.
    pub fn new(max_voices: usize) -> Backend {
        Backend {
            name: "mock".to_string(),
            available: true,
            max_voices,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A mock backend that reports no usable hardware.
    pub fn unavailable() -> Backend {
        Backend {
            name: "mock-unavailable".to_string(),
            available: false,
            max_voices: 0,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of voices currently acquired.
    pub fn live_voices(&self) -> usize {
        self.inner.lock().voices.len()
    }

    /// The current gain of a voice.
    pub fn gain_of(&self, voice: BackendVoice) -> Option<f32> {
        self.inner.lock().voices.get(&voice).map(|v| v.gain)
    }

    /// The current pitch ratio of a voice.
    pub fn pitch_of(&self, voice: BackendVoice) -> Option<f32> {
        self.inner.lock().voices.get(&voice).map(|v| v.pitch)
    }

    /// The current pan of a voice.
    pub fn pan_of(&self, voice: BackendVoice) -> Option<f32> {
        self.inner.lock().voices.get(&voice).map(|v| v.pan)
    }

    /// The format a voice was acquired with.
    pub fn format_of(&self, voice: BackendVoice) -> Option<VoiceFormat> {
        self.inner.lock().voices.get(&voice).map(|v| v.format.clone())
    }

    /// Copies of every buffer submitted to a voice, oldest first.
    pub fn buffers_of(&self, voice: BackendVoice) -> Vec<SubmittedBuffer> {
        self.inner
            .lock()
            .voices
            .get(&voice)
            .map(|v| v.queued.clone())
            .unwrap_or_default()
    }

    /// Voice ids currently in the given state.
    pub fn voices_in_state(&self, state: VoiceState) -> Vec<BackendVoice> {
        let mut ids: Vec<BackendVoice> = self
            .inner
            .lock()
            .voices
            .iter()
            .filter(|(_, v)| v.state == state)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Test hook: marks a voice as having played to the end of its data.
    pub fn finish(&self, voice: BackendVoice) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.state = VoiceState::Stopped;
            v.queued.clear();
        }
    }

    /// Test hook: simulates the hardware consuming one queued buffer.
    pub fn consume_buffer(&self, voice: BackendVoice) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            if !v.queued.is_empty() {
                v.queued.remove(0);
            }
        }
    }
}

impl VoiceBackend for Backend {
    fn is_available(&self) -> bool {
        self.available
    }

    fn max_voices(&self) -> usize {
        self.max_voices
    }

    fn supports(&self, codec: Codec) -> bool {
        matches!(codec, Codec::Pcm | Codec::Adpcm)
    }

    fn acquire(&self, format: &VoiceFormat) -> Result<BackendVoice, AudioError> {
        let mut inner = self.inner.lock();
        if inner.voices.len() >= self.max_voices {
            return Err(AudioError::Backend(format!(
                "{}: out of hardware voices",
                self.name
            )));
        }
        let id = inner.next_voice;
        inner.next_voice += 1;
        inner.voices.insert(
            id,
            MockVoice {
                format: format.clone(),
                state: VoiceState::Stopped,
                gain: 1.0,
                pitch: 1.0,
                pan: 0.0,
                queued: Vec::new(),
            },
        );
        Ok(id)
    }

    fn bind(&self, voice: BackendVoice, buffer: &BufferDescriptor) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        let v = inner
            .voices
            .get_mut(&voice)
            .ok_or_else(|| AudioError::Backend(format!("{}: unknown voice {}", self.name, voice)))?;
        v.queued.push(SubmittedBuffer {
            data: buffer.data.to_vec(),
            looped: buffer.looped,
        });
        Ok(())
    }

    fn queued(&self, voice: BackendVoice) -> usize {
        self.inner
            .lock()
            .voices
            .get(&voice)
            .map(|v| v.queued.len())
            .unwrap_or(0)
    }

    fn set_gain(&self, voice: BackendVoice, gain: f32) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.gain = gain;
        }
    }

    fn set_pitch(&self, voice: BackendVoice, ratio: f32) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.pitch = ratio;
        }
    }

    fn set_pan(&self, voice: BackendVoice, pan: f32) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.pan = pan;
        }
    }

    fn play(&self, voice: BackendVoice) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.state = VoiceState::Playing;
        }
    }

    fn pause(&self, voice: BackendVoice) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            if v.state == VoiceState::Playing {
                v.state = VoiceState::Paused;
            }
        }
    }

    fn stop(&self, voice: BackendVoice) {
        if let Some(v) = self.inner.lock().voices.get_mut(&voice) {
            v.state = VoiceState::Stopped;
            v.queued.clear();
        }
    }

    fn state(&self, voice: BackendVoice) -> VoiceState {
        self.inner
            .lock()
            .voices
            .get(&voice)
            .map(|v| v.state)
            .unwrap_or(VoiceState::Stopped)
    }

    fn release(&self, voice: BackendVoice) {
        self.inner.lock().voices.remove(&voice);
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

// Tests hand the router a clone of the backend and keep the original for
// inspection, so the shared form is a backend too.
impl VoiceBackend for std::sync::Arc<Backend> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn max_voices(&self) -> usize {
        (**self).max_voices()
    }

    fn supports(&self, codec: Codec) -> bool {
        (**self).supports(codec)
    }

    fn acquire(&self, format: &VoiceFormat) -> Result<BackendVoice, AudioError> {
        (**self).acquire(format)
    }

    fn bind(&self, voice: BackendVoice, buffer: &BufferDescriptor) -> Result<(), AudioError> {
        (**self).bind(voice, buffer)
    }

    fn queued(&self, voice: BackendVoice) -> usize {
        (**self).queued(voice)
    }

    fn set_gain(&self, voice: BackendVoice, gain: f32) {
        (**self).set_gain(voice, gain)
    }

    fn set_pitch(&self, voice: BackendVoice, ratio: f32) {
        (**self).set_pitch(voice, ratio)
    }

    fn set_pan(&self, voice: BackendVoice, pan: f32) {
        (**self).set_pan(voice, pan)
    }

    fn play(&self, voice: BackendVoice) {
        (**self).play(voice)
    }

    fn pause(&self, voice: BackendVoice) {
        (**self).pause(voice)
    }

    fn stop(&self, voice: BackendVoice) {
        (**self).stop(voice)
    }

    fn state(&self, voice: BackendVoice) -> VoiceState {
        (**self).state(voice)
    }

    fn release(&self, voice: BackendVoice) {
        (**self).release(voice)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn format() -> VoiceFormat {
        VoiceFormat {
            codec: Codec::Pcm,
            channels: 1,
            sample_rate: 44100,
            block_align: 2,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let backend = Backend::new(2);
        let a = backend.acquire(&format()).unwrap();
        let b = backend.acquire(&format()).unwrap();
        assert!(backend.acquire(&format()).is_err());
        assert_eq!(backend.live_voices(), 2);
        assert_eq!(backend.format_of(a), Some(format()));

        backend.release(a);
        assert_eq!(backend.live_voices(), 1);
        let c = backend.acquire(&format()).unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_transport_state() {
        let backend = Backend::new(1);
        let v = backend.acquire(&format()).unwrap();
        assert_eq!(backend.state(v), VoiceState::Stopped);

        backend.play(v);
        assert_eq!(backend.state(v), VoiceState::Playing);
        backend.pause(v);
        assert_eq!(backend.state(v), VoiceState::Paused);
        backend.play(v);
        backend.stop(v);
        assert_eq!(backend.state(v), VoiceState::Stopped);
    }

    #[test]
    fn test_bind_records_buffers() {
        let backend = Backend::new(1);
        let v = backend.acquire(&format()).unwrap();
        backend
            .bind(
                v,
                &BufferDescriptor {
                    data: &[1, 2, 3],
                    looped: true,
                    loop_region: None,
                },
            )
            .unwrap();
        assert_eq!(backend.queued(v), 1);
        let buffers = backend.buffers_of(v);
        assert_eq!(buffers[0].data, vec![1, 2, 3]);
        assert!(buffers[0].looped);

        backend.consume_buffer(v);
        assert_eq!(backend.queued(v), 0);
    }
}
