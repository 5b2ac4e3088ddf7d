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
//! The narrow interface the runtime consumes from a platform audio API.
//! One concrete implementation is selected per target at build time; the
//! in-tree [`mock::Backend`] implements it for tests and offline use.

use std::fmt;

use crate::error::AudioError;

pub mod mock;

/// A platform voice id, meaningful only to the backend that issued it.
pub type BackendVoice = usize;

/// The codec of a wave payload. PCM payloads are always repackaged into
/// RIFF containers by the wave bank loader; the compressed codecs pass
/// through to the backend as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Pcm,
    Xma,
    Adpcm,
    Wma,
}

/// Format descriptor for one wave or voice.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceFormat {
    pub codec: Codec,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// A loop region in frames within a wave's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: u32,
    pub length: u32,
}

/// One buffer handed to a voice: either a whole in-memory wave or one ring
/// chunk of a stream.
pub struct BufferDescriptor<'a> {
    pub data: &'a [u8],
    pub looped: bool,
    pub loop_region: Option<LoopRegion>,
}

/// Playback state of a backend voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Stopped,
    Playing,
    Paused,
}

/// The platform playback surface. Voice acquisition can fail (hardware
/// limits); transport and parameter calls are fire-and-forget, matching
/// what the platform APIs offer once a voice exists.
pub trait VoiceBackend: Send + Sync + fmt::Display {
    /// Whether audio hardware is usable at all. Probed exactly once, when
    /// the context initializes.
    fn is_available(&self) -> bool;

    /// The hardware voice ceiling; the voice pool never exceeds it.
    fn max_voices(&self) -> usize;

    /// Whether the backend can play payloads of the given codec.
    fn supports(&self, codec: Codec) -> bool;

    fn acquire(&self, format: &VoiceFormat) -> Result<BackendVoice, AudioError>;

    /// Submits a buffer to a voice. Also used by the streaming engine to
    /// queue successive ring chunks.
    fn bind(&self, voice: BackendVoice, buffer: &BufferDescriptor) -> Result<(), AudioError>;

    /// Number of buffers queued on a voice and not yet consumed.
    fn queued(&self, voice: BackendVoice) -> usize;

    fn set_gain(&self, voice: BackendVoice, gain: f32);

    /// Playback-rate ratio; 1.0 plays at the authored rate.
    fn set_pitch(&self, voice: BackendVoice, ratio: f32);

    fn set_pan(&self, voice: BackendVoice, pan: f32);

    fn play(&self, voice: BackendVoice);

    fn pause(&self, voice: BackendVoice);

    fn stop(&self, voice: BackendVoice);

    fn state(&self, voice: BackendVoice) -> VoiceState;

    fn release(&self, voice: BackendVoice);
}
