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
//! The sound arena. Sound records register here when their sound bank is
//! parsed and get stable integer indices; categories and cues hold those
//! indices, never references. Unloading a bank tombstones its slots, so a
//! stale index reads as absent instead of aliasing a new sound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::category::CrossfadeShape;
use crate::parse::soundbank::{SoundData, SoundKindData};
use crate::voice::VoiceHandle;

use super::clip::ClipState;

/// Playback state of a sound. FadingOut sounds are on the way down after
/// eviction or an as-authored stop; they no longer count against their
/// category's instance limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PlayState {
    Stopped,
    Playing,
    Paused,
    FadingOut,
}

/// A voice bound by this sound, and whether the streaming engine feeds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ActiveWave {
    pub handle: VoiceHandle,
    pub streaming: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FadeDirection {
    In,
    Out,
}

/// A gain ramp in progress, shaped by the category's crossfade curve.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fade {
    pub direction: FadeDirection,
    pub shape: CrossfadeShape,
    pub started: Instant,
    pub duration: Duration,
}

impl Fade {
    pub fn new(direction: FadeDirection, shape: CrossfadeShape, duration: Duration) -> Self {
        Self {
            direction,
            shape,
            started: Instant::now(),
            duration,
        }
    }

    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    /// The gain factor at `now`: rising for fade-ins, falling for
    /// fade-outs.
    pub fn factor(&self, now: Instant) -> f32 {
        let progress = self.progress(now);
        match self.direction {
            FadeDirection::In => self.shape.fade_in_factor(progress),
            FadeDirection::Out => self.shape.fade_out_factor(progress),
        }
    }

    pub fn finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

/// Parameter values produced by RPC evaluation, recorded per sound.
/// Volume and pitch reach the backend; the rest have no backend surface
/// and are kept for inspection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RpcOutputs {
    pub volume_gain: f32,
    pub pitch_ratio: f32,
    pub reverb_send: Option<f32>,
    pub filter_frequency: Option<f32>,
    pub filter_q: Option<f32>,
}

impl Default for RpcOutputs {
    fn default() -> Self {
        Self {
            volume_gain: 1.0,
            pitch_ratio: 1.0,
            reverb_send: None,
            filter_frequency: None,
            filter_q: None,
        }
    }
}

pub(crate) enum SoundKind {
    Leaf {
        wave_bank: u8,
        track: u16,
        voice: Option<ActiveWave>,
    },
    Complex {
        clips: Vec<ClipState>,
    },
}

/// One registered sound: the authored definition plus all runtime state
/// for the single playback the graph tracks per sound record.
pub(crate) struct SoundSlot {
    pub category: usize,
    pub volume: f32,
    pub pitch_cents: i16,
    pub priority: u8,
    pub rpc_curves: Vec<usize>,
    /// Wave bank names of the owning sound bank, for resolving this
    /// sound's (bank, track) references at play time.
    pub bank_names: Arc<Vec<String>>,
    pub kind: SoundKind,
    pub state: PlayState,
    pub started: Option<Instant>,
    pub cue_volume: f32,
    /// The playing cue's instance-variable store, while one is attached.
    pub cue_variables: Option<Arc<RwLock<Vec<f32>>>>,
    pub fade: Option<Fade>,
    /// The gain most recently pushed to this sound's voices; what
    /// ReplaceQuietest compares.
    pub effective_gain: f32,
    pub rpc: RpcOutputs,
}

impl SoundSlot {
    pub fn new(data: &SoundData, bank_names: Arc<Vec<String>>) -> Self {
        let kind = match &data.kind {
            SoundKindData::Leaf { wave_bank, track } => SoundKind::Leaf {
                wave_bank: *wave_bank,
                track: *track,
                voice: None,
            },
            SoundKindData::Complex { clips } => SoundKind::Complex {
                clips: clips.iter().map(ClipState::new).collect(),
            },
        };
        Self {
            category: data.category as usize,
            volume: data.volume,
            pitch_cents: data.pitch_cents,
            priority: data.priority,
            rpc_curves: data.rpc_curves.iter().map(|&i| i as usize).collect(),
            bank_names,
            kind,
            state: PlayState::Stopped,
            started: None,
            cue_volume: 1.0,
            cue_variables: None,
            fade: None,
            effective_gain: 0.0,
            rpc: RpcOutputs::default(),
        }
    }

    /// Whether this sound counts against its category's instance limit.
    pub fn is_live(&self) -> bool {
        matches!(self.state, PlayState::Playing | PlayState::Paused)
    }

    /// Every voice this sound currently holds.
    pub fn active_waves(&self) -> Vec<ActiveWave> {
        match &self.kind {
            SoundKind::Leaf { voice, .. } => voice.iter().copied().collect(),
            SoundKind::Complex { clips } => {
                clips.iter().flat_map(|c| c.active.iter().copied()).collect()
            }
        }
    }

    /// Removes a voice from whichever wave or clip holds it. Returns true
    /// if no active voices remain.
    pub fn remove_wave(&mut self, handle: VoiceHandle) -> bool {
        match &mut self.kind {
            SoundKind::Leaf { voice, .. } => {
                if voice.map(|w| w.handle) == Some(handle) {
                    *voice = None;
                }
                voice.is_none()
            }
            SoundKind::Complex { clips } => {
                for clip in clips.iter_mut() {
                    clip.active.retain(|w| w.handle != handle);
                }
                clips.iter().all(|c| !c.is_active())
            }
        }
    }

    /// Marks a bound voice as no longer streaming: its decode is complete
    /// and end-of-playback detection takes over.
    pub fn wave_decode_complete(&mut self, handle: VoiceHandle) {
        match &mut self.kind {
            SoundKind::Leaf { voice, .. } => {
                if let Some(wave) = voice {
                    if wave.handle == handle {
                        wave.streaming = false;
                    }
                }
            }
            SoundKind::Complex { clips } => {
                for clip in clips.iter_mut() {
                    for wave in clip.active.iter_mut() {
                        if wave.handle == handle {
                            wave.streaming = false;
                        }
                    }
                }
            }
        }
    }

    /// Clears all runtime playback state; the authored definition stays.
    pub fn reset_runtime(&mut self) {
        match &mut self.kind {
            SoundKind::Leaf { voice, .. } => *voice = None,
            SoundKind::Complex { clips } => {
                for clip in clips.iter_mut() {
                    clip.active.clear();
                }
            }
        }
        self.state = PlayState::Stopped;
        self.started = None;
        self.cue_variables = None;
        self.fade = None;
        self.effective_gain = 0.0;
        self.rpc = RpcOutputs::default();
    }
}

/// Append-only arena of sound slots. Indices are stable for the life of
/// the engine; released slots become tombstones and are never reused.
pub(crate) struct SoundGraph {
    slots: Vec<Option<SoundSlot>>,
}

impl SoundGraph {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn register(&mut self, slot: SoundSlot) -> usize {
        self.slots.push(Some(slot));
        self.slots.len() - 1
    }

    pub fn release(&mut self, index: usize) -> Option<SoundSlot> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn slot(&self, index: usize) -> Option<&SoundSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut SoundSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Indices of slots that currently hold at least one voice.
    pub fn indices_with_voices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|s| !s.active_waves().is_empty())
                    .map(|_| i)
            })
            .collect()
    }
}
