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
//! The fixed-capacity voice pool and the router that glues pool slots to
//! backend voices. Reservations come from the caller thread while the
//! streaming thread touches voices through the same router, so every pool
//! mutation is serialized by one mutex. Handles carry a generation tag:
//! once a slot is released and reused, operations through the old handle
//! are discarded instead of reaching the new owner's voice.

use parking_lot::Mutex;
use tracing::warn;

use crate::backend::{BackendVoice, BufferDescriptor, VoiceBackend, VoiceFormat, VoiceState};
use crate::error::AudioError;

/// Lifecycle of a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceLifecycle {
    Free,
    Reserved,
    Playing,
    Paused,
    Stopped,
}

/// A generation-tagged reference to one pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoiceHandle {
    slot: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    lifecycle: VoiceLifecycle,
    backend_voice: Option<BackendVoice>,
}

struct PoolState {
    free: Vec<u32>,
    slots: Vec<Slot>,
    /// Cached count for the O(1) "can I play one more?" query; recomputed
    /// at most once per frame rather than on every reservation.
    cached_available: usize,
    cache_dirty: bool,
}

/// Fixed-capacity pool of voice slots. The free list is LIFO: the most
/// recently released slot is reused first.
pub struct VoicePool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                lifecycle: VoiceLifecycle::Free,
                backend_voice: None,
            })
            .collect();
        Self {
            state: Mutex::new(PoolState {
                free: (0..capacity as u32).rev().collect(),
                slots,
                cached_available: capacity,
                cache_dirty: false,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves one slot, or fails with `InstancePlayLimit` when the pool
    /// is exhausted. Never blocks, never retries.
    pub fn reserve(&self) -> Result<VoiceHandle, AudioError> {
        let mut state = self.state.lock();
        let slot = state.free.pop().ok_or(AudioError::InstancePlayLimit)?;
        state.cache_dirty = true;
        let entry = &mut state.slots[slot as usize];
        entry.lifecycle = VoiceLifecycle::Reserved;
        Ok(VoiceHandle {
            slot,
            generation: entry.generation,
        })
    }

    /// Returns a slot to the pool. The generation advances so stale
    /// handles die, and the slot's cached state resets to Stopped-then-Free.
    /// Returns the backend voice that was attached, if any.
    pub fn release(&self, handle: VoiceHandle) -> Option<BackendVoice> {
        let mut state = self.state.lock();
        let entry = &mut state.slots[handle.slot as usize];
        if entry.generation != handle.generation || entry.lifecycle == VoiceLifecycle::Free {
            return None;
        }
        entry.generation = entry.generation.wrapping_add(1);
        entry.lifecycle = VoiceLifecycle::Free;
        let backend_voice = entry.backend_voice.take();
        state.free.push(handle.slot);
        state.cache_dirty = true;
        backend_voice
    }

    /// Whether the handle still refers to the reservation it was created
    /// for.
    pub fn is_current(&self, handle: VoiceHandle) -> bool {
        let state = self.state.lock();
        let entry = &state.slots[handle.slot as usize];
        entry.generation == handle.generation && entry.lifecycle != VoiceLifecycle::Free
    }

    pub fn lifecycle(&self, handle: VoiceHandle) -> VoiceLifecycle {
        let state = self.state.lock();
        let entry = &state.slots[handle.slot as usize];
        if entry.generation != handle.generation {
            return VoiceLifecycle::Free;
        }
        entry.lifecycle
    }

    fn set_lifecycle(&self, handle: VoiceHandle, lifecycle: VoiceLifecycle) {
        let mut state = self.state.lock();
        let entry = &mut state.slots[handle.slot as usize];
        if entry.generation == handle.generation && entry.lifecycle != VoiceLifecycle::Free {
            entry.lifecycle = lifecycle;
        }
    }

    fn attach(&self, handle: VoiceHandle, backend_voice: BackendVoice) {
        let mut state = self.state.lock();
        let entry = &mut state.slots[handle.slot as usize];
        if entry.generation == handle.generation {
            entry.backend_voice = Some(backend_voice);
        }
    }

    /// The backend voice behind a handle, or `None` when the handle is
    /// stale.
    fn backend_of(&self, handle: VoiceHandle) -> Option<BackendVoice> {
        let state = self.state.lock();
        let entry = &state.slots[handle.slot as usize];
        if entry.generation != handle.generation {
            return None;
        }
        entry.backend_voice
    }

    /// The cached availability count. May lag mutations until the next
    /// `refresh_available`.
    pub fn available_hint(&self) -> usize {
        self.state.lock().cached_available
    }

    /// Recomputes the cached availability count if anything changed since
    /// the last refresh. Called once per frame by the engine pump.
    pub fn refresh_available(&self) {
        let mut state = self.state.lock();
        if state.cache_dirty {
            state.cached_available = state.free.len();
            state.cache_dirty = false;
        }
    }
}

/// Routes voice operations to the backend, enforcing the generation check
/// on every call so a stale fill from the streaming thread cannot touch a
/// reused slot.
pub struct VoiceRouter {
    backend: Box<dyn VoiceBackend>,
    pool: VoicePool,
}

impl VoiceRouter {
    pub fn new(backend: Box<dyn VoiceBackend>, capacity: usize) -> Self {
        Self {
            backend,
            pool: VoicePool::new(capacity),
        }
    }

    pub fn backend(&self) -> &dyn VoiceBackend {
        self.backend.as_ref()
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    /// Reserves a pool slot and acquires a backend voice for it. Pool
    /// exhaustion and backend refusal both leave no reservation behind.
    pub fn reserve(&self, format: &VoiceFormat) -> Result<VoiceHandle, AudioError> {
        let handle = self.pool.reserve()?;
        match self.backend.acquire(format) {
            Ok(backend_voice) => {
                self.pool.attach(handle, backend_voice);
                Ok(handle)
            }
            Err(err) => {
                self.pool.release(handle);
                Err(err)
            }
        }
    }

    /// Stops and releases a voice, returning its slot to the pool.
    pub fn release(&self, handle: VoiceHandle) {
        if let Some(backend_voice) = self.pool.release(handle) {
            self.backend.stop(backend_voice);
            self.backend.release(backend_voice);
        }
    }

    /// Submits a buffer. Stale handles are reported as `StaleVoice` so the
    /// streaming thread can drop the stream.
    pub fn bind(&self, handle: VoiceHandle, buffer: &BufferDescriptor) -> Result<(), AudioError> {
        let backend_voice = self.pool.backend_of(handle).ok_or(AudioError::StaleVoice)?;
        self.backend.bind(backend_voice, buffer)
    }

    pub fn queued(&self, handle: VoiceHandle) -> usize {
        match self.pool.backend_of(handle) {
            Some(backend_voice) => self.backend.queued(backend_voice),
            None => 0,
        }
    }

    pub fn play(&self, handle: VoiceHandle) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.play(backend_voice);
            self.pool.set_lifecycle(handle, VoiceLifecycle::Playing);
        } else {
            warn!("play on a stale voice handle");
        }
    }

    pub fn pause(&self, handle: VoiceHandle) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.pause(backend_voice);
            self.pool.set_lifecycle(handle, VoiceLifecycle::Paused);
        }
    }

    pub fn stop(&self, handle: VoiceHandle) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.stop(backend_voice);
            self.pool.set_lifecycle(handle, VoiceLifecycle::Stopped);
        }
    }

    pub fn set_gain(&self, handle: VoiceHandle, gain: f32) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.set_gain(backend_voice, gain);
        }
    }

    pub fn set_pitch(&self, handle: VoiceHandle, ratio: f32) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.set_pitch(backend_voice, ratio);
        }
    }

    pub fn set_pan(&self, handle: VoiceHandle, pan: f32) {
        if let Some(backend_voice) = self.pool.backend_of(handle) {
            self.backend.set_pan(backend_voice, pan);
        }
    }

    /// Backend playback state; stale handles read as Stopped.
    pub fn state(&self, handle: VoiceHandle) -> VoiceState {
        match self.pool.backend_of(handle) {
            Some(backend_voice) => self.backend.state(backend_voice),
            None => VoiceState::Stopped,
        }
    }
}
