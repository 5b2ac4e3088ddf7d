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
use std::sync::Arc;

use parking_lot::RwLock;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::warn;

use crate::engine::EngineShared;
use crate::error::AudioError;

/// How a cue stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// Fade out over the category's fade-out time, then stop.
    AsAuthored,
    /// Stop right now.
    Immediate,
}

/// One playable variation of a cue.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CueVariation {
    pub sound: usize,
    pub weight: u32,
}

/// The externally named, playable unit. Each `get_cue` call builds a fresh
/// Cue; cues for the same name share the underlying sound records, so
/// replaying a name that is already sounding restarts the shared sound.
///
/// A chosen variation stays fixed for the lifetime of one playback; the
/// next play after a stop may choose differently.
pub struct Cue {
    shared: Arc<EngineShared>,
    name: String,
    variations: Vec<CueVariation>,
    active: Option<usize>,
    volume: f32,
    variables: Arc<RwLock<Vec<f32>>>,
}

impl Cue {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        name: String,
        variations: Vec<CueVariation>,
    ) -> Self {
        let variables = Arc::new(RwLock::new(shared.instance_variable_values()));
        Self {
            shared,
            name,
            variations,
            active: None,
            volume: 1.0,
            variables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plays the cue. If a previous play of this cue is still sounding the
    /// same variation restarts; otherwise one is chosen by authored weight
    /// and stays bound until the cue stops.
    pub fn play(&mut self) -> Result<(), AudioError> {
        let sound = match self.active {
            Some(sound) if self.shared.sound_is_live(sound) => sound,
            _ => match self.choose_variation() {
                Some(sound) => sound,
                None => {
                    warn!(cue = self.name, "cue has no variations, playing nothing");
                    return Ok(());
                }
            },
        };

        self.shared
            .play_sound(sound, self.volume, self.variables.clone())?;
        self.active = Some(sound);
        Ok(())
    }

    /// Picks a variation by weight. Weights of zero across the board mean
    /// the authored data carried no preference, so the pick is uniform.
    fn choose_variation(&self) -> Option<usize> {
        match self.variations.len() {
            0 => None,
            1 => Some(self.variations[0].sound),
            _ => {
                let mut rng = rand::thread_rng();
                let weights: Vec<u32> = self.variations.iter().map(|v| v.weight).collect();
                let index = if weights.iter().all(|&w| w == 0) {
                    rng.gen_range(0..self.variations.len())
                } else {
                    WeightedIndex::new(&weights)
                        .expect("nonzero weights form a distribution")
                        .sample(&mut rng)
                };
                Some(self.variations[index].sound)
            }
        }
    }

    /// Stops playback. The bound variation is released; the next play
    /// chooses anew.
    pub fn stop(&mut self, mode: StopMode) -> Result<(), AudioError> {
        if let Some(sound) = self.active.take() {
            self.shared.stop_sound(sound, mode);
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), AudioError> {
        if let Some(sound) = self.active {
            self.shared.pause_sound(sound);
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), AudioError> {
        if let Some(sound) = self.active {
            self.shared.resume_sound(sound);
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.active
            .map(|sound| self.shared.sound_is_playing(sound))
            .unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.active
            .map(|sound| self.shared.sound_is_paused(sound))
            .unwrap_or(false)
    }

    /// Sets the cue's instance volume (linear). Applied on top of the
    /// sound and category gains, recomputed from base values so repeated
    /// calls never compound.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sound) = self.active {
            self.shared.set_cue_volume(sound, volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets a variable visible to this cue: a global writes through to the
    /// engine store, a cue-instance variable writes the local snapshot.
    pub fn set_variable(&mut self, name: &str, value: f32) -> Result<(), AudioError> {
        let index = self
            .shared
            .variable_index(name)
            .ok_or_else(|| AudioError::UnknownVariable(name.to_string()))?;
        let (global, read_only) = self.shared.variable_flags(index);
        if global {
            return self.shared.set_global_variable(name, value);
        }
        if read_only {
            return Err(AudioError::ReadOnlyVariable(name.to_string()));
        }
        self.variables.write()[index] = value;
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> Result<f32, AudioError> {
        let index = self
            .shared
            .variable_index(name)
            .ok_or_else(|| AudioError::UnknownVariable(name.to_string()))?;
        let (global, _) = self.shared.variable_flags(index);
        if global {
            return self.shared.get_global_variable(name);
        }
        Ok(self.variables.read()[index])
    }
}
