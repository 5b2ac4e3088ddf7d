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
//! Runtime sound banks. Loading validates the container header and keeps
//! the raw bytes; the body parses on the first cue lookup, at which point
//! every sound record registers with the engine's arena and its category.
//! Unloading is explicit and tombstones the bank's arena slots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::EngineShared;
use crate::error::AudioError;
use crate::parse::soundbank as parser;
use crate::playback::cue::{Cue, CueVariation};

enum BankState {
    /// Loaded, body not parsed yet.
    Raw(Vec<u8>),
    Parsed(Arc<BankTables>),
    Unloaded,
}

struct BankTables {
    cues: HashMap<String, Vec<CueVariation>>,
    slots: Vec<usize>,
}

/// A loaded sound bank: a named table of cues backed by sounds registered
/// in the engine.
pub struct SoundBank {
    shared: Arc<EngineShared>,
    name: String,
    state: Mutex<BankState>,
}

impl SoundBank {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        name: String,
        raw: Vec<u8>,
    ) -> Result<Self, AudioError> {
        // Fail fast on the header; the body waits for the first lookup.
        parser::validate_header(&raw)?;
        Ok(Self {
            shared,
            name,
            state: Mutex::new(BankState::Raw(raw)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a fresh cue for the given name. Cues built from the same
    /// name share sound records but nothing else.
    pub fn get_cue(&self, name: &str) -> Result<Cue, AudioError> {
        let tables = self.ensure_parsed()?;
        let variations = tables
            .cues
            .get(name)
            .ok_or_else(|| AudioError::UnknownCue(name.to_string()))?;
        Ok(Cue::new(
            self.shared.clone(),
            name.to_string(),
            variations.clone(),
        ))
    }

    /// The names of every cue in the bank, sorted.
    pub fn cue_names(&self) -> Result<Vec<String>, AudioError> {
        let tables = self.ensure_parsed()?;
        let mut names: Vec<String> = tables.cues.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Explicitly unregisters the bank: playing sounds stop, arena slots
    /// become tombstones, later lookups fail. Dropping the handle without
    /// calling this leaves the sounds registered.
    pub fn unload(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, BankState::Unloaded) {
            BankState::Parsed(tables) => {
                info!(bank = self.name, sounds = tables.slots.len(), "unloading sound bank");
                self.shared.release_sounds(&tables.slots);
            }
            BankState::Raw(_) | BankState::Unloaded => {}
        }
    }

    fn ensure_parsed(&self) -> Result<Arc<BankTables>, AudioError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, BankState::Unloaded) {
            BankState::Parsed(tables) => {
                *state = BankState::Parsed(tables.clone());
                Ok(tables)
            }
            BankState::Unloaded => Err(AudioError::BankUnloaded),
            BankState::Raw(raw) => match self.parse_and_register(&raw) {
                Ok(tables) => {
                    *state = BankState::Parsed(tables.clone());
                    Ok(tables)
                }
                Err(err) => {
                    // Leave the bank loadable; the caller may retry after
                    // fixing the environment (e.g. categories mismatch).
                    *state = BankState::Raw(raw);
                    Err(err)
                }
            },
        }
    }

    fn parse_and_register(&self, raw: &[u8]) -> Result<Arc<BankTables>, AudioError> {
        let file = parser::parse(raw)?;
        let slots = self.shared.register_sound_bank(&file)?;
        debug!(
            bank = self.name,
            cues = file.cues.len(),
            sounds = slots.len(),
            "parsed sound bank"
        );

        let cues = file
            .cues
            .iter()
            .map(|cue| {
                let variations = cue
                    .variations
                    .iter()
                    .map(|v| CueVariation {
                        sound: slots[v.sound],
                        weight: v.weight,
                    })
                    .collect();
                (cue.name.clone(), variations)
            })
            .collect();

        Ok(Arc::new(BankTables { cues, slots }))
    }
}
