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
//! The audio engine: owns the parsed settings (categories, variables, RPC
//! curves), the loaded banks, and the playback graph, and orchestrates
//! every play/stop against the category policy and the voice pool.
//!
//! All playback state is mutated on the caller thread. The streaming
//! thread communicates back exclusively through completion events drained
//! by [`AudioEngine::update`], which is also where fades advance, RPC
//! curves evaluate, finished voices return to the pool and the pool's
//! availability cache refreshes. Call it once per frame.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{BufferDescriptor, VoiceState};
use crate::category::{Category, InstanceBehavior};
use crate::context::AudioContext;
use crate::error::AudioError;
use crate::parse;
use crate::parse::soundbank::{ClipEventData, SoundBankFile};
use crate::playback::cue::StopMode;
use crate::playback::sound::{
    ActiveWave, Fade, FadeDirection, PlayState, RpcOutputs, SoundGraph, SoundKind, SoundSlot,
};
use crate::rpc::{RpcCurve, RpcParameter};
use crate::soundbank::SoundBank;
use crate::streaming::{StreamDecoder, StreamingSession, SymphoniaDecoder};
use crate::util::cents_to_ratio;
use crate::variables::{Variable, VariableStore};
use crate::wavebank::WaveBank;

/// The public engine handle.
pub struct AudioEngine {
    shared: Arc<EngineShared>,
}

/// Engine state shared with cues and sound banks.
pub(crate) struct EngineShared {
    context: Arc<AudioContext>,
    categories: Vec<Category>,
    category_index: HashMap<String, usize>,
    rpc_curves: Vec<RpcCurve>,
    variables: RwLock<VariableStore>,
    graph: RwLock<SoundGraph>,
    wave_banks: RwLock<HashMap<String, Arc<WaveBank>>>,
}

impl AudioEngine {
    /// Loads an engine settings container from disk.
    pub fn load<P: AsRef<Path>>(
        context: Arc<AudioContext>,
        path: P,
    ) -> Result<AudioEngine, AudioError> {
        let bytes = std::fs::read(path.as_ref())?;
        info!(path = %path.as_ref().display(), "loading engine settings");
        Self::from_bytes(context, &bytes)
    }

    /// Builds an engine from settings container bytes.
    pub fn from_bytes(context: Arc<AudioContext>, bytes: &[u8]) -> Result<AudioEngine, AudioError> {
        if context.is_shut_down() {
            return Err(AudioError::ShutDown);
        }
        let settings = parse::settings::parse(bytes)?;
        debug!(
            categories = settings.categories.len(),
            variables = settings.variables.len(),
            rpc_curves = settings.rpc_curves.len(),
            "parsed engine settings"
        );

        let categories: Vec<Category> = settings.categories.iter().map(Category::new).collect();
        let category_index = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();

        Ok(AudioEngine {
            shared: Arc::new(EngineShared {
                context,
                categories,
                category_index,
                rpc_curves: settings.rpc_curves,
                variables: RwLock::new(VariableStore::new(&settings.variables)),
                graph: RwLock::new(SoundGraph::new()),
                wave_banks: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Loads a wave bank from disk and registers it under its bank name.
    pub fn load_wave_bank<P: AsRef<Path>>(&self, path: P) -> Result<Arc<WaveBank>, AudioError> {
        let bytes = std::fs::read(path.as_ref())?;
        self.wave_bank_from_bytes(&bytes)
    }

    /// Loads a wave bank from container bytes. Every entry's codec must be
    /// playable by the backend; an unrecognized codec fails the whole bank.
    pub fn wave_bank_from_bytes(&self, bytes: &[u8]) -> Result<Arc<WaveBank>, AudioError> {
        let file = parse::wavebank::parse(bytes)?;
        let backend = self.shared.context.router().backend();
        for entry in &file.entries {
            if !backend.supports(entry.format.codec) {
                return Err(AudioError::UnsupportedCodec(
                    entry.format.codec,
                    backend.to_string(),
                ));
            }
        }

        let bank = Arc::new(WaveBank::new(file));
        info!(
            bank = bank.name(),
            entries = bank.len(),
            streaming = bank.is_streaming(),
            "loaded wave bank"
        );
        self.shared
            .wave_banks
            .write()
            .insert(bank.name().to_string(), bank.clone());
        Ok(bank)
    }

    /// Loads a sound bank from disk. The header is validated now; the body
    /// parses on the first cue lookup.
    pub fn load_sound_bank<P: AsRef<Path>>(&self, path: P) -> Result<Arc<SoundBank>, AudioError> {
        let bytes = std::fs::read(path.as_ref())?;
        let name = path
            .as_ref()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sound bank")
            .to_string();
        self.sound_bank_from_bytes_named(name, bytes)
    }

    /// Loads a sound bank from container bytes.
    pub fn sound_bank_from_bytes(&self, bytes: &[u8]) -> Result<Arc<SoundBank>, AudioError> {
        self.sound_bank_from_bytes_named("sound bank".to_string(), bytes.to_vec())
    }

    fn sound_bank_from_bytes_named(
        &self,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<Arc<SoundBank>, AudioError> {
        info!(bank = name, "loading sound bank");
        Ok(Arc::new(SoundBank::new(self.shared.clone(), name, bytes)?))
    }

    pub fn set_global_variable(&self, name: &str, value: f32) -> Result<(), AudioError> {
        self.shared.set_global_variable(name, value)
    }

    pub fn get_global_variable(&self, name: &str) -> Result<f32, AudioError> {
        self.shared.get_global_variable(name)
    }

    /// Sets a category's linear gain. Member sounds pick the change up
    /// immediately, recomputed from base values so nothing compounds.
    pub fn set_category_volume(&self, name: &str, volume: f32) -> Result<(), AudioError> {
        let index = self
            .shared
            .category_index
            .get(name)
            .copied()
            .ok_or_else(|| AudioError::UnknownCategory(name.to_string()))?;
        self.shared.categories[index].set_volume(volume);

        let mut graph = self.shared.graph.write();
        let now = Instant::now();
        for member in self.shared.categories[index].members() {
            self.shared.refresh_sound_parameters(&mut graph, member, now);
        }
        Ok(())
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.shared
            .category_index
            .get(name)
            .map(|&i| &self.shared.categories[i])
    }

    pub fn categories(&self) -> &[Category] {
        &self.shared.categories
    }

    /// How many of a category's sounds are live right now.
    pub fn category_live_count(&self, name: &str) -> Result<usize, AudioError> {
        let index = self
            .shared
            .category_index
            .get(name)
            .copied()
            .ok_or_else(|| AudioError::UnknownCategory(name.to_string()))?;
        let graph = self.shared.graph.read();
        Ok(self.shared.live_members(&graph, index, None).len())
    }

    /// A snapshot of the engine's variables, for inspection.
    pub fn variables(&self) -> Vec<Variable> {
        self.shared.variables.read().variables().to_vec()
    }

    pub fn context(&self) -> &Arc<AudioContext> {
        &self.shared.context
    }

    /// The per-frame pump; see the module docs for what runs here.
    pub fn update(&self) {
        self.shared.update();
    }
}

impl EngineShared {
    pub(crate) fn instance_variable_values(&self) -> Vec<f32> {
        self.variables.read().instance_values()
    }

    pub(crate) fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.read().index_of(name)
    }

    /// (global, read_only) of a variable.
    pub(crate) fn variable_flags(&self, index: usize) -> (bool, bool) {
        let variables = self.variables.read();
        let variable = variables.variable(index);
        (variable.global, variable.read_only)
    }

    pub(crate) fn set_global_variable(&self, name: &str, value: f32) -> Result<(), AudioError> {
        self.variables.write().set_global(name, value)
    }

    pub(crate) fn get_global_variable(&self, name: &str) -> Result<f32, AudioError> {
        self.variables.read().get_global(name)
    }

    pub(crate) fn sound_is_live(&self, index: usize) -> bool {
        self.graph
            .read()
            .slot(index)
            .map(|s| s.is_live())
            .unwrap_or(false)
    }

    pub(crate) fn sound_is_playing(&self, index: usize) -> bool {
        self.graph
            .read()
            .slot(index)
            .map(|s| s.state == PlayState::Playing)
            .unwrap_or(false)
    }

    pub(crate) fn sound_is_paused(&self, index: usize) -> bool {
        self.graph
            .read()
            .slot(index)
            .map(|s| s.state == PlayState::Paused)
            .unwrap_or(false)
    }

    /// Registers every sound of a parsed bank into the arena and its
    /// category. Validated up front so a bad bank registers nothing.
    pub(crate) fn register_sound_bank(
        &self,
        file: &SoundBankFile,
    ) -> Result<Vec<usize>, AudioError> {
        for sound in &file.sounds {
            if sound.category as usize >= self.categories.len() {
                return Err(AudioError::UnknownCategory(format!("#{}", sound.category)));
            }
            for &rpc in &sound.rpc_curves {
                if rpc as usize >= self.rpc_curves.len() {
                    return Err(AudioError::Format(parse::ParseError::InvalidData(
                        format!("sound references rpc curve {}", rpc),
                    )));
                }
            }
        }

        let bank_names = Arc::new(file.wave_bank_names.clone());
        let mut graph = self.graph.write();
        let mut slots = Vec::with_capacity(file.sounds.len());
        for sound in &file.sounds {
            let index = graph.register(SoundSlot::new(sound, bank_names.clone()));
            self.categories[sound.category as usize].register(index);
            slots.push(index);
        }
        Ok(slots)
    }

    /// Stops and tombstones the given arena slots.
    pub(crate) fn release_sounds(&self, indices: &[usize]) {
        let mut graph = self.graph.write();
        for &index in indices {
            self.halt_sound(&mut graph, index);
            graph.release(index);
        }
    }

    /// Plays a sound on behalf of a cue. Runs category admission, then
    /// reserves, binds and starts the voices.
    pub(crate) fn play_sound(
        &self,
        index: usize,
        cue_volume: f32,
        cue_variables: Arc<RwLock<Vec<f32>>>,
    ) -> Result<(), AudioError> {
        let mut graph = self.graph.write();
        let (category_index, state) = {
            let slot = graph.slot(index).ok_or(AudioError::BankUnloaded)?;
            (slot.category, slot.state)
        };
        let category = &self.categories[category_index];

        // Replaying the shared record stops the old playback first.
        if state != PlayState::Stopped {
            self.halt_sound(&mut graph, index);
        }

        // Admission against the category's instance limit.
        let mut crossfade = false;
        if let Some(max) = category.max_instances() {
            let live = self.live_members(&graph, category_index, Some(index));
            if live.len() >= max as usize {
                match category.behavior() {
                    InstanceBehavior::FailToPlay | InstanceBehavior::Queue => {
                        debug!(
                            category = category.name(),
                            live = live.len(),
                            "category full, rejecting play"
                        );
                        return Err(AudioError::InstancePlayLimit);
                    }
                    behavior => {
                        if let Some(victim) = select_victim(&graph, &live, behavior) {
                            debug!(
                                category = category.name(),
                                victim, "category full, evicting"
                            );
                            self.begin_fade_out(&mut graph, victim);
                            crossfade = true;
                        }
                    }
                }
            }
        }

        self.start_voices(&mut graph, index)?;

        let now = Instant::now();
        let waves = {
            let slot = graph.slot_mut(index).ok_or(AudioError::BankUnloaded)?;
            slot.state = PlayState::Playing;
            slot.started = Some(now);
            slot.cue_volume = cue_volume;
            slot.cue_variables = Some(cue_variables);
            slot.rpc = RpcOutputs::default();
            slot.fade = (crossfade && !category.fade_in().is_zero()).then(|| {
                Fade::new(FadeDirection::In, category.crossfade(), category.fade_in())
            });
            slot.active_waves()
        };

        self.refresh_sound_parameters(&mut graph, index, now);
        for wave in waves {
            self.context.router().play(wave.handle);
        }
        Ok(())
    }

    pub(crate) fn stop_sound(&self, index: usize, mode: StopMode) {
        let mut graph = self.graph.write();
        match mode {
            StopMode::Immediate => self.halt_sound(&mut graph, index),
            StopMode::AsAuthored => {
                let active = graph
                    .slot(index)
                    .map(|s| s.state != PlayState::Stopped)
                    .unwrap_or(false);
                if active {
                    self.begin_fade_out(&mut graph, index);
                }
            }
        }
    }

    pub(crate) fn pause_sound(&self, index: usize) {
        let mut graph = self.graph.write();
        let Some(slot) = graph.slot_mut(index) else {
            return;
        };
        if slot.state != PlayState::Playing {
            return;
        }
        slot.state = PlayState::Paused;
        for wave in slot.active_waves() {
            self.context.router().pause(wave.handle);
        }
    }

    pub(crate) fn resume_sound(&self, index: usize) {
        let mut graph = self.graph.write();
        let Some(slot) = graph.slot_mut(index) else {
            return;
        };
        if slot.state != PlayState::Paused {
            return;
        }
        slot.state = PlayState::Playing;
        for wave in slot.active_waves() {
            self.context.router().play(wave.handle);
        }
    }

    pub(crate) fn set_cue_volume(&self, index: usize, volume: f32) {
        let mut graph = self.graph.write();
        if let Some(slot) = graph.slot_mut(index) {
            slot.cue_volume = volume;
        }
        self.refresh_sound_parameters(&mut graph, index, Instant::now());
    }

    /// Live member indices of a category, optionally excluding one sound.
    fn live_members(
        &self,
        graph: &SoundGraph,
        category_index: usize,
        exclude: Option<usize>,
    ) -> Vec<usize> {
        self.categories[category_index]
            .members()
            .into_iter()
            .filter(|&m| Some(m) != exclude)
            .filter(|&m| graph.slot(m).map(|s| s.is_live()).unwrap_or(false))
            .collect()
    }

    /// Reserves and binds voices for every wave the sound plays. On any
    /// failure everything reserved so far is released; no partial starts.
    fn start_voices(&self, graph: &mut SoundGraph, index: usize) -> Result<(), AudioError> {
        enum Plan {
            Leaf(u8, u16),
            Clips(Vec<Vec<(u8, u16, bool)>>),
        }

        let (bank_names, plan) = {
            let slot = graph.slot(index).ok_or(AudioError::BankUnloaded)?;
            let plan = match &slot.kind {
                SoundKind::Leaf {
                    wave_bank, track, ..
                } => Plan::Leaf(*wave_bank, *track),
                SoundKind::Complex { clips } => Plan::Clips(
                    clips
                        .iter()
                        .map(|clip| {
                            clip.events
                                .iter()
                                .map(|event| {
                                    let ClipEventData::PlayWave {
                                        wave_bank,
                                        track,
                                        looped,
                                    } = event;
                                    (*wave_bank, *track, *looped)
                                })
                                .collect()
                        })
                        .collect(),
                ),
            };
            (slot.bank_names.clone(), plan)
        };

        match plan {
            Plan::Leaf(bank, track) => {
                let wave = self.start_wave(&bank_names, bank, track, false, index)?;
                if let Some(slot) = graph.slot_mut(index) {
                    if let SoundKind::Leaf { voice, .. } = &mut slot.kind {
                        *voice = Some(wave);
                    }
                }
            }
            Plan::Clips(clips) => {
                let mut started: Vec<Vec<ActiveWave>> = Vec::with_capacity(clips.len());
                for events in &clips {
                    let mut clip_waves = Vec::with_capacity(events.len());
                    for &(bank, track, looped) in events {
                        match self.start_wave(&bank_names, bank, track, looped, index) {
                            Ok(wave) => clip_waves.push(wave),
                            Err(err) => {
                                for wave in
                                    clip_waves.into_iter().chain(started.into_iter().flatten())
                                {
                                    self.release_wave(wave);
                                }
                                return Err(err);
                            }
                        }
                    }
                    started.push(clip_waves);
                }
                if let Some(slot) = graph.slot_mut(index) {
                    if let SoundKind::Complex { clips } = &mut slot.kind {
                        for (clip, waves) in clips.iter_mut().zip(started) {
                            clip.active = waves;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves one wave reference and puts it on a voice: in-memory banks
    /// bind the whole payload, streaming banks register with the fill
    /// thread.
    fn start_wave(
        &self,
        bank_names: &Arc<Vec<String>>,
        bank: u8,
        track: u16,
        looped: bool,
        sound_index: usize,
    ) -> Result<ActiveWave, AudioError> {
        let bank_name = bank_names
            .get(bank as usize)
            .ok_or_else(|| AudioError::MissingWaveBank(format!("#{}", bank)))?;
        let wave_bank = self
            .wave_banks
            .read()
            .get(bank_name)
            .cloned()
            .ok_or_else(|| AudioError::MissingWaveBank(bank_name.clone()))?;
        let wave = wave_bank.wave(track as usize)?;
        let router = self.context.router();

        if wave_bank.is_streaming() {
            let decoder = SymphoniaDecoder::new(wave.payload().clone())?;
            let format = decoder.output_format();
            let handle = router.reserve(&format)?;
            let session = StreamingSession::new(handle, sound_index, Box::new(decoder), looped);
            self.context.streamer().register(session);
            Ok(ActiveWave {
                handle,
                streaming: true,
            })
        } else {
            let handle = router.reserve(wave.format())?;
            let buffer = BufferDescriptor {
                data: wave.payload(),
                looped,
                loop_region: wave.loop_region(),
            };
            if let Err(err) = router.bind(handle, &buffer) {
                router.release(handle);
                return Err(err);
            }
            Ok(ActiveWave {
                handle,
                streaming: false,
            })
        }
    }

    fn release_wave(&self, wave: ActiveWave) {
        if wave.streaming {
            self.context.streamer().unregister(wave.handle);
        }
        self.context.router().release(wave.handle);
    }

    /// Hard stop: voices released, streams unregistered, runtime state
    /// cleared. Synchronous; a racing fill dies on the generation check.
    fn halt_sound(&self, graph: &mut SoundGraph, index: usize) {
        let Some(slot) = graph.slot_mut(index) else {
            return;
        };
        for wave in slot.active_waves() {
            self.release_wave(wave);
        }
        slot.reset_runtime();
    }

    /// Starts the victim's ride down: immediately out of the live count,
    /// gain ramped by update() until the fade-out elapses.
    fn begin_fade_out(&self, graph: &mut SoundGraph, index: usize) {
        let Some(category_index) = graph.slot(index).map(|s| s.category) else {
            return;
        };
        let category = &self.categories[category_index];
        if category.fade_out().is_zero() {
            self.halt_sound(graph, index);
            return;
        }
        if let Some(slot) = graph.slot_mut(index) {
            slot.state = PlayState::FadingOut;
            slot.fade = Some(Fade::new(
                FadeDirection::Out,
                category.crossfade(),
                category.fade_out(),
            ));
        }
    }

    /// Recomputes a sound's effective gain and pitch from base values and
    /// pushes them to its voices. The category gain is multiplied in here,
    /// exactly once per recomputation.
    fn refresh_sound_parameters(&self, graph: &mut SoundGraph, index: usize, now: Instant) {
        let Some(slot) = graph.slot_mut(index) else {
            return;
        };
        let category_volume = self
            .categories
            .get(slot.category)
            .map(|c| c.volume())
            .unwrap_or(1.0);
        let fade_factor = slot.fade.map(|f| f.factor(now)).unwrap_or(1.0);
        let gain =
            category_volume * slot.volume * slot.cue_volume * slot.rpc.volume_gain * fade_factor;
        let pitch = cents_to_ratio(slot.pitch_cents as f32) * slot.rpc.pitch_ratio;

        slot.effective_gain = gain;
        for wave in slot.active_waves() {
            self.context.router().set_gain(wave.handle, gain);
            self.context.router().set_pitch(wave.handle, pitch);
        }
    }

    pub(crate) fn update(&self) {
        let now = Instant::now();
        let events = self.context.drain_stream_events();
        let mut graph = self.graph.write();

        // Streams that delivered all their data hand the voice over to
        // end-of-playback polling.
        for event in events {
            if let Some(slot) = graph.slot_mut(event.sound) {
                slot.wave_decode_complete(event.voice);
            }
        }

        // Natural completion: a bound, non-streaming voice the backend
        // reports as stopped is done; return it to the pool.
        for index in graph.indices_with_voices() {
            let finished: Vec<ActiveWave> = match graph.slot(index) {
                Some(slot) => slot
                    .active_waves()
                    .into_iter()
                    .filter(|w| {
                        !w.streaming
                            && self.context.router().state(w.handle) == VoiceState::Stopped
                    })
                    .collect(),
                None => continue,
            };
            for wave in finished {
                self.context.router().release(wave.handle);
                if let Some(slot) = graph.slot_mut(index) {
                    if slot.remove_wave(wave.handle) && slot.state != PlayState::Stopped {
                        debug!(sound = index, "sound finished");
                        slot.reset_runtime();
                    }
                }
            }
        }

        // Advance fades; finished fade-outs hard-stop.
        for index in 0..graph.len() {
            let Some(fade) = graph.slot(index).and_then(|s| s.fade) else {
                continue;
            };
            if fade.finished(now) {
                match fade.direction {
                    FadeDirection::In => {
                        if let Some(slot) = graph.slot_mut(index) {
                            slot.fade = None;
                        }
                        self.refresh_sound_parameters(&mut graph, index, now);
                    }
                    FadeDirection::Out => self.halt_sound(&mut graph, index),
                }
            } else {
                self.refresh_sound_parameters(&mut graph, index, now);
            }
        }

        // RPC evaluation for live sounds that consume variables.
        let rpc_sounds: Vec<usize> = (0..graph.len())
            .filter(|&i| {
                graph
                    .slot(i)
                    .map(|s| s.is_live() && !s.rpc_curves.is_empty())
                    .unwrap_or(false)
            })
            .collect();
        if !rpc_sounds.is_empty() {
            let variables = self.variables.read();
            for index in rpc_sounds {
                let outputs = match graph.slot(index) {
                    Some(slot) => self.evaluate_rpcs(slot, &variables),
                    None => continue,
                };
                if let Some(slot) = graph.slot_mut(index) {
                    slot.rpc = outputs;
                }
                self.refresh_sound_parameters(&mut graph, index, now);
            }
        }

        self.context.router().pool().refresh_available();
    }

    /// Evaluates every curve a sound consumes. Volume results are
    /// millibels and sum; pitch results are cents and sum; the remaining
    /// parameters take the last value and are recorded on the sound.
    fn evaluate_rpcs(&self, slot: &SoundSlot, variables: &VariableStore) -> RpcOutputs {
        let mut volume_mb: Option<f32> = None;
        let mut pitch_cents: Option<f32> = None;
        let mut outputs = RpcOutputs::default();

        for &curve_index in &slot.rpc_curves {
            let Some(curve) = self.rpc_curves.get(curve_index) else {
                warn!(curve = curve_index, "sound references a missing rpc curve");
                continue;
            };
            let variable = variables.variable(curve.variable);
            let x = if variable.global {
                variable.value
            } else {
                slot.cue_variables
                    .as_ref()
                    .map(|vars| vars.read()[curve.variable])
                    .unwrap_or(variable.init)
            };
            let y = curve.evaluate(x);
            match curve.parameter {
                RpcParameter::Volume => *volume_mb.get_or_insert(0.0) += y,
                RpcParameter::Pitch => *pitch_cents.get_or_insert(0.0) += y,
                RpcParameter::ReverbSend => outputs.reverb_send = Some(y),
                RpcParameter::FilterFrequency => outputs.filter_frequency = Some(y),
                RpcParameter::FilterQFactor => outputs.filter_q = Some(y),
            }
        }

        outputs.volume_gain = volume_mb
            .map(|mb| 10f32.powf(mb / 2000.0))
            .unwrap_or(1.0);
        outputs.pitch_ratio = pitch_cents.map(cents_to_ratio).unwrap_or(1.0);
        outputs
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    use crate::backend::{mock, Codec, VoiceBackend, VoiceState};
    use crate::config::RuntimeConfig;
    use crate::parse::fixture::{
        CategorySpec, ClipSpec, SettingsBuilder, SoundBankBuilder, SoundSpec, VariableSpec,
        WaveBankBuilder, WaveSpec,
    };
    use crate::parse::ParseError;

    use super::*;

    struct Rig {
        backend: Arc<mock::Backend>,
        context: Arc<AudioContext>,
        engine: AudioEngine,
    }

    impl Rig {
        fn new(settings: Vec<u8>) -> Rig {
            Rig::with_capacity(settings, 32)
        }

        fn with_capacity(settings: Vec<u8>, voices: usize) -> Rig {
            let backend = Arc::new(mock::Backend::new(voices));
            // A long tick keeps the background fill thread out of the way;
            // tests drive the streamer by hand.
            let config = RuntimeConfig {
                voice_capacity: voices,
                stream_tick_ms: 60_000,
                ..RuntimeConfig::default()
            };
            let context = AudioContext::init(Box::new(backend.clone()), &config).unwrap();
            let engine = AudioEngine::from_bytes(context.clone(), &settings).unwrap();
            Rig {
                backend,
                context,
                engine,
            }
        }

        fn playing_voice(&self) -> usize {
            let playing = self.backend.voices_in_state(VoiceState::Playing);
            assert_eq!(playing.len(), 1, "expected exactly one playing voice");
            playing[0]
        }
    }

    /// Two categories: "Default" (unlimited) and "Sfx" with the given
    /// limit and packed behavior/crossfade flags, plus a global and a
    /// cue-instance variable.
    fn settings(max_instances: u8, behavior: u8, fade_in_ms: u16, fade_out_ms: u16) -> Vec<u8> {
        SettingsBuilder::new()
            .category(CategorySpec::named("Default"))
            .category(CategorySpec {
                name: "Sfx".into(),
                max_instances,
                fade_in_ms,
                fade_out_ms,
                flags: behavior << 3,
                volume: 0xB4,
                visibility: 0,
            })
            .variable(VariableSpec {
                name: "Volume".into(),
                flags: 0x01,
                init: 1.0,
                min: 0.0,
                max: 1.0,
            })
            .variable(VariableSpec {
                name: "Distance".into(),
                flags: 0x01 | 0x04,
                init: 0.0,
                min: 0.0,
                max: 100.0,
            })
            .build()
    }

    /// Five mono PCM tracks; track i's source payload is eight bytes of i.
    fn wave_bank(streaming: bool) -> Vec<u8> {
        let mut builder = WaveBankBuilder::new("Waves");
        if streaming {
            builder = builder.streaming();
        }
        for i in 0..5u8 {
            builder = builder.entry(WaveSpec::pcm16(1, 44100, vec![i; 8]));
        }
        builder.build()
    }

    /// Simple cues, each a leaf sound in the Sfx category.
    fn leaf_bank(cues: &[(&str, u16)]) -> Vec<u8> {
        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        for &(name, track) in cues {
            let sound = builder.sound(SoundSpec::leaf(0, track).category(1));
            builder.simple_cue(name, sound);
        }
        builder.build()
    }

    #[test]
    fn test_simple_cue_play_reserves_one_voice_and_binds_its_track() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        let waves = rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("Explosion", 3)]))
            .unwrap();

        let mut cue = bank.get_cue("Explosion").unwrap();
        cue.play().unwrap();

        assert!(cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 1);

        // The bound payload is exactly wave bank 0, track 3.
        let voice = rig.playing_voice();
        let buffers = rig.backend.buffers_of(voice);
        assert_eq!(buffers.len(), 1);
        let expected = waves.wave(3).unwrap().payload().as_ref().clone();
        assert_eq!(buffers[0].data, expected);
        assert_eq!(&buffers[0].data[0..4], b"RIFF");
        assert!(buffers[0].data.ends_with(&[3u8; 8]));

        rig.context.shutdown();
    }

    #[test]
    fn test_unknown_cue_is_a_missing_key() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("Explosion", 0)]))
            .unwrap();
        assert!(matches!(
            bank.get_cue("Implosion"),
            Err(AudioError::UnknownCue(_))
        ));
        rig.context.shutdown();
    }

    #[test]
    fn test_fail_to_play_keeps_live_count_at_limit() {
        let rig = Rig::new(settings(2, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0), ("B", 1), ("C", 2)]))
            .unwrap();

        let mut a = bank.get_cue("A").unwrap();
        let mut b = bank.get_cue("B").unwrap();
        let mut c = bank.get_cue("C").unwrap();

        a.play().unwrap();
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 1);
        b.play().unwrap();
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 2);

        // The third play is rejected with no state change.
        assert!(matches!(c.play(), Err(AudioError::InstancePlayLimit)));
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 2);
        assert!(!c.is_playing());
        assert_eq!(rig.backend.live_voices(), 2);

        rig.context.shutdown();
    }

    #[test]
    fn test_replace_oldest_evicts_the_earliest_start() {
        // Max 2, ReplaceOldest, no fades: eviction is a hard stop.
        let rig = Rig::new(settings(2, 2, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0), ("B", 1), ("C", 2)]))
            .unwrap();

        let mut a = bank.get_cue("A").unwrap();
        let mut b = bank.get_cue("B").unwrap();
        let mut c = bank.get_cue("C").unwrap();

        a.play().unwrap();
        sleep(Duration::from_millis(5));
        b.play().unwrap();
        sleep(Duration::from_millis(5));
        c.play().unwrap();

        // Exactly the oldest instance stopped.
        assert!(!a.is_playing());
        assert!(b.is_playing());
        assert!(c.is_playing());
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 2);
        assert_eq!(rig.backend.live_voices(), 2);

        rig.context.shutdown();
    }

    #[test]
    fn test_replace_lowest_priority_breaks_ties_by_age() {
        let rig = Rig::new(settings(2, 4, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        for (name, track, priority) in [("High", 0u16, 9u8), ("Low", 1, 1), ("Mid", 2, 5)] {
            let sound = builder.sound(SoundSpec::leaf(0, track).category(1).priority(priority));
            builder.simple_cue(name, sound);
        }
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut high = bank.get_cue("High").unwrap();
        let mut low = bank.get_cue("Low").unwrap();
        let mut mid = bank.get_cue("Mid").unwrap();

        high.play().unwrap();
        low.play().unwrap();
        mid.play().unwrap();

        assert!(high.is_playing());
        assert!(!low.is_playing());
        assert!(mid.is_playing());

        rig.context.shutdown();
    }

    #[test]
    fn test_replace_quietest_picks_the_lowest_effective_gain() {
        let rig = Rig::new(settings(2, 3, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        // 0x40 decodes far below 0 dB; 0xB4 is the 0 dB point.
        let quiet = builder.sound(SoundSpec::leaf(0, 0).category(1).volume(0x40));
        builder.simple_cue("Quiet", quiet);
        let loud = builder.sound(SoundSpec::leaf(0, 1).category(1).volume(0xB4));
        builder.simple_cue("Loud", loud);
        let next = builder.sound(SoundSpec::leaf(0, 2).category(1));
        builder.simple_cue("Next", next);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut quiet = bank.get_cue("Quiet").unwrap();
        let mut loud = bank.get_cue("Loud").unwrap();
        let mut next = bank.get_cue("Next").unwrap();

        quiet.play().unwrap();
        loud.play().unwrap();
        next.play().unwrap();

        assert!(!quiet.is_playing());
        assert!(loud.is_playing());
        assert!(next.is_playing());

        rig.context.shutdown();
    }

    #[test]
    fn test_eviction_crossfades_and_hard_stops_after_fade_out() {
        // Max 1, ReplaceOldest, 40 ms fades, linear shape.
        let rig = Rig::new(settings(1, 2, 40, 40));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0), ("B", 1)]))
            .unwrap();

        let mut a = bank.get_cue("A").unwrap();
        let mut b = bank.get_cue("B").unwrap();

        a.play().unwrap();
        let a_voice = rig.playing_voice();
        b.play().unwrap();

        // The victim leaves the live count immediately but its voice rides
        // the fade out; the new sound fades in from silence.
        assert!(!a.is_playing());
        assert!(b.is_playing());
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 1);
        assert_eq!(rig.backend.live_voices(), 2);
        let b_voice = rig
            .backend
            .voices_in_state(VoiceState::Playing)
            .into_iter()
            .find(|&v| v != a_voice)
            .unwrap();
        assert!(rig.backend.gain_of(b_voice).unwrap() < 0.1);

        // Mid-fade both voices are live and the gains have moved.
        sleep(Duration::from_millis(20));
        rig.engine.update();
        assert_eq!(rig.backend.live_voices(), 2);

        // After the fade-out elapses the victim hard-stops.
        sleep(Duration::from_millis(40));
        rig.engine.update();
        assert_eq!(rig.backend.live_voices(), 1);
        assert!((rig.backend.gain_of(b_voice).unwrap() - 1.0).abs() < 0.05);

        rig.context.shutdown();
    }

    #[test]
    fn test_stop_as_authored_fades_then_stops() {
        let rig = Rig::new(settings(0xFF, 0, 0, 40));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        cue.stop(StopMode::AsAuthored).unwrap();

        // Not playing, but the voice is still fading.
        assert!(!cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 1);

        sleep(Duration::from_millis(60));
        rig.engine.update();
        assert_eq!(rig.backend.live_voices(), 0);

        rig.context.shutdown();
    }

    #[test]
    fn test_stop_immediate_releases_at_once() {
        let rig = Rig::new(settings(0xFF, 0, 0, 500));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        cue.stop(StopMode::Immediate).unwrap();
        assert!(!cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 0);

        rig.engine.update();
        assert_eq!(rig.context.voices_available(), 32);

        rig.context.shutdown();
    }

    #[test]
    fn test_pause_and_resume_propagate() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        let voice = rig.playing_voice();

        cue.pause().unwrap();
        assert!(cue.is_paused());
        assert!(!cue.is_playing());
        assert_eq!(rig.backend.state(voice), VoiceState::Paused);
        // A paused sound still counts against the category limit.
        assert_eq!(rig.engine.category_live_count("Sfx").unwrap(), 1);

        cue.resume().unwrap();
        assert!(cue.is_playing());
        assert_eq!(rig.backend.state(voice), VoiceState::Playing);

        rig.context.shutdown();
    }

    #[test]
    fn test_natural_completion_returns_the_voice() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        let voice = rig.playing_voice();

        // The hardware finishes the buffer; the next pump notices.
        rig.backend.finish(voice);
        rig.engine.update();

        assert!(!cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 0);
        assert_eq!(rig.context.voices_available(), 32);

        rig.context.shutdown();
    }

    #[test]
    fn test_replaying_a_live_cue_restarts_the_shared_sound() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        cue.play().unwrap();

        // Stop-then-start: never two voices for the one leaf sound.
        assert_eq!(rig.backend.live_voices(), 1);
        assert!(cue.is_playing());

        // A second cue of the same name shares the sound record.
        let mut other = bank.get_cue("A").unwrap();
        other.play().unwrap();
        assert_eq!(rig.backend.live_voices(), 1);

        rig.context.shutdown();
    }

    #[test]
    fn test_global_variables_via_engine_and_cue() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        rig.engine.set_global_variable("Volume", 0.25).unwrap();
        assert_eq!(rig.engine.get_global_variable("Volume").unwrap(), 0.25);
        assert!(matches!(
            rig.engine.set_global_variable("Nope", 1.0),
            Err(AudioError::UnknownVariable(_))
        ));

        // Cue writes to a global go through to the engine store; instance
        // variables stay cue-local.
        let mut cue = bank.get_cue("A").unwrap();
        cue.set_variable("Volume", 0.5).unwrap();
        assert_eq!(rig.engine.get_global_variable("Volume").unwrap(), 0.5);

        cue.set_variable("Distance", 12.0).unwrap();
        assert_eq!(cue.get_variable("Distance").unwrap(), 12.0);
        let other = bank.get_cue("A").unwrap();
        assert_eq!(other.get_variable("Distance").unwrap(), 0.0);

        rig.context.shutdown();
    }

    #[test]
    fn test_rpc_curves_drive_volume_and_pitch() {
        // Curve 0: Distance -> Volume, 0 mB at 0 down to -9600 mB at 100.
        // Curve 1: Distance -> Pitch, 0 cents at 0 up to +1200 at 100.
        let settings = SettingsBuilder::new()
            .category(CategorySpec::named("Default"))
            .variable(VariableSpec {
                name: "Distance".into(),
                flags: 0x01 | 0x04,
                init: 0.0,
                min: 0.0,
                max: 100.0,
            })
            .rpc(0, 0, &[(0.0, 0.0, 0), (100.0, -9600.0, 0)])
            .rpc(0, 1, &[(0.0, 0.0, 0), (100.0, 1200.0, 0)])
            .build();
        let rig = Rig::new(settings);
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        let sound = builder.sound(SoundSpec::leaf(0, 0).rpcs(vec![0, 1]));
        builder.simple_cue("Engine", sound);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut cue = bank.get_cue("Engine").unwrap();
        cue.play().unwrap();
        let voice = rig.playing_voice();

        rig.engine.update();
        assert!((rig.backend.gain_of(voice).unwrap() - 1.0).abs() < 0.05);
        assert!((rig.backend.pitch_of(voice).unwrap() - 1.0).abs() < 0.01);

        cue.set_variable("Distance", 100.0).unwrap();
        rig.engine.update();
        // -9600 mB is -96 dB; +1200 cents doubles the rate.
        assert!(rig.backend.gain_of(voice).unwrap() < 1e-3);
        assert!((rig.backend.pitch_of(voice).unwrap() - 2.0).abs() < 0.01);

        cue.set_variable("Distance", 0.0).unwrap();
        rig.engine.update();
        assert!((rig.backend.gain_of(voice).unwrap() - 1.0).abs() < 0.05);

        rig.context.shutdown();
    }

    #[test]
    fn test_streaming_bank_feeds_through_the_fill_thread() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(true)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("Music", 2)]))
            .unwrap();

        let mut cue = bank.get_cue("Music").unwrap();
        cue.play().unwrap();
        assert!(cue.is_playing());
        assert_eq!(rig.context.streamer().active_streams(), 1);
        let voice = rig.playing_voice();
        assert_eq!(rig.backend.queued(voice), 0);

        // One fill pass decodes the short track to completion.
        rig.context.streamer().tick();
        assert!(rig.backend.queued(voice) >= 1);
        assert_eq!(rig.context.streamer().active_streams(), 0);

        // The completion event hands the voice to end-of-playback
        // detection; it is not stopped while the hardware still plays.
        rig.engine.update();
        assert!(cue.is_playing());

        rig.backend.finish(voice);
        rig.engine.update();
        assert!(!cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 0);

        rig.context.shutdown();
    }

    #[test]
    fn test_stopping_a_stream_is_synchronous() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(true)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("Music", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("Music").unwrap();
        cue.play().unwrap();
        assert_eq!(rig.context.streamer().active_streams(), 1);

        cue.stop(StopMode::Immediate).unwrap();
        assert_eq!(rig.context.streamer().active_streams(), 0);
        assert_eq!(rig.backend.live_voices(), 0);

        rig.context.shutdown();
    }

    #[test]
    fn test_complex_sound_plays_every_clip_event() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        let sound = builder.sound(
            SoundSpec::complex(vec![
                ClipSpec::new().play_wave(0, 0, false),
                ClipSpec::new().play_wave(0, 1, true).play_wave(0, 2, false),
            ])
            .category(1),
        );
        builder.simple_cue("Ambience", sound);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut cue = bank.get_cue("Ambience").unwrap();
        cue.play().unwrap();

        assert!(cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 3);
        // The looped clip event carried its flag through to the buffer.
        let looped: Vec<bool> = rig
            .backend
            .voices_in_state(VoiceState::Playing)
            .iter()
            .map(|&v| rig.backend.buffers_of(v)[0].looped)
            .collect();
        assert_eq!(looped.iter().filter(|&&l| l).count(), 1);

        cue.pause().unwrap();
        assert!(cue.is_paused());
        assert_eq!(rig.backend.voices_in_state(VoiceState::Paused).len(), 3);

        cue.stop(StopMode::Immediate).unwrap();
        assert_eq!(rig.backend.live_voices(), 0);

        rig.context.shutdown();
    }

    #[test]
    fn test_complex_sound_start_is_all_or_nothing() {
        // Pool of two voices cannot hold a three-event sound.
        let rig = Rig::with_capacity(settings(0xFF, 0, 0, 0), 2);
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        let sound = builder.sound(SoundSpec::complex(vec![
            ClipSpec::new().play_wave(0, 0, false),
            ClipSpec::new().play_wave(0, 1, false).play_wave(0, 2, false),
        ]));
        builder.simple_cue("Ambience", sound);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut cue = bank.get_cue("Ambience").unwrap();
        assert!(matches!(cue.play(), Err(AudioError::InstancePlayLimit)));
        assert!(!cue.is_playing());
        assert_eq!(rig.backend.live_voices(), 0);
        rig.engine.update();
        assert_eq!(rig.context.voices_available(), 2);

        rig.context.shutdown();
    }

    #[test]
    fn test_sound_bank_body_parses_on_first_lookup() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));

        // A valid header followed by garbage loads fine; the first cue
        // lookup hits the parse error.
        let mut bytes = leaf_bank(&[("A", 0)]);
        bytes.truncate(20);
        let bank = rig.engine.sound_bank_from_bytes(&bytes).unwrap();
        assert!(matches!(
            bank.get_cue("A"),
            Err(AudioError::Format(ParseError::UnexpectedEof))
        ));

        // A bad header fails at load.
        let mut bad = leaf_bank(&[("A", 0)]);
        bad[0] = b'Z';
        assert!(matches!(
            rig.engine.sound_bank_from_bytes(&bad),
            Err(AudioError::Format(ParseError::BadMagic { .. }))
        ));

        rig.context.shutdown();
    }

    #[test]
    fn test_unload_stops_sounds_and_tombstones() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        assert_eq!(rig.backend.live_voices(), 1);

        bank.unload();
        assert_eq!(rig.backend.live_voices(), 0);
        assert!(matches!(bank.get_cue("A"), Err(AudioError::BankUnloaded)));
        assert!(matches!(cue.play(), Err(AudioError::BankUnloaded)));

        rig.context.shutdown();
    }

    #[test]
    fn test_playing_without_the_wave_bank_is_a_missing_key() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();
        let mut cue = bank.get_cue("A").unwrap();
        assert!(matches!(cue.play(), Err(AudioError::MissingWaveBank(_))));
        rig.context.shutdown();
    }

    #[test]
    fn test_backend_codec_gate_rejects_the_bank() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        // Codec tag 3 is WMA; the mock backend only plays PCM and ADPCM.
        let mut spec = WaveSpec::adpcm(1, 44100, vec![0u8; 8]);
        spec.codec_tag = 3;
        let bytes = WaveBankBuilder::new("Waves").entry(spec).build();
        assert!(matches!(
            rig.engine.wave_bank_from_bytes(&bytes),
            Err(AudioError::UnsupportedCodec(Codec::Wma, _))
        ));
        rig.context.shutdown();
    }

    #[test]
    fn test_category_volume_applies_once_without_compounding() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.play().unwrap();
        let voice = rig.playing_voice();
        let base = rig.backend.gain_of(voice).unwrap();

        rig.engine.set_category_volume("Sfx", 0.5).unwrap();
        let halved = rig.backend.gain_of(voice).unwrap();
        assert!((halved - base * 0.5).abs() < 0.01);

        // Setting the same volume again must not attenuate further.
        rig.engine.set_category_volume("Sfx", 0.5).unwrap();
        assert!((rig.backend.gain_of(voice).unwrap() - halved).abs() < 1e-6);

        assert!(matches!(
            rig.engine.set_category_volume("Nope", 1.0),
            Err(AudioError::UnknownCategory(_))
        ));

        rig.context.shutdown();
    }

    #[test]
    fn test_cue_volume_recomputes_from_base() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();
        let bank = rig
            .engine
            .sound_bank_from_bytes(&leaf_bank(&[("A", 0)]))
            .unwrap();

        let mut cue = bank.get_cue("A").unwrap();
        cue.set_volume(0.5);
        cue.play().unwrap();
        let voice = rig.playing_voice();
        let at_half = rig.backend.gain_of(voice).unwrap();
        assert!((at_half - 0.5).abs() < 0.05);

        cue.set_volume(0.25);
        let at_quarter = rig.backend.gain_of(voice).unwrap();
        assert!((at_quarter - 0.25).abs() < 0.05);

        rig.context.shutdown();
    }

    #[test]
    fn test_load_project_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("project.xgs");
        let waves_path = dir.path().join("waves.xwb");
        let sounds_path = dir.path().join("sounds.xsb");
        std::fs::write(&settings_path, settings(0xFF, 0, 0, 0)).unwrap();
        std::fs::write(&waves_path, wave_bank(false)).unwrap();
        std::fs::write(&sounds_path, leaf_bank(&[("Explosion", 3)])).unwrap();

        let backend = Arc::new(mock::Backend::new(8));
        let context =
            AudioContext::init(Box::new(backend.clone()), &RuntimeConfig::default()).unwrap();
        let engine = AudioEngine::load(context.clone(), &settings_path).unwrap();
        engine.load_wave_bank(&waves_path).unwrap();
        let bank = engine.load_sound_bank(&sounds_path).unwrap();
        assert_eq!(bank.name(), "sounds");

        let mut cue = bank.get_cue("Explosion").unwrap();
        cue.play().unwrap();
        assert_eq!(backend.live_voices(), 1);

        // A missing file surfaces as IO, not a parse failure.
        assert!(matches!(
            engine.load_wave_bank(dir.path().join("nope.xwb")),
            Err(AudioError::Io(_))
        ));

        context.shutdown();
    }

    #[test]
    fn test_variation_weights_are_honored() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        let never = builder.sound(SoundSpec::leaf(0, 0));
        let always = builder.sound(SoundSpec::leaf(0, 1));
        // Weight spans: 0 for the first entry, 50 for the second.
        builder.variation_cue("Pick", &[(never, 10, 10), (always, 0, 50)]);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        for _ in 0..10 {
            let mut cue = bank.get_cue("Pick").unwrap();
            cue.play().unwrap();
            let voice = rig.playing_voice();
            let data = rig.backend.buffers_of(voice)[0].data.clone();
            assert!(data.ends_with(&[1u8; 8]), "zero-weight variation chosen");
            cue.stop(StopMode::Immediate).unwrap();
        }

        rig.context.shutdown();
    }

    #[test]
    fn test_chosen_variation_is_fixed_until_stop() {
        let rig = Rig::new(settings(0xFF, 0, 0, 0));
        rig.engine.wave_bank_from_bytes(&wave_bank(false)).unwrap();

        let mut builder = SoundBankBuilder::new();
        builder.wave_bank("Waves");
        let first = builder.sound(SoundSpec::leaf(0, 0));
        let second = builder.sound(SoundSpec::leaf(0, 1));
        builder.variation_cue("Pick", &[(first, 0, 10), (second, 0, 10)]);
        let bank = rig.engine.sound_bank_from_bytes(&builder.build()).unwrap();

        let mut cue = bank.get_cue("Pick").unwrap();
        cue.play().unwrap();
        let voice = rig.playing_voice();
        let chosen = rig.backend.buffers_of(voice)[0].data.clone();

        // Replaying without a stop keeps the bound variation.
        for _ in 0..5 {
            cue.play().unwrap();
            let voice = rig.playing_voice();
            assert_eq!(rig.backend.buffers_of(voice)[0].data, chosen);
        }

        rig.context.shutdown();
    }
}

/// Picks the instance a full category sacrifices for a new play.
fn select_victim(
    graph: &SoundGraph,
    live: &[usize],
    behavior: InstanceBehavior,
) -> Option<usize> {
    match behavior {
        InstanceBehavior::ReplaceOldest => live
            .iter()
            .copied()
            .min_by_key(|&i| graph.slot(i).and_then(|s| s.started)),
        InstanceBehavior::ReplaceQuietest => live.iter().copied().min_by(|&a, &b| {
            let gain_a = graph.slot(a).map(|s| s.effective_gain).unwrap_or(0.0);
            let gain_b = graph.slot(b).map(|s| s.effective_gain).unwrap_or(0.0);
            gain_a
                .partial_cmp(&gain_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        InstanceBehavior::ReplaceLowestPriority => live
            .iter()
            .copied()
            .min_by_key(|&i| match graph.slot(i) {
                Some(slot) => (slot.priority, slot.started),
                None => (0, None),
            }),
        _ => None,
    }
}
