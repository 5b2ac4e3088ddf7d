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
//! Byte-fixture builders for the three container formats. Test-only: they
//! assemble the same layouts the parsers read, so parser and engine tests
//! can hand-build banks without binary blobs in the repository.

use super::settings::SETTINGS_MAGIC;
use super::soundbank::{FORMAT_VERSION as SOUNDBANK_VERSION, SOUNDBANK_MAGIC};
use super::wavebank::{FLAG_COMPACT, FLAG_STREAMING, WAVEBANK_MAGIC};

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_fixed_string(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    assert!(bytes.len() < width, "name {:?} too long for field", s);
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
}

// ---------------------------------------------------------------------------
// Engine settings (.xgs)
// ---------------------------------------------------------------------------

pub(crate) struct CategorySpec {
    pub name: String,
    pub max_instances: u8,
    pub fade_in_ms: u16,
    pub fade_out_ms: u16,
    pub flags: u8,
    pub volume: u8,
    pub visibility: u8,
}

impl CategorySpec {
    /// A category with neutral defaults: unlimited instances, no fades,
    /// 0 dB volume.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_instances: 0xFF,
            fade_in_ms: 0,
            fade_out_ms: 0,
            flags: 0,
            volume: 0xB4,
            visibility: 0,
        }
    }
}

pub(crate) struct VariableSpec {
    pub name: String,
    pub flags: u8,
    pub init: f32,
    pub min: f32,
    pub max: f32,
}

struct RpcSpec {
    variable: u16,
    parameter: u16,
    points: Vec<(f32, f32, u8)>,
}

pub(crate) struct SettingsBuilder {
    version: u16,
    categories: Vec<CategorySpec>,
    variables: Vec<VariableSpec>,
    rpcs: Vec<RpcSpec>,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            version: 42,
            categories: Vec::new(),
            variables: Vec::new(),
            rpcs: Vec::new(),
        }
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn category(mut self, category: CategorySpec) -> Self {
        self.categories.push(category);
        self
    }

    pub fn variable(mut self, variable: VariableSpec) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn rpc(mut self, variable: u16, parameter: u16, points: &[(f32, f32, u8)]) -> Self {
        self.rpcs.push(RpcSpec {
            variable,
            parameter,
            points: points.to_vec(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = 4 + 4 + if self.version == 42 { 11 } else { 0 } + 6 + 20;
        let categories_size = self.categories.len() * 10;
        let variables_size = self.variables.len() * 13;
        let rpc_size: usize = self.rpcs.iter().map(|r| 5 + r.points.len() * 9).sum();

        let categories_offset = header_size;
        let variables_offset = categories_offset + categories_size;
        let rpc_offset = variables_offset + variables_size;
        let category_names_offset = rpc_offset + rpc_size;
        let category_names_size: usize = self.categories.iter().map(|c| c.name.len() + 1).sum();
        let variable_names_offset = category_names_offset + category_names_size;

        let mut out = Vec::new();
        put_u32(&mut out, SETTINGS_MAGIC);
        put_u16(&mut out, 46); // tool version
        put_u16(&mut out, self.version);
        if self.version == 42 {
            put_u16(&mut out, 0); // crc
            put_u32(&mut out, 0); // last modified low
            put_u32(&mut out, 0); // last modified high
            out.push(1); // platform
        }
        put_u16(&mut out, self.categories.len() as u16);
        put_u16(&mut out, self.variables.len() as u16);
        put_u16(&mut out, self.rpcs.len() as u16);
        put_u32(&mut out, categories_offset as u32);
        put_u32(&mut out, variables_offset as u32);
        put_u32(&mut out, rpc_offset as u32);
        put_u32(&mut out, category_names_offset as u32);
        put_u32(&mut out, variable_names_offset as u32);
        assert_eq!(out.len(), header_size);

        for c in &self.categories {
            out.push(c.max_instances);
            put_u16(&mut out, c.fade_in_ms);
            put_u16(&mut out, c.fade_out_ms);
            out.push(c.flags);
            put_u16(&mut out, 0); // reserved
            out.push(c.volume);
            out.push(c.visibility);
        }
        for v in &self.variables {
            out.push(v.flags);
            put_f32(&mut out, v.init);
            put_f32(&mut out, v.min);
            put_f32(&mut out, v.max);
        }
        for r in &self.rpcs {
            put_u16(&mut out, r.variable);
            out.push(r.points.len() as u8);
            put_u16(&mut out, r.parameter);
            for &(x, y, shape) in &r.points {
                put_f32(&mut out, x);
                put_f32(&mut out, y);
                out.push(shape);
            }
        }
        for c in &self.categories {
            out.extend_from_slice(c.name.as_bytes());
            out.push(0);
        }
        for v in &self.variables {
            out.extend_from_slice(v.name.as_bytes());
            out.push(0);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Wave bank (.xwb)
// ---------------------------------------------------------------------------

pub(crate) struct WaveSpec {
    pub codec_tag: u32,
    pub channels: u32,
    pub rate: u32,
    pub align: u32,
    pub bits16: bool,
    pub payload: Vec<u8>,
    pub loop_region: Option<(u32, u32)>,
}

impl WaveSpec {
    pub fn pcm16(channels: u16, rate: u32, payload: Vec<u8>) -> Self {
        Self {
            codec_tag: 0,
            channels: channels as u32,
            rate,
            align: channels as u32 * 2,
            bits16: true,
            payload,
            loop_region: None,
        }
    }

    pub fn adpcm(channels: u16, rate: u32, payload: Vec<u8>) -> Self {
        Self {
            codec_tag: 2,
            channels: channels as u32,
            rate,
            align: 2,
            bits16: true,
            payload,
            loop_region: None,
        }
    }

    /// Packs the format word using the bitfield layout of the given bank
    /// version.
    pub fn format_word(&self, version: u32) -> u32 {
        let bits = if self.bits16 { 1u32 } else { 0 };
        if version == 1 {
            let tag = if self.codec_tag == 0 { 0u32 } else { 1 };
            tag | self.channels << 1 | self.rate << 5 | self.align << 23 | bits << 31
        } else {
            self.codec_tag | self.channels << 2 | self.rate << 5 | self.align << 23 | bits << 31
        }
    }
}

pub(crate) struct WaveBankBuilder {
    name: String,
    version: u32,
    flags: u32,
    alignment: u32,
    entries: Vec<WaveSpec>,
}

impl WaveBankBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 45,
            flags: 0,
            alignment: 1,
            entries: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.flags |= FLAG_STREAMING;
        self
    }

    pub fn compact(mut self, alignment: u32) -> Self {
        self.flags |= FLAG_COMPACT;
        self.alignment = alignment;
        self
    }

    pub fn entry(mut self, entry: WaveSpec) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let compact = self.flags & FLAG_COMPACT != 0;
        let version = self.version;
        let segment_count = if version <= 3 { 4 } else { 5 };

        let header_size = 4 + 4 + if version >= 42 { 4 } else { 0 } + segment_count * 8;
        let name_width = if version <= 3 { 16 } else { 64 };
        let bank_data_size = 4
            + 4
            + name_width
            + if version >= 2 { 12 } else { 0 }
            + if compact { 4 } else { 0 };
        let meta_element_size = if compact {
            4
        } else if version == 1 {
            20
        } else {
            24
        };
        let entry_meta_size = self.entries.len() * meta_element_size;

        let bank_data_offset = header_size;
        let entry_meta_offset = bank_data_offset + bank_data_size;
        let payload_offset = entry_meta_offset + entry_meta_size;

        // Payload blob plus each entry's offset within it.
        let mut payload = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            if compact {
                assert!(
                    payload.len() % self.alignment as usize == 0,
                    "compact payloads must be aligned"
                );
            }
            offsets.push(payload.len() as u32);
            payload.extend_from_slice(&e.payload);
        }

        let mut out = Vec::new();
        put_u32(&mut out, WAVEBANK_MAGIC);
        put_u32(&mut out, version);
        if version >= 42 {
            put_u32(&mut out, version); // header version
        }
        // Segment table: bank data, entry metadata, the unused middle
        // segments, and the payload last.
        let mut segments = vec![(0u32, 0u32); segment_count];
        segments[0] = (bank_data_offset as u32, bank_data_size as u32);
        segments[1] = (entry_meta_offset as u32, entry_meta_size as u32);
        segments[segment_count - 1] = (payload_offset as u32, payload.len() as u32);
        for (offset, length) in segments {
            put_u32(&mut out, offset);
            put_u32(&mut out, length);
        }
        assert_eq!(out.len(), header_size);

        put_u32(&mut out, self.flags);
        put_u32(&mut out, self.entries.len() as u32);
        put_fixed_string(&mut out, &self.name, name_width);
        if version >= 2 {
            put_u32(&mut out, meta_element_size as u32);
            put_u32(&mut out, 0); // entry name element size
            put_u32(&mut out, self.alignment);
        }
        if compact {
            let shared = self
                .entries
                .first()
                .map(|e| e.format_word(version))
                .unwrap_or(0);
            put_u32(&mut out, shared);
        }
        assert_eq!(out.len(), entry_meta_offset);

        for (e, &offset) in self.entries.iter().zip(&offsets) {
            if compact {
                put_u32(&mut out, offset / self.alignment);
                continue;
            }
            let (loop_start, loop_length) = e.loop_region.unwrap_or((0, 0));
            if version == 1 {
                put_u32(&mut out, e.format_word(version));
                put_u32(&mut out, offset);
                put_u32(&mut out, e.payload.len() as u32);
                put_u32(&mut out, loop_start);
                put_u32(&mut out, loop_length);
            } else {
                put_u32(&mut out, 0); // flags and duration
                put_u32(&mut out, e.format_word(version));
                put_u32(&mut out, offset);
                put_u32(&mut out, e.payload.len() as u32);
                put_u32(&mut out, loop_start);
                put_u32(&mut out, loop_length);
            }
        }
        assert_eq!(out.len(), payload_offset);

        out.extend_from_slice(&payload);
        out
    }
}

// ---------------------------------------------------------------------------
// Sound bank (.xsb)
// ---------------------------------------------------------------------------

pub(crate) struct SoundSpec {
    category: u16,
    volume: u8,
    pitch: i16,
    priority: u8,
    rpcs: Vec<u16>,
    kind: SoundSpecKind,
}

enum SoundSpecKind {
    Leaf { bank: u8, track: u16 },
    Complex { clips: Vec<ClipSpec> },
}

impl SoundSpec {
    pub fn leaf(bank: u8, track: u16) -> Self {
        Self {
            category: 0,
            volume: 0xB4,
            pitch: 0,
            priority: 0,
            rpcs: Vec::new(),
            kind: SoundSpecKind::Leaf { bank, track },
        }
    }

    pub fn complex(clips: Vec<ClipSpec>) -> Self {
        Self {
            category: 0,
            volume: 0xB4,
            pitch: 0,
            priority: 0,
            rpcs: Vec::new(),
            kind: SoundSpecKind::Complex { clips },
        }
    }

    pub fn category(mut self, category: u16) -> Self {
        self.category = category;
        self
    }

    pub fn volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn pitch(mut self, cents: i16) -> Self {
        self.pitch = cents;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn rpcs(mut self, rpcs: Vec<u16>) -> Self {
        self.rpcs = rpcs;
        self
    }

    fn record_size(&self) -> usize {
        let rpc = if self.rpcs.is_empty() {
            0
        } else {
            1 + self.rpcs.len() * 2
        };
        let kind = match &self.kind {
            SoundSpecKind::Leaf { .. } => 3,
            SoundSpecKind::Complex { clips } => 1 + clips.len() * 4,
        };
        7 + rpc + kind
    }
}

pub(crate) struct ClipSpec {
    events: Vec<EventSpec>,
}

enum EventSpec {
    PlayWave { bank: u8, track: u16, looped: bool },
    Raw(u8),
}

impl ClipSpec {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn play_wave(mut self, bank: u8, track: u16, looped: bool) -> Self {
        self.events.push(EventSpec::PlayWave { bank, track, looped });
        self
    }

    /// An event with an arbitrary type byte and no payload, for exercising
    /// the unknown-event failure path.
    pub fn raw_event(mut self, event_type: u8) -> Self {
        self.events.push(EventSpec::Raw(event_type));
        self
    }

    fn record_size(&self) -> usize {
        1 + self
            .events
            .iter()
            .map(|e| match e {
                EventSpec::PlayWave { .. } => 5,
                EventSpec::Raw(_) => 1,
            })
            .sum::<usize>()
    }
}

enum ComplexCueSpec {
    Direct(usize),
    Variations(u8, Vec<VariationEntrySpec>),
}

enum VariationEntrySpec {
    Sound { sound: usize, wmin: u8, wmax: u8 },
    Wave { bank: u8, track: u16, wmin: u8, wmax: u8 },
    CompactWave { bank: u8, track: u16 },
}

impl VariationEntrySpec {
    fn record_size(&self) -> usize {
        match self {
            VariationEntrySpec::Sound { .. } => 6,
            VariationEntrySpec::Wave { .. } => 6,
            VariationEntrySpec::CompactWave { .. } => 3,
        }
    }
}

pub(crate) struct SoundBankBuilder {
    version: u16,
    wave_banks: Vec<String>,
    sounds: Vec<SoundSpec>,
    simple_cues: Vec<(String, usize)>,
    complex_cues: Vec<(String, ComplexCueSpec)>,
}

impl SoundBankBuilder {
    pub fn new() -> Self {
        Self {
            version: SOUNDBANK_VERSION,
            wave_banks: Vec::new(),
            sounds: Vec::new(),
            simple_cues: Vec::new(),
            complex_cues: Vec::new(),
        }
    }

    pub fn version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn wave_bank(&mut self, name: &str) {
        self.wave_banks.push(name.to_string());
    }

    /// Registers a sound record; cues reference it by the returned id.
    pub fn sound(&mut self, spec: SoundSpec) -> usize {
        self.sounds.push(spec);
        self.sounds.len() - 1
    }

    pub fn simple_cue(&mut self, name: &str, sound: usize) {
        self.simple_cues.push((name.to_string(), sound));
    }

    pub fn complex_cue_direct(&mut self, name: &str, sound: usize) {
        self.complex_cues
            .push((name.to_string(), ComplexCueSpec::Direct(sound)));
    }

    /// A complex cue with a type-1 (sound) variation table. Entries are
    /// (sound id, weight min, weight max).
    pub fn variation_cue(&mut self, name: &str, entries: &[(usize, u8, u8)]) {
        let entries = entries
            .iter()
            .map(|&(sound, wmin, wmax)| VariationEntrySpec::Sound { sound, wmin, wmax })
            .collect();
        self.complex_cues
            .push((name.to_string(), ComplexCueSpec::Variations(1, entries)));
    }

    /// A complex cue with a type-0 (wave) variation table. Entries are
    /// (wave bank, track, weight min, weight max).
    pub fn wave_variation_cue(&mut self, name: &str, entries: &[(u8, u16, u8, u8)]) {
        let entries = entries
            .iter()
            .map(|&(bank, track, wmin, wmax)| VariationEntrySpec::Wave {
                bank,
                track,
                wmin,
                wmax,
            })
            .collect();
        self.complex_cues
            .push((name.to_string(), ComplexCueSpec::Variations(0, entries)));
    }

    /// A complex cue with a type-4 (compact wave) variation table. Entries
    /// are (wave bank, track).
    pub fn compact_wave_cue(&mut self, name: &str, entries: &[(u8, u16)]) {
        let entries = entries
            .iter()
            .map(|&(bank, track)| VariationEntrySpec::CompactWave { bank, track })
            .collect();
        self.complex_cues
            .push((name.to_string(), ComplexCueSpec::Variations(4, entries)));
    }

    /// Overrides the type tag of every variation table, for exercising the
    /// unknown-type failure path.
    pub fn variation_table_type(&mut self, table_type: u8) {
        for (_, cue) in &mut self.complex_cues {
            if let ComplexCueSpec::Variations(t, _) = cue {
                *t = table_type;
            }
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = 50;
        let wave_bank_names_offset = header_size;
        let cue_names_offset = wave_bank_names_offset + self.wave_banks.len() * 64;
        let cue_names_size: usize = self
            .simple_cues
            .iter()
            .map(|(name, _)| name.len() + 1)
            .chain(self.complex_cues.iter().map(|(name, _)| name.len() + 1))
            .sum();
        let simple_offset = cue_names_offset + cue_names_size;
        let complex_offset = simple_offset + self.simple_cues.len() * 5;
        let variation_tables_offset = complex_offset + self.complex_cues.len() * 9;
        let variation_tables_size: usize = self
            .complex_cues
            .iter()
            .map(|(_, cue)| match cue {
                ComplexCueSpec::Direct(_) => 0,
                ComplexCueSpec::Variations(_, entries) => {
                    4 + entries.iter().map(|e| e.record_size()).sum::<usize>()
                }
            })
            .sum();
        let sounds_offset = variation_tables_offset + variation_tables_size;

        // Lay out sound records, then clip records after all of them.
        let mut sound_offsets = Vec::with_capacity(self.sounds.len());
        let mut cursor = sounds_offset;
        for s in &self.sounds {
            sound_offsets.push(cursor as u32);
            cursor += s.record_size();
        }
        let mut clip_offsets: Vec<Vec<u32>> = Vec::with_capacity(self.sounds.len());
        for s in &self.sounds {
            let mut offsets = Vec::new();
            if let SoundSpecKind::Complex { clips } = &s.kind {
                for clip in clips {
                    offsets.push(cursor as u32);
                    cursor += clip.record_size();
                }
            }
            clip_offsets.push(offsets);
        }

        let mut out = Vec::new();
        put_u32(&mut out, SOUNDBANK_MAGIC);
        put_u16(&mut out, 46); // tool version
        put_u16(&mut out, self.version);
        put_u16(&mut out, 0); // crc
        put_u32(&mut out, 0); // last modified low
        put_u32(&mut out, 0); // last modified high
        out.push(1); // platform
        put_u16(&mut out, self.simple_cues.len() as u16);
        put_u16(&mut out, self.complex_cues.len() as u16);
        out.push(self.wave_banks.len() as u8);
        put_u16(&mut out, cue_names_size as u16);
        put_u32(&mut out, simple_offset as u32);
        put_u32(&mut out, complex_offset as u32);
        put_u32(&mut out, cue_names_offset as u32);
        put_u32(&mut out, variation_tables_offset as u32);
        put_u32(&mut out, wave_bank_names_offset as u32);
        put_u32(&mut out, sounds_offset as u32);
        assert_eq!(out.len(), header_size);

        for name in &self.wave_banks {
            put_fixed_string(&mut out, name, 64);
        }
        for (name, _) in &self.simple_cues {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        for (name, _) in &self.complex_cues {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        assert_eq!(out.len(), simple_offset);

        for &(_, sound) in &self.simple_cues {
            out.push(0); // flags
            put_u32(&mut out, sound_offsets[sound]);
        }

        // Complex cues reference their variation tables by offset; walk the
        // table region in the same order the records are emitted.
        let mut table_cursor = variation_tables_offset;
        for (_, cue) in &self.complex_cues {
            match cue {
                ComplexCueSpec::Direct(sound) => {
                    out.push(0x04);
                    put_u32(&mut out, sound_offsets[*sound]);
                    put_u32(&mut out, 0); // reserved
                }
                ComplexCueSpec::Variations(_, entries) => {
                    out.push(0);
                    put_u32(&mut out, table_cursor as u32);
                    put_u32(&mut out, 0); // transition table
                    table_cursor += 4 + entries.iter().map(|e| e.record_size()).sum::<usize>();
                }
            }
        }
        assert_eq!(out.len(), variation_tables_offset);

        for (_, cue) in &self.complex_cues {
            let ComplexCueSpec::Variations(table_type, entries) = cue else {
                continue;
            };
            put_u16(&mut out, entries.len() as u16);
            put_u16(&mut out, (*table_type as u16) << 3);
            for entry in entries {
                match *entry {
                    VariationEntrySpec::Sound { sound, wmin, wmax } => {
                        put_u32(&mut out, sound_offsets[sound]);
                        out.push(wmin);
                        out.push(wmax);
                    }
                    VariationEntrySpec::Wave {
                        bank,
                        track,
                        wmin,
                        wmax,
                    } => {
                        put_u16(&mut out, track);
                        out.push(bank);
                        out.push(wmin);
                        out.push(wmax);
                    }
                    VariationEntrySpec::CompactWave { bank, track } => {
                        put_u16(&mut out, track);
                        out.push(bank);
                    }
                }
            }
        }
        assert_eq!(out.len(), sounds_offset);

        for (index, s) in self.sounds.iter().enumerate() {
            let mut flags = 0u8;
            if matches!(s.kind, SoundSpecKind::Complex { .. }) {
                flags |= 0x01;
            }
            if !s.rpcs.is_empty() {
                flags |= 0x02;
            }
            out.push(flags);
            put_u16(&mut out, s.category);
            out.push(s.volume);
            put_u16(&mut out, s.pitch as u16);
            out.push(s.priority);
            if !s.rpcs.is_empty() {
                out.push(s.rpcs.len() as u8);
                for &rpc in &s.rpcs {
                    put_u16(&mut out, rpc);
                }
            }
            match &s.kind {
                SoundSpecKind::Leaf { bank, track } => {
                    put_u16(&mut out, *track);
                    out.push(*bank);
                }
                SoundSpecKind::Complex { .. } => {
                    let offsets = &clip_offsets[index];
                    out.push(offsets.len() as u8);
                    for &offset in offsets {
                        put_u32(&mut out, offset);
                    }
                }
            }
        }

        for s in &self.sounds {
            if let SoundSpecKind::Complex { clips } = &s.kind {
                for clip in clips {
                    out.push(clip.events.len() as u8);
                    for event in &clip.events {
                        match *event {
                            EventSpec::PlayWave { bank, track, looped } => {
                                out.push(1);
                                put_u16(&mut out, track);
                                out.push(bank);
                                out.push(if looped { 1 } else { 0 });
                            }
                            EventSpec::Raw(event_type) => out.push(event_type),
                        }
                    }
                }
            }
        }
        assert_eq!(out.len(), cursor);

        out
    }
}
