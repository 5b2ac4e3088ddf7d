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
//! Sound bank (.xsb) container parser: cue and wave-bank name tables,
//! simple and complex cues, weighted variation tables, sound records and
//! their clips.

use std::collections::HashMap;

use crate::util::volume_byte_to_gain;

use super::error::ParseError;
use super::reader::Reader;

/// "SDBK" little-endian.
pub const SOUNDBANK_MAGIC: u32 = 0x4B42_4453;

/// The only sound bank format version this parser understands.
pub const FORMAT_VERSION: u16 = 43;

/// Sound record flags.
const SOUND_COMPLEX: u8 = 0x01;
const SOUND_HAS_RPC: u8 = 0x02;

/// Complex cue flag: the cue binds one sound directly instead of a
/// variation table.
const CUE_DIRECT_SOUND: u8 = 0x04;

/// Clip event kinds. PlayWave is the only one defined.
const EVENT_PLAY_WAVE: u8 = 0x01;

/// The decoded sound bank container. Cue variations index into `sounds`;
/// sound records shared by several cues appear once.
#[derive(Debug)]
pub struct SoundBankFile {
    pub tool_version: u16,
    pub format_version: u16,
    pub wave_bank_names: Vec<String>,
    pub cues: Vec<CueData>,
    pub sounds: Vec<SoundData>,
}

#[derive(Debug)]
pub struct CueData {
    pub name: String,
    pub variations: Vec<VariationData>,
}

/// One playable choice of a cue. `weight` is the parsed weight span
/// (weight-max minus weight-min); entries without weights get 1.
#[derive(Debug, Clone, Copy)]
pub struct VariationData {
    pub sound: usize,
    pub weight: u32,
}

/// One decoded sound record. `volume` is already a linear gain.
#[derive(Debug)]
pub struct SoundData {
    pub category: u16,
    pub volume: f32,
    pub pitch_cents: i16,
    pub priority: u8,
    pub rpc_curves: Vec<u16>,
    pub kind: SoundKindData,
}

#[derive(Debug)]
pub enum SoundKindData {
    Leaf { wave_bank: u8, track: u16 },
    Complex { clips: Vec<ClipData> },
}

#[derive(Debug)]
pub struct ClipData {
    pub events: Vec<ClipEventData>,
}

#[derive(Debug, Clone, Copy)]
pub enum ClipEventData {
    PlayWave {
        wave_bank: u8,
        track: u16,
        looped: bool,
    },
}

/// Checks the magic tag and version without touching the body. Sound bank
/// bodies parse lazily on first cue lookup, but a wrong or future-versioned
/// file still fails at load time.
pub fn validate_header(data: &[u8]) -> Result<(), ParseError> {
    let mut r = Reader::new(data);
    let magic = r.read_u32()?;
    if magic != SOUNDBANK_MAGIC {
        return Err(ParseError::BadMagic {
            found: magic,
            expected: SOUNDBANK_MAGIC,
        });
    }
    let _tool_version = r.read_u16()?;
    let format_version = r.read_u16()?;
    if format_version != FORMAT_VERSION {
        return Err(ParseError::UnsupportedVersion(format_version as u32));
    }
    Ok(())
}

/// Parses a sound bank container.
pub fn parse(data: &[u8]) -> Result<SoundBankFile, ParseError> {
    let mut r = Reader::new(data);

    let magic = r.read_u32()?;
    if magic != SOUNDBANK_MAGIC {
        return Err(ParseError::BadMagic {
            found: magic,
            expected: SOUNDBANK_MAGIC,
        });
    }

    let tool_version = r.read_u16()?;
    let format_version = r.read_u16()?;
    if format_version != FORMAT_VERSION {
        return Err(ParseError::UnsupportedVersion(format_version as u32));
    }
    // crc, last-modified timestamp, platform byte.
    r.skip(2 + 4 + 4 + 1)?;

    let simple_count = r.read_u16()? as usize;
    let complex_count = r.read_u16()? as usize;
    let wave_bank_count = r.read_u8()? as usize;
    let _cue_name_table_len = r.read_u16()?;

    let simple_offset = r.read_u32()? as usize;
    let complex_offset = r.read_u32()? as usize;
    let cue_names_offset = r.read_u32()? as usize;
    let _variation_tables_offset = r.read_u32()?;
    let wave_bank_names_offset = r.read_u32()? as usize;
    let _sounds_offset = r.read_u32()?;

    r.seek(wave_bank_names_offset)?;
    let mut wave_bank_names = Vec::with_capacity(wave_bank_count);
    for _ in 0..wave_bank_count {
        wave_bank_names.push(r.read_fixed_string(64)?);
    }

    r.seek(cue_names_offset)?;
    let mut cue_names = Vec::with_capacity(simple_count + complex_count);
    for _ in 0..simple_count + complex_count {
        cue_names.push(r.read_cstring()?);
    }

    let mut sounds = SoundTable::default();
    let mut cues = Vec::with_capacity(cue_names.len());
    let mut names = cue_names.into_iter();

    r.seek(simple_offset)?;
    for _ in 0..simple_count {
        let _flags = r.read_u8()?;
        let sound_offset = r.read_u32()?;
        let sound = sounds.intern(data, sound_offset)?;
        cues.push(CueData {
            name: names.next().expect("one name per cue record"),
            variations: vec![VariationData { sound, weight: 1 }],
        });
    }

    r.seek(complex_offset)?;
    for _ in 0..complex_count {
        let flags = r.read_u8()?;
        let name = names.next().expect("one name per cue record");
        let variations = if flags & CUE_DIRECT_SOUND != 0 {
            let sound_offset = r.read_u32()?;
            r.skip(4)?;
            vec![VariationData {
                sound: sounds.intern(data, sound_offset)?,
                weight: 1,
            }]
        } else {
            let table_offset = r.read_u32()? as usize;
            // Transition table offset, unused.
            r.skip(4)?;
            parse_variation_table(data, table_offset, &mut sounds)?
        };
        cues.push(CueData { name, variations });
    }

    Ok(SoundBankFile {
        tool_version,
        format_version,
        wave_bank_names,
        cues,
        sounds: sounds.sounds,
    })
}

/// Sound records are referenced by file offset and may be shared between
/// cues; each distinct offset is parsed once.
#[derive(Default)]
struct SoundTable {
    sounds: Vec<SoundData>,
    by_offset: HashMap<u32, usize>,
}

impl SoundTable {
    fn intern(&mut self, data: &[u8], offset: u32) -> Result<usize, ParseError> {
        if let Some(&index) = self.by_offset.get(&offset) {
            return Ok(index);
        }
        let sound = parse_sound(data, offset as usize)?;
        let index = self.sounds.len();
        self.sounds.push(sound);
        self.by_offset.insert(offset, index);
        Ok(index)
    }

    /// Adds a synthetic leaf record for a variation that names a wave
    /// directly. Such variations have no authored sound record, so they get
    /// neutral defaults and the first category.
    fn synthetic_leaf(&mut self, wave_bank: u8, track: u16) -> usize {
        let index = self.sounds.len();
        self.sounds.push(SoundData {
            category: 0,
            volume: 1.0,
            pitch_cents: 0,
            priority: 0,
            rpc_curves: Vec::new(),
            kind: SoundKindData::Leaf { wave_bank, track },
        });
        index
    }
}

fn parse_variation_table(
    data: &[u8],
    offset: usize,
    sounds: &mut SoundTable,
) -> Result<Vec<VariationData>, ParseError> {
    let mut r = Reader::new(data);
    r.seek(offset)?;

    let entry_count = r.read_u16()? as usize;
    let flags = r.read_u16()?;
    let table_type = ((flags >> 3) & 0x7) as u8;

    let mut variations = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        match table_type {
            // Wave: the variation names a wave directly, with weights.
            0 => {
                let track = r.read_u16()?;
                let wave_bank = r.read_u8()?;
                let weight_min = r.read_u8()?;
                let weight_max = r.read_u8()?;
                variations.push(VariationData {
                    sound: sounds.synthetic_leaf(wave_bank, track),
                    weight: weight_span(weight_min, weight_max),
                });
            }
            // Sound: the variation references a sound record, with weights.
            1 => {
                let sound_offset = r.read_u32()?;
                let weight_min = r.read_u8()?;
                let weight_max = r.read_u8()?;
                variations.push(VariationData {
                    sound: sounds.intern(data, sound_offset)?,
                    weight: weight_span(weight_min, weight_max),
                });
            }
            // Compact wave: a bare wave reference without weights.
            4 => {
                let track = r.read_u16()?;
                let wave_bank = r.read_u8()?;
                variations.push(VariationData {
                    sound: sounds.synthetic_leaf(wave_bank, track),
                    weight: 1,
                });
            }
            other => return Err(ParseError::UnsupportedVariationType(other)),
        }
    }
    Ok(variations)
}

fn weight_span(min: u8, max: u8) -> u32 {
    max.saturating_sub(min) as u32
}

fn parse_sound(data: &[u8], offset: usize) -> Result<SoundData, ParseError> {
    let mut r = Reader::new(data);
    r.seek(offset)?;

    let flags = r.read_u8()?;
    let category = r.read_u16()?;
    let volume = volume_byte_to_gain(r.read_u8()?);
    let pitch_cents = r.read_i16()?;
    let priority = r.read_u8()?;

    let mut rpc_curves = Vec::new();
    if flags & SOUND_HAS_RPC != 0 {
        let count = r.read_u8()? as usize;
        for _ in 0..count {
            rpc_curves.push(r.read_u16()?);
        }
    }

    let kind = if flags & SOUND_COMPLEX != 0 {
        let clip_count = r.read_u8()? as usize;
        let mut clip_offsets = Vec::with_capacity(clip_count);
        for _ in 0..clip_count {
            clip_offsets.push(r.read_u32()? as usize);
        }
        let mut clips = Vec::with_capacity(clip_count);
        for clip_offset in clip_offsets {
            clips.push(parse_clip(data, clip_offset)?);
        }
        SoundKindData::Complex { clips }
    } else {
        let track = r.read_u16()?;
        let wave_bank = r.read_u8()?;
        SoundKindData::Leaf { wave_bank, track }
    };

    Ok(SoundData {
        category,
        volume,
        pitch_cents,
        priority,
        rpc_curves,
        kind,
    })
}

fn parse_clip(data: &[u8], offset: usize) -> Result<ClipData, ParseError> {
    let mut r = Reader::new(data);
    r.seek(offset)?;

    let event_count = r.read_u8()? as usize;
    let mut events = Vec::with_capacity(event_count);
    for _ in 0..event_count {
        match r.read_u8()? {
            EVENT_PLAY_WAVE => {
                let track = r.read_u16()?;
                let wave_bank = r.read_u8()?;
                let event_flags = r.read_u8()?;
                events.push(ClipEventData::PlayWave {
                    wave_bank,
                    track,
                    looped: event_flags & 0x01 != 0,
                });
            }
            other => return Err(ParseError::UnsupportedEventType(other)),
        }
    }
    Ok(ClipData { events })
}
