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
//! Wave bank (.xwb) container parser. Produces playable wave entries:
//! format descriptor plus payload. PCM payloads are repackaged into a
//! self-describing RIFF/WAVE container so downstream code has a single
//! ingestion path; compressed payloads pass through untouched.

use crate::backend::{Codec, LoopRegion, VoiceFormat};

use super::error::ParseError;
use super::reader::Reader;

/// "WBND" little-endian.
pub const WAVEBANK_MAGIC: u32 = 0x444E_4257;

/// Newest bank version this parser understands.
pub const MAX_VERSION: u32 = 46;

/// Bank flag: entries are streamed from disk rather than held in memory.
pub const FLAG_STREAMING: u32 = 0x0000_0001;
/// Bank flag: entries use the compact encoding with one shared format word.
pub const FLAG_COMPACT: u32 = 0x0002_0000;

/// The decoded wave bank container.
#[derive(Debug)]
pub struct WaveBankFile {
    pub name: String,
    pub version: u32,
    pub streaming: bool,
    pub entries: Vec<WaveEntry>,
}

/// One playable wave: format descriptor, payload bytes and optional loop
/// region (in frames). For PCM the payload is already a RIFF container.
#[derive(Debug)]
pub struct WaveEntry {
    pub format: VoiceFormat,
    pub payload: Vec<u8>,
    pub loop_region: Option<LoopRegion>,
}

#[derive(Clone, Copy)]
struct Segment {
    offset: usize,
    length: usize,
}

/// Parses a wave bank container.
pub fn parse(data: &[u8]) -> Result<WaveBankFile, ParseError> {
    let mut r = Reader::new(data);

    let magic = r.read_u32()?;
    if magic != WAVEBANK_MAGIC {
        return Err(ParseError::BadMagic {
            found: magic,
            expected: WAVEBANK_MAGIC,
        });
    }

    let version = r.read_u32()?;
    if version == 0 || version > MAX_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }
    if version >= 42 {
        // Header version, distinct from the content version.
        r.skip(4)?;
    }

    let segment_count = if version <= 3 { 4 } else { 5 };
    let mut segments = Vec::with_capacity(segment_count);
    for _ in 0..segment_count {
        segments.push(Segment {
            offset: r.read_u32()? as usize,
            length: r.read_u32()? as usize,
        });
    }
    let bank_data = segments[0];
    let entry_meta = segments[1];
    let payload_segment = segments[segment_count - 1];

    r.seek(bank_data.offset)?;
    let flags = r.read_u32()?;
    let entry_count = r.read_u32()? as usize;
    let name = r.read_fixed_string(if version <= 3 { 16 } else { 64 })?;

    let (meta_element_size, alignment) = if version >= 2 {
        let meta_element_size = r.read_u32()? as usize;
        let _name_element_size = r.read_u32()?;
        let alignment = r.read_u32()? as usize;
        (meta_element_size, alignment.max(1))
    } else {
        (20, 1)
    };

    let compact = flags & FLAG_COMPACT != 0;
    let shared_format = if compact {
        Some(decode_format_word(r.read_u32()?, version)?)
    } else {
        None
    };

    r.seek(entry_meta.offset)?;
    let raw_entries = if compact {
        let format = shared_format.expect("compact banks carry a shared format");
        parse_compact_entries(&mut r, entry_count, alignment, format, payload_segment)?
    } else {
        parse_entries(&mut r, entry_count, meta_element_size, version, payload_segment)?
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw in raw_entries {
        entries.push(package_entry(data, raw, payload_segment)?);
    }

    Ok(WaveBankFile {
        name,
        version,
        streaming: flags & FLAG_STREAMING != 0,
        entries,
    })
}

struct RawEntry {
    format: VoiceFormat,
    play_offset: usize,
    play_length: usize,
    loop_region: Option<LoopRegion>,
}

fn parse_entries(
    r: &mut Reader,
    count: usize,
    meta_element_size: usize,
    version: u32,
    payload_segment: Segment,
) -> Result<Vec<RawEntry>, ParseError> {
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let start = r.pos();

        // Which fields an entry carries depends on the declared metadata
        // element size; version 1 entries lead with the format word while
        // later versions lead with flags-and-duration.
        let mut fields = [None::<u32>; 6];
        let field_count = meta_element_size / 4;
        for field in fields.iter_mut().take(field_count.min(6)) {
            *field = Some(r.read_u32()?);
        }

        let (format_word, play_offset, play_length, loop_offset, loop_length) = if version == 1 {
            (fields[0], fields[1], fields[2], fields[3], fields[4])
        } else {
            (fields[1], fields[2], fields[3], fields[4], fields[5])
        };

        let format_word =
            format_word.ok_or_else(|| ParseError::InvalidData("entry carries no format".into()))?;
        let format = decode_format_word(format_word, version)?;

        let play_offset = play_offset.unwrap_or(0) as usize;
        let play_length = match play_length {
            Some(len) => len as usize,
            None => payload_segment.length.saturating_sub(play_offset),
        };

        let loop_region = match (loop_offset, loop_length) {
            (Some(start), Some(length)) if length > 0 => Some(LoopRegion { start, length }),
            _ => None,
        };

        r.seek(start + meta_element_size)?;
        entries.push(RawEntry {
            format,
            play_offset,
            play_length,
            loop_region,
        });
    }
    Ok(entries)
}

fn parse_compact_entries(
    r: &mut Reader,
    count: usize,
    alignment: usize,
    format: VoiceFormat,
    payload_segment: Segment,
) -> Result<Vec<RawEntry>, ParseError> {
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        let word = r.read_u32()?;
        offsets.push((word & 0x001F_FFFF) as usize * alignment);
    }

    let mut entries = Vec::with_capacity(count);
    for (i, &offset) in offsets.iter().enumerate() {
        // A compact entry's length is the gap to the next entry's data.
        let end = offsets.get(i + 1).copied().unwrap_or(payload_segment.length);
        if end < offset {
            return Err(ParseError::InvalidData(format!(
                "compact entry {} overlaps its successor",
                i
            )));
        }
        entries.push(RawEntry {
            format: format.clone(),
            play_offset: offset,
            play_length: end - offset,
            loop_region: None,
        });
    }
    Ok(entries)
}

fn package_entry(
    data: &[u8],
    raw: RawEntry,
    payload_segment: Segment,
) -> Result<WaveEntry, ParseError> {
    let start = payload_segment.offset + raw.play_offset;
    let end = start + raw.play_length;
    if end > data.len() {
        return Err(ParseError::UnexpectedEof);
    }
    let payload = &data[start..end];

    let payload = match raw.format.codec {
        Codec::Pcm => pcm_to_riff(&raw.format, payload),
        // Compressed codecs pass through unmodified; whether the backend
        // can play them is checked at bank load.
        Codec::Adpcm | Codec::Xma | Codec::Wma => payload.to_vec(),
    };

    Ok(WaveEntry {
        format: raw.format,
        payload,
        loop_region: raw.loop_region,
    })
}

/// Decodes the packed format word. The bitfield widths differ between
/// version 1 banks and everything later: version 1 spends a single bit on
/// the codec tag, later versions spend two.
pub(crate) fn decode_format_word(word: u32, version: u32) -> Result<VoiceFormat, ParseError> {
    let (codec, channels, rate, align, bits_flag) = if version == 1 {
        let codec = match word & 0x1 {
            0 => Codec::Pcm,
            _ => Codec::Adpcm,
        };
        (
            codec,
            (word >> 1) & 0x7,
            (word >> 5) & 0x3_FFFF,
            (word >> 23) & 0xFF,
            (word >> 31) & 0x1,
        )
    } else {
        let codec = match word & 0x3 {
            0 => Codec::Pcm,
            1 => Codec::Xma,
            2 => Codec::Adpcm,
            3 => Codec::Wma,
            tag => return Err(ParseError::UnsupportedCodec(tag)),
        };
        (
            codec,
            (word >> 2) & 0x7,
            (word >> 5) & 0x3_FFFF,
            (word >> 23) & 0xFF,
            (word >> 31) & 0x1,
        )
    };

    if channels == 0 {
        return Err(ParseError::InvalidData("entry has zero channels".into()));
    }

    Ok(VoiceFormat {
        codec,
        channels: channels as u16,
        sample_rate: rate,
        block_align: align as u16,
        bits_per_sample: if bits_flag == 1 { 16 } else { 8 },
    })
}

/// Wraps raw PCM bytes in a 44-byte RIFF/WAVE header. The riff chunk size
/// is 36 + payload length.
pub(crate) fn pcm_to_riff(format: &VoiceFormat, payload: &[u8]) -> Vec<u8> {
    let channels = format.channels as u32;
    let bits = format.bits_per_sample as u32;
    let byte_rate = format.sample_rate * channels * bits / 8;
    let block_align = (channels * bits / 8) as u16;

    let mut out = Vec::with_capacity(44 + payload.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + payload.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&(format.channels).to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&(format.bits_per_sample).to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}
