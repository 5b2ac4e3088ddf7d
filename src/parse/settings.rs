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
//! Engine settings (.xgs) container parser: categories, variables and RPC
//! curves plus their name tables.

use std::time::Duration;

use crate::category::{self, CrossfadeShape, InstanceBehavior};
use crate::rpc::{RpcCurve, RpcParameter, RpcPoint, RpcShape};
use crate::util::volume_byte_to_gain;

use super::error::ParseError;
use super::reader::Reader;

/// "XGSF" little-endian.
pub const SETTINGS_MAGIC: u32 = 0x4653_4758;

/// Sentinel byte for a category without an instance ceiling.
const UNLIMITED_INSTANCES: u8 = 0xFF;

/// Format versions this parser understands. Version 42 carries a crc and a
/// last-modified timestamp between the version fields and the count table;
/// version 39 does not.
const VERSION_WITH_TIMESTAMP: u16 = 42;
const VERSION_BARE: u16 = 39;

/// The decoded settings container.
#[derive(Debug)]
pub struct SettingsFile {
    pub tool_version: u16,
    pub format_version: u16,
    pub categories: Vec<CategoryData>,
    pub variables: Vec<VariableData>,
    pub rpc_curves: Vec<RpcCurve>,
}

/// One decoded category record. `volume` is already a linear gain.
#[derive(Debug, Clone)]
pub struct CategoryData {
    pub name: String,
    pub max_instances: Option<u8>,
    pub fade_in: Duration,
    pub fade_out: Duration,
    pub crossfade: CrossfadeShape,
    pub behavior: InstanceBehavior,
    pub volume: f32,
    pub background_music: bool,
    pub public: bool,
}

/// One decoded variable record. The runtime value starts at `init`.
#[derive(Debug, Clone)]
pub struct VariableData {
    pub name: String,
    pub public: bool,
    pub read_only: bool,
    pub global: bool,
    pub reserved: bool,
    pub init: f32,
    pub min: f32,
    pub max: f32,
}

/// Parses an engine settings container.
pub fn parse(data: &[u8]) -> Result<SettingsFile, ParseError> {
    let mut r = Reader::new(data);

    let magic = r.read_u32()?;
    if magic != SETTINGS_MAGIC {
        return Err(ParseError::BadMagic {
            found: magic,
            expected: SETTINGS_MAGIC,
        });
    }

    let tool_version = r.read_u16()?;
    let format_version = r.read_u16()?;
    match format_version {
        VERSION_WITH_TIMESTAMP => {
            // crc + last-modified timestamp + platform byte.
            r.skip(2 + 4 + 4 + 1)?;
        }
        VERSION_BARE => {}
        other => return Err(ParseError::UnsupportedVersion(other as u32)),
    }

    let category_count = r.read_u16()? as usize;
    let variable_count = r.read_u16()? as usize;
    let rpc_count = r.read_u16()? as usize;

    let categories_offset = r.read_u32()? as usize;
    let variables_offset = r.read_u32()? as usize;
    let rpc_offset = r.read_u32()? as usize;
    let category_names_offset = r.read_u32()? as usize;
    let variable_names_offset = r.read_u32()? as usize;

    let category_names = read_name_table(data, category_names_offset, category_count)?;
    let variable_names = read_name_table(data, variable_names_offset, variable_count)?;

    r.seek(categories_offset)?;
    let mut categories = Vec::with_capacity(category_count);
    for name in category_names {
        categories.push(parse_category(&mut r, name)?);
    }

    r.seek(variables_offset)?;
    let mut variables = Vec::with_capacity(variable_count);
    for name in variable_names {
        variables.push(parse_variable(&mut r, name)?);
    }

    r.seek(rpc_offset)?;
    let mut rpc_curves = Vec::with_capacity(rpc_count);
    for _ in 0..rpc_count {
        rpc_curves.push(parse_rpc_curve(&mut r, variable_count)?);
    }

    Ok(SettingsFile {
        tool_version,
        format_version,
        categories,
        variables,
        rpc_curves,
    })
}

fn read_name_table(data: &[u8], offset: usize, count: usize) -> Result<Vec<String>, ParseError> {
    let mut r = Reader::new(data);
    r.seek(offset)?;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(r.read_cstring()?);
    }
    Ok(names)
}

fn parse_category(r: &mut Reader, name: String) -> Result<CategoryData, ParseError> {
    let max_instances = match r.read_u8()? {
        UNLIMITED_INSTANCES => None,
        n => Some(n),
    };
    let fade_in = Duration::from_millis(r.read_u16()? as u64);
    let fade_out = Duration::from_millis(r.read_u16()? as u64);
    let (crossfade, behavior) = category::decode_flags(r.read_u8()?)?;
    r.skip(2)?;
    let volume = volume_byte_to_gain(r.read_u8()?);
    let visibility = r.read_u8()?;

    Ok(CategoryData {
        name,
        max_instances,
        fade_in,
        fade_out,
        crossfade,
        behavior,
        volume,
        background_music: visibility & 0x01 != 0,
        public: visibility & 0x02 != 0,
    })
}

fn parse_variable(r: &mut Reader, name: String) -> Result<VariableData, ParseError> {
    let flags = r.read_u8()?;
    let init = r.read_f32()?;
    let min = r.read_f32()?;
    let max = r.read_f32()?;

    Ok(VariableData {
        name,
        public: flags & 0x01 != 0,
        read_only: flags & 0x02 != 0,
        // The global bit is stored inverted: set means cue-instance scoped.
        global: flags & 0x04 == 0,
        reserved: flags & 0x08 != 0,
        init,
        min,
        max,
    })
}

fn parse_rpc_curve(r: &mut Reader, variable_count: usize) -> Result<RpcCurve, ParseError> {
    let variable = r.read_u16()? as usize;
    if variable >= variable_count {
        return Err(ParseError::InvalidData(format!(
            "rpc curve references variable {} of {}",
            variable, variable_count
        )));
    }
    let point_count = r.read_u8()? as usize;
    let parameter = RpcParameter::from_u16(r.read_u16()?)?;

    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        let x = r.read_f32()?;
        let y = r.read_f32()?;
        let shape = RpcShape::from_u8(r.read_u8()?)?;
        if let Some(previous) = points.last() {
            let previous: &RpcPoint = previous;
            if x < previous.x {
                return Err(ParseError::InvalidData(format!(
                    "rpc points not ascending: {} after {}",
                    x, previous.x
                )));
            }
        }
        points.push(RpcPoint { x, y, shape });
    }

    Ok(RpcCurve {
        variable,
        parameter,
        points,
    })
}
