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

/// Typed error for container parse failures so callers can distinguish a
/// wrong file from a truncated or future-versioned one without string
/// matching.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("bad magic: found {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u32),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("unsupported codec tag {0}")]
    UnsupportedCodec(u32),

    #[error("unsupported variation table type {0}")]
    UnsupportedVariationType(u8),

    #[error("unsupported clip event type {0}")]
    UnsupportedEventType(u8),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
