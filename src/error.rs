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
use crate::backend::Codec;
use crate::parse::ParseError;

/// Runtime error for engine, playback and voice operations. Parse failures
/// from the container formats are wrapped so callers see a single error type
/// from the public API.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio hardware is available")]
    NoAudioHardware,

    /// Raised when a play request cannot get a voice (pool exhausted) or a
    /// category rejects it. Recoverable: the sound is simply dropped.
    #[error("instance play limit reached")]
    InstancePlayLimit,

    #[error("unknown cue: {0}")]
    UnknownCue(String),

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("variable {0} is read-only")]
    ReadOnlyVariable(String),

    #[error("wave bank {0} is not loaded")]
    MissingWaveBank(String),

    #[error("wave bank {0} has no track {1}")]
    UnknownTrack(String, usize),

    #[error("sound bank has been unloaded")]
    BankUnloaded,

    #[error("voice handle is stale")]
    StaleVoice,

    #[error("audio context has been shut down")]
    ShutDown,

    #[error("codec {0:?} is not supported by backend {1}")]
    UnsupportedCodec(Codec, String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("container parse error: {0}")]
    Format(#[from] ParseError),

    #[error("decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
