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
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from parse errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_yml::Error),
}

/// Runtime tuning knobs, loadable from YAML. Everything has a sensible
/// default; a missing file is not an error for callers that want defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Voice pool capacity. Clamped to the backend's hardware ceiling at
    /// context init.
    pub voice_capacity: usize,
    /// Streaming fill thread wake interval in milliseconds.
    pub stream_tick_ms: u64,
    /// Ring buffers per stream.
    pub stream_ring: usize,
    /// Frames decoded per ring buffer.
    pub stream_chunk_frames: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            voice_capacity: 64,
            stream_tick_ms: 100,
            stream_ring: 3,
            stream_chunk_frames: 4096,
        }
    }
}

impl RuntimeConfig {
    /// Loads a config from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&contents)?)
    }

    pub fn stream_tick(&self) -> Duration {
        Duration::from_millis(self.stream_tick_ms)
    }
}
