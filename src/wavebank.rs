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
//! Runtime wave banks: the parsed container turned into shareable wave
//! resources that playback binds to voices.

use std::sync::Arc;

use crate::backend::{LoopRegion, VoiceFormat};
use crate::error::AudioError;
use crate::parse::wavebank::WaveBankFile;

/// One playable wave resource. The payload for PCM entries is the RIFF
/// container the parser synthesized; compressed entries carry the raw
/// authored payload.
pub struct Wave {
    format: VoiceFormat,
    payload: Arc<Vec<u8>>,
    loop_region: Option<LoopRegion>,
}

impl Wave {
    pub fn format(&self) -> &VoiceFormat {
        &self.format
    }

    pub(crate) fn payload(&self) -> &Arc<Vec<u8>> {
        &self.payload
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }
}

/// A loaded wave bank: named, possibly streaming, with its entries in
/// authored track order.
pub struct WaveBank {
    name: String,
    streaming: bool,
    waves: Vec<Arc<Wave>>,
}

impl WaveBank {
    pub(crate) fn new(file: WaveBankFile) -> Self {
        let waves = file
            .entries
            .into_iter()
            .map(|entry| {
                Arc::new(Wave {
                    format: entry.format,
                    payload: Arc::new(entry.payload),
                    loop_region: entry.loop_region,
                })
            })
            .collect();
        Self {
            name: file.name,
            streaming: file.streaming,
            waves,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this bank's waves are fed through the streaming engine
    /// instead of being bound whole.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub(crate) fn wave(&self, track: usize) -> Result<Arc<Wave>, AudioError> {
        self.waves
            .get(track)
            .cloned()
            .ok_or_else(|| AudioError::UnknownTrack(self.name.clone(), track))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Codec;
    use crate::parse::fixture::{WaveBankBuilder, WaveSpec};
    use crate::parse::wavebank;

    #[test]
    fn test_wave_lookup() {
        let bytes = WaveBankBuilder::new("Waves")
            .entry(WaveSpec::pcm16(1, 44100, vec![0u8; 4]))
            .entry(WaveSpec::pcm16(2, 22050, vec![0u8; 8]))
            .build();
        let bank = WaveBank::new(wavebank::parse(&bytes).unwrap());

        assert_eq!(bank.name(), "Waves");
        assert_eq!(bank.len(), 2);
        assert!(!bank.is_streaming());

        let wave = bank.wave(1).unwrap();
        assert_eq!(wave.format().codec, Codec::Pcm);
        assert_eq!(wave.format().channels, 2);

        assert!(matches!(
            bank.wave(2),
            Err(AudioError::UnknownTrack(_, 2))
        ));
    }
}
