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
use crate::parse::soundbank::{ClipData, ClipEventData};

use super::sound::ActiveWave;

/// One clip of a composite sound: its authored event list plus whatever
/// voices those events currently hold.
pub(crate) struct ClipState {
    pub events: Vec<ClipEventData>,
    pub active: Vec<ActiveWave>,
}

impl ClipState {
    pub fn new(data: &ClipData) -> Self {
        Self {
            events: data.events.clone(),
            active: Vec::new(),
        }
    }

    /// A clip is active while any of its event voices is live; the owning
    /// sound ORs this across its clips.
    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_activity_follows_voices() {
        let data = ClipData {
            events: vec![ClipEventData::PlayWave {
                wave_bank: 0,
                track: 0,
                looped: false,
            }],
        };
        let clip = ClipState::new(&data);
        assert_eq!(clip.events.len(), 1);
        assert!(!clip.is_active());
    }
}
