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
//! Categories group sounds under a shared volume, a polyphony limit and a
//! crossfade policy. Every sound registers with its category when its sound
//! bank is parsed; the member list is append-only and indexes into the sound
//! arena, so a released sound leaves a tombstoned index behind rather than a
//! dangling reference.

use std::f32::consts::FRAC_PI_2;
use std::time::Duration;

use parking_lot::RwLock;

use crate::parse::error::ParseError;
use crate::parse::settings::CategoryData;

/// Shape of the gain ramp used when a category crossfades instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossfadeShape {
    Linear,
    Logarithmic,
    EqualPower,
}

impl CrossfadeShape {
    /// Decodes the low three bits of the category flags byte.
    pub(crate) fn from_bits(bits: u8) -> Result<Self, ParseError> {
        match bits {
            0 => Ok(CrossfadeShape::Linear),
            1 => Ok(CrossfadeShape::Logarithmic),
            2 => Ok(CrossfadeShape::EqualPower),
            other => Err(ParseError::InvalidData(format!(
                "crossfade shape {}",
                other
            ))),
        }
    }

    /// Gain factor of a fade-in at progress `p` in [0, 1].
    pub fn fade_in_factor(self, p: f32) -> f32 {
        let p = p.clamp(0.0, 1.0);
        match self {
            CrossfadeShape::Linear => p,
            CrossfadeShape::Logarithmic => (1.0 + 9.0 * p).log10(),
            CrossfadeShape::EqualPower => (p * FRAC_PI_2).sin(),
        }
    }

    /// Gain factor of a fade-out at progress `p`: the fade-in curve mirrored.
    pub fn fade_out_factor(self, p: f32) -> f32 {
        self.fade_in_factor(1.0 - p)
    }
}

/// What a category does with a new play request once it is at its instance
/// limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceBehavior {
    FailToPlay,
    /// Accepted as a policy value; no distinct queueing behavior is defined,
    /// so it rejects like FailToPlay.
    Queue,
    ReplaceOldest,
    ReplaceQuietest,
    ReplaceLowestPriority,
}

impl InstanceBehavior {
    /// Decodes the high five bits of the category flags byte.
    pub(crate) fn from_bits(bits: u8) -> Result<Self, ParseError> {
        match bits {
            0 => Ok(InstanceBehavior::FailToPlay),
            1 => Ok(InstanceBehavior::Queue),
            2 => Ok(InstanceBehavior::ReplaceOldest),
            3 => Ok(InstanceBehavior::ReplaceQuietest),
            4 => Ok(InstanceBehavior::ReplaceLowestPriority),
            other => Err(ParseError::InvalidData(format!(
                "instance behavior {}",
                other
            ))),
        }
    }
}

/// Decodes the packed category flags byte into (crossfade shape, instance
/// behavior).
pub(crate) fn decode_flags(byte: u8) -> Result<(CrossfadeShape, InstanceBehavior), ParseError> {
    Ok((
        CrossfadeShape::from_bits(byte & 0x07)?,
        InstanceBehavior::from_bits(byte >> 3)?,
    ))
}

/// A runtime category: decoded policy fields plus the append-only member
/// registry. The category volume is a linear gain multiplied into member
/// gains each time they are recomputed from base values, so changing it
/// never compounds onto an already attenuated value.
pub struct Category {
    name: String,
    max_instances: Option<u8>,
    fade_in: Duration,
    fade_out: Duration,
    crossfade: CrossfadeShape,
    behavior: InstanceBehavior,
    background_music: bool,
    public: bool,
    volume: RwLock<f32>,
    members: RwLock<Vec<usize>>,
}

impl Category {
    pub(crate) fn new(data: &CategoryData) -> Self {
        Self {
            name: data.name.clone(),
            max_instances: data.max_instances,
            fade_in: data.fade_in,
            fade_out: data.fade_out,
            crossfade: data.crossfade,
            behavior: data.behavior,
            background_music: data.background_music,
            public: data.public,
            volume: RwLock::new(data.volume),
            members: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The category's linear gain.
    pub fn volume(&self) -> f32 {
        *self.volume.read()
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.write() = volume;
    }

    /// The instance ceiling, or `None` for unlimited.
    pub fn max_instances(&self) -> Option<u8> {
        self.max_instances
    }

    pub fn fade_in(&self) -> Duration {
        self.fade_in
    }

    pub fn fade_out(&self) -> Duration {
        self.fade_out
    }

    pub fn crossfade(&self) -> CrossfadeShape {
        self.crossfade
    }

    pub fn behavior(&self) -> InstanceBehavior {
        self.behavior
    }

    pub fn is_background_music(&self) -> bool {
        self.background_music
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Registers a sound arena index with this category. Indices are never
    /// removed; released sounds are tombstoned in the arena instead.
    pub(crate) fn register(&self, index: usize) {
        self.members.write().push(index);
    }

    /// Snapshot of the registered member indices.
    pub(crate) fn members(&self) -> Vec<usize> {
        self.members.read().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_flags() {
        let (shape, behavior) = decode_flags(0x02 | (4 << 3)).unwrap();
        assert_eq!(shape, CrossfadeShape::EqualPower);
        assert_eq!(behavior, InstanceBehavior::ReplaceLowestPriority);

        let (shape, behavior) = decode_flags(0).unwrap();
        assert_eq!(shape, CrossfadeShape::Linear);
        assert_eq!(behavior, InstanceBehavior::FailToPlay);
    }

    #[test]
    fn test_decode_flags_rejects_unknown() {
        // Shape 5 and behavior 9 are both out of range.
        assert!(decode_flags(0x05).is_err());
        assert!(decode_flags(9 << 3).is_err());
    }

    #[test]
    fn test_fade_curves_hit_endpoints() {
        for shape in [
            CrossfadeShape::Linear,
            CrossfadeShape::Logarithmic,
            CrossfadeShape::EqualPower,
        ] {
            assert!(shape.fade_in_factor(0.0).abs() < 1e-6);
            assert!((shape.fade_in_factor(1.0) - 1.0).abs() < 1e-6);
            assert!((shape.fade_out_factor(0.0) - 1.0).abs() < 1e-6);
            assert!(shape.fade_out_factor(1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fade_curves_monotonic() {
        for shape in [
            CrossfadeShape::Linear,
            CrossfadeShape::Logarithmic,
            CrossfadeShape::EqualPower,
        ] {
            let mut previous = 0.0;
            for step in 1..=10 {
                let factor = shape.fade_in_factor(step as f32 / 10.0);
                assert!(factor >= previous, "{:?} not monotonic", shape);
                previous = factor;
            }
        }
    }

    #[test]
    fn test_logarithmic_is_front_loaded() {
        let log = CrossfadeShape::Logarithmic.fade_in_factor(0.5);
        let linear = CrossfadeShape::Linear.fade_in_factor(0.5);
        assert!(log > linear);
    }
}
