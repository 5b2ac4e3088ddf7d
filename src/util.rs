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

// Calibrated logistic curve mapping the authoring tool's volume byte to
// decibels. The constants hit the tool's reference points: 0xFF -> +6.0 dB,
// 0xBF -> +1.0 dB, 0xB4 -> 0.0 dB, 0x00 -> -96.0 dB.
const VOLUME_FLOOR_DB: f64 = -96.0;
const VOLUME_CEIL_DB: f64 = 67.7385212334047;
const VOLUME_MIDPOINT: f64 = 80.1748600297963;
const VOLUME_STEEPNESS: f64 = 0.432254984608615;

/// Decodes an authored volume byte to decibels.
pub fn volume_byte_to_db(byte: u8) -> f32 {
    let x = byte as f64 / VOLUME_MIDPOINT;
    ((VOLUME_FLOOR_DB - VOLUME_CEIL_DB) / (1.0 + x.powf(VOLUME_STEEPNESS)) + VOLUME_CEIL_DB) as f32
}

/// Decodes an authored volume byte to a linear gain.
pub fn volume_byte_to_gain(byte: u8) -> f32 {
    db_to_gain(volume_byte_to_db(byte))
}

/// Converts decibels to a linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Converts a linear gain to decibels.
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(f32::MIN_POSITIVE).log10()
}

/// Converts a pitch offset in cents to a playback-rate ratio.
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0f32.powf(cents / 1200.0)
}
