// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Heatmap gradient.

use image::Rgba;

/// Gradient stops, coldest first.
pub const STOPS: [Rgba<u8>; 7] = [
    Rgba([0, 0, 0, 255]),       // black
    Rgba([0, 0, 255, 255]),     // blue
    Rgba([0, 255, 255, 255]),   // cyan
    Rgba([0, 255, 0, 255]),     // green
    Rgba([255, 255, 0, 255]),   // yellow
    Rgba([255, 0, 0, 255]),     // red
    Rgba([255, 255, 255, 255]), // white
];

/// Level used for every cell when the dB range is empty.
pub const FLAT_LEVEL: u16 = u16::MAX / 2;

/// Level at which stop `index` is reached exactly.
#[must_use]
pub fn stop_level(index: usize) -> u16 {
    let last = (STOPS.len() - 1) as u32;
    (index as u32 * u32::from(u16::MAX) / last) as u16
}

/// Normalize a dB value into the 16-bit level space of `[min, max]`.
///
/// A zero, negative or non-finite range yields [`FLAT_LEVEL`].
#[must_use]
pub fn level(value: f64, min: f64, max: f64) -> u16 {
    let range = max - min;
    if !range.is_finite() || range <= 0.0 || !value.is_finite() {
        return FLAT_LEVEL;
    }
    ((value - min) / range * f64::from(u16::MAX))
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Map a level onto the gradient.
///
/// # Examples
///
/// ```
/// use spectre_core::render::color::{color, STOPS};
///
/// assert_eq!(color(0), STOPS[0]);
/// assert_eq!(color(u16::MAX), STOPS[6]);
/// ```
#[must_use]
pub fn color(level: u16) -> Rgba<u8> {
    for index in 1..STOPS.len() {
        let upper = stop_level(index);
        if level < upper {
            let lower = stop_level(index - 1);
            let fract = f64::from(level - lower) / f64::from(upper - lower);
            return blend(STOPS[index - 1], STOPS[index], fract);
        }
    }
    STOPS[STOPS.len() - 1]
}

fn blend(from: Rgba<u8>, to: Rgba<u8>, fract: f64) -> Rgba<u8> {
    let mut out = from;
    for (channel, (a, b)) in out.0.iter_mut().zip(from.0.iter().zip(to.0.iter())) {
        let a = f64::from(*a);
        let b = f64::from(*b);
        *channel = (a + (b - a) * fract).round() as u8;
    }
    out
}
