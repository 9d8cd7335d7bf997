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

//! Axis overlay for rendered waterfalls.
//!
//! The raster is placed on a larger white canvas with a frequency axis along
//! the top margin and a time axis along the left margin. Each time tick is
//! labelled with the absolute timestamp and the time elapsed since the first
//! row.

use std::convert::Infallible;

use chrono::TimeDelta;
use embedded_graphics::mono_font::ascii::FONT_7X13;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle};
use embedded_graphics::text::Text;
use image::{imageops, Rgba, RgbaImage};

use crate::extract::SourceMetadata;

pub const MARGIN_TOP: u32 = 20;
pub const MARGIN_LEFT: u32 = 150;
pub const TICK_LEN: i32 = 10;
pub const MIN_STEP_X: u32 = 100;
/// Each time tick carries two label lines.
pub const MIN_STEP_Y: u32 = 40;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Tick spacing for an axis of `extent` pixels: the extent halved until a
/// further halving would drop below `min_step`.
#[must_use]
pub fn grid_step(extent: u32, min_step: u32) -> u32 {
    let mut step = extent;
    while step > min_step {
        let half = step / 2;
        if half < min_step {
            break;
        }
        step = half;
    }
    step.max(1)
}

/// Human readable frequency with two decimals and an SI suffix.
///
/// # Examples
///
/// ```
/// use spectre_core::render::grid::readable_freq;
///
/// assert_eq!(readable_freq(433_920_000), "433.92 MHz");
/// assert_eq!(readable_freq(950), "950.00 Hz");
/// ```
#[must_use]
pub fn readable_freq(freq: u64) -> String {
    const SUFFIXES: [&str; 5] = ["Hz", "kHz", "MHz", "GHz", "THz"];

    let mut exp = 0;
    let mut scaled = freq as f64;
    while scaled > 1000.0 {
        scaled /= 1000.0;
        exp += 1;
    }
    match SUFFIXES.get(exp) {
        Some(suffix) => format!("{scaled:.2} {suffix}"),
        None => format!("{freq} Hz"),
    }
}

/// Compact elapsed time such as `1h2m3.5s`, `4m0s` or `250ms`.
#[must_use]
pub fn format_elapsed(elapsed: TimeDelta) -> String {
    let total_ms = elapsed.num_milliseconds();
    if total_ms == 0 {
        return "0s".to_string();
    }
    let sign = if total_ms < 0 { "-" } else { "" };
    let ms = total_ms.unsigned_abs();
    if ms < 1_000 {
        return format!("{sign}{ms}ms");
    }

    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1_000 % 60;
    let millis = ms % 1_000;

    let mut out = sign.to_string();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&seconds.to_string());
    if millis > 0 {
        let fraction = format!("{millis:03}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out.push('s');
    out
}

/// Drawing surface over an RGBA image; lit pixels are painted in ink.
struct Canvas<'a> {
    image: &'a mut RgbaImage,
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if color.is_off() {
                continue;
            }
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.image.width() && y < self.image.height() {
                self.image.put_pixel(x, y, INK);
            }
        }
        Ok(())
    }
}

impl Canvas<'_> {
    fn text(&mut self, label: &str, x: i32, y: i32) {
        let style = MonoTextStyle::new(&FONT_7X13, BinaryColor::On);
        if let Err(never) = Text::new(label, Point::new(x, y), style).draw(self) {
            match never {}
        }
    }

    fn line(&mut self, from: Point, to: Point) {
        let style = PrimitiveStyle::with_stroke(BinaryColor::On, 1);
        if let Err(never) = Line::new(from, to).into_styled(style).draw(self) {
            match never {}
        }
    }
}

/// Place `raster` on an enlarged canvas and draw labelled axes around it.
#[must_use]
pub fn draw(raster: &RgbaImage, source: &SourceMetadata) -> RgbaImage {
    let (width, height) = raster.dimensions();
    let mut image = RgbaImage::from_pixel(width + MARGIN_LEFT, height + MARGIN_TOP, BACKGROUND);
    imageops::replace(&mut image, raster, i64::from(MARGIN_LEFT), i64::from(MARGIN_TOP));

    let mut canvas = Canvas { image: &mut image };
    let left = MARGIN_LEFT as i32;
    let top = MARGIN_TOP as i32;

    let freq_span = u128::from(source.high_freq.saturating_sub(source.low_freq));
    for i in (0..width).step_by(grid_step(width, MIN_STEP_X) as usize) {
        let x = left + i as i32;
        canvas.line(Point::new(x, top - TICK_LEN), Point::new(x, top - 1));
        let offset = u128::from(i) * freq_span / u128::from(width);
        let freq = source.low_freq + offset as u64;
        canvas.text(&readable_freq(freq), x + 5, top - 2);
    }

    let span_ms = i128::from(source.duration().num_milliseconds());
    for i in (0..height).step_by(grid_step(height, MIN_STEP_Y) as usize) {
        let y = top + i as i32;
        canvas.line(Point::new(left - TICK_LEN, y), Point::new(left - 1, y));
        let elapsed = TimeDelta::milliseconds((i128::from(i) * span_ms / i128::from(height)) as i64);
        let at = source.start_time + elapsed;
        canvas.text(&format_elapsed(elapsed), 5, y + 5);
        canvas.text(&at.format(TIME_FORMAT).to_string(), 5, y + 17);
    }

    image
}
