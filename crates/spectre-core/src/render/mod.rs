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

//! Waterfall rendering.
//!
//! Cells are colored on the heatmap gradient relative to the waterfall's own
//! dB range. Cells that received no samples stay fully transparent.

pub mod color;
pub mod grid;

use image::{Rgba, RgbaImage};
use log::debug;

use crate::extract::{self, ExtractError, Filter, ImageOptions, RenderMetadata, SampleStore, SourceMetadata, Waterfall};

const EMPTY: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Rendered image with the extents and scale it represents.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub image: RgbaImage,
    pub source: SourceMetadata,
    pub render: RenderMetadata,
}

/// Color every cell of a waterfall into a raster of the same size.
#[must_use]
pub fn rasterize(waterfall: &Waterfall) -> RgbaImage {
    let (min, max) = waterfall.db_range();
    RgbaImage::from_fn(waterfall.width(), waterfall.height(), |x, y| {
        waterfall
            .cell(x, y)
            .map_or(EMPTY, |cell| color::color(color::level(cell.db, min, max)))
    })
}

/// Extract, color and optionally annotate the samples selected by `filter`.
pub fn render<S>(store: &S, filter: &Filter, options: &ImageOptions) -> Result<RenderResult, ExtractError>
where
    S: SampleStore + ?Sized,
{
    let waterfall = extract::extract(store, filter, options)?;
    let source = waterfall.source_metadata();
    let metadata = waterfall.render_metadata();

    let raster = rasterize(&waterfall);
    let image = if options.add_grid {
        grid::draw(&raster, &source)
    } else {
        raster
    };
    debug!(
        "Rendered {}x{} waterfall into {}x{} image",
        metadata.width,
        metadata.height,
        image.width(),
        image.height()
    );

    Ok(RenderResult {
        image,
        source,
        render: metadata,
    })
}
