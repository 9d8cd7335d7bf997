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

//! Waterfall extraction from stored aggregate samples.
//!
//! Extraction selects the samples matching a [`Filter`], caps the requested
//! image size at what the data can resolve, and partitions the rows into a
//! `width` x `height` grid by rank: rows are ordered by start time for the
//! vertical axis and by center frequency for the horizontal axis, then split
//! into near-equal consecutive groups. Every row and every column therefore
//! receives data no matter how unevenly the samples are spread. Each cell
//! keeps the peak `DBHigh` of its rows.

mod bucket;

pub use bucket::{ntile, Cell};

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::protocol::AggregateSample;

/// Errors raised by a [`SampleStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid stored sample: {0}")]
    Decode(String),
}

/// Errors that prevent a waterfall from being extracted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no samples match the filter")]
    NoData,

    #[error("invalid render request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Selection of stored samples to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Sweep source to select; `None` selects every source.
    pub source: Option<String>,
    /// Station identifier to select; `None` selects every station.
    pub identifier: Option<String>,
    /// Lowest frequency in Hz; samples must start at or above it.
    pub start_freq: u64,
    /// Highest frequency in Hz; samples must end at or below it.
    pub end_freq: u64,
    /// Samples must start at or after this time.
    pub start_time: DateTime<Utc>,
    /// Samples must end at or before this time.
    pub end_time: DateTime<Utc>,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            source: None,
            identifier: None,
            start_freq: 0,
            end_freq: u64::MAX,
            start_time: DateTime::UNIX_EPOCH,
            end_time: Utc::now(),
        }
    }
}

impl Filter {
    /// Whether a stored sample falls inside this selection.
    #[must_use]
    pub fn matches(&self, sample: &AggregateSample) -> bool {
        self.source.as_ref().map_or(true, |s| *s == sample.source)
            && self
                .identifier
                .as_ref()
                .map_or(true, |i| *i == sample.identifier)
            && sample.freq_low >= self.start_freq
            && sample.freq_high <= self.end_freq
            && sample.start >= self.start_time
            && sample.end <= self.end_time
    }

    fn validate(&self) -> Result<(), ExtractError> {
        if self.start_freq > self.end_freq {
            return Err(ExtractError::InvalidRequest(format!(
                "start frequency {} Hz is above end frequency {} Hz",
                self.start_freq, self.end_freq
            )));
        }
        if self.start_time > self.end_time {
            return Err(ExtractError::InvalidRequest(format!(
                "start time {} is after end time {}",
                self.start_time, self.end_time
            )));
        }
        Ok(())
    }
}

/// Requested output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// Width in pixels; 0 uses the data's natural width.
    pub width: u32,
    /// Height in pixels; 0 uses the data's natural height.
    pub height: u32,
    /// Draw frequency and time axes around the waterfall.
    pub add_grid: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            add_grid: true,
        }
    }
}

/// Read-only view over persisted aggregate samples.
pub trait SampleStore {
    /// Return every sample matching `filter`, in store order.
    fn select(&self, filter: &Filter) -> Result<Vec<AggregateSample>, StoreError>;
}

/// Store holding samples in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    samples: Vec<AggregateSample>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: AggregateSample) {
        self.samples.push(sample);
    }
}

impl From<Vec<AggregateSample>> for MemoryStore {
    fn from(samples: Vec<AggregateSample>) -> Self {
        Self { samples }
    }
}

impl SampleStore for MemoryStore {
    fn select(&self, filter: &Filter) -> Result<Vec<AggregateSample>, StoreError> {
        Ok(self
            .samples
            .iter()
            .filter(|sample| filter.matches(sample))
            .cloned()
            .collect())
    }
}

/// Frequency and time extents actually covered by the rendered samples.
///
/// These may be narrower than the filter when data is sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetadata {
    pub low_freq: u64,
    pub high_freq: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SourceMetadata {
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end_time - self.start_time
    }
}

/// Final image resolution and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderMetadata {
    pub width: u32,
    pub height: u32,
    pub freq_per_pixel: f64,
    pub sec_per_pixel: f64,
}

/// Dense peak-hold matrix of a selection, rows ordered by time (earliest
/// first) and columns by frequency (lowest first).
#[derive(Debug, Clone)]
pub struct Waterfall {
    width: u32,
    height: u32,
    cells: Vec<Option<Cell>>,
    db_min: f64,
    db_max: f64,
    source: SourceMetadata,
}

impl Waterfall {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cell at column `x`, row `y`; `None` when no sample fell into it.
    #[must_use]
    pub fn cell(&self, x: u32, y: u32) -> Option<&Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[(y as usize) * (self.width as usize) + x as usize].as_ref()
    }

    /// Lowest and highest cell value in dB.
    #[must_use]
    pub fn db_range(&self) -> (f64, f64) {
        (self.db_min, self.db_max)
    }

    #[must_use]
    pub fn source_metadata(&self) -> SourceMetadata {
        self.source
    }

    #[must_use]
    pub fn render_metadata(&self) -> RenderMetadata {
        let freq_span = self.source.high_freq.saturating_sub(self.source.low_freq);
        let secs = self.source.duration().num_milliseconds() as f64 / 1000.0;
        RenderMetadata {
            width: self.width,
            height: self.height,
            freq_per_pixel: freq_span as f64 / f64::from(self.width),
            sec_per_pixel: secs / f64::from(self.height),
        }
    }
}

/// Natural horizontal resolution: the number of distinct center frequencies.
#[must_use]
pub fn max_width(rows: &[AggregateSample]) -> usize {
    rows.iter()
        .map(|s| s.freq_center)
        .collect::<HashSet<_>>()
        .len()
}

/// Natural vertical resolution: the number of distinct start times of the
/// lowest frequency. All frequencies in a sweep share the same time
/// resolution, so one of them stands for all.
#[must_use]
pub fn max_height(rows: &[AggregateSample]) -> usize {
    let Some(lowest) = rows.iter().map(|s| s.freq_center).min() else {
        return 0;
    };
    rows.iter()
        .filter(|s| s.freq_center == lowest)
        .map(|s| s.start)
        .collect::<HashSet<_>>()
        .len()
}

/// Cap a requested dimension at what the data supports; 0 means "natural".
fn clamp_dimension(axis: &str, requested: u32, ceiling: usize) -> u32 {
    let ceiling = u32::try_from(ceiling).unwrap_or(u32::MAX);
    match requested {
        0 => ceiling,
        r if r > ceiling => {
            warn!(
                "Image {} is set to {} which is more than the data can provide, reducing to {} pixels",
                axis, r, ceiling
            );
            ceiling
        }
        r => r,
    }
}

/// Select the samples matching `filter` and fold them into a waterfall.
pub fn extract<S>(store: &S, filter: &Filter, options: &ImageOptions) -> Result<Waterfall, ExtractError>
where
    S: SampleStore + ?Sized,
{
    filter.validate()?;
    let rows = store.select(filter)?;
    if rows.is_empty() {
        return Err(ExtractError::NoData);
    }

    let width = clamp_dimension("width", options.width, max_width(&rows));
    let height = clamp_dimension("height", options.height, max_height(&rows));
    debug!(
        "Extracting {} samples into {}x{} cells",
        rows.len(),
        width,
        height
    );

    let cells = bucket::fold(&rows, width as usize, height as usize);

    let mut db_min = f64::INFINITY;
    let mut db_max = f64::NEG_INFINITY;
    let mut low_freq = u64::MAX;
    let mut high_freq = 0;
    let mut start_time = DateTime::<Utc>::MAX_UTC;
    let mut end_time = DateTime::<Utc>::MIN_UTC;
    for cell in cells.iter().flatten() {
        db_min = db_min.min(cell.db);
        db_max = db_max.max(cell.db);
        low_freq = low_freq.min(cell.freq_low);
        high_freq = high_freq.max(cell.freq_high);
        start_time = start_time.min(cell.start);
        end_time = end_time.max(cell.end);
    }

    Ok(Waterfall {
        width,
        height,
        cells,
        db_min,
        db_max,
        source: SourceMetadata {
            low_freq,
            high_freq,
            start_time,
            end_time,
        },
    })
}
