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

//! Protocol layer for sweep output parsing.
//!
//! This module defines the sample data model shared by the collection and
//! extraction sides, and a trait-based abstraction over line formats. The
//! only format implemented today is the `hackrf_sweep` / `rtl_power` CSV row.

mod sweep;

pub use sweep::SweepParser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while parsing a sweep row.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid row format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// A single reading for one frequency bin at one instant.
///
/// Produced by a [`Protocol`] parser and folded into an [`AggregateSample`]
/// right away; never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantaneousSample {
    /// Identifier of the collecting station.
    pub identifier: String,
    /// Name of the sweep source (e.g. `hackrf`, `rtl_sdr`).
    pub source: String,
    /// Center frequency of the bin in Hz.
    pub freq_center: u64,
    /// Lower edge of the bin in Hz (inclusive).
    pub freq_low: u64,
    /// Upper edge of the bin in Hz (exclusive).
    pub freq_high: u64,
    /// Power reading in dB.
    pub db: f64,
    /// Number of raw readings the sweep tool already folded into `db`.
    pub sample_count: u64,
    /// Time of the sweep row.
    pub timestamp: DateTime<Utc>,
}

/// Aggregated power statistics for one frequency bin over a time window.
///
/// This is the durable unit written to sinks and read back by the extractor.
/// Field names on the wire match the store columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSample {
    #[serde(rename = "Identifier")]
    pub identifier: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "FreqCenter")]
    pub freq_center: u64,
    #[serde(rename = "FreqLow")]
    pub freq_low: u64,
    #[serde(rename = "FreqHigh")]
    pub freq_high: u64,
    #[serde(rename = "DBHigh")]
    pub db_high: f64,
    #[serde(rename = "DBLow")]
    pub db_low: f64,
    #[serde(rename = "DBAvg")]
    pub db_avg: f64,
    #[serde(rename = "SampleCount")]
    pub sample_count: u64,
    /// Start of the window, stored as epoch milliseconds.
    #[serde(rename = "Start", with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    /// End of the window, stored as epoch milliseconds.
    #[serde(rename = "End", with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
}

impl AggregateSample {
    /// Fold another aggregate for the same bin into this one.
    ///
    /// The average is weighted by sample count, so the result does not depend
    /// on the order in which aggregates are merged. The time window only ever
    /// widens.
    pub fn merge(&mut self, other: &AggregateSample) {
        let total = self.sample_count + other.sample_count;
        if total > 0 {
            self.db_avg = (self.db_avg * self.sample_count as f64
                + other.db_avg * other.sample_count as f64)
                / total as f64;
        }
        self.sample_count = total;
        self.db_low = self.db_low.min(other.db_low);
        self.db_high = self.db_high.max(other.db_high);
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }
}

impl From<InstantaneousSample> for AggregateSample {
    fn from(sample: InstantaneousSample) -> Self {
        Self {
            identifier: sample.identifier,
            source: sample.source,
            freq_center: sample.freq_center,
            freq_low: sample.freq_low,
            freq_high: sample.freq_high,
            db_high: sample.db,
            db_low: sample.db,
            db_avg: sample.db,
            sample_count: sample.sample_count,
            start: sample.timestamp,
            end: sample.timestamp,
        }
    }
}

/// Trait for sweep line parsers.
///
/// Implement this trait to add support for other sweep tool output formats.
pub trait Protocol {
    /// The reading type produced by this parser.
    type Reading;
    /// The error type for parsing failures.
    type Error;

    /// Parse one line into the readings it encodes.
    ///
    /// A row either decodes completely or fails as a whole; callers are
    /// expected to log the error and move on to the next line.
    fn parse(&mut self, line: &str) -> Result<Vec<Self::Reading>, Self::Error>;
}
