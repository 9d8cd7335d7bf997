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

//! Frequency-bucket aggregation.
//!
//! Folds the high-rate stream of per-bin readings into one running
//! [`AggregateSample`] per center frequency. A timer periodically swaps the
//! live table for an empty one and hands the old contents downstream.
//!
//! The table sits behind a mutex and `flush` swaps it while holding the
//! lock, so a reading is always folded into exactly one emitted aggregate.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::AggregateSample;

/// Frequency range used to drop readings before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyFilter {
    /// Lowest frequency of interest in Hz.
    pub low: u64,
    /// Highest frequency of interest in Hz.
    pub high: u64,
}

impl FrequencyFilter {
    /// Whether a bin spanning `[freq_low, freq_high]` lies wholly outside the range.
    #[must_use]
    pub fn should_ignore(&self, freq_low: u64, freq_high: u64) -> bool {
        freq_low > self.high || freq_high < self.low
    }
}

/// Running per-frequency aggregates for one integration interval.
#[derive(Debug, Default)]
pub struct FrequencyBucketAggregator {
    buckets: Mutex<HashMap<u64, AggregateSample>>,
}

impl FrequencyBucketAggregator {
    /// Create an aggregator with an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // merge only writes plain fields, so a poisoned table is still consistent.
    fn table(&self) -> MutexGuard<'_, HashMap<u64, AggregateSample>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold a reading into the bucket for its center frequency.
    pub fn ingest(&self, sample: impl Into<AggregateSample>) {
        let sample = sample.into();
        let mut table = self.table();
        match table.get_mut(&sample.freq_center) {
            Some(stored) => stored.merge(&sample),
            None => {
                table.insert(sample.freq_center, sample);
            }
        }
    }

    /// Swap the live table for an empty one and return the finalized batch,
    /// ordered by center frequency.
    #[must_use]
    pub fn flush(&self) -> Vec<AggregateSample> {
        let drained = std::mem::take(&mut *self.table());
        let mut batch: Vec<AggregateSample> = drained.into_values().collect();
        batch.sort_by_key(|sample| sample.freq_center);
        batch
    }

    /// Number of frequencies currently accumulating.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Check if no frequency has been touched since the last flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
