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

//! Sample store over a CSV file.
//!
//! The CSV exporter appends to the file and the store streams it back for
//! rendering, so the same path serves as both ends.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::debug;
use spectre_core::{AggregateSample, Filter, SampleStore, SinkError, StoreError};

use crate::export::CsvSink;

#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sink appending to this store.
    pub fn sink(&self) -> Result<CsvSink, SinkError> {
        CsvSink::append(&self.path)
    }
}

impl SampleStore for CsvStore {
    /// Stream the file and keep matching rows in file order.
    fn select(&self, filter: &Filter) -> Result<Vec<AggregateSample>, StoreError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        let mut selected = Vec::new();
        let mut scanned = 0u64;
        for record in reader.deserialize::<AggregateSample>() {
            let sample = record.map_err(|e| StoreError::Decode(e.to_string()))?;
            scanned += 1;
            if filter.matches(&sample) {
                selected.push(sample);
            }
        }
        debug!(
            "Selected {} of {} samples from {}",
            selected.len(),
            scanned,
            self.path.display()
        );
        Ok(selected)
    }
}
