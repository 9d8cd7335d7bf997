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

//! CSV exporter.
//!
//! Writes one row per aggregate sample with a header naming the fields.
//! Files are opened for append and only get a header when empty, so
//! consecutive runs accumulate into one store.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use csv::{Writer, WriterBuilder};
use log::{info, warn};
use spectre_core::{AggregateSample, SampleSink, SinkError, SinkStats};
use tokio::sync::mpsc;

use super::log_progress;

pub struct CsvSink {
    writer: Writer<Box<dyn Write + Send>>,
    target: String,
}

impl std::fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl CsvSink {
    /// Export to stdout, starting with a header row.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()), true, "stdout".to_string())
    }

    /// Append to the file at `path`, creating it if needed.
    pub fn append(path: &Path) -> Result<Self, SinkError> {
        let unavailable = |e: io::Error| SinkError::Unavailable(format!("{}: {}", path.display(), e));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(unavailable)?;
        let is_empty = file.metadata().map_err(unavailable)?.len() == 0;

        Ok(Self::with_writer(Box::new(file), is_empty, path.display().to_string()))
    }

    fn with_writer(out: Box<dyn Write + Send>, has_headers: bool, target: String) -> Self {
        let writer = WriterBuilder::new().has_headers(has_headers).from_writer(out);
        Self { writer, target }
    }

    fn write_row(&mut self, sample: &AggregateSample) -> Result<(), csv::Error> {
        self.writer.serialize(sample)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl SampleSink for CsvSink {
    async fn write(
        &mut self,
        mut samples: mpsc::Receiver<AggregateSample>,
    ) -> Result<SinkStats, SinkError> {
        let mut stats = SinkStats::default();
        while let Some(sample) = samples.recv().await {
            match self.write_row(&sample) {
                Ok(()) => stats.record_success(1),
                Err(e) => {
                    warn!("Failed to write sample to {}: {}", self.target, e);
                    stats.record_error(1);
                }
            }
            log_progress("CSV", &stats);
        }
        info!("CSV export to {} finished: {}", self.target, stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::closed_channel;

    #[tokio::test]
    async fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");

        let mut sink = CsvSink::append(&path).unwrap();
        let stats = sink.write(closed_channel(2)).await.unwrap();
        assert_eq!(stats, SinkStats { total: 2, success: 2, error: 0 });

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "Identifier,Source,FreqCenter,FreqLow,FreqHigh,DBHigh,DBLow,DBAvg,SampleCount,Start,End"
        );
        assert_eq!(
            lines[1],
            "station-1,hackrf,400006250,400000000,400012500,-18.5,-31.25,-24.0,40,1638352801000,1638352806250"
        );
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_append_skips_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");

        CsvSink::append(&path).unwrap().write(closed_channel(2)).await.unwrap();
        CsvSink::append(&path).unwrap().write(closed_channel(3)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1 + 2 + 3);
        assert_eq!(content.matches("Identifier").count(), 1);
    }

    #[test]
    fn test_unwritable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("samples.csv");
        assert!(matches!(CsvSink::append(&path), Err(SinkError::Unavailable(_))));
    }
}
