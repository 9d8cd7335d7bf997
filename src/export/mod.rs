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

//! Sample exporters.
//!
//! Each exporter drains the collector's sample stream until it closes and
//! reports best-effort counters. Only an exporter that cannot be set up at
//! all, or a server that does not answer at startup, is an error.

pub mod csv;
pub mod http;

use log::info;
use spectre_core::{AggregateSample, SampleSink, SinkError, SinkStats};
use tokio::sync::mpsc;

use crate::config::{CollectConfig, OutputKind};

pub use self::csv::CsvSink;
pub use self::http::HttpSink;

const PROGRESS_EVERY: u64 = 1000;

/// Log the counters every thousand samples.
fn log_progress(name: &str, stats: &SinkStats) {
    if stats.total > 0 && stats.total % PROGRESS_EVERY == 0 {
        info!("{} export: {}", name, stats);
    }
}

/// The exporter selected by configuration.
#[derive(Debug)]
pub enum Exporter {
    Csv(CsvSink),
    Http(HttpSink),
}

impl Exporter {
    pub async fn from_config(config: &CollectConfig) -> Result<Self, SinkError> {
        match config.output {
            OutputKind::Csv => match &config.csv_path {
                Some(path) => Ok(Self::Csv(CsvSink::append(path)?)),
                None => Ok(Self::Csv(CsvSink::stdout())),
            },
            OutputKind::Http => {
                let sink = HttpSink::connect(&config.server, config.server_batch_size).await?;
                info!("Posting samples to {}", sink.url());
                Ok(Self::Http(sink))
            }
        }
    }
}

impl SampleSink for Exporter {
    async fn write(
        &mut self,
        samples: mpsc::Receiver<AggregateSample>,
    ) -> Result<SinkStats, SinkError> {
        match self {
            Exporter::Csv(sink) => sink.write(samples).await,
            Exporter::Http(sink) => sink.write(samples).await,
        }
    }
}
