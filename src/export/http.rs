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

//! Collection server exporter.
//!
//! Samples are posted in batches as a JSON array. The server must answer an
//! empty batch before the run starts. After that a failed request counts the
//! whole batch as errors and the exporter carries on with the next one.

use std::time::Duration;

use log::{info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use spectre_core::{AggregateSample, SampleSink, SinkError, SinkStats};
use tokio::sync::mpsc;

use super::log_progress;

/// Path of the collection endpoint below the server base URL
pub const COLLECT_ENDPOINT: &str = "spectre/v1/collect";
pub const DEFAULT_BATCH_SIZE: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpSink {
    client: Client,
    url: Url,
    batch_size: usize,
}

impl HttpSink {
    /// Create an exporter posting to `server`; a `batch_size` of 0 uses the default.
    pub fn new(server: &str, batch_size: usize) -> Result<Self, SinkError> {
        let endpoint = format!("{}/{}", server.trim_end_matches('/'), COLLECT_ENDPOINT);
        let url = Url::parse(&endpoint)
            .map_err(|e| SinkError::Unavailable(format!("invalid server URL {server:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SinkError::Unavailable(format!(
                "unsupported scheme in server URL {server:?}"
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Unavailable(format!("unable to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
        })
    }

    /// Create an exporter and make sure the server answers before any
    /// samples are produced.
    pub async fn connect(server: &str, batch_size: usize) -> Result<Self, SinkError> {
        let sink = Self::new(server, batch_size)?;
        sink.check().await?;
        Ok(sink)
    }

    /// Post an empty batch. Any response counts as reachable; a failed
    /// connection or timeout does not.
    pub async fn check(&self) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body("[]")
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(format!("{} is unreachable: {}", self.url, e)))?;
        if !response.status().is_success() {
            warn!("{} answered {} to an empty batch", self.url, response.status());
        }
        Ok(())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&self, batch: &[AggregateSample]) -> Result<(), String> {
        let body = serde_json::to_vec(batch).map_err(|e| format!("unable to encode samples: {e}"))?;
        self.client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("unable to post samples: {e}"))?;
        Ok(())
    }

    async fn flush_batch(&self, batch: &mut Vec<AggregateSample>, stats: &mut SinkStats) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len() as u64;
        match self.send(batch).await {
            Ok(()) => stats.record_success(count),
            Err(e) => {
                warn!("{} ({} samples dropped)", e, count);
                stats.record_error(count);
            }
        }
        batch.clear();
    }
}

impl SampleSink for HttpSink {
    async fn write(
        &mut self,
        mut samples: mpsc::Receiver<AggregateSample>,
    ) -> Result<SinkStats, SinkError> {
        let mut stats = SinkStats::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(sample) = samples.recv().await {
            batch.push(sample);
            if batch.len() >= self.batch_size {
                self.flush_batch(&mut batch, &mut stats).await;
                log_progress("HTTP", &stats);
            }
        }
        // Partial batch left when the stream ends
        self.flush_batch(&mut batch, &mut stats).await;

        info!("HTTP export to {} finished: {}", self.url, stats);
        Ok(stats)
    }
}
