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

//! Sink contract for the aggregate sample stream.
//!
//! Sinks consume the stream until it closes. Individual write failures are
//! counted and logged rather than aborting the run; only a sink that cannot
//! be used at all returns an error.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::AggregateSample;

/// Errors that end a sink's run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink write failed: {0}")]
    Write(String),
}

/// Best-effort write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub total: u64,
    pub success: u64,
    pub error: u64,
}

impl SinkStats {
    pub fn record_success(&mut self, count: u64) {
        self.total += count;
        self.success += count;
    }

    pub fn record_error(&mut self, count: u64) {
        self.total += count;
        self.error += count;
    }
}

impl fmt::Display for SinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} success={} error={}",
            self.total, self.success, self.error
        )
    }
}

/// A durable store or transmission target for aggregate samples.
pub trait SampleSink {
    /// Consume samples until the channel closes.
    fn write(
        &mut self,
        samples: mpsc::Receiver<AggregateSample>,
    ) -> impl Future<Output = Result<SinkStats, SinkError>> + Send;
}

/// Sink that keeps every sample in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Vec<AggregateSample>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn samples(&self) -> &[AggregateSample] {
        &self.samples
    }
}

impl SampleSink for MemorySink {
    async fn write(
        &mut self,
        mut samples: mpsc::Receiver<AggregateSample>,
    ) -> Result<SinkStats, SinkError> {
        let mut stats = SinkStats::default();
        while let Some(sample) = samples.recv().await {
            self.samples.push(sample);
            stats.record_success(1);
        }
        Ok(stats)
    }
}
