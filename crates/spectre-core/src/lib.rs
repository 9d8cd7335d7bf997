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

//! Spectrum monitoring core library.
//!
//! This library turns the text output of frequency sweep tools into
//! time-bucketed power statistics, and renders stored statistics into
//! waterfall images. It is organised in layers that can be used on their own
//! or composed:
//!
//! - **Protocol layer**: sweep row parsing into per-bin readings
//! - **Aggregator layer**: per-frequency running statistics with periodic flush
//! - **Source layer**: async line reading from the sweep tool's output
//! - **Sink layer**: the contract for stores and transmission targets
//! - **Extraction and render layers**: rank-based bucketing of stored samples
//!   into a bounded image, color mapping and axis overlay
//!
//! # Quick Start
//!
//! Use the [`Collector`] type to run the whole collection side over any
//! buffered async reader:
//!
//! ```no_run
//! use spectre_core::{Collector, CollectorConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let output: &'static [u8] =
//!         b"2021-12-01, 10:00:01, 400000000, 400025000, 12500, 10, -20.0, -18.0\n";
//!     let mut collector = Collector::spawn(output, CollectorConfig {
//!         identifier: "station-1".to_string(),
//!         integration_interval: Duration::from_secs(5),
//!         ..Default::default()
//!     });
//!
//!     while let Some(sample) = collector.recv().await {
//!         println!("{} Hz: {:.1} dB", sample.freq_center, sample.db_avg);
//!     }
//!     let stats = collector.join().await.expect("sweep output failed");
//!     println!("{} lines read", stats.lines_read);
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use spectre_core::protocol::{Protocol, SweepParser};
//!
//! let mut parser = SweepParser::new("station-1", "hackrf");
//! let line = "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,-18.0";
//! let readings = parser.parse(line).unwrap();
//! assert_eq!(readings.len(), 2);
//! assert_eq!(readings[0].freq_center, 400_006_250);
//! ```
//!
//! ## Aggregator Layer Only
//!
//! ```
//! use spectre_core::aggregator::FrequencyBucketAggregator;
//! use spectre_core::protocol::{Protocol, SweepParser};
//!
//! let mut parser = SweepParser::new("station-1", "hackrf");
//! let aggregator = FrequencyBucketAggregator::new();
//! for line in [
//!     "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,-18.0",
//!     "2021-12-01,10:00:02,400000000,400025000,12500,10,-22.0,-16.0",
//! ] {
//!     for reading in parser.parse(line).unwrap() {
//!         aggregator.ingest(reading);
//!     }
//! }
//!
//! let batch = aggregator.flush();
//! assert_eq!(batch.len(), 2);
//! assert_eq!(batch[0].sample_count, 20);
//! assert!(aggregator.is_empty());
//! ```

pub mod aggregator;
pub mod extract;
pub mod protocol;
pub mod render;
pub mod sink;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use aggregator::{FrequencyBucketAggregator, FrequencyFilter};
pub use extract::{
    ExtractError, Filter, ImageOptions, MemoryStore, RenderMetadata, SampleStore, SourceMetadata,
    StoreError, Waterfall,
};
pub use protocol::{AggregateSample, InstantaneousSample, ParseError, Protocol, SweepParser};
pub use render::{render, RenderResult};
pub use sink::{MemorySink, SampleSink, SinkError, SinkStats};
pub use source::{LineSource, SourceEvent};

/// Errors that end a collection run.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("sweep output failed: {0}")]
    SourceFailed(String),

    #[error("collector task failed: {0}")]
    Task(String),
}

/// Configuration for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Identifier of the collecting station, stamped on every sample.
    pub identifier: String,
    /// Name of the sweep source, stamped on every sample.
    pub source: String,
    /// Period over which readings are aggregated before being emitted.
    pub integration_interval: Duration,
    /// Capacity of the outgoing sample channel.
    pub sample_buffer: usize,
    /// Capacity of the line channel between reader and parser.
    pub line_buffer: usize,
    /// Optional range outside of which readings are dropped.
    pub frequency_filter: Option<FrequencyFilter>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            source: "hackrf".to_string(),
            integration_interval: Duration::from_secs(5),
            sample_buffer: 4096,
            line_buffer: 1024,
            frequency_filter: None,
        }
    }
}

/// Counters for one collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub lines_read: u64,
    pub lines_rejected: u64,
    pub readings_ingested: u64,
    pub readings_filtered: u64,
    pub samples_emitted: u64,
    pub flushes: u64,
}

#[derive(Debug, Default)]
struct FlushStats {
    samples_emitted: u64,
    flushes: u64,
}

/// Collection pipeline: line source, parser, aggregator and flush timer.
///
/// The collector runs in background tasks. Aggregates come out of a bounded
/// channel; while it is full only the flush task waits, and readings keep
/// accumulating in the live table (one entry per center frequency).
pub struct Collector {
    samples_rx: Option<mpsc::Receiver<AggregateSample>>,
    task: JoinHandle<Result<CollectStats, CollectError>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Spawn a collector reading sweep rows from `reader`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<R>(reader: R, config: CollectorConfig) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (sample_tx, samples_rx) = mpsc::channel(config.sample_buffer.max(1));
        let cancel_token = CancellationToken::new();
        let source = LineSource::spawn(reader, config.line_buffer, cancel_token.clone());

        let task = tokio::spawn(run_collector(source, config, sample_tx, cancel_token.clone()));

        Self {
            samples_rx: Some(samples_rx),
            task,
            cancel_token,
        }
    }

    /// Receive the next aggregate sample.
    ///
    /// Returns `None` when collection has ended, or when the receiver was
    /// taken with [`Collector::take_receiver`].
    pub async fn recv(&mut self) -> Option<AggregateSample> {
        match self.samples_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the sample receiver to hand it to a [`SampleSink`].
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<AggregateSample>> {
        self.samples_rx.take()
    }

    /// Stop reading; pending readings are flushed before the stream closes.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for collection to end.
    ///
    /// Fails if the sweep output could not be read. Samples aggregated before
    /// the failure have still been emitted.
    pub async fn join(self) -> Result<CollectStats, CollectError> {
        let Self {
            samples_rx, task, ..
        } = self;
        // The final flush may still be waiting on a full channel.
        drop(samples_rx);
        task.await
            .map_err(|e| CollectError::Task(e.to_string()))?
    }
}

async fn run_collector(
    mut source: LineSource,
    config: CollectorConfig,
    sample_tx: mpsc::Sender<AggregateSample>,
    cancel_token: CancellationToken,
) -> Result<CollectStats, CollectError> {
    let aggregator = Arc::new(FrequencyBucketAggregator::new());
    let stop_flush = CancellationToken::new();

    let flush_task = tokio::spawn(flush_loop(
        Arc::clone(&aggregator),
        sample_tx,
        config.integration_interval,
        stop_flush.clone(),
        cancel_token,
    ));

    let mut parser = SweepParser::new(config.identifier.clone(), config.source.clone());
    let mut stats = CollectStats::default();

    let outcome = loop {
        match source.recv().await {
            Some(SourceEvent::Line(line)) => {
                stats.lines_read += 1;
                match parser.parse(&line) {
                    Ok(readings) => {
                        for reading in readings {
                            if config
                                .frequency_filter
                                .is_some_and(|f| f.should_ignore(reading.freq_low, reading.freq_high))
                            {
                                stats.readings_filtered += 1;
                                continue;
                            }
                            aggregator.ingest(reading);
                            stats.readings_ingested += 1;
                        }
                    }
                    Err(e) => {
                        stats.lines_rejected += 1;
                        warn!("Error parsing line {}: {}", stats.lines_read, e);
                    }
                }
            }
            Some(SourceEvent::Closed) | None => break Ok(()),
            Some(SourceEvent::Failed(e)) => break Err(CollectError::SourceFailed(e)),
        }
    };

    // Nothing is ingested past this point, so the final flush sees every reading.
    stop_flush.cancel();
    let flushed = flush_task
        .await
        .map_err(|e| CollectError::Task(e.to_string()))?;
    stats.samples_emitted = flushed.samples_emitted;
    stats.flushes = flushed.flushes;

    info!(
        "Collection finished: {} lines ({} rejected), {} readings, {} samples in {} flushes",
        stats.lines_read, stats.lines_rejected, stats.readings_ingested, stats.samples_emitted, stats.flushes
    );

    outcome.map(|()| stats)
}

async fn flush_loop(
    aggregator: Arc<FrequencyBucketAggregator>,
    sample_tx: mpsc::Sender<AggregateSample>,
    interval: Duration,
    stop: CancellationToken,
    source_cancel: CancellationToken,
) -> FlushStats {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = FlushStats::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = stop.cancelled() => break,
        }
        if !forward_batch(&aggregator, &sample_tx, &mut stats).await {
            error!("Sample receiver dropped, stopping collection");
            source_cancel.cancel();
            return stats;
        }
    }

    if !forward_batch(&aggregator, &sample_tx, &mut stats).await {
        warn!("Sample receiver dropped before the final flush");
    }
    stats
}

/// Drain the aggregator and forward the batch. Returns `false` once the
/// receiver is gone.
async fn forward_batch(
    aggregator: &FrequencyBucketAggregator,
    sample_tx: &mpsc::Sender<AggregateSample>,
    stats: &mut FlushStats,
) -> bool {
    let batch = aggregator.flush();
    stats.flushes += 1;
    debug!("Flushing {} aggregates", batch.len());

    for sample in batch {
        if sample_tx.send(sample).await.is_err() {
            return false;
        }
        stats.samples_emitted += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;

    const ROW_A: &str = "2021-12-01, 10:00:01, 400000000, 400025000, 12500, 10, -20.0, -18.0\n";
    const ROW_B: &str = "2021-12-01, 10:00:02, 400000000, 400025000, 12500, 10, -30.0, -10.0\n";

    fn config() -> CollectorConfig {
        CollectorConfig {
            identifier: "station-1".to_string(),
            source: "hackrf".to_string(),
            integration_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn drain(collector: &mut Collector) -> Vec<AggregateSample> {
        let mut samples = Vec::new();
        while let Some(sample) = collector.recv().await {
            samples.push(sample);
        }
        samples
    }

    #[tokio::test]
    async fn test_end_of_stream_flushes_pending_readings() {
        let input = format!("{ROW_A}not a sweep row\n{ROW_B}");
        let mut collector = Collector::spawn(Cursor::new(input.into_bytes()), config());

        let samples = drain(&mut collector).await;
        let stats = collector.join().await.unwrap();

        assert_eq!(samples.len(), 2);
        let total: u64 = samples.iter().map(|s| s.sample_count).sum();
        assert_eq!(total, 40);
        for sample in &samples {
            assert_eq!(sample.identifier, "station-1");
            assert!(sample.db_low <= sample.db_avg && sample.db_avg <= sample.db_high);
        }

        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.lines_rejected, 1);
        assert_eq!(stats.readings_ingested, 4);
        assert_eq!(stats.samples_emitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_separates_intervals() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut collector = Collector::spawn(BufReader::new(reader), config());

        writer.write_all(ROW_A.as_bytes()).await.unwrap();
        let first = collector.recv().await.unwrap();
        let second = collector.recv().await.unwrap();
        assert_eq!(first.freq_center, 400_006_250);
        assert_eq!(second.freq_center, 400_018_750);
        assert_eq!(first.sample_count, 10);

        writer.write_all(ROW_B.as_bytes()).await.unwrap();
        let third = collector.recv().await.unwrap();
        assert_eq!(third.sample_count, 10);
        assert!((third.db_avg - (-30.0)).abs() < f64::EPSILON);

        drop(writer);
        let rest = drain(&mut collector).await;
        assert_eq!(rest.len(), 1);

        let stats = collector.join().await.unwrap();
        assert_eq!(stats.samples_emitted, 4);
        assert!(stats.flushes >= 2);
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal_after_final_flush() {
        let mut input = ROW_A.as_bytes().to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let mut collector = Collector::spawn(Cursor::new(input), config());

        let samples = drain(&mut collector).await;
        assert_eq!(samples.len(), 2);
        assert!(matches!(
            collector.join().await,
            Err(CollectError::SourceFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_frequency_filter_drops_readings() {
        let mut collector = Collector::spawn(
            Cursor::new(ROW_A.as_bytes().to_vec()),
            CollectorConfig {
                frequency_filter: Some(FrequencyFilter {
                    low: 400_013_000,
                    high: 401_000_000,
                }),
                ..config()
            },
        );

        let samples = drain(&mut collector).await;
        let stats = collector.join().await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].freq_center, 400_018_750);
        assert_eq!(stats.readings_filtered, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream() {
        let (_writer, reader) = tokio::io::duplex(1024);
        let mut collector = Collector::spawn(BufReader::new(reader), config());

        collector.shutdown();
        assert!(collector.recv().await.is_none());
        assert!(collector.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_sink_consumes_receiver() {
        let input = format!("{ROW_A}{ROW_B}");
        let mut collector = Collector::spawn(Cursor::new(input.into_bytes()), config());
        let receiver = collector.take_receiver().unwrap();

        let mut sink = MemorySink::new();
        let sink_stats = sink.write(receiver).await.unwrap();
        collector.join().await.unwrap();

        assert_eq!(sink_stats.success, 2);
        assert_eq!(sink.samples()[0].sample_count, 20);
    }
}
