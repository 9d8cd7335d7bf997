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

//! Async line producer over the sweep tool's output stream.
//!
//! A [`LineSource`] owns the reader in a background task and forwards every
//! line on a bounded channel. When the consumer falls behind the task stops
//! reading, which in turn blocks the sweep tool on its pipe.

use log::{error, info};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events emitted by the line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One line of output, without the trailing newline.
    Line(String),
    /// The stream reached end of file.
    Closed,
    /// Reading from the stream failed; no further lines follow.
    Failed(String),
}

/// Handle to a background task reading lines from a stream.
pub struct LineSource {
    event_rx: mpsc::Receiver<SourceEvent>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl LineSource {
    /// Spawn a task that reads `reader` line by line.
    ///
    /// At most `buffer_size` lines are queued before the task waits for the
    /// consumer.
    #[must_use]
    pub fn spawn<R>(reader: R, buffer_size: usize, cancel_token: CancellationToken) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(buffer_size.max(1));
        let task_cancel = cancel_token.clone();

        tokio::spawn(async move {
            read_loop(reader, event_tx, task_cancel).await;
        });

        Self {
            event_rx,
            cancel_token,
        }
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the source task has finished and every queued
    /// event was delivered.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.event_rx.recv().await
    }

    /// Stop reading.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

async fn read_loop<R>(reader: R, event_tx: mpsc::Sender<SourceEvent>, cancel_token: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count: u64 = 0;

    loop {
        tokio::select! {
            line_result = lines.next_line() => {
                let event = match line_result {
                    Ok(Some(line)) => {
                        count += 1;
                        SourceEvent::Line(line)
                    }
                    Ok(None) => {
                        info!("Sweep output closed after {} lines", count);
                        let _ = event_tx.send(SourceEvent::Closed).await;
                        return;
                    }
                    Err(e) => {
                        error!("Failed to read sweep output: {}", e);
                        let _ = event_tx.send(SourceEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                if event_tx.send(event).await.is_err() {
                    return; // Receiver dropped
                }
            }

            () = cancel_token.cancelled() => {
                info!("Line source cancelled after {} lines", count);
                return;
            }
        }
    }
}
