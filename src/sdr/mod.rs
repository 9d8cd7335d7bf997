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

//! External sweep tool invocation.
//!
//! The sweep tools (`hackrf_sweep`, `rtl_power`) run as child processes and
//! write one CSV row per sweep segment to stdout. The child's stdout is
//! handed to the collector as a buffered async reader.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};

// hackrf_sweep front end settings
const HACKRF_AMP: &str = "1"; // RX RF amplifier on
const HACKRF_LNA_GAIN: &str = "16"; // 0-40 dB, 8 dB steps
const HACKRF_VGA_GAIN: &str = "20"; // 0-62 dB, 2 dB steps

/// Supported sweep tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SdrKind {
    /// HackRF One via `hackrf_sweep`
    #[default]
    #[value(name = "hackrf")]
    HackRf,
    /// RTL-SDR dongles via `rtl_power`
    #[value(name = "rtlsdr")]
    RtlSdr,
}

/// Sweep range and resolution passed to the tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    pub low_freq: u64,
    pub high_freq: u64,
    pub bin_size: u64,
    pub integration_interval: Duration,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("unable to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} has no stdout")]
    MissingStdout(String),

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SdrKind {
    /// Tag recorded as the `Source` of every sample.
    pub fn source_name(self) -> &'static str {
        match self {
            SdrKind::HackRf => "hackrf",
            SdrKind::RtlSdr => "rtlsdr",
        }
    }

    pub fn program(self) -> &'static str {
        match self {
            SdrKind::HackRf => "hackrf_sweep",
            SdrKind::RtlSdr => "rtl_power",
        }
    }

    /// Command line arguments for a sweep over `opts`.
    pub fn args(self, opts: &SweepOptions) -> Vec<String> {
        match self {
            SdrKind::HackRf => vec![
                "-f".to_string(),
                format!("{}:{}", opts.low_freq / 1_000_000, opts.high_freq / 1_000_000),
                "-w".to_string(),
                opts.bin_size.to_string(),
                "-a".to_string(),
                HACKRF_AMP.to_string(),
                "-l".to_string(),
                HACKRF_LNA_GAIN.to_string(),
                "-g".to_string(),
                HACKRF_VGA_GAIN.to_string(),
            ],
            SdrKind::RtlSdr => vec![
                "-f".to_string(),
                format!("{}:{}:{}", opts.low_freq, opts.high_freq, opts.bin_size),
                "-i".to_string(),
                format!("{}s", opts.integration_interval.as_secs().max(1)),
                // Rows to stdout
                "-".to_string(),
            ],
        }
    }

    pub fn command(self, opts: &SweepOptions) -> Command {
        let mut command = Command::new(self.program());
        command.args(self.args(opts));
        command
    }
}

/// A running sweep tool.
#[derive(Debug)]
pub struct SweepProcess {
    program: String,
    child: Child,
}

impl SweepProcess {
    /// Start the sweep tool for `kind` and return it with its output stream.
    pub fn spawn(kind: SdrKind, opts: &SweepOptions) -> Result<(Self, BufReader<ChildStdout>), SweepError> {
        Self::spawn_command(kind.command(opts))
    }

    /// Start an arbitrary command whose stdout carries sweep rows.
    pub fn spawn_command(mut command: Command) -> Result<(Self, BufReader<ChildStdout>), SweepError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        info!("Running sweep: {:?}", command.as_std());

        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SweepError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SweepError::MissingStdout(program.clone()))?;

        Ok((Self { program, child }, BufReader::new(stdout)))
    }

    /// Wait for the tool to exit; a non-zero status is an error.
    pub async fn wait(mut self) -> Result<(), SweepError> {
        let status = self.child.wait().await.map_err(|source| SweepError::Wait {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            info!("{} ended successfully", self.program);
            Ok(())
        } else {
            Err(SweepError::Exit {
                program: self.program,
                status,
            })
        }
    }

    /// Terminate the tool, then reap it.
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop {}: {}", self.program, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncBufReadExt;

    use super::*;

    fn options() -> SweepOptions {
        SweepOptions {
            low_freq: 400_000_000,
            high_freq: 450_000_000,
            bin_size: 12_500,
            integration_interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_hackrf_args() {
        let args = SdrKind::HackRf.args(&options());
        assert_eq!(&args[..4], ["-f", "400:450", "-w", "12500"]);
        assert_eq!(SdrKind::HackRf.program(), "hackrf_sweep");
        assert_eq!(SdrKind::HackRf.source_name(), "hackrf");
    }

    #[test]
    fn test_rtl_power_args() {
        let args = SdrKind::RtlSdr.args(&options());
        assert_eq!(args, ["-f", "400000000:450000000:12500", "-i", "5s", "-"]);
        assert_eq!(SdrKind::RtlSdr.program(), "rtl_power");
        assert_eq!(SdrKind::RtlSdr.source_name(), "rtlsdr");
    }

    #[tokio::test]
    async fn test_missing_tool_fails_to_spawn() {
        let command = Command::new("/nonexistent/hackrf_sweep");
        assert!(matches!(
            SweepProcess::spawn_command(command),
            Err(SweepError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_then_exit_status() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo first; echo second; exit 3"]);
        let (process, stdout) = SweepProcess::spawn_command(command).unwrap();

        let mut lines = stdout.lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(lines.next_line().await.unwrap(), None);

        assert!(matches!(process.wait().await, Err(SweepError::Exit { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit() {
        let mut command = Command::new("sh");
        command.args(["-c", "true"]);
        let (process, _stdout) = SweepProcess::spawn_command(command).unwrap();
        assert!(process.wait().await.is_ok());
    }
}
