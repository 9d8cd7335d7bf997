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

//! Command line interface.
//!
//! Every flag is optional: an unset flag keeps the value from the persisted
//! configuration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use spectre_core::Filter;

use crate::config::{AppConfig, OutputKind};
use crate::sdr::SdrKind;

#[derive(Parser, Debug)]
#[command(name = "spectre", version, about = "Collect RF power sweeps and render them as waterfalls")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Persist the effective configuration before running
    #[arg(long, global = true)]
    pub save_config: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a sweep tool and export aggregated samples
    Collect(CollectArgs),
    /// Render stored samples into a waterfall image
    Render(RenderArgs),
    /// Accept samples from collectors and render them over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
pub struct CollectArgs {
    /// Unique identifier of this station (defaults to a random UUID)
    #[arg(long)]
    pub identifier: Option<String>,

    /// Sweep tool to run
    #[arg(long, value_enum)]
    pub sdr: Option<SdrKind>,

    /// Lower frequency boundary in Hz
    #[arg(long)]
    pub low_freq: Option<u64>,

    /// Upper frequency boundary in Hz
    #[arg(long)]
    pub high_freq: Option<u64>,

    /// Bin width in Hz
    #[arg(long)]
    pub bin_size: Option<u64>,

    /// Seconds of readings folded into one aggregate sample
    #[arg(long)]
    pub integration_interval: Option<u64>,

    /// Export mechanism
    #[arg(long, value_enum)]
    pub output: Option<OutputKind>,

    /// CSV file to append to (stdout when unset)
    #[arg(long)]
    pub csv_path: Option<PathBuf>,

    /// Collection server base URL
    #[arg(long)]
    pub server: Option<String>,

    /// Samples per request sent to the collection server
    #[arg(long)]
    pub server_batch_size: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct RenderArgs {
    /// CSV file written by the collect command
    #[arg(long)]
    pub store_path: Option<PathBuf>,

    /// Output image; the extension selects PNG or JPEG
    #[arg(long)]
    pub image_path: Option<PathBuf>,

    /// Only render samples from this sweep tool (hackrf, rtlsdr)
    #[arg(long)]
    pub source: Option<String>,

    /// Only render samples from this station
    #[arg(long)]
    pub identifier: Option<String>,

    /// Lowest frequency to render in Hz
    #[arg(long)]
    pub start_freq: Option<u64>,

    /// Highest frequency to render in Hz
    #[arg(long)]
    pub end_freq: Option<u64>,

    /// Earliest sample start to render (RFC 3339)
    #[arg(long)]
    pub start_time: Option<DateTime<Utc>>,

    /// Latest sample end to render (RFC 3339, defaults to now)
    #[arg(long)]
    pub end_time: Option<DateTime<Utc>>,

    /// Image width in pixels (0 = as many as the data provides)
    #[arg(long)]
    pub width: Option<u32>,

    /// Image height in pixels (0 = as many as the data provides)
    #[arg(long)]
    pub height: Option<u32>,

    /// Render the bare waterfall without axes
    #[arg(long)]
    pub no_grid: bool,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address and port to listen on
    #[arg(long)]
    pub listen: Option<String>,

    /// CSV file collected samples are appended to and rendered from
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}

impl Cli {
    /// Overlay the flags given on the command line onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        match &self.command {
            Command::Collect(args) => args.apply(config),
            Command::Render(args) => args.apply(config),
            Command::Serve(args) => args.apply(config),
        }
    }
}

impl CollectArgs {
    fn apply(&self, config: &mut AppConfig) {
        let collect = &mut config.collect;
        if let Some(identifier) = &self.identifier {
            collect.identifier = Some(identifier.clone());
        }
        if let Some(sdr) = self.sdr {
            collect.sdr = sdr;
        }
        if let Some(low_freq) = self.low_freq {
            collect.low_freq = low_freq;
        }
        if let Some(high_freq) = self.high_freq {
            collect.high_freq = high_freq;
        }
        if let Some(bin_size) = self.bin_size {
            collect.bin_size = bin_size;
        }
        if let Some(secs) = self.integration_interval {
            collect.integration_interval_secs = secs;
        }
        if let Some(output) = self.output {
            collect.output = output;
        }
        if let Some(csv_path) = &self.csv_path {
            collect.csv_path = Some(csv_path.clone());
        }
        if let Some(server) = &self.server {
            collect.server.clone_from(server);
        }
        if let Some(batch) = self.server_batch_size {
            collect.server_batch_size = batch;
        }
    }
}

impl ServeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(listen) = &self.listen {
            config.serve.listen.clone_from(listen);
        }
        if let Some(store_path) = &self.store_path {
            config.serve.store_path.clone_from(store_path);
        }
    }
}

impl RenderArgs {
    fn apply(&self, config: &mut AppConfig) {
        let render = &mut config.render;
        if let Some(store_path) = &self.store_path {
            render.store_path.clone_from(store_path);
        }
        if let Some(image_path) = &self.image_path {
            render.image_path.clone_from(image_path);
        }
        if let Some(width) = self.width {
            render.width = width;
        }
        if let Some(height) = self.height {
            render.height = height;
        }
        if self.no_grid {
            render.add_grid = false;
        }
    }

    /// Sample selection for this run; unset bounds select everything up to now.
    pub fn filter(&self) -> Filter {
        let defaults = Filter::default();
        Filter {
            source: self.source.clone(),
            identifier: self.identifier.clone(),
            start_freq: self.start_freq.unwrap_or(defaults.start_freq),
            end_freq: self.end_freq.unwrap_or(defaults.end_freq),
            start_time: self.start_time.unwrap_or(defaults.start_time),
            end_time: self.end_time.unwrap_or(defaults.end_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_flags_override_config() {
        let cli = Cli::parse_from([
            "spectre",
            "--log-level",
            "debug",
            "collect",
            "--sdr",
            "rtlsdr",
            "--low-freq",
            "144000000",
            "--integration-interval",
            "10",
            "--output",
            "http",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.collect.sdr, SdrKind::RtlSdr);
        assert_eq!(config.collect.low_freq, 144_000_000);
        assert_eq!(config.collect.high_freq, AppConfig::default().collect.high_freq);
        assert_eq!(config.collect.integration_interval_secs, 10);
        assert_eq!(config.collect.output, OutputKind::Http);
    }

    #[test]
    fn test_render_filter_defaults() {
        let cli = Cli::parse_from(["spectre", "render", "--start-freq", "430000000", "--no-grid"]);
        let Command::Render(args) = &cli.command else {
            panic!("expected render command");
        };

        let filter = args.filter();
        assert_eq!(filter.start_freq, 430_000_000);
        assert_eq!(filter.end_freq, u64::MAX);
        assert_eq!(filter.source, None);
        assert_eq!(filter.start_time, DateTime::UNIX_EPOCH);

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert!(!config.render.add_grid);
    }

    #[test]
    fn test_render_time_window() {
        let cli = Cli::parse_from([
            "spectre",
            "render",
            "--start-time",
            "2021-12-01T10:00:00Z",
            "--end-time",
            "2021-12-01T11:00:00Z",
            "--width",
            "800",
        ]);
        let Command::Render(args) = &cli.command else {
            panic!("expected render command");
        };

        let filter = args.filter();
        assert_eq!(filter.start_time.to_rfc3339(), "2021-12-01T10:00:00+00:00");
        assert_eq!(filter.end_time.to_rfc3339(), "2021-12-01T11:00:00+00:00");

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.render.width, 800);
    }

    #[test]
    fn test_serve_flags_override_config() {
        let cli = Cli::parse_from(["spectre", "serve", "--listen", "127.0.0.1:9000"]);
        assert!(matches!(cli.command, Command::Serve(_)));

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.serve.listen, "127.0.0.1:9000");
        assert_eq!(config.serve.store_path, AppConfig::default().serve.store_path);
    }
}
