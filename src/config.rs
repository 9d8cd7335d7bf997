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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! Missing keys fall back to their defaults, so older files keep loading as
//! new settings are added.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sdr::{SdrKind, SweepOptions};

const APP_NAME: &str = "spectre";
const CONFIG_NAME: &str = "config";

/// Default collection server
pub const DEFAULT_SERVER: &str = "http://localhost:8080";

/// Default listen address of the serve command, matching `DEFAULT_SERVER`
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Where aggregated samples are exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// CSV rows on stdout or appended to a file
    #[default]
    Csv,
    /// JSON batches posted to a collection server
    Http,
}

/// Settings for the collect command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Unique identifier of this station; a random UUID is used when unset
    pub identifier: Option<String>,

    /// Sweep tool to run
    pub sdr: SdrKind,

    /// Lower frequency boundary in Hz
    pub low_freq: u64,

    /// Upper frequency boundary in Hz
    pub high_freq: u64,

    /// Bin width in Hz
    pub bin_size: u64,

    /// Seconds of readings folded into one aggregate sample
    pub integration_interval_secs: u64,

    /// Export mechanism
    pub output: OutputKind,

    /// CSV file to append to; stdout when unset
    pub csv_path: Option<PathBuf>,

    /// Collection server base URL
    pub server: String,

    /// Samples per request sent to the collection server
    pub server_batch_size: usize,

    /// Aggregate samples buffered between the collector and the exporter
    pub sample_buffer: usize,

    /// Raw lines buffered between the sweep tool and the parser
    pub line_buffer: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            identifier: None,
            sdr: SdrKind::HackRf,
            low_freq: 400_000_000,
            high_freq: 450_000_000,
            bin_size: 12_500,
            integration_interval_secs: 5,
            output: OutputKind::Csv,
            csv_path: None,
            server: DEFAULT_SERVER.to_string(),
            server_batch_size: 100,
            sample_buffer: 4096,
            line_buffer: 1024,
        }
    }
}

impl CollectConfig {
    /// Configured identifier, or a fresh random one for this run.
    pub fn identifier_or_random(&self) -> String {
        match &self.identifier {
            Some(id) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        }
    }

    pub fn integration_interval(&self) -> Duration {
        Duration::from_secs(self.integration_interval_secs.max(1))
    }

    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            low_freq: self.low_freq,
            high_freq: self.high_freq,
            bin_size: self.bin_size,
            integration_interval: self.integration_interval(),
        }
    }
}

/// Settings for the render command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// CSV file written by the collect command
    pub store_path: PathBuf,

    /// Output image; the extension selects the format
    pub image_path: PathBuf,

    /// Image width in pixels (0 = auto)
    pub width: u32,

    /// Image height in pixels (0 = auto)
    pub height: u32,

    /// Draw frequency and time axes
    pub add_grid: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("/tmp/spectre.csv"),
            image_path: PathBuf::from("/tmp/out.png"),
            width: 0,
            height: 0,
            add_grid: true,
        }
    }
}

/// Settings for the serve command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Address and port to listen on
    pub listen: String,

    /// CSV file collected samples are appended to and rendered from
    pub store_path: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            store_path: PathBuf::from("/tmp/spectre.csv"),
        }
    }
}

/// Application configuration stored in TOML format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,

    pub collect: CollectConfig,

    pub render: RenderConfig,

    pub serve: ServeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            collect: CollectConfig::default(),
            render: RenderConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.collect.sdr, SdrKind::HackRf);
        assert_eq!(config.collect.bin_size, 12_500);
        assert_eq!(config.collect.integration_interval(), Duration::from_secs(5));
        assert_eq!(config.render.image_path, PathBuf::from("/tmp/out.png"));
        assert!(config.render.add_grid);
        assert_eq!(config.serve.listen, "0.0.0.0:8080");
        assert_eq!(config.serve.store_path, config.render.store_path);
    }

    #[test]
    fn test_store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.collect.identifier = Some("station-7".to_string());
        config.collect.output = OutputKind::Http;
        config.render.width = 1024;
        config.serve.listen = "127.0.0.1:9000".to_string();
        confy::store_path(&path, &config).unwrap();

        let loaded: AppConfig = confy::load_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = \"warn\"\n\n[collect]\nsdr = \"rtlsdr\"\n").unwrap();

        let loaded: AppConfig = confy::load_path(&path).unwrap();
        assert_eq!(loaded.log_level, "warn");
        assert_eq!(loaded.collect.sdr, SdrKind::RtlSdr);
        assert_eq!(loaded.collect.low_freq, 400_000_000);
        assert_eq!(loaded.render, RenderConfig::default());
        assert_eq!(loaded.serve, ServeConfig::default());
    }

    #[test]
    fn test_random_identifier_when_unset() {
        let mut config = CollectConfig::default();
        let first = config.identifier_or_random();
        assert_ne!(first, config.identifier_or_random());

        config.identifier = Some("station-1".to_string());
        assert_eq!(config.identifier_or_random(), "station-1");
    }
}
