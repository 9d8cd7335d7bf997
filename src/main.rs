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

//! Spectrum monitoring tool.
//!
//! `spectre collect` runs a sweep tool and exports aggregated power samples;
//! `spectre render` turns stored samples into a waterfall image;
//! `spectre serve` accepts exported samples over HTTP and renders them on
//! request.

mod cli;
mod config;
mod export;
mod sdr;
mod server;
mod store;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::{error, info, warn};
use spectre_core::{render, Collector, CollectorConfig, Filter, FrequencyFilter, ImageOptions, SampleSink};

use cli::{Cli, Command};
use config::{AppConfig, CollectConfig, RenderConfig, ServeConfig};
use export::Exporter;
use sdr::SweepProcess;
use server::SpectreServer;
use store::CsvStore;
use tokio::net::TcpListener;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    cli.apply(&mut config);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    if let Some(e) = load_error {
        warn!("Unable to load configuration, using defaults: {}", e);
    }
    if cli.save_config {
        match config.save() {
            Ok(()) => {
                if let Ok(path) = AppConfig::get_config_path() {
                    info!("Configuration saved to {}", path.display());
                }
            }
            Err(e) => warn!("Unable to save configuration: {}", e),
        }
    }

    let result = match &cli.command {
        Command::Collect(_) => collect(&config.collect).await,
        Command::Render(args) => render_image(config.render.clone(), args.filter()).await,
        Command::Serve(_) => serve(&config.serve).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the sweep tool and export aggregated samples until its output ends
/// or the process is interrupted.
async fn collect(config: &CollectConfig) -> Result<(), BoxError> {
    // An exporter that cannot be used is fatal before the tool is started.
    let mut exporter = Exporter::from_config(config).await?;

    let identifier = config.identifier_or_random();
    info!(
        "Collecting {}-{} Hz in {} Hz bins as {} every {}s",
        config.low_freq,
        config.high_freq,
        config.bin_size,
        identifier,
        config.integration_interval_secs
    );

    let (process, stdout) = SweepProcess::spawn(config.sdr, &config.sweep_options())?;
    let mut collector = Collector::spawn(
        stdout,
        CollectorConfig {
            identifier,
            source: config.sdr.source_name().to_string(),
            integration_interval: config.integration_interval(),
            sample_buffer: config.sample_buffer,
            line_buffer: config.line_buffer,
            frequency_filter: Some(FrequencyFilter {
                low: config.low_freq,
                high: config.high_freq,
            }),
        },
    );
    let samples = collector
        .take_receiver()
        .ok_or("collector sample stream already taken")?;

    let export = exporter.write(samples);
    tokio::pin!(export);
    let mut interrupted = false;
    let export_stats = tokio::select! {
        stats = &mut export => stats?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, flushing pending samples");
            interrupted = true;
            collector.shutdown();
            export.await?
        }
    };
    info!("Export finished: {}", export_stats);

    let collect_result = collector.join().await;
    if interrupted {
        process.stop().await;
    } else {
        process.wait().await?;
    }
    collect_result?;
    Ok(())
}

/// Render stored samples to the configured image file.
async fn render_image(config: RenderConfig, filter: Filter) -> Result<(), BoxError> {
    tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
        let store = CsvStore::new(&config.store_path);
        let options = ImageOptions {
            width: config.width,
            height: config.height,
            add_grid: config.add_grid,
        };
        let result = render(&store, &filter, &options)?;

        info!(
            "Rendered {} to {} ({} - {} Hz, {} - {}, {:.1} Hz/px, {:.1} s/px)",
            store.path().display(),
            config.image_path.display(),
            result.source.low_freq,
            result.source.high_freq,
            result.source.start_time,
            result.source.end_time,
            result.render.freq_per_pixel,
            result.render.sec_per_pixel
        );
        save_image(result.image, &config.image_path)?;
        Ok(())
    })
    .await?
}

/// Store collected samples and serve renders of them until interrupted.
async fn serve(config: &ServeConfig) -> Result<(), BoxError> {
    let store = CsvStore::new(&config.store_path);
    let sink = store.sink()?;
    let listener = TcpListener::bind(&config.listen).await?;
    info!(
        "Listening on {}, storing samples in {}",
        listener.local_addr()?,
        store.path().display()
    );

    let server = Arc::new(SpectreServer::new(sink, store));
    tokio::select! {
        () = server.run(listener) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
    }
    Ok(())
}

/// JPEG has no alpha channel, so transparent cells come out black.
pub(crate) fn encodable(image: RgbaImage, format: ImageFormat) -> DynamicImage {
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    }
}

/// Encode by file extension.
fn save_image(image: RgbaImage, path: &Path) -> Result<(), image::ImageError> {
    let format = ImageFormat::from_path(path)?;
    encodable(image, format).save_with_format(path, format)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn checker() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn test_save_png_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_image(checker(), &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded, checker());
    }

    #[test]
    fn test_save_jpeg_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        save_image(checker(), &path).unwrap();

        let loaded = image::open(&path).unwrap();
        assert_eq!(loaded.color(), image::ColorType::Rgb8);
        assert_eq!((loaded.width(), loaded.height()), (4, 4));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_image(checker(), &dir.path().join("out.waterfall")).is_err());
    }
}
