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

//! Collection and render server.
//!
//! `POST /spectre/v1/collect` takes a JSON array of aggregate samples, the
//! body the HTTP exporter sends, and writes it to the sink.
//! `GET /spectre/v1/render` renders the store with the filter and image
//! options given as query parameters:
//!
//! | Parameter | Meaning |
//! |---|---|
//! | `sdr` | source tag (`hackrf`, `rtlsdr`) |
//! | `identifier` | station identifier |
//! | `startFreq`, `endFreq` | frequency window in Hz |
//! | `startTime`, `endTime` | time window in milliseconds since the epoch |
//! | `imgWidth`, `imgHeight` | output size in pixels |
//! | `addGrid` | `0` or `false` renders the bare waterfall |
//! | `imageType` | `png`, otherwise JPEG |
//!
//! Numeric parameters set to 0 keep their default. Connections speak
//! HTTP/1.1 with keep-alive; request bodies need a `content-length`.

use std::fmt::Display;
use std::io::{self, Cursor};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use image::ImageFormat;
use log::{debug, info, warn};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use spectre_core::{
    render, AggregateSample, ExtractError, Filter, ImageOptions, SampleSink, SampleStore, StoreError,
};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::export::http::COLLECT_ENDPOINT;

/// Path of the render endpoint below the server root
pub const RENDER_ENDPOINT: &str = "spectre/v1/render";

const MAX_HEADERS: usize = 100;
const MAX_BODY: usize = 64 * 1024 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
enum RequestError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request body of {0} bytes is too large")]
    TooLarge(usize),
}

#[derive(Debug)]
struct Request {
    method: String,
    target: String,
    body: Vec<u8>,
    close: bool,
}

#[derive(Debug)]
struct Response {
    status: StatusCode,
    content_type: &'static str,
    body: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectReply {
    status: &'static str,
    sample_count: usize,
}

#[derive(Serialize)]
struct ErrorReply {
    status: &'static str,
    error: String,
}

impl Response {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                content_type: "text/plain",
                body: e.to_string().into_bytes(),
            },
        }
    }

    fn error(status: StatusCode, error: impl Display) -> Self {
        Self::json(
            status,
            &ErrorReply {
                status: "error",
                error: error.to_string(),
            },
        )
    }
}

/// Collect batches go to `sink`; renders read from `store`.
pub struct SpectreServer<K, S> {
    sink: Mutex<K>,
    store: S,
}

impl<K, S> std::fmt::Debug for SpectreServer<K, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectreServer").finish_non_exhaustive()
    }
}

impl<K, S> SpectreServer<K, S>
where
    K: SampleSink + Send + 'static,
    S: SampleStore + Clone + Send + Sync + 'static,
{
    pub fn new(sink: K, store: S) -> Self {
        Self {
            sink: Mutex::new(sink),
            store,
        }
    }

    /// Accept connections on `listener` until the future is dropped.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!("Connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), RequestError> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        loop {
            let request = match read_request(&mut reader).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(RequestError::Io(e)) => return Err(RequestError::Io(e)),
                Err(e) => {
                    let status = match e {
                        RequestError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                        _ => StatusCode::BAD_REQUEST,
                    };
                    write_response(&mut write, &Response::error(status, &e), true).await?;
                    return Err(e);
                }
            };

            let response = self.route(&request).await;
            debug!("{} {} -> {}", request.method, request.target, response.status);
            write_response(&mut write, &response, request.close).await?;
            if request.close {
                return Ok(());
            }
        }
    }

    async fn route(&self, request: &Request) -> Response {
        let url = match Url::parse("http://localhost").and_then(|base| base.join(&request.target)) {
            Ok(url) => url,
            Err(e) => return Response::error(StatusCode::BAD_REQUEST, format!("invalid target: {e}")),
        };
        let path = url.path().strip_prefix('/').unwrap_or_default();

        match (request.method.as_str(), path) {
            ("POST", COLLECT_ENDPOINT) => self.collect(&request.body).await,
            ("GET", RENDER_ENDPOINT) => self.render(&url).await,
            (method, COLLECT_ENDPOINT | RENDER_ENDPOINT) => {
                Response::error(StatusCode::METHOD_NOT_ALLOWED, format!("{method} not allowed"))
            }
            _ => Response::error(StatusCode::NOT_FOUND, format!("no such endpoint: /{path}")),
        }
    }

    async fn collect(&self, body: &[u8]) -> Response {
        let samples: Vec<AggregateSample> = match serde_json::from_slice(body) {
            Ok(samples) => samples,
            Err(e) => return Response::error(StatusCode::BAD_REQUEST, format!("invalid sample batch: {e}")),
        };
        let count = samples.len();

        if count > 0 {
            let (tx, rx) = mpsc::channel(count);
            for sample in samples {
                if let Err(e) = tx.try_send(sample) {
                    warn!("Dropping collected sample: {}", e);
                }
            }
            drop(tx);

            match self.sink.lock().await.write(rx).await {
                Ok(stats) if stats.error == 0 => debug!("Stored {} samples", count),
                Ok(stats) => {
                    return Response::error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("{} of {} samples not stored", stats.error, stats.total),
                    )
                }
                Err(e) => return Response::error(StatusCode::SERVICE_UNAVAILABLE, e),
            }
        }

        Response::json(
            StatusCode::OK,
            &CollectReply {
                status: "success",
                sample_count: count,
            },
        )
    }

    async fn render(&self, url: &Url) -> Response {
        let query = match RenderQuery::parse(url) {
            Ok(query) => query,
            Err(e) => return Response::error(StatusCode::BAD_REQUEST, e),
        };
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || query.respond(&store)).await {
            Ok(response) => response,
            Err(e) => Response::error(StatusCode::INTERNAL_SERVER_ERROR, format!("render task failed: {e}")),
        }
    }
}

/// Render request decoded from query parameters.
#[derive(Debug, Clone, PartialEq)]
struct RenderQuery {
    filter: Filter,
    options: ImageOptions,
    format: ImageFormat,
}

impl RenderQuery {
    fn parse(url: &Url) -> Result<Self, String> {
        let mut filter = Filter::default();
        let mut options = ImageOptions::default();
        let mut format = ImageFormat::Jpeg;

        for (key, value) in url.query_pairs() {
            let value = value.as_ref();
            match key.as_ref() {
                "sdr" => filter.source = non_empty(value),
                "identifier" => filter.identifier = non_empty(value),
                "startFreq" => {
                    if let Some(freq) = number(&key, value)? {
                        filter.start_freq = freq;
                    }
                }
                "endFreq" => {
                    if let Some(freq) = number(&key, value)? {
                        filter.end_freq = freq;
                    }
                }
                "startTime" => {
                    if let Some(ms) = number(&key, value)? {
                        filter.start_time = millis(&key, ms)?;
                    }
                }
                "endTime" => {
                    if let Some(ms) = number(&key, value)? {
                        filter.end_time = millis(&key, ms)?;
                    }
                }
                "imgWidth" => options.width = number(&key, value)?.unwrap_or(0),
                "imgHeight" => options.height = number(&key, value)?.unwrap_or(0),
                "addGrid" => options.add_grid = !matches!(value, "0" | "false"),
                "imageType" => {
                    format = if value.eq_ignore_ascii_case("png") {
                        ImageFormat::Png
                    } else {
                        ImageFormat::Jpeg
                    };
                }
                other => debug!("Ignoring render parameter {}", other),
            }
        }

        Ok(Self { filter, options, format })
    }

    fn respond(&self, store: &impl SampleStore) -> Response {
        let result = match render(store, &self.filter, &self.options) {
            Ok(result) => result,
            Err(e) => return Response::error(extract_status(&e), e),
        };
        info!(
            "Rendered {}x{} {:?} ({} - {} Hz, {} - {})",
            result.image.width(),
            result.image.height(),
            self.format,
            result.source.low_freq,
            result.source.high_freq,
            result.source.start_time,
            result.source.end_time
        );

        let mut body = Vec::new();
        match crate::encodable(result.image, self.format).write_to(&mut Cursor::new(&mut body), self.format) {
            Ok(()) => Response {
                status: StatusCode::OK,
                content_type: self.format.to_mime_type(),
                body,
            },
            Err(e) => Response::error(StatusCode::INTERNAL_SERVER_ERROR, format!("unable to encode image: {e}")),
        }
    }
}

fn extract_status(error: &ExtractError) -> StatusCode {
    match error {
        ExtractError::NoData => StatusCode::NOT_FOUND,
        ExtractError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ExtractError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        ExtractError::Store(StoreError::Decode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Numeric parameter; 0 keeps the default.
fn number<T>(key: &str, value: &str) -> Result<Option<T>, String>
where
    T: FromStr + Default + PartialEq,
{
    let n: T = value.parse().map_err(|_| format!("invalid {key}: {value:?}"))?;
    Ok((n != T::default()).then_some(n))
}

fn millis(key: &str, ms: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("{key} out of range: {ms}"))
}

/// Read one request. `None` when the peer closed the connection between
/// requests.
async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(RequestError::Malformed(format!("request line {:?}", line.trim_end())));
    };

    let mut close = version == "HTTP/1.0";
    let mut length = 0usize;
    let mut headers = 0;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            return Err(RequestError::Malformed("connection closed in headers".to_string()));
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(RequestError::Malformed("too many headers".to_string()));
        }

        let Some((name, value)) = header.split_once(':') else {
            return Err(RequestError::Malformed(format!("header {header:?}")));
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            length = value
                .parse()
                .map_err(|_| RequestError::Malformed(format!("content-length {value:?}")))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(RequestError::Malformed(format!("unsupported transfer-encoding {value:?}")));
        } else if name.eq_ignore_ascii_case("connection") {
            close = value.eq_ignore_ascii_case("close");
        }
    }

    if length > MAX_BODY {
        return Err(RequestError::TooLarge(length));
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    Ok(Some(Request {
        method: method.to_string(),
        target: target.to_string(),
        body,
        close,
    }))
}

async fn write_response<W>(writer: &mut W, response: &Response, close: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: {}\r\n\r\n",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or_default(),
        response.content_type,
        response.body.len(),
        if close { "close" } else { "keep-alive" },
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;
    use reqwest::header::CONTENT_TYPE;
    use reqwest::Client;
    use spectre_core::{MemorySink, MemoryStore, SinkStats};

    use super::*;
    use crate::export::tests::{closed_channel, sample};
    use crate::export::HttpSink;
    use crate::store::CsvStore;

    /// Serve on an ephemeral port and return the base URL.
    async fn start<K, S>(sink: K, store: S) -> String
    where
        K: SampleSink + Send + 'static,
        S: SampleStore + Clone + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(Arc::new(SpectreServer::new(sink, store)).run(listener));
        address
    }

    fn memory_server_store() -> MemoryStore {
        MemoryStore::from((0..4).map(sample).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_exported_samples_render() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("samples.csv"));
        let server = start(store.sink().unwrap(), store.clone()).await;

        let mut exporter = HttpSink::connect(&server, 4).await.unwrap();
        let stats = exporter.write(closed_channel(6)).await.unwrap();
        assert_eq!(stats, SinkStats { total: 6, success: 6, error: 0 });
        assert_eq!(store.select(&Filter::default()).unwrap().len(), 6);

        let response = reqwest::get(format!("{server}/spectre/v1/render?imageType=png&addGrid=false"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");

        let image = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(image.dimensions(), (6, 1));
    }

    #[tokio::test]
    async fn test_collect_reply() {
        let server = start(MemorySink::new(), MemoryStore::new()).await;
        let body = serde_json::to_vec(&[sample(0), sample(1)]).unwrap();

        let response = Client::new()
            .post(format!("{server}/spectre/v1/collect"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reply: serde_json::Value = response.json().await.unwrap();
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["sampleCount"], 2);
    }

    #[tokio::test]
    async fn test_invalid_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("samples.csv"));
        let server = start(store.sink().unwrap(), store.clone()).await;

        let response = Client::new()
            .post(format!("{server}/spectre/v1/collect"))
            .body("[{\"FreqCenter\": \"abc\"}]")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.select(&Filter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_defaults_to_jpeg_with_grid() {
        let server = start(MemorySink::new(), memory_server_store()).await;

        let response = reqwest::get(format!("{server}/spectre/v1/render")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");

        let image = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(image.color(), image::ColorType::Rgb8);
        assert!(image.width() > 4 && image.height() > 1);
    }

    #[tokio::test]
    async fn test_render_errors() {
        let server = start(MemorySink::new(), memory_server_store()).await;
        let status = |query: &'static str| {
            let url = format!("{server}/spectre/v1/render?{query}");
            async move { reqwest::get(url).await.unwrap().status() }
        };

        assert_eq!(status("startFreq=abc").await, StatusCode::BAD_REQUEST);
        assert_eq!(status("identifier=station-9").await, StatusCode::NOT_FOUND);
        assert_eq!(
            status("startTime=1638352900000&endTime=1638352800000").await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_render_from_missing_store() {
        let server = start(MemorySink::new(), CsvStore::new("/nonexistent/spectre.csv")).await;
        let response = reqwest::get(format!("{server}/spectre/v1/render")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let server = start(MemorySink::new(), MemoryStore::new()).await;

        let response = reqwest::get(format!("{server}/spectre/v1/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = reqwest::get(format!("{server}/spectre/v1/collect")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_render_query() {
        let url = Url::parse(
            "http://localhost/spectre/v1/render?sdr=hackrf&startFreq=430000000&endFreq=0\
             &startTime=1638352800000&imgWidth=800&addGrid=false&imageType=PNG&zoom=2",
        )
        .unwrap();
        let query = RenderQuery::parse(&url).unwrap();

        assert_eq!(query.filter.source.as_deref(), Some("hackrf"));
        assert_eq!(query.filter.identifier, None);
        assert_eq!(query.filter.start_freq, 430_000_000);
        assert_eq!(query.filter.end_freq, u64::MAX);
        assert_eq!(query.filter.start_time.timestamp_millis(), 1_638_352_800_000);
        assert_eq!(query.options.width, 800);
        assert_eq!(query.options.height, 0);
        assert!(!query.options.add_grid);
        assert_eq!(query.format, ImageFormat::Png);
    }

    #[tokio::test]
    async fn test_read_request() {
        let mut input: &[u8] = b"POST /spectre/v1/collect HTTP/1.1\r\nContent-Length: 2\r\n\r\n[]\
                                 GET /spectre/v1/render HTTP/1.1\r\nConnection: close\r\n\r\n";

        let first = read_request(&mut input).await.unwrap().unwrap();
        assert_eq!(first.method, "POST");
        assert_eq!(first.target, "/spectre/v1/collect");
        assert_eq!(first.body, b"[]");
        assert!(!first.close);

        let second = read_request(&mut input).await.unwrap().unwrap();
        assert_eq!(second.method, "GET");
        assert!(second.body.is_empty());
        assert!(second.close);

        assert!(read_request(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_limits() {
        let mut chunked: &[u8] = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(
            read_request(&mut chunked).await,
            Err(RequestError::Malformed(_))
        ));

        let mut huge: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 999999999999\r\n\r\n";
        assert!(matches!(
            read_request(&mut huge).await,
            Err(RequestError::TooLarge(_))
        ));

        let mut garbage: &[u8] = b"hello\r\n\r\n";
        assert!(matches!(
            read_request(&mut garbage).await,
            Err(RequestError::Malformed(_))
        ));
    }
}
