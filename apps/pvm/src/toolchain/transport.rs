//! HTTP transport used by the catalog resolver and the archive fetcher.
//!
//! All network access goes through the [`Transport`] trait so the pipeline can
//! run against an in-memory implementation in tests. [`HttpTransport`] is the
//! production implementation on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;

use crate::errors::{PvmError, PvmResult};

/// User-Agent header sent with every request.
///
/// windows.php.net rejects requests without a browser-like agent.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; pvm/",
    env!("CARGO_PKG_VERSION"),
    "; +https://github.com/pvm-rs/pvm)"
);

/// Connect timeout for every request.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum time without receiving any bytes on an open response.
const READ_TIMEOUT_SECS: u64 = 60;

/// Overall timeout for small text documents such as the catalog.
const TEXT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Stream of body chunks. Chunks are pulled one at a time, so a slow consumer
/// throttles the transfer instead of buffering it.
pub type ByteStream = BoxStream<'static, PvmResult<Bytes>>;

/// An open response body.
pub struct Body {
    /// `true` when the server honoured the requested offset (HTTP 206) and
    /// the stream continues an existing partial file.
    pub resumed: bool,
    /// Full size of the resource if the server reported it.
    pub total: Option<u64>,
    /// The body chunks.
    pub stream: ByteStream,
}

/// Network access used by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a small text document in full.
    async fn get_text(&self, url: &str) -> PvmResult<String>;

    /// Opens a binary resource, asking the server to start at `offset`.
    ///
    /// Servers are free to ignore the offset; callers must check
    /// [`Body::resumed`] and restart their output when it is `false`.
    async fn open(&self, url: &str, offset: u64) -> PvmResult<Body>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the HTTP client with the connect and idle-read timeouts.
    ///
    /// # Errors
    ///
    /// Returns a `Network` error if the TLS backend cannot be initialised.
    pub fn new() -> PvmResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .map_err(|e| PvmError::network_with_source("failed to create HTTP client", e))?;
        Ok(Self { client })
    }

    async fn send_ranged(&self, url: &str, offset: u64) -> PvmResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        request
            .send()
            .await
            .map_err(|e| PvmError::network_with_source(format!("failed to connect to {url}"), e))
    }
}

/// Maps a non-success HTTP status to a `Network` error.
fn handle_http_error(status: StatusCode, url: &str) -> PvmError {
    match status.as_u16() {
        404 => PvmError::http_status(format!("not found: {url}"), 404),
        code if code >= 500 => PvmError::http_status(format!("server error ({code}): {url}"), code),
        code => PvmError::http_status(format!("HTTP error {code}: {url}"), code),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str) -> PvmResult<String> {
        tracing::debug!(url, "fetching document");
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(TEXT_REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| PvmError::network_with_source(format!("failed to fetch {url}"), e))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response.status(), url));
        }

        response
            .text()
            .await
            .map_err(|e| PvmError::network_with_source(format!("failed to read {url}"), e))
    }

    async fn open(&self, url: &str, offset: u64) -> PvmResult<Body> {
        tracing::debug!(url, offset, "opening download");
        let mut response = self.send_ranged(url, offset).await?;

        // The partial file is already as long as (or longer than) the resource.
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            tracing::debug!(url, "range not satisfiable, restarting from zero");
            response = self.send_ranged(url, 0).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(handle_http_error(status, url));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let total = response
            .content_length()
            .map(|len| if resumed { len + offset } else { len });

        let owned_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    PvmError::network_with_source(format!("failed to read from {owned_url}"), e)
                })
            })
            .boxed();

        Ok(Body {
            resumed,
            total,
            stream,
        })
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory transport for pipeline tests.

    use super::{Body, Transport};
    use crate::errors::{PvmError, PvmResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const CHUNK: usize = 1024;

    #[derive(Default)]
    struct State {
        documents: HashMap<String, String>,
        files: HashMap<String, Vec<u8>>,
        opens: Vec<(String, u64)>,
        failing_opens: u32,
        cut_after: Option<usize>,
    }

    /// Serves documents and files from memory and records every request.
    #[derive(Default)]
    pub struct FakeTransport {
        state: Mutex<State>,
        ignore_ranges: bool,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// A server that always answers 200 with the full body.
        pub fn without_range_support() -> Self {
            Self {
                ignore_ranges: true,
                ..Self::default()
            }
        }

        pub fn serve_text(&self, url: &str, body: &str) {
            let mut state = self.state.lock().unwrap();
            state.documents.insert(url.to_string(), body.to_string());
        }

        pub fn serve_file(&self, url: &str, body: Vec<u8>) {
            let mut state = self.state.lock().unwrap();
            state.files.insert(url.to_string(), body);
        }

        /// Makes the next `count` calls to `open` fail before any byte is sent.
        pub fn fail_next_opens(&self, count: u32) {
            self.state.lock().unwrap().failing_opens = count;
        }

        /// Makes the next `open` deliver `bytes` bytes, then fail mid-stream.
        pub fn cut_next_after(&self, bytes: usize) {
            self.state.lock().unwrap().cut_after = Some(bytes);
        }

        /// Every `open` so far as `(url, requested offset)`.
        pub fn opens(&self) -> Vec<(String, u64)> {
            self.state.lock().unwrap().opens.clone()
        }

        pub fn open_count(&self, url: &str) -> usize {
            self.opens().iter().filter(|(u, _)| u == url).count()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get_text(&self, url: &str) -> PvmResult<String> {
            let state = self.state.lock().unwrap();
            state
                .documents
                .get(url)
                .cloned()
                .ok_or_else(|| PvmError::http_status(format!("not found: {url}"), 404))
        }

        async fn open(&self, url: &str, offset: u64) -> PvmResult<Body> {
            let mut state = self.state.lock().unwrap();
            state.opens.push((url.to_string(), offset));

            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(PvmError::network(format!("connection reset: {url}")));
            }

            let Some(file) = state.files.get(url).cloned() else {
                return Err(PvmError::http_status(format!("not found: {url}"), 404));
            };

            let offset = usize::try_from(offset).unwrap();
            let resumed = offset > 0 && offset < file.len() && !self.ignore_ranges;
            let start = if resumed { offset } else { 0 };
            let total = Some(file.len() as u64);

            let mut body = file[start..].to_vec();
            let cut = state.cut_after.take();
            if let Some(limit) = cut {
                body.truncate(limit);
            }

            let mut chunks: Vec<PvmResult<Bytes>> = body
                .chunks(CHUNK)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            if cut.is_some() {
                chunks.push(Err(PvmError::network("connection reset mid-transfer")));
            }

            Ok(Body {
                resumed,
                total,
                stream: futures_util::stream::iter(chunks).boxed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_http_error_404() {
        let error = handle_http_error(StatusCode::NOT_FOUND, "https://example.com");
        assert!(error.to_string().contains("not found"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn handle_http_error_500_is_retryable() {
        let error = handle_http_error(StatusCode::INTERNAL_SERVER_ERROR, "https://example.com");
        assert!(error.to_string().contains("500"));
        assert!(error.is_retryable());
    }

    #[test]
    fn handle_http_error_generic() {
        let error = handle_http_error(StatusCode::BAD_REQUEST, "https://example.com");
        assert!(error.to_string().contains("400"));
    }

    #[test]
    fn user_agent_names_the_tool() {
        assert!(USER_AGENT.starts_with("Mozilla/5.0"));
        assert!(USER_AGENT.contains("pvm/"));
    }

    #[tokio::test]
    async fn http_transport_reports_connection_failure_as_network_error() {
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get_text("http://127.0.0.1:1/releases.json")
            .await
            .unwrap_err();
        assert!(matches!(err, PvmError::Network { .. }));
        assert!(err.is_retryable());
    }
}
