//! Archive downloads with reuse, resume and retry.
//!
//! ## Features
//!
//! - An archive already present under its final name is reused when its
//!   digest matches, and deleted otherwise
//! - Transfers stream into `<name>.part`; only a digest-verified file is
//!   renamed to the final name
//! - A leftover `.part` from an interrupted run is resumed with an HTTP range
//!   request; servers that ignore the range restart it from zero
//! - Transient failures are retried under a [`RetryPolicy`]; a digest
//!   mismatch is surfaced as `Integrity` and never retried here

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::retry::RetryPolicy;
use super::transport::Transport;
use super::verify::{self, Digest};
use crate::errors::{PvmError, PvmResult};

/// Progress event emitted during downloads.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A transfer attempt has started.
    Started {
        /// The URL being downloaded.
        url: String,
        /// Total file size in bytes, zero if unknown.
        total: u64,
        /// Bytes already present from an earlier partial transfer.
        resumed_from: u64,
    },
    /// Download progress update.
    Progress {
        /// Bytes on disk so far, including resumed bytes.
        downloaded: u64,
        /// Current download speed in bytes per second.
        speed: u64,
    },
    /// Download completed and verified.
    Completed,
    /// Download failed with an error.
    Failed {
        /// Error description.
        error: String,
    },
}

/// Callback type for receiving progress updates during downloads.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Minimum interval between progress callback invocations in milliseconds.
const PROGRESS_CALLBACK_INTERVAL_MS: u128 = 100;

/// Outcome of [`ArchiveFetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Final path of the verified archive.
    pub path: PathBuf,
    /// `true` if an existing archive was reused without any transfer.
    pub reused: bool,
}

/// Returns the temporary transfer path for `dest`.
#[must_use]
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Streams remote archives to disk.
pub struct ArchiveFetcher<'a> {
    transport: &'a dyn Transport,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl<'a> ArchiveFetcher<'a> {
    #[must_use]
    pub fn new(transport: &'a dyn Transport, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            progress: None,
        }
    }

    /// Reports progress through `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.progress {
            callback(event);
        }
    }

    /// Ensures a file matching `expected` exists at `dest`.
    ///
    /// # Errors
    ///
    /// - `Network` once the retry budget is exhausted or on a permanent HTTP error
    /// - `Integrity` if the completed transfer does not match `expected`
    ///   (the `.part` file is deleted)
    /// - `Io` if the destination cannot be written
    pub async fn fetch(&self, url: &str, dest: &Path, expected: &Digest) -> PvmResult<FetchResult> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PvmError::io(format!("failed to create directory {}", parent.display()), e)
            })?;
        }

        if dest.is_file() {
            if verify::verify(dest, expected)? {
                tracing::debug!(path = %dest.display(), "reusing verified archive");
                return Ok(FetchResult {
                    path: dest.to_path_buf(),
                    reused: true,
                });
            }
            tracing::warn!(path = %dest.display(), "cached archive does not match, fetching again");
            remove_if_exists(dest).await?;
        }

        let part = part_path(dest);
        let transferred = self
            .retry
            .run("download", |_| self.transfer(url, &part))
            .await;
        if let Err(error) = transferred {
            self.emit(ProgressEvent::Failed {
                error: error.to_string(),
            });
            return Err(error);
        }

        if let Err(error) = verify::ensure_matches(&part, expected) {
            remove_if_exists(&part).await?;
            self.emit(ProgressEvent::Failed {
                error: error.to_string(),
            });
            return Err(error);
        }

        tokio::fs::rename(&part, dest).await.map_err(|e| {
            PvmError::io(
                format!("failed to rename {} to {}", part.display(), dest.display()),
                e,
            )
        })?;
        self.emit(ProgressEvent::Completed);

        Ok(FetchResult {
            path: dest.to_path_buf(),
            reused: false,
        })
    }

    /// One transfer attempt into `part`, continuing whatever it already holds.
    async fn transfer(&self, url: &str, part: &Path) -> PvmResult<()> {
        let existing = tokio::fs::metadata(part).await.map_or(0, |m| m.len());
        let mut body = self.transport.open(url, existing).await?;

        let mut file = if body.resumed {
            tokio::fs::OpenOptions::new().append(true).open(part).await
        } else {
            tokio::fs::File::create(part).await
        }
        .map_err(|e| PvmError::io(format!("failed to open {}", part.display()), e))?;

        let mut downloaded = if body.resumed { existing } else { 0 };
        if body.resumed {
            tracing::debug!(url, offset = existing, "resuming partial download");
        }
        self.emit(ProgressEvent::Started {
            url: url.to_string(),
            total: body.total.unwrap_or(0),
            resumed_from: downloaded,
        });

        let start_time = Instant::now();
        let mut received: u64 = 0;
        let mut last_callback_time = Instant::now();

        let mut interrupted = None;
        while let Some(chunk) = body.stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    interrupted = Some(error);
                    break;
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| PvmError::io(format!("failed to write {}", part.display()), e))?;
            downloaded += chunk.len() as u64;
            received += chunk.len() as u64;

            let now = Instant::now();
            if now.duration_since(last_callback_time).as_millis() >= PROGRESS_CALLBACK_INTERVAL_MS {
                self.emit(ProgressEvent::Progress {
                    downloaded,
                    speed: bytes_per_second(received, start_time),
                });
                last_callback_time = now;
            }
        }

        // Bytes received before an interruption must be on disk before the
        // next attempt measures the partial file.
        file.flush()
            .await
            .map_err(|e| PvmError::io(format!("failed to flush {}", part.display()), e))?;
        if let Some(error) = interrupted {
            return Err(error);
        }
        file.sync_all()
            .await
            .map_err(|e| PvmError::io(format!("failed to sync {}", part.display()), e))?;

        self.emit(ProgressEvent::Progress {
            downloaded,
            speed: bytes_per_second(received, start_time),
        });
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> PvmResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PvmError::io(format!("failed to remove {}", path.display()), e)),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bytes_per_second(bytes: u64, since: Instant) -> u64 {
    let elapsed = since.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        (bytes as f64 / elapsed) as u64
    } else {
        0
    }
}

/// Formats bytes into a human-readable string (KB, MB, GB).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Builds a callback that renders a single-line text progress meter on stdout.
#[must_use]
pub fn text_progress() -> ProgressCallback {
    let total = Mutex::new(0u64);
    Arc::new(move |event: ProgressEvent| match event {
        ProgressEvent::Started {
            total: size,
            resumed_from,
            ..
        } => {
            if let Ok(mut total) = total.lock() {
                *total = size;
            }
            if resumed_from > 0 {
                println!("Resuming at {}...", format_bytes(resumed_from));
            }
        }
        ProgressEvent::Progress { downloaded, speed } => {
            let size = total.lock().map_or(0, |t| *t);
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let percent = if size > 0 {
                (downloaded as f64 / size as f64 * 100.0).min(100.0) as u8
            } else {
                0
            };
            print!(
                "\r{}/{} ({percent}%) {}/s     ",
                format_bytes(downloaded),
                format_bytes(size),
                format_bytes(speed)
            );
            let _ = std::io::stdout().flush();
        }
        ProgressEvent::Completed | ProgressEvent::Failed { .. } => println!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::transport::fake::FakeTransport;
    use crate::toolchain::verify::DigestAlgorithm;
    use sha2::{Digest as _, Sha256};

    const URL: &str = "https://dist.example.com/php-8.2.3.zip";

    fn payload() -> Vec<u8> {
        (0..10_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn digest_for(bytes: &[u8]) -> Digest {
        Digest::new(DigestAlgorithm::Sha256, &hex::encode(Sha256::digest(bytes))).unwrap()
    }

    fn setup() -> (tempfile::TempDir, PathBuf, FakeTransport) {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("downloads").join("php-8.2.3.zip");
        let transport = FakeTransport::new();
        transport.serve_file(URL, payload());
        (temp, dest, transport)
    }

    #[tokio::test]
    async fn fetch_downloads_and_renames() {
        let (_temp, dest, transport) = setup();
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        let result = fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert!(!result.reused);
        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn fetch_reuses_matching_archive_without_network() {
        let (_temp, dest, transport) = setup();
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, payload()).unwrap();
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        let result = fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert!(result.reused);
        assert_eq!(transport.open_count(URL), 0);
    }

    #[tokio::test]
    async fn fetch_replaces_mismatching_archive() {
        let (_temp, dest, transport) = setup();
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"stale").unwrap();
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        let result = fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert!(!result.reused);
        assert_eq!(std::fs::read(&dest).unwrap(), payload());
    }

    #[tokio::test]
    async fn fetch_retries_transient_failures() {
        let (_temp, dest, transport) = setup();
        transport.fail_next_opens(2);
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert_eq!(transport.open_count(URL), 3);
    }

    #[tokio::test]
    async fn fetch_gives_up_after_retry_budget() {
        let (_temp, dest, transport) = setup();
        transport.fail_next_opens(5);
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        let err = fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap_err();

        assert!(matches!(err, PvmError::Network { .. }));
        assert_eq!(transport.open_count(URL), 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_resumes_after_mid_stream_failure() {
        let (_temp, dest, transport) = setup();
        transport.cut_next_after(4096);
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert_eq!(
            transport.opens(),
            vec![(URL.to_string(), 0), (URL.to_string(), 4096)]
        );
    }

    #[tokio::test]
    async fn fetch_restarts_when_server_ignores_range() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("php.zip");
        let transport = FakeTransport::without_range_support();
        transport.serve_file(URL, payload());
        std::fs::write(part_path(&dest), &payload()[..3000]).unwrap();
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));

        fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
    }

    #[tokio::test]
    async fn fetch_mismatch_is_integrity_error_and_not_retried() {
        let (_temp, dest, transport) = setup();
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3));
        let wrong = Digest::new(DigestAlgorithm::Sha256, &"0".repeat(64)).unwrap();

        let err = fetcher.fetch(URL, &dest, &wrong).await.unwrap_err();

        assert!(matches!(err, PvmError::Integrity { .. }));
        assert_eq!(transport.open_count(URL), 1);
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn fetch_reports_progress_events() {
        let (_temp, dest, transport) = setup();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let fetcher = ArchiveFetcher::new(&transport, RetryPolicy::immediate(3)).with_progress(
            Arc::new(move |event: ProgressEvent| sink.lock().unwrap().push(event)),
        );

        fetcher.fetch(URL, &dest, &digest_for(&payload())).await.unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { total: 10_000, .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed)));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Progress {
                downloaded: 10_000,
                ..
            }
        )));
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/d/php-8.2.3.zip")),
            PathBuf::from("/d/php-8.2.3.zip.part")
        );
    }

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
