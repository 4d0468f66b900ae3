//! The install pipeline: resolve, fetch or reuse, verify, extract, finalize.
//!
//! Each invocation walks a small state machine:
//!
//! ```text
//! Resolving -> (cache hit)  ------------------------> Extracting -> Finalizing -> Done
//!           -> (cache miss) Downloading -> Verifying -> Extracting -> Finalizing -> Done
//! ```
//!
//! Any state may end in `Failed`. Installers of the same version are
//! serialised by `locks/<version>.lock`; the loser of a race finds the
//! `.complete` marker and returns without touching the network.
//!
//! Archives are unpacked into `php/.staging-XXXX`, renamed to `php/<version>`
//! and only then marked complete. A directory without the marker is stale and
//! is purged before the rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive::extract_archive;
use super::catalog::{CatalogResolver, ResolvedRelease};
use super::download::{ArchiveFetcher, ProgressCallback};
use super::lock::StoreLock;
use super::paths::{InstallMetadata, STAGING_PREFIX, StorePaths};
use super::platform::PlatformInfo;
use super::retry::RetryPolicy;
use super::transport::Transport;
use super::verify;
use crate::errors::{PvmError, PvmResult};

/// Shipped template that seeds `php.ini` on first install.
const INI_TEMPLATE: &str = "php.ini-development";

/// States reported while an install runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Resolving,
    Downloading {
        url: String,
    },
    /// The archive at `archive` is about to be checked against its digest.
    Verifying {
        archive: PathBuf,
    },
    Extracting,
    Finalizing,
    Done {
        version: String,
    },
    Failed {
        reason: String,
    },
}

/// Callback receiving every state transition.
pub type StateCallback = Arc<dyn Fn(&InstallState) + Send + Sync>;

/// A complete version in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub version: String,
    pub path: PathBuf,
    /// `false` when the version was already installed and nothing was done.
    pub newly_installed: bool,
}

/// Installs releases from a catalog into the version store.
pub struct Installer<'a> {
    paths: &'a StorePaths,
    transport: &'a dyn Transport,
    base_url: String,
    platform: PlatformInfo,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
    on_state: Option<StateCallback>,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(
        paths: &'a StorePaths,
        transport: &'a dyn Transport,
        base_url: &str,
        platform: PlatformInfo,
    ) -> Self {
        Self {
            paths,
            transport,
            base_url: base_url.to_string(),
            platform,
            retry: RetryPolicy::default(),
            progress: None,
            on_state: None,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reports download progress through `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Reports state transitions through `callback`.
    #[must_use]
    pub fn on_state(mut self, callback: StateCallback) -> Self {
        self.on_state = Some(callback);
        self
    }

    fn transition(&self, state: InstallState) {
        tracing::debug!(?state, "install state");
        if let Some(callback) = &self.on_state {
            callback(&state);
        }
    }

    /// Installs the highest release matching `spec`.
    ///
    /// Returns immediately when the resolved version is already complete.
    ///
    /// # Errors
    ///
    /// - `InvalidSpec`, `VersionNotFound`, `ArtifactNotAvailable` from resolution
    /// - `Network` when the catalog or archive cannot be downloaded
    /// - `Integrity` when the archive fails verification twice
    /// - `Extraction` when the archive cannot be unpacked or moved into place
    /// - `Io` when the store or its locks cannot be written
    pub async fn install(&self, spec: &str) -> PvmResult<InstalledVersion> {
        let result = self.run(spec).await;
        match &result {
            Ok(installed) => self.transition(InstallState::Done {
                version: installed.version.clone(),
            }),
            Err(e) => self.transition(InstallState::Failed {
                reason: e.to_string(),
            }),
        }
        result
    }

    async fn run(&self, spec: &str) -> PvmResult<InstalledVersion> {
        self.transition(InstallState::Resolving);
        let resolved = CatalogResolver::new(self.transport, &self.base_url)
            .resolve(spec, &self.platform)
            .await?;
        let version = resolved.version.clone();
        let version_dir = self.paths.version_dir(&version);

        self.paths.ensure_layout()?;
        let _lock = StoreLock::acquire_async(&self.paths.version_lock(&version)).await?;

        if self.paths.is_complete(&version) {
            tracing::debug!(%version, "already installed");
            return Ok(InstalledVersion {
                version,
                path: version_dir,
                newly_installed: false,
            });
        }

        let archive = self.obtain_archive(&resolved).await?;

        self.transition(InstallState::Extracting);
        let staging = self.extract_to_staging(&archive).await?;

        self.transition(InstallState::Finalizing);
        self.finalize(staging, &resolved)?;

        if let Err(e) = std::fs::remove_file(&archive) {
            tracing::debug!(path = %archive.display(), error = %e, "could not remove archive");
        }

        tracing::info!(%version, path = %version_dir.display(), "installed");
        Ok(InstalledVersion {
            version,
            path: version_dir,
            newly_installed: true,
        })
    }

    /// Produces a verified archive, re-fetching once after an integrity failure.
    async fn obtain_archive(&self, resolved: &ResolvedRelease) -> PvmResult<PathBuf> {
        let dest = self.paths.download_path(resolved.artifact.filename());

        match self.fetch_verified(resolved, &dest).await {
            Err(PvmError::Integrity { .. }) => {
                tracing::warn!(path = %dest.display(), "archive failed verification, downloading again");
                discard(&dest);
                let retried = self.fetch_verified(resolved, &dest).await;
                if matches!(retried, Err(PvmError::Integrity { .. })) {
                    discard(&dest);
                }
                retried
            }
            other => other,
        }
    }

    async fn fetch_verified(&self, resolved: &ResolvedRelease, dest: &Path) -> PvmResult<PathBuf> {
        let expected = &resolved.artifact.digest;

        if dest.is_file() {
            self.transition(InstallState::Verifying {
                archive: dest.to_path_buf(),
            });
            if verify::verify(dest, expected)? {
                tracing::debug!(path = %dest.display(), "using cached archive");
                return Ok(dest.to_path_buf());
            }
            tracing::debug!(path = %dest.display(), "cached archive does not match");
        }

        self.transition(InstallState::Downloading {
            url: resolved.artifact.url.clone(),
        });
        let mut fetcher = ArchiveFetcher::new(self.transport, self.retry);
        if let Some(progress) = &self.progress {
            fetcher = fetcher.with_progress(Arc::clone(progress));
        }
        let fetched = fetcher.fetch(&resolved.artifact.url, dest, expected).await?;

        self.transition(InstallState::Verifying {
            archive: fetched.path.clone(),
        });
        verify::ensure_matches(&fetched.path, expected)?;
        Ok(fetched.path)
    }

    async fn extract_to_staging(&self, archive: &Path) -> PvmResult<tempfile::TempDir> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.paths.versions)
            .map_err(|e| PvmError::extraction_with_source("failed to create staging directory", e))?;

        let archive = archive.to_path_buf();
        let target = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            extract_archive(&archive, &target)?;
            bootstrap_php_ini(&target)
        })
        .await
        .map_err(|e| PvmError::extraction_with_source("extraction task failed", e))??;

        Ok(staging)
    }

    fn finalize(&self, staging: tempfile::TempDir, resolved: &ResolvedRelease) -> PvmResult<()> {
        let version_dir = self.paths.version_dir(&resolved.version);

        if version_dir.exists() {
            tracing::debug!(path = %version_dir.display(), "removing incomplete install");
            std::fs::remove_dir_all(&version_dir).map_err(|e| {
                PvmError::extraction_with_source(
                    format!("failed to remove stale {}", version_dir.display()),
                    e,
                )
            })?;
        }

        let staged = staging.keep();
        if let Err(e) = std::fs::rename(&staged, &version_dir) {
            let _ = std::fs::remove_dir_all(&staged);
            return Err(PvmError::extraction_with_source(
                format!("failed to move files into {}", version_dir.display()),
                e,
            ));
        }

        self.paths.write_marker(&InstallMetadata::now(
            &resolved.version,
            &resolved.artifact.url,
            &resolved.artifact.digest.to_string(),
        ))
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "could not delete archive");
    }
}

/// Seeds `php.ini` from the development template and enables the bundled
/// extension directory. An existing `php.ini` is left alone.
fn bootstrap_php_ini(dir: &Path) -> PvmResult<()> {
    let ini = dir.join("php.ini");
    let template = dir.join(INI_TEMPLATE);
    if ini.exists() || !template.is_file() {
        return Ok(());
    }

    let content = std::fs::read_to_string(&template).map_err(|e| {
        PvmError::extraction_with_source(format!("failed to read {}", template.display()), e)
    })?;
    let content = content.replace(";extension_dir = \"ext\"", "extension_dir = \"ext\"");
    std::fs::write(&ini, content)
        .map_err(|e| PvmError::extraction_with_source(format!("failed to write {}", ini.display()), e))
}
