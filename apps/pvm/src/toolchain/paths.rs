//! Path management for the pvm version store.
//!
//! The default root directory is `~/.pvm/` (`%APPDATA%\pvm` on Windows),
//! overridable with the `PVM_HOME` environment variable.
//!
//! ## Directory Structure
//!
//! ```text
//! ~/.pvm/                     # Root directory (or PVM_HOME)
//!   config.toml               # Optional user settings
//!   env                       # Exported variables, sourced by the shell (Unix)
//!   active -> php/8.2.3       # Active version pointer
//!   php/                      # Installed versions
//!     8.2.3/
//!       php.exe | bin/php
//!       .complete             # Completeness marker (JSON metadata)
//!     .staging-XXXXXX/        # Extraction in progress
//!   downloads/                # Verified archives and `.part` transfers
//!   locks/                    # Advisory lock files
//! ```
//!
//! A version directory without `.complete` is never treated as installed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{PvmError, PvmResult};

/// Environment variable to override the default store root.
pub const PVM_HOME_ENV: &str = "PVM_HOME";

/// Name of the runtime directory below the root.
const RUNTIME_DIR: &str = "php";

/// Completeness marker written into each finished version directory.
pub const COMPLETE_MARKER: &str = ".complete";

/// Prefix of extraction staging directories inside the runtime directory.
pub const STAGING_PREFIX: &str = ".staging-";

/// Contents of the completeness marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMetadata {
    /// The installed version.
    pub version: String,
    /// Seconds since the Unix epoch at which the install finished.
    pub installed_at: u64,
    /// Archive the version was extracted from.
    pub url: String,
    /// Digest the archive was verified against.
    pub digest: String,
}

impl InstallMetadata {
    /// Creates metadata stamped with the current time.
    #[must_use = "returns new metadata without side effects"]
    pub fn now(version: &str, url: &str, digest: &str) -> Self {
        let installed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            version: version.to_string(),
            installed_at,
            url: url.to_string(),
            digest: digest.to_string(),
        }
    }

    /// Whole days elapsed since the install, as a short phrase.
    #[must_use]
    pub fn installed_ago(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        match now.saturating_sub(self.installed_at) / 86_400 {
            0 => "today".to_string(),
            1 => "yesterday".to_string(),
            days => format!("{days} days ago"),
        }
    }
}

/// Manages paths inside the version store.
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// Root directory (`~/.pvm` or `PVM_HOME`).
    pub root: PathBuf,
    /// Directory holding one subdirectory per installed version.
    pub versions: PathBuf,
    /// Download cache.
    pub downloads: PathBuf,
    /// Advisory lock files.
    pub locks: PathBuf,
    /// The active version pointer.
    pub active: PathBuf,
}

impl StorePaths {
    /// Creates a new `StorePaths` instance.
    ///
    /// The root directory is determined by:
    /// 1. The `PVM_HOME` environment variable if set
    /// 2. On Windows: `%APPDATA%\pvm`
    /// 3. On Unix: `~/.pvm` in the user's home directory
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> PvmResult<Self> {
        if let Some(home) = std::env::var_os(PVM_HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(home)));
        }

        #[cfg(windows)]
        let base = dirs::data_dir().map(|d| d.join("pvm"));
        #[cfg(not(windows))]
        let base = dirs::home_dir().map(|d| d.join(".pvm"));

        base.map(Self::with_root).ok_or_else(|| {
            PvmError::io(
                format!("cannot determine home directory; set {PVM_HOME_ENV}"),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })
    }

    /// Creates a new `StorePaths` instance with a specific root directory.
    #[must_use = "returns new paths instance without side effects"]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            versions: root.join(RUNTIME_DIR),
            downloads: root.join("downloads"),
            locks: root.join("locks"),
            active: root.join("active"),
            root,
        }
    }

    /// Creates every directory of the store layout. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_layout(&self) -> PvmResult<&Path> {
        for dir in [&self.root, &self.versions, &self.downloads, &self.locks] {
            std::fs::create_dir_all(dir)
                .map_err(|e| PvmError::io(format!("failed to create {}", dir.display()), e))?;
        }
        Ok(&self.root)
    }

    /// Path of the user settings file.
    #[must_use = "returns the path without side effects"]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path of the shell environment file written on Unix activation.
    #[must_use = "returns the path without side effects"]
    pub fn env_file(&self) -> PathBuf {
        self.root.join("env")
    }

    /// Directory a given version is (or would be) installed into.
    #[must_use = "returns the path without side effects"]
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions.join(version)
    }

    /// Completeness marker of a given version.
    #[must_use = "returns the path without side effects"]
    pub fn marker_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(COMPLETE_MARKER)
    }

    /// Final location of a downloaded archive.
    #[must_use = "returns the path without side effects"]
    pub fn download_path(&self, filename: &str) -> PathBuf {
        self.downloads.join(filename)
    }

    /// Lock file guarding one version's installation.
    #[must_use = "returns the path without side effects"]
    pub fn version_lock(&self, version: &str) -> PathBuf {
        self.locks.join(format!("{version}.lock"))
    }

    /// Lock file guarding the active pointer.
    #[must_use = "returns the path without side effects"]
    pub fn active_lock(&self) -> PathBuf {
        self.locks.join("active.lock")
    }

    /// Returns whether `version` has a completeness marker.
    #[must_use = "returns installation status without side effects"]
    pub fn is_complete(&self, version: &str) -> bool {
        self.marker_path(version).is_file()
    }

    /// Reads the marker metadata of a complete version.
    ///
    /// Returns `None` for incomplete versions and for markers whose contents
    /// cannot be parsed (the marker's presence still counts as complete).
    #[must_use]
    pub fn read_metadata(&self, version: &str) -> Option<InstallMetadata> {
        let content = std::fs::read_to_string(self.marker_path(version)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Writes the completeness marker atomically (temporary file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    pub fn write_marker(&self, metadata: &InstallMetadata) -> PvmResult<()> {
        let marker = self.marker_path(&metadata.version);
        let temp = marker.with_extension("tmp");
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| PvmError::io("failed to serialize install metadata", e.into()))?;
        std::fs::write(&temp, json)
            .map_err(|e| PvmError::io(format!("failed to write {}", temp.display()), e))?;
        std::fs::rename(&temp, &marker)
            .map_err(|e| PvmError::io(format!("failed to write {}", marker.display()), e))
    }

    /// Lists version directories, split into complete and incomplete ones.
    ///
    /// Staging directories and other dot-entries are skipped. Both lists are
    /// sorted by version, highest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime directory exists but cannot be read.
    pub fn scan_versions(&self) -> PvmResult<(Vec<String>, Vec<String>)> {
        let mut complete = Vec::new();
        let mut incomplete = Vec::new();

        if !self.versions.is_dir() {
            return Ok((complete, incomplete));
        }

        let entries = std::fs::read_dir(&self.versions)
            .map_err(|e| PvmError::io(format!("failed to read {}", self.versions.display()), e))?;

        for entry in entries.filter_map(Result::ok) {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if self.is_complete(&name) {
                complete.push(name);
            } else {
                incomplete.push(name);
            }
        }

        super::catalog::sort_versions_desc(&mut complete);
        super::catalog::sort_versions_desc(&mut incomplete);
        Ok((complete, incomplete))
    }

    /// Lists complete installed versions, highest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime directory cannot be read.
    pub fn installed_versions(&self) -> PvmResult<Vec<String>> {
        Ok(self.scan_versions()?.0)
    }
}
