//! Error types for the pvm CLI.
//!
//! `PvmError` is the single error type returned by the install-and-activate
//! pipeline in [`crate::toolchain`]. Each condition a caller may need to react
//! to has its own variant, so resolution failures, missing platform builds,
//! transport failures and integrity failures stay distinguishable all the way
//! up to the command layer. Commands wrap these in `anyhow::Error`; `main`
//! downcasts back to `PvmError` to pick the process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used as the optional source of transport and extraction failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the toolchain pipeline.
pub type PvmResult<T> = Result<T, PvmError>;

/// Consolidated error type for pvm operations.
#[derive(Debug, Error)]
pub enum PvmError {
    /// No catalog release matches the requested version spec.
    #[error("no PHP release matches '{spec}'")]
    VersionNotFound {
        /// The version spec as given by the user.
        spec: String,
    },

    /// The release exists, but not for the current platform.
    #[error("PHP {version} has no build for {platform}")]
    ArtifactNotAvailable {
        /// The resolved release version.
        version: String,
        /// Display form of the platform that was looked up.
        platform: String,
    },

    /// Transport failure: connect, timeout, reset, or an unexpected HTTP status.
    #[error("network error: {message}")]
    Network {
        /// Description of the failed request.
        message: String,
        /// HTTP status, when the server answered.
        status: Option<u16>,
        /// The underlying transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The catalog document could not be understood.
    #[error("invalid release catalog: {message}")]
    CatalogParse {
        /// What was wrong with the document.
        message: String,
    },

    /// A file's digest does not match the catalog.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Integrity {
        /// The file that was hashed.
        path: PathBuf,
        /// The digest published in the catalog.
        expected: String,
        /// The digest computed from the file.
        actual: String,
    },

    /// The archive could not be unpacked into the store.
    #[error("extraction failed: {message}")]
    Extraction {
        /// What went wrong.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The requested version has no complete installation.
    #[error("PHP {version} is not installed")]
    NotInstalled {
        /// The version or spec that was looked up.
        version: String,
    },

    /// The active pointer could not be replaced.
    #[error("activation failed: {message}")]
    Activation {
        /// What went wrong.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The version spec is malformed (for example empty).
    #[error("invalid version spec: {message}")]
    InvalidSpec {
        /// Why the spec was rejected.
        message: String,
    },

    /// Local store I/O failed outside of extraction and activation.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O operation that failed.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl PvmError {
    /// Creates a new `VersionNotFound` error.
    #[must_use]
    pub fn version_not_found(spec: impl Into<String>) -> Self {
        Self::VersionNotFound { spec: spec.into() }
    }

    /// Creates a new `ArtifactNotAvailable` error.
    #[must_use]
    pub fn artifact_not_available(version: impl Into<String>, platform: impl Into<String>) -> Self {
        Self::ArtifactNotAvailable {
            version: version.into(),
            platform: platform.into(),
        }
    }

    /// Creates a new `Network` error without an underlying source.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Creates a new `Network` error for an unexpected HTTP status.
    #[must_use]
    pub fn http_status(message: impl Into<String>, status: u16) -> Self {
        Self::Network {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Creates a new `Network` error wrapping a transport error.
    #[must_use]
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new `CatalogParse` error.
    #[must_use]
    pub fn catalog_parse(message: impl Into<String>) -> Self {
        Self::CatalogParse {
            message: message.into(),
        }
    }

    /// Creates a new `Integrity` error.
    #[must_use]
    pub fn integrity(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `Extraction` error without an underlying source.
    #[must_use]
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `Extraction` error wrapping the failure that caused it.
    #[must_use]
    pub fn extraction_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Extraction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new `NotInstalled` error.
    #[must_use]
    pub fn not_installed(version: impl Into<String>) -> Self {
        Self::NotInstalled {
            version: version.into(),
        }
    }

    /// Creates a new `Activation` error.
    #[must_use]
    pub fn activation(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::Activation {
            message: message.into(),
            source,
        }
    }

    /// Creates a new `InvalidSpec` error.
    #[must_use]
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    /// Creates a new `Io` error from an I/O error with context.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns whether the retry policy may attempt the operation again.
    ///
    /// Only transport failures are transient, and of those only the ones a
    /// second attempt can fix: connection problems, timeouts, 5xx, 408 and 429.
    /// Integrity failures are handled by the installer's single explicit
    /// re-fetch, never by backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { status: None, .. } => true,
            Self::Network {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    /// Process exit code reported by the CLI for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 1,
            Self::InvalidSpec { .. } => 2,
            Self::VersionNotFound { .. } => 3,
            Self::ArtifactNotAvailable { .. } => 4,
            Self::Network { .. } => 5,
            Self::CatalogParse { .. } => 6,
            Self::Integrity { .. } => 7,
            Self::Extraction { .. } => 8,
            Self::NotInstalled { .. } => 9,
            Self::Activation { .. } => 10,
        }
    }
}
