//! PHP installation management for the pvm CLI.
//!
//! This module holds the install-and-activate pipeline: resolving a version
//! spec against the release catalog, downloading and verifying the archive,
//! unpacking it into the version store and switching the active version.
//!
//! ## Module Structure
//!
//! - [`platform`] - OS, architecture and thread-safety detection
//! - [`paths`] - Store layout and completeness markers
//! - [`transport`] - HTTP access behind a trait
//! - [`retry`] - Bounded retry with backoff for transient failures
//! - [`catalog`] - Release catalog parsing and version resolution
//! - [`download`] - Resumable archive downloads with progress tracking
//! - [`verify`] - SHA-256/SHA-512 checksum verification
//! - [`archive`] - ZIP and tar.gz archive extraction
//! - [`lock`] - Inter-process locks on store resources
//! - [`installer`] - The install state machine
//! - [`platform_ops`] - OS primitives used by activation
//! - [`activation`] - The active-version pointer
//! - [`shell`] - Shell profile setup for `pvm init`

pub mod activation;
pub mod archive;
pub mod catalog;
pub mod download;
pub mod installer;
pub mod lock;
pub mod paths;
pub mod platform;
pub mod platform_ops;
pub mod retry;
pub mod shell;
pub mod transport;
pub mod verify;

pub use activation::{ActivationManager, current_active};
pub use catalog::CatalogResolver;
pub use download::text_progress;
pub use installer::{InstallState, Installer};
pub use paths::StorePaths;
pub use platform::PlatformInfo;
pub use platform_ops::NativeOps;
pub use transport::HttpTransport;
