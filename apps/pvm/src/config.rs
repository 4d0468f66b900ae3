//! User settings stored in `<root>/config.toml`.
//!
//! ## Format
//!
//! ```toml
//! dist_server = "https://windows.php.net/downloads/releases"
//! thread_safety = "ts"
//! arch = "x64"
//! env_var = "PHP_SYMLINK"
//! ```
//!
//! Every key is optional. A missing file means defaults; a file that exists
//! but cannot be read or parsed is an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::toolchain::activation::DEFAULT_ENV_VAR;
use crate::toolchain::catalog::{DEFAULT_DIST_SERVER, DIST_SERVER_ENV, normalize_base_url};
use crate::toolchain::platform::{Arch, PlatformInfo, ThreadSafety};

/// Written by `pvm init` when no config exists yet.
const DEFAULT_CONFIG: &str = r#"# pvm settings. Every key is optional.

# Release catalog base URL. PVM_DIST_SERVER takes precedence.
# dist_server = "https://windows.php.net/downloads/releases"

# "ts" (thread safe) or "nts".
thread_safety = "ts"

# "x64", "x86" or "arm64". Defaults to the host architecture.
# arch = "x64"

# Variable pointed at the active installation on every `pvm use`.
env_var = "PHP_SYMLINK"
"#;

/// Parsed `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_server: Option<String>,

    #[serde(default)]
    pub thread_safety: ThreadSafety,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl Settings {
    /// Loads settings from `path`, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML or invalid values.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Catalog base URL: `PVM_DIST_SERVER`, then `dist_server`, then the default.
    #[must_use]
    pub fn dist_server(&self) -> String {
        self.dist_server_with(std::env::var(DIST_SERVER_ENV).ok())
    }

    fn dist_server_with(&self, env_value: Option<String>) -> String {
        let chosen = env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.dist_server.clone().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_DIST_SERVER.to_string());
        normalize_base_url(&chosen)
    }

    /// Name of the environment variable set on activation.
    #[must_use]
    pub fn env_var(&self) -> &str {
        self.env_var
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_ENV_VAR)
    }

    /// The platform to pick artifacts for.
    ///
    /// # Errors
    ///
    /// Returns an error on hosts no PHP build is published for.
    pub fn platform(&self) -> Result<PlatformInfo> {
        PlatformInfo::detect(self.arch, self.thread_safety).with_context(|| {
            format!(
                "Unsupported platform: {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        })
    }
}

/// Writes the commented default config if `path` does not exist.
///
/// Returns `true` if the file was created.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_default(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
