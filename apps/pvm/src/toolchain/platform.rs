//! Platform detection for PHP builds.
//!
//! A PHP build is identified by three coordinates: operating system, CPU
//! architecture and thread-safety flavour. Catalog artifacts are keyed by the
//! same triple (see [`PlatformInfo::parse_artifact_key`]).
//!
//! ## Artifact key grammar
//!
//! ```text
//! ts-vs16-x64          -> windows / x64 / ts   (windows.php.net convention)
//! nts-vs17-x86         -> windows / x86 / nts
//! linux-nts-x64        -> linux   / x64 / nts
//! macos-ts-clang-arm64 -> macos   / arm64 / ts
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system of a PHP build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
    Windows,
    Linux,
    Macos,
}

impl Os {
    /// Detects the host operating system.
    #[must_use = "returns the OS without side effects"]
    pub fn host() -> Option<Self> {
        match std::env::consts::OS {
            "windows" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Macos),
            _ => None,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "windows" | "win" | "win32" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            "macos" | "darwin" => Some(Self::Macos),
            _ => None,
        }
    }

    #[must_use = "returns the OS string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
        }
    }
}

/// CPU architecture of a PHP build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    X86,
    Arm64,
}

impl Arch {
    /// Detects the host architecture.
    #[must_use = "returns the architecture without side effects"]
    pub fn host() -> Option<Self> {
        Self::from_token(std::env::consts::ARCH)
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "x86" | "i686" | "i386" => Some(Self::X86),
            "arm64" | "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }

    #[must_use = "returns the architecture string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
        }
    }
}

/// Thread-safety flavour of a PHP build.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreadSafety {
    /// Thread safe (ZTS).
    #[default]
    Ts,
    /// Non thread safe.
    Nts,
}

impl ThreadSafety {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "ts" => Some(Self::Ts),
            "nts" => Some(Self::Nts),
            _ => None,
        }
    }

    #[must_use = "returns the flavour string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ts => "ts",
            Self::Nts => "nts",
        }
    }
}

/// The `(os, arch, thread safety)` triple an artifact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformInfo {
    pub os: Os,
    pub arch: Arch,
    pub thread_safety: ThreadSafety,
}

impl PlatformInfo {
    #[must_use]
    pub fn new(os: Os, arch: Arch, thread_safety: ThreadSafety) -> Self {
        Self {
            os,
            arch,
            thread_safety,
        }
    }

    /// Detects the host platform, optionally overriding the architecture.
    ///
    /// Returns `None` on operating systems or architectures no PHP build
    /// is published for.
    #[must_use = "returns platform info without side effects"]
    pub fn detect(arch_override: Option<Arch>, thread_safety: ThreadSafety) -> Option<Self> {
        let os = Os::host()?;
        let arch = match arch_override {
            Some(arch) => arch,
            None => Arch::host()?,
        };
        Some(Self::new(os, arch, thread_safety))
    }

    /// Parses a catalog variant key into the platform it targets.
    ///
    /// Keys that do not follow either grammar (for example `source` or
    /// `test_pack`) yield `None` and are not artifacts.
    #[must_use]
    pub fn parse_artifact_key(key: &str) -> Option<Self> {
        let tokens: Vec<&str> = key.split('-').collect();
        if tokens.len() < 2 {
            return None;
        }
        let arch = Arch::from_token(tokens[tokens.len() - 1])?;

        if let Some(thread_safety) = ThreadSafety::from_token(tokens[0]) {
            return Some(Self::new(Os::Windows, arch, thread_safety));
        }

        if tokens.len() < 3 {
            return None;
        }
        let os = Os::from_token(tokens[0])?;
        let thread_safety = ThreadSafety::from_token(tokens[1])?;
        Some(Self::new(os, arch, thread_safety))
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.os.as_str(),
            self.arch.as_str(),
            self.thread_safety.as_str()
        )
    }
}
