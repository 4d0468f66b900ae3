//! Release catalog fetching, parsing and version resolution.
//!
//! ## Catalog Format
//!
//! The catalog is the `releases.json` document published next to the
//! archives. It maps a release-line key to the latest release of that line:
//!
//! ```json
//! {
//!   "8.2": {
//!     "version": "8.2.3",
//!     "ts-vs16-x64":  { "zip": { "path": "php-8.2.3-Win32-vs16-x64.zip", "sha256": "..." } },
//!     "nts-vs16-x64": { "zip": { "path": "php-8.2.3-nts-Win32-vs16-x64.zip", "sha256": "..." } },
//!     "source": { "path": "php-8.2.3-src.zip", "sha256": "..." }
//!   }
//! }
//! ```
//!
//! Only `version` and variant objects whose key parses as a platform (see
//! [`PlatformInfo::parse_artifact_key`]) and that carry an archive `path` plus
//! a `sha256` or `sha512` digest are used. Everything else is ignored.
//! Archive paths are relative to the catalog base URL unless absolute.
//!
//! ## Data Source
//!
//! The base URL defaults to `https://windows.php.net/downloads/releases` and
//! can be overridden with `PVM_DIST_SERVER` or the `dist_server` setting.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use super::platform::PlatformInfo;
use super::transport::Transport;
use super::verify::{Digest, DigestAlgorithm};
use crate::errors::{PvmError, PvmResult};

/// Environment variable to override the catalog base URL.
pub const DIST_SERVER_ENV: &str = "PVM_DIST_SERVER";

/// Default catalog base URL.
pub const DEFAULT_DIST_SERVER: &str = "https://windows.php.net/downloads/releases";

/// Catalog document name below the base URL.
const RELEASES_PATH: &str = "releases.json";

/// A downloadable archive for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Absolute download URL.
    pub url: String,
    /// Expected digest of the archive.
    pub digest: Digest,
}

impl Artifact {
    /// Last path segment of the download URL.
    ///
    /// Example: `".../php-8.2.3-Win32-vs16-x64.zip"` -> `"php-8.2.3-Win32-vs16-x64.zip"`
    #[must_use]
    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// One release and its per-platform artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub artifacts: BTreeMap<PlatformInfo, Artifact>,
}

impl Release {
    #[must_use = "returns artifact info without side effects"]
    pub fn artifact_for(&self, platform: &PlatformInfo) -> Option<&Artifact> {
        self.artifacts.get(platform)
    }
}

/// Snapshot of the remote catalog. Version strings are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub releases: Vec<Release>,
}

/// A release resolved for a concrete platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub version: String,
    pub platform: PlatformInfo,
    pub artifact: Artifact,
}

/// Compares two version strings.
///
/// Valid semantic versions compare by semver. A valid version ranks above an
/// invalid one; two invalid versions compare as strings.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a).ok(), semver::Version::parse(b).ok()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sorts version strings highest first.
pub fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}

/// Returns whether `version` is selected by `spec`.
///
/// Selection is a plain string prefix test: `8.2` selects `8.2`, `8.2.3`
/// and `8.20.0`. The highest selected version wins, see [`select_highest`].
#[must_use]
pub fn spec_matches(spec: &str, version: &str) -> bool {
    version.starts_with(spec)
}

/// Picks the highest of `candidates` selected by `spec`.
pub fn select_highest<'a, I>(spec: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|v| spec_matches(spec, v))
        .max_by(|a, b| compare_versions(a, b))
}

/// Trims a version spec and rejects empty ones.
///
/// # Errors
///
/// Returns `InvalidSpec` for empty or whitespace-only specs.
pub fn normalize_spec(spec: &str) -> PvmResult<&str> {
    let spec = spec.trim();
    let spec = spec.strip_prefix('v').unwrap_or(spec);
    if spec.is_empty() {
        return Err(PvmError::invalid_spec("version must not be empty"));
    }
    Ok(spec)
}

/// Rejects versions that cannot serve as a single store directory name.
fn ensure_plain_version(line: &str, version: &str) -> PvmResult<()> {
    let plain = !version.is_empty()
        && !version.starts_with('.')
        && !version.contains(['/', '\\', ':'])
        && !version.chars().any(char::is_control);
    if plain {
        Ok(())
    } else {
        Err(PvmError::catalog_parse(format!(
            "release '{line}' has an unusable version '{version}'"
        )))
    }
}

impl Catalog {
    /// Parses a `releases.json` document.
    ///
    /// # Errors
    ///
    /// Returns `CatalogParse` if the document is not a JSON object, a release
    /// lacks a `version` string, a version is not usable as a directory name,
    /// or a version appears twice.
    pub fn parse(json: &str, base_url: &str) -> PvmResult<Self> {
        let root: Value = serde_json::from_str(json)
            .map_err(|e| PvmError::catalog_parse(format!("not valid JSON: {e}")))?;
        let Value::Object(lines) = root else {
            return Err(PvmError::catalog_parse("expected a JSON object at top level"));
        };

        let mut releases: Vec<Release> = Vec::with_capacity(lines.len());

        for (line, entry) in &lines {
            let Some(version) = entry.get("version").and_then(Value::as_str) else {
                return Err(PvmError::catalog_parse(format!(
                    "release '{line}' has no version string"
                )));
            };
            ensure_plain_version(line, version)?;
            if releases.iter().any(|r| r.version == version) {
                return Err(PvmError::catalog_parse(format!(
                    "version {version} is listed more than once"
                )));
            }

            let mut artifacts = BTreeMap::new();
            if let Value::Object(variants) = entry {
                // Keys iterate in sorted order, so when two builds map to the
                // same platform the greatest key (newest compiler) wins.
                for (key, variant) in variants {
                    let Some(platform) = PlatformInfo::parse_artifact_key(key) else {
                        continue;
                    };
                    match parse_artifact(variant, base_url) {
                        Ok(Some(artifact)) => {
                            artifacts.insert(platform, artifact);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(version, key, error = %e, "skipping catalog artifact");
                        }
                    }
                }
            }

            releases.push(Release {
                version: version.to_string(),
                artifacts,
            });
        }

        Ok(Self { releases })
    }

    /// Releases sorted highest version first.
    #[must_use = "returns sorted release list without side effects"]
    pub fn sorted(&self) -> Vec<&Release> {
        let mut releases: Vec<&Release> = self.releases.iter().collect();
        releases.sort_by(|a, b| compare_versions(&b.version, &a.version));
        releases
    }

    /// Resolves `spec` to the highest matching release and its artifact for
    /// `platform`.
    ///
    /// # Errors
    ///
    /// - `InvalidSpec` for an empty spec
    /// - `VersionNotFound` when no release matches
    /// - `ArtifactNotAvailable` when the selected release has no build for `platform`
    pub fn resolve(&self, spec: &str, platform: &PlatformInfo) -> PvmResult<ResolvedRelease> {
        let spec = normalize_spec(spec)?;
        let version = select_highest(spec, self.releases.iter().map(|r| r.version.as_str()))
            .ok_or_else(|| PvmError::version_not_found(spec))?;

        let release = self
            .releases
            .iter()
            .find(|r| r.version == version)
            .ok_or_else(|| PvmError::version_not_found(spec))?;

        let artifact = release
            .artifact_for(platform)
            .ok_or_else(|| PvmError::artifact_not_available(version, platform.to_string()))?;

        tracing::debug!(spec, version, %platform, url = %artifact.url, "resolved release");
        Ok(ResolvedRelease {
            version: version.to_string(),
            platform: *platform,
            artifact: artifact.clone(),
        })
    }
}

/// Extracts the archive descriptor of one variant object.
///
/// Returns `Ok(None)` for variants without an archive path; errors for
/// present but invalid digests.
fn parse_artifact(variant: &Value, base_url: &str) -> PvmResult<Option<Artifact>> {
    let Some(zip) = variant.get("zip") else {
        return Ok(None);
    };
    let Some(path) = zip.get("path").and_then(Value::as_str) else {
        return Ok(None);
    };

    let digest = [DigestAlgorithm::Sha256, DigestAlgorithm::Sha512]
        .into_iter()
        .find_map(|algorithm| {
            zip.get(algorithm.as_str())
                .and_then(Value::as_str)
                .map(|hex| Digest::new(algorithm, hex))
        })
        .ok_or_else(|| PvmError::catalog_parse(format!("no checksum for {path}")))??;

    Ok(Some(Artifact {
        url: join_url(base_url, path),
        digest,
    }))
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Normalises a catalog base URL: trims whitespace and trailing slashes.
#[must_use]
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Resolves version specs against the remote catalog.
pub struct CatalogResolver<'a> {
    transport: &'a dyn Transport,
    base_url: String,
}

impl<'a> CatalogResolver<'a> {
    #[must_use]
    pub fn new(transport: &'a dyn Transport, base_url: &str) -> Self {
        Self {
            transport,
            base_url: normalize_base_url(base_url),
        }
    }

    /// URL of the catalog document.
    #[must_use]
    pub fn releases_url(&self) -> String {
        format!("{}/{RELEASES_PATH}", self.base_url)
    }

    /// Fetches and parses a fresh catalog snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the document cannot be fetched and
    /// `CatalogParse` if it cannot be understood.
    pub async fn fetch_catalog(&self) -> PvmResult<Catalog> {
        let url = self.releases_url();
        let body = self.transport.get_text(&url).await?;
        Catalog::parse(&body, &self.base_url)
    }

    /// Fetches the catalog and resolves `spec` for `platform`.
    ///
    /// # Errors
    ///
    /// See [`Catalog::resolve`] and [`CatalogResolver::fetch_catalog`].
    pub async fn resolve(&self, spec: &str, platform: &PlatformInfo) -> PvmResult<ResolvedRelease> {
        normalize_spec(spec)?;
        self.fetch_catalog().await?.resolve(spec, platform)
    }
}
