//! Checksum verification for downloaded PHP archives.
//!
//! Files are hashed by streaming them through a fixed-size buffer, so archive
//! size does not affect memory use. Comparison is case-insensitive on the hex
//! representation.

use std::fmt;
use std::io::Read;
use std::path::Path;

use sha2::{Sha256, Sha512};

use crate::errors::{PvmError, PvmResult};

/// Hash algorithms a catalog may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Length of the hex-encoded digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Catalog field name carrying a digest of this algorithm.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// A hex-encoded digest tagged with its algorithm.
///
/// Construction validates that the value is non-empty hex of the length the
/// algorithm produces. The stored form is lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Validates and normalises a hex digest.
    ///
    /// # Errors
    ///
    /// Returns `CatalogParse` if the value is not hex of the expected length.
    pub fn new(algorithm: DigestAlgorithm, hex: &str) -> PvmResult<Self> {
        let hex = hex.trim();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PvmError::catalog_parse(format!(
                "'{hex}' is not a valid {} digest",
                algorithm.as_str()
            )));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Case-insensitive comparison against another hex string.
    #[must_use]
    pub fn matches_hex(&self, other: &str) -> bool {
        self.hex.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

/// Computes the digest of a file with the given algorithm.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn digest(path: &Path, algorithm: DigestAlgorithm) -> PvmResult<Digest> {
    let hex = match algorithm {
        DigestAlgorithm::Sha256 => hash_file::<Sha256>(path)?,
        DigestAlgorithm::Sha512 => hash_file::<Sha512>(path)?,
    };
    Ok(Digest { algorithm, hex })
}

/// Returns whether the file's digest matches `expected`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn verify(path: &Path, expected: &Digest) -> PvmResult<bool> {
    let computed = digest(path, expected.algorithm())?;
    Ok(expected.matches_hex(computed.hex()))
}

/// Like [`verify`], but turns a mismatch into an `Integrity` error.
///
/// # Errors
///
/// Returns `Integrity` on mismatch, or an I/O error if the file cannot be read.
pub fn ensure_matches(path: &Path, expected: &Digest) -> PvmResult<()> {
    let computed = digest(path, expected.algorithm())?;
    if expected.matches_hex(computed.hex()) {
        Ok(())
    } else {
        Err(PvmError::integrity(path, expected.hex(), computed.hex()))
    }
}

fn hash_file<D: sha2::Digest>(path: &Path) -> PvmResult<String> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        PvmError::io(
            format!("failed to open {} for checksum", path.display()),
            e,
        )
    })?;

    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| {
            PvmError::io(
                format!("failed to read {} for checksum", path.display()),
                e,
            )
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    fn hello_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn digest_computes_sha256() {
        let file = hello_file();
        let computed = digest(file.path(), DigestAlgorithm::Sha256).unwrap();
        assert_eq!(computed.hex(), HELLO_SHA256);
    }

    #[test]
    fn digest_computes_sha512_length() {
        let file = hello_file();
        let computed = digest(file.path(), DigestAlgorithm::Sha512).unwrap();
        assert_eq!(computed.hex().len(), 128);
    }

    #[test]
    fn verify_hashes_with_the_expected_algorithm() {
        let file = hello_file();
        let sha512 = digest(file.path(), DigestAlgorithm::Sha512).unwrap();
        assert_eq!(sha512.algorithm(), DigestAlgorithm::Sha512);

        let expected = Digest::new(DigestAlgorithm::Sha512, sha512.hex()).unwrap();
        assert!(verify(file.path(), &expected).unwrap());
        ensure_matches(file.path(), &expected).unwrap();
    }

    #[test]
    fn verify_is_case_insensitive() {
        let file = hello_file();
        let expected = Digest::new(DigestAlgorithm::Sha256, &HELLO_SHA256.to_uppercase()).unwrap();
        assert!(verify(file.path(), &expected).unwrap());
    }

    #[test]
    fn verify_detects_mismatch() {
        let file = hello_file();
        let expected = Digest::new(DigestAlgorithm::Sha256, &"0".repeat(64)).unwrap();
        assert!(!verify(file.path(), &expected).unwrap());
    }

    #[test]
    fn ensure_matches_reports_integrity_error() {
        let file = hello_file();
        let expected = Digest::new(DigestAlgorithm::Sha256, &"f".repeat(64)).unwrap();
        let err = ensure_matches(file.path(), &expected).unwrap_err();
        match err {
            PvmError::Integrity { actual, .. } => assert_eq!(actual, HELLO_SHA256),
            other => panic!("expected Integrity, got {other:?}"),
        }
    }

    #[test]
    fn digest_missing_file_is_io_error() {
        let err = digest(Path::new("/nonexistent/php.zip"), DigestAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, PvmError::Io { .. }));
    }

    #[test]
    fn digest_new_rejects_wrong_length_and_non_hex() {
        assert!(Digest::new(DigestAlgorithm::Sha256, "").is_err());
        assert!(Digest::new(DigestAlgorithm::Sha256, "abc").is_err());
        assert!(Digest::new(DigestAlgorithm::Sha512, HELLO_SHA256).is_err());
        assert!(Digest::new(DigestAlgorithm::Sha256, &"g".repeat(64)).is_err());
    }
}
