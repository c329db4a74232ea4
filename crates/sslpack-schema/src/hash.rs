//! SHA-256 digests: validated hex literals and file hashing.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors raised while parsing a digest string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The hex portion has the wrong length.
    #[error("Invalid SHA256 digest: expected 64 hex characters, got {len} in '{value}'")]
    Length {
        /// Number of characters found.
        len: usize,
        /// The offending input.
        value: String,
    },
    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA256 digest: contains non-hex characters in '{0}'")]
    NotHex(String),
}

/// Digest algorithms understood by the integrity checker.
///
/// Only SHA-256 is declared by descriptors today; the enum keys the
/// per-run digest memo so another algorithm slots in without changing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// SHA-256, hex encoded.
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    /// Short lowercase name, as used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Hash a file with this algorithm and return the lowercase hex digest.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read.
    pub fn hash_file(self, path: &Path) -> std::io::Result<String> {
        match self {
            Self::Sha256 => Sha256Digest::compute_file(path).map(|d| d.0),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated SHA256 digest (64 hex characters)
///
/// Digests are validated when a descriptor is deserialized, so an invalid
/// literal is a descriptor error instead of a confusing mismatch later on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Surrounding whitespace and a `sha256:` prefix are ignored, and the
    /// stored form is lowercase. Companion digest files are parsed with this.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let trimmed = s.trim();
        let hex = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);

        if hex.len() != 64 {
            return Err(DigestError::Length {
                len: hex.len(),
                value: s,
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(s));
        }

        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Compute the digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Compute the digest of a file, streaming it in fixed-size chunks.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn companion_file_body_is_trimmed_and_lowercased() {
        let body = format!("  {}\r\n", EMPTY.to_uppercase());
        let digest = Sha256Digest::new(body).unwrap();
        assert_eq!(digest.as_str(), EMPTY);
    }

    #[test]
    fn rejects_short_and_non_hex_input() {
        assert!(matches!(
            Sha256Digest::new("abc"),
            Err(DigestError::Length { len: 3, .. })
        ));
        let bad = "z".repeat(64);
        assert!(matches!(Sha256Digest::new(bad), Err(DigestError::NotHex(_))));
    }

    #[test]
    fn compute_file_matches_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"openssl").unwrap();

        let from_file = Sha256Digest::compute_file(&path).unwrap();
        assert_eq!(from_file, Sha256Digest::compute(b"openssl"));
        assert_eq!(
            DigestAlgorithm::Sha256.hash_file(&path).unwrap(),
            from_file.as_str()
        );
    }

    #[test]
    fn deserialize_validates() {
        let ok: Sha256Digest = serde_json::from_str(&format!("\"{EMPTY}\"")).unwrap();
        assert_eq!(ok.as_str(), EMPTY);
        assert!(serde_json::from_str::<Sha256Digest>("\"nope\"").is_err());
    }
}
