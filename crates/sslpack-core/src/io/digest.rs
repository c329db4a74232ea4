//! Per-run digest memo.
//!
//! A dependency cache file may be checked by several architectures in one
//! run. Each (file, algorithm) pair is hashed once and remembered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sslpack_schema::{DigestAlgorithm, Sha256Digest};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct DigestCache {
    digests: HashMap<(PathBuf, DigestAlgorithm), String>,
    computed: usize,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase hex digest of `path`, computed at most once per cache.
    ///
    /// # Errors
    ///
    /// Returns an I/O error naming the file if it cannot be read.
    pub fn digest(&mut self, path: &Path, algorithm: DigestAlgorithm) -> Result<&str> {
        let key = (path.to_path_buf(), algorithm);
        if !self.digests.contains_key(&key) {
            let digest = algorithm
                .hash_file(path)
                .map_err(|e| Error::io_at(path, e))?;
            tracing::debug!("{algorithm} {} = {digest}", path.display());
            self.computed += 1;
            self.digests.insert(key.clone(), digest);
        }
        Ok(self.digests[&key].as_str())
    }

    /// Check `path` against an expected SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] on mismatch.
    pub fn verify_sha256(&mut self, path: &Path, expected: &Sha256Digest) -> Result<()> {
        let actual = self.digest(path, DigestAlgorithm::Sha256)?;
        if actual == expected.as_str() {
            Ok(())
        } else {
            Err(Error::Integrity {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Number of hash computations actually performed.
    pub fn computations(&self) -> usize {
        self.computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nasm.zip");
        std::fs::write(&path, b"nasm").unwrap();
        let expected = Sha256Digest::compute(b"nasm");

        let mut cache = DigestCache::new();
        cache.verify_sha256(&path, &expected).unwrap();
        cache.verify_sha256(&path, &expected).unwrap();
        assert_eq!(cache.computations(), 1);

        let other = dir.path().join("perl.zip");
        std::fs::write(&other, b"perl").unwrap();
        cache.digest(&other, DigestAlgorithm::Sha256).unwrap();
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn mismatch_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nasm.zip");
        std::fs::write(&path, b"tampered").unwrap();

        let mut cache = DigestCache::new();
        let err = cache
            .verify_sha256(&path, &Sha256Digest::compute(b"nasm"))
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(err.to_string().contains("nasm.zip"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let mut cache = DigestCache::new();
        let err = cache
            .digest(Path::new("/nonexistent/file.zip"), DigestAlgorithm::Sha256)
            .unwrap_err();
        assert!(err.to_string().contains("file.zip"));
        assert_eq!(cache.computations(), 0);
    }
}
