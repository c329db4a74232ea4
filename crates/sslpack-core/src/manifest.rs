//! Install-state manifest (`versions/<base>/deps/installed.json`).
//!
//! Maps each install destination to the source URL it was installed from.
//! An entry is written only after the installed dependency passed its
//! self-check, so a crash mid-install leaves the previous state intact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstalledManifest {
    entries: BTreeMap<String, String>,
}

impl InstalledManifest {
    /// Load the manifest at `path`.
    ///
    /// A missing file is an empty manifest. So is an unparseable one, with a
    /// warning: the worst outcome is reinstalling dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_at(path, e))?;

        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest '{}': {e}", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Write the manifest atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written or renamed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_at(parent, e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| Error::io_at(&tmp_path, e))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::io_at(path, e))?;
        Ok(())
    }

    /// Source recorded for a destination.
    pub fn get(&self, dest: &str) -> Option<&str> {
        self.entries.get(dest).map(String::as_str)
    }

    /// True if `dest` was installed from `source`.
    pub fn is_current(&self, dest: &str, source: &str) -> bool {
        self.get(dest) == Some(source)
    }

    pub fn record(&mut self, dest: impl Into<String>, source: impl Into<String>) {
        self.entries.insert(dest.into(), source.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = InstalledManifest::load(&dir.path().join("installed.json"))
            .await
            .unwrap();
        assert!(manifest.is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deps/installed.json");

        let mut manifest = InstalledManifest::default();
        manifest.record("/w/deps/perl", "https://example.com/perl.zip");
        manifest.save(&path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = InstalledManifest::load(&path).await.unwrap();
        assert!(loaded.is_current("/w/deps/perl", "https://example.com/perl.zip"));
        assert!(!loaded.is_current("/w/deps/perl", "https://example.com/perl2.zip"));
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(InstalledManifest::load(&path).await.unwrap().is_empty());
    }
}
