//! On-disk workspace layout.
//!
//! ```text
//! <root>/
//!   templates/<base>/info.json        version descriptor
//!   templates/<base>/<arch>/*         installer script templates
//!   temp/                             download cache
//!   logs/                             self-check logs
//!   versions/<base>/deps/             installed dependencies + installed.json
//!   versions/<base>/profiles/<arch>.json
//!   versions/<base>/<ver>/source/openssl-<ver>/
//!   versions/<base>/<ver>/temp_<arch>/   working clone
//!   versions/<base>/<ver>/out_<arch>/    harvested variants + logs
//!   versions/<base>/<ver>/installers/<arch>/final/
//! ```

use std::path::{Path, PathBuf};

use sslpack_schema::{Download, Token};

use crate::template::{PathMap, version_tokens};

/// Environment variable overriding the workspace root.
pub const ROOT_ENV: &str = "SSLPACK_ROOT";

/// Every path the engine reads or writes, derived from one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Descriptor templates: root/templates
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn template_dir(&self, base: &str) -> PathBuf {
        self.templates_dir().join(base)
    }

    /// Installer script templates for one architecture.
    pub fn installer_templates_dir(&self, base: &str, arch: &str) -> PathBuf {
        self.template_dir(base).join(arch)
    }

    pub fn descriptor_path(&self, base: &str) -> PathBuf {
        self.template_dir(base).join("info.json")
    }

    /// Download cache: root/temp
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Self-check logs: root/logs
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Where a download is cached, given its token-substituted URL.
    pub fn cached_download(&self, download: &Download, resolved_url: &str) -> PathBuf {
        self.temp_dir().join(download.cache_file_name(resolved_url))
    }

    pub fn base_version_dir(&self, base: &str) -> PathBuf {
        self.root.join("versions").join(base)
    }

    pub fn deps_dir(&self, base: &str) -> PathBuf {
        self.base_version_dir(base).join("deps")
    }

    /// Install-state manifest for a base version's dependencies.
    pub fn manifest_path(&self, base: &str) -> PathBuf {
        self.deps_dir(base).join("installed.json")
    }

    pub fn profiles_dir(&self, base: &str) -> PathBuf {
        self.base_version_dir(base).join("profiles")
    }

    pub fn profile_path(&self, base: &str, arch: &str) -> PathBuf {
        self.profiles_dir(base).join(format!("{arch}.json"))
    }

    pub fn version_dir(&self, base: &str, version: &str) -> PathBuf {
        self.base_version_dir(base).join(version)
    }

    pub fn installers_dir(&self, base: &str, version: &str) -> PathBuf {
        self.version_dir(base, version).join("installers")
    }

    /// Tokens available to `init`, `init-test` and `save-profile`.
    pub fn base_paths(&self, base: &str) -> PathMap {
        PathMap::new()
            .with(Token::RootPath, portable(&self.root))
            .with(Token::BaseVersionDir, portable(&self.base_version_dir(base)))
            .with(Token::DepsDir, portable(&self.deps_dir(base)))
    }

    /// Tokens available to `prepare`: base paths plus the version forms.
    pub fn version_paths(&self, base: &str, version: &str) -> PathMap {
        let version_dir = self.version_dir(base, version);
        let mut map = self.base_paths(base);
        map.insert(Token::VersionDir, portable(&version_dir));
        for (token, value) in version_tokens(version) {
            map.insert(token, value);
        }
        map.insert(
            Token::SourceOrigDir,
            portable(&version_dir.join("source").join(format!("openssl-{version}"))),
        );
        map.insert(Token::InstallersDir, portable(&version_dir.join("installers")));
        map
    }

    /// Tokens for building and packaging one architecture.
    pub fn build_paths(&self, base: &str, version: &str, arch: &str) -> PathMap {
        let version_dir = self.version_dir(base, version);
        let installers_arch = version_dir.join("installers").join(arch);
        let mut map = self.version_paths(base, version);
        map.insert(Token::SourceTempDir, portable(&version_dir.join(format!("temp_{arch}"))));
        map.insert(Token::BuildOutputDir, portable(&version_dir.join(format!("out_{arch}"))));
        map.insert(Token::InstallersArchDir, portable(&installers_arch));
        map.insert(Token::InstallerScriptDir, portable(&installers_arch));
        map.insert(Token::InstallerSourceDir, portable(&installers_arch.join("final")));
        map
    }

    /// Architectures with a saved environment profile, sorted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the profiles directory exists but cannot be read.
    pub fn list_profiles(&self, base: &str) -> std::io::Result<Vec<String>> {
        let dir = self.profiles_dir(base);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut arches = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                arches.push(stem.to_string());
            }
        }
        arches.sort();
        Ok(arches)
    }
}

/// Path as a forward-slash string, the form tokens are stored in.
pub fn portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A log path unique to this moment: `<dir>/<prefix>_<timestamp>_<kind>.log`.
pub fn timestamped_log(dir: &Path, prefix: &str, kind: &str) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.6f");
    dir.join(format!("{prefix}_{timestamp}_{kind}.log"))
}
