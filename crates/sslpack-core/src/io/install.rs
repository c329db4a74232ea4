//! Dependency installation: fetch, verify, extract or run, self-check, record.
//!
//! Per artifact the pipeline moves NotFetched → Fetched → Verified →
//! Installed. A cached download is reused as long as it still verifies. An
//! install is skipped when the manifest records the same source, the
//! destination exists and the dependency's self-check passes.

use std::path::{Path, PathBuf};

use sslpack_schema::{CpuWidth, DependencyDescriptor, Download, DownloadKind, Sha256Digest};

use crate::environment::{EnvironmentProfile, PreferredPolicy, Verifier};
use crate::error::{Error, Result};
use crate::io::digest::DigestCache;
use crate::io::download::Fetcher;
use crate::io::extract::Extractor;
use crate::manifest::InstalledManifest;
use crate::reporter::Reporter;
use crate::runner::{CommandRunner, CommandSpec, split_args};
use crate::template::PathMap;
use crate::workspace::{Workspace, timestamped_log};

/// What [`Installer::install`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Manifest, destination and self-check were all current.
    UpToDate,
    /// Fetched (or reused from cache) and installed.
    Installed,
    /// Nothing to install: no download for this host or no install path.
    NotInstallable,
}

/// Collaborators the installer drives.
pub struct Installer<'a> {
    workspace: &'a Workspace,
    fetcher: &'a dyn Fetcher,
    extractor: &'a dyn Extractor,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
    base_env: EnvironmentProfile,
    policy: PreferredPolicy,
    width: CpuWidth,
    digests: DigestCache,
}

impl<'a> Installer<'a> {
    pub fn new(
        workspace: &'a Workspace,
        fetcher: &'a dyn Fetcher,
        extractor: &'a dyn Extractor,
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            workspace,
            fetcher,
            extractor,
            runner,
            reporter,
            base_env: EnvironmentProfile::default(),
            policy: PreferredPolicy::default(),
            width: CpuWidth::current(),
            digests: DigestCache::new(),
        }
    }

    /// Environment self-checks start from (usually a fresh capture).
    pub fn with_base_env(mut self, env: EnvironmentProfile) -> Self {
        self.base_env = env;
        self
    }

    pub fn with_policy(mut self, policy: PreferredPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override host width detection.
    pub fn with_width(mut self, width: CpuWidth) -> Self {
        self.width = width;
        self
    }

    pub fn digests(&self) -> &DigestCache {
        &self.digests
    }

    /// Ensure `download` is cached in `temp/` and verified. Returns its path.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] if the download or companion digest cannot be
    /// fetched, [`Error::Integrity`] on mismatch.
    pub async fn fetch(&mut self, name: &str, download: &Download, paths: &PathMap) -> Result<PathBuf> {
        let temp_dir = self.workspace.temp_dir();
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| Error::io_at(&temp_dir, e))?;

        let url = paths.substitute(&download.url);
        let path = self.workspace.cached_download(download, &url);

        if path.exists() {
            tracing::debug!("Using cached {}", path.display());
        } else {
            self.reporter.section(&format!("Downloading {name}"));
            let reporter = self.reporter;
            let progress = |current: u64, total: Option<u64>| {
                reporter.downloading(name, current, total);
            };
            self.fetcher.download(&url, &path, &progress).await?;
        }

        if let Err(err) = self.verify_download(download, &path, paths).await {
            if matches!(err, Error::Integrity { .. }) {
                tracing::warn!("Discarding {} after digest mismatch", path.display());
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Could not remove {}: {e}", path.display());
                }
            }
            return Err(err);
        }
        self.reporter.verified(name, &path);
        Ok(path)
    }

    async fn verify_download(&mut self, download: &Download, path: &Path, paths: &PathMap) -> Result<()> {
        if let Some(expected) = &download.sha256 {
            self.digests.verify_sha256(path, expected)?;
        }

        if let Some(digest_url) = &download.sha256_url {
            let url = paths.substitute(digest_url);
            let body = self.fetcher.fetch_text(&url).await?;
            let expected = Sha256Digest::new(body.as_str()).map_err(|e| {
                Error::network(&url, format!("companion digest is not a SHA-256: {e}"))
            })?;
            self.digests.verify_sha256(path, &expected)?;
        }

        Ok(())
    }

    /// Fetch and verify every declared download of `dep` without installing.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn fetch_all(&mut self, dep: &DependencyDescriptor, paths: &PathMap) -> Result<usize> {
        let direct = expanded(dep)?;
        let mut count = 0;
        for download in direct.downloads.iter() {
            self.fetch(&dep.name, download, paths).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Install one dependency, recording it in the manifest at `manifest_path`.
    ///
    /// # Errors
    ///
    /// Any fetch, integrity, extraction or self-check failure. The manifest
    /// is untouched unless the post-install self-check passes.
    pub async fn install(
        &mut self,
        dep: &DependencyDescriptor,
        paths: &PathMap,
        manifest_path: &Path,
    ) -> Result<InstallOutcome> {
        let direct = expanded(dep)?;
        let Some(download) = direct.downloads.for_width(self.width) else {
            tracing::debug!("'{}' has no download for {}", dep.name, self.width);
            return Ok(InstallOutcome::NotInstallable);
        };
        let Some(install_path) = &direct.install_path else {
            tracing::debug!("'{}' has no install path", dep.name);
            return Ok(InstallOutcome::NotInstallable);
        };

        let dest_key = paths.substitute(install_path);
        let dest = PathBuf::from(&dest_key);
        let mut manifest = InstalledManifest::load(manifest_path).await?;

        if manifest.is_current(&dest_key, &download.url) && dest.is_dir() && self.self_check_passes(dep, paths)? {
            tracing::debug!("'{}' is up to date at {}", dep.name, dest.display());
            self.reporter.done(&dep.name, "up to date");
            return Ok(InstallOutcome::UpToDate);
        }

        let kind = direct.kind.ok_or_else(|| {
            Error::descriptor(format!("Dependency '{}' has no download_type", dep.name))
        })?;
        let archive = self.fetch(&dep.name, download, paths).await?;

        if dest.exists() {
            tracing::debug!("Removing stale {}", dest.display());
            tokio::fs::remove_dir_all(&dest)
                .await
                .map_err(|e| Error::io_at(&dest, e))?;
        }

        self.reporter.extracting(&dep.name, &dest);
        match kind {
            DownloadKind::TarGz | DownloadKind::Zip => {
                self.extractor.extract(&archive, &dest, kind)?;
            }
            DownloadKind::Installer => {
                self.run_installer(&dep.name, &archive, direct.install_args.as_deref(), paths)?;
            }
        }

        let logs_dir = self.workspace.logs_dir();
        Verifier::new(&self.base_env, self.runner, &logs_dir)
            .verify(dep, paths, self.policy, self.reporter)?;

        manifest.record(dest_key, download.url.clone());
        manifest.save(manifest_path).await?;
        self.reporter.done(&dep.name, "installed");
        Ok(InstallOutcome::Installed)
    }

    fn run_installer(&self, name: &str, exe: &Path, args: Option<&str>, paths: &PathMap) -> Result<()> {
        let args = args
            .map(|a| split_args(&paths.substitute_native(a)))
            .unwrap_or_default();
        let cmd = CommandSpec::new(exe.to_string_lossy()).args(args);

        let log = timestamped_log(&self.workspace.logs_dir(), &format!("install_{name}"), "error");
        let stdout = self.runner.run(&cmd, &log)?;
        tracing::debug!("{} printed {} bytes", cmd.display(), stdout.len());

        let errors = std::fs::read_to_string(&log).unwrap_or_default();
        std::fs::remove_file(&log).ok();
        if errors.trim().is_empty() {
            Ok(())
        } else {
            Err(Error::extraction(
                exe,
                format!("installer emitted errors:\n{}", errors.trim_end()),
            ))
        }
    }

    /// Pre-install self-check. A tool that cannot start simply is not installed.
    ///
    /// Stricter than the post-install check: a missing preferred pattern
    /// also triggers a reinstall, whatever the caller's policy.
    fn self_check_passes(&self, dep: &DependencyDescriptor, paths: &PathMap) -> Result<bool> {
        let logs_dir = self.workspace.logs_dir();
        let verifier = Verifier::new(&self.base_env, self.runner, &logs_dir);
        match verifier.check(dep, paths) {
            Ok(report) => Ok(report.outcome.passes(PreferredPolicy::Fatal)),
            Err(Error::ProcessStart { command, source }) => {
                tracing::debug!("Self-check '{command}' did not start: {source}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn expanded(dep: &DependencyDescriptor) -> Result<&sslpack_schema::DirectDependency> {
    dep.as_direct()
        .ok_or_else(|| Error::descriptor(format!("Dependency '{}' has not been expanded", dep.name)))
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("workspace", &self.workspace)
            .field("policy", &self.policy)
            .field("width", &self.width)
            .field("digests", &self.digests)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::extract::ArchiveExtractor;
    use crate::io::extract::tests::tar_gz;
    use crate::loader;
    use crate::reporter::NullReporter;
    use crate::runner::tests::FakeRunner;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeFetcher {
        payload: Vec<u8>,
        downloads: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(payload: Vec<u8>) -> Self {
            Self {
                payload,
                downloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn download(&self, _url: &str, dest: &Path, progress: crate::io::download::Progress<'_>) -> Result<u64> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, &self.payload)?;
            progress(self.payload.len() as u64, Some(self.payload.len() as u64));
            Ok(self.payload.len() as u64)
        }

        async fn fetch_text(&self, _url: &str) -> Result<String> {
            Ok(Sha256Digest::compute(&self.payload).to_string())
        }
    }

    #[derive(Default)]
    struct CountingExtractor {
        extractions: AtomicUsize,
    }

    impl Extractor for CountingExtractor {
        fn extract(&self, archive: &Path, dest: &Path, kind: DownloadKind) -> Result<()> {
            self.extractions.fetch_add(1, Ordering::SeqCst);
            ArchiveExtractor.extract(archive, dest, kind)
        }
    }

    fn perl_runner() -> FakeRunner<impl Fn(&CommandSpec<'_>, &Path) -> Result<String> + Send + Sync> {
        FakeRunner::new(|cmd: &CommandSpec<'_>, _: &Path| {
            assert_eq!(cmd.program, "perl");
            assert_eq!(cmd.args, ["-v"]);
            Ok("\nThis is perl 5, version 36, subversion 0 (v5.36.0)\n".to_string())
        })
    }

    fn descriptor(digest: &str, url: &str) -> String {
        format!(
            r#"{{
                "name": "OpenSSL 3.1",
                "architectures": [{{
                    "architecture": "x64",
                    "name": "Win64",
                    "dependencies": [{{
                        "name": "perl",
                        "download": "{url}",
                        "download_sha256": "{digest}",
                        "download_type": "tar.gz",
                        "download_extract_path": "[[DEPS_DIR]]/perl",
                        "env_paths": ["[[DEPS_DIR]]/perl/bin"],
                        "verify": "perl",
                        "verify_opts": "-v",
                        "required_output": "This is perl"
                    }}]
                }}]
            }}"#
        )
    }

    #[tokio::test]
    async fn second_run_downloads_and_extracts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = tar_gz(&[("bin/perl", b"#!perl")]);
        let digest = Sha256Digest::compute(&payload);
        let desc = loader::parse_version(
            "3.1",
            &descriptor(digest.as_str(), "https://example.com/perl-5.36.tar.gz"),
        )
        .unwrap();
        let dep = &desc.architectures[0].dependencies[0];
        let paths = ws.base_paths("3.1");
        let manifest_path = ws.manifest_path("3.1");

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = perl_runner();

        let mut first = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);
        let outcome = first.install(dep, &paths, &manifest_path).await.unwrap();
        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(fetcher.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 1);
        assert!(ws.deps_dir("3.1").join("perl/bin/perl").is_file());

        let manifest = InstalledManifest::load(&manifest_path).await.unwrap();
        let dest_key = paths.substitute("[[DEPS_DIR]]/perl");
        assert!(manifest.is_current(&dest_key, "https://example.com/perl-5.36.tar.gz"));

        let mut second = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);
        let outcome = second.install(dep, &paths, &manifest_path).await.unwrap();
        assert_eq!(outcome, InstallOutcome::UpToDate);
        assert_eq!(fetcher.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_source_forces_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = tar_gz(&[("bin/perl", b"#!perl")]);
        let digest = Sha256Digest::compute(&payload);
        let paths = ws.base_paths("3.1");
        let manifest_path = ws.manifest_path("3.1");

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = perl_runner();

        for url in ["https://example.com/perl-5.36.tar.gz", "https://example.com/perl-5.38.tar.gz"] {
            let desc = loader::parse_version("3.1", &descriptor(digest.as_str(), url)).unwrap();
            let dep = &desc.architectures[0].dependencies[0];
            let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);
            let outcome = installer.install(dep, &paths, &manifest_path).await.unwrap();
            assert_eq!(outcome, InstallOutcome::Installed);
        }
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn digest_mismatch_stops_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = tar_gz(&[("bin/perl", b"#!perl")]);
        let wrong = Sha256Digest::compute(b"something else");
        let desc = loader::parse_version(
            "3.1",
            &descriptor(wrong.as_str(), "https://example.com/perl.tar.gz"),
        )
        .unwrap();
        let dep = &desc.architectures[0].dependencies[0];

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = perl_runner();
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let err = installer
            .install(dep, &ws.base_paths("3.1"), &ws.manifest_path("3.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 0);
        assert!(!ws.manifest_path("3.1").exists());
    }

    #[tokio::test]
    async fn failed_self_check_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = tar_gz(&[("bin/perl", b"#!perl")]);
        let digest = Sha256Digest::compute(&payload);
        let desc = loader::parse_version(
            "3.1",
            &descriptor(digest.as_str(), "https://example.com/perl.tar.gz"),
        )
        .unwrap();
        let dep = &desc.architectures[0].dependencies[0];

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = FakeRunner::new(|_: &CommandSpec<'_>, _: &Path| Ok("command not found".to_string()));
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let err = installer
            .install(dep, &ws.base_paths("3.1"), &ws.manifest_path("3.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequired { .. }));
        assert!(!ws.manifest_path("3.1").exists());
    }

    #[tokio::test]
    async fn companion_digest_is_checked_and_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = b"nasm-payload".to_vec();
        let fetcher = FakeFetcher::new(payload.clone());
        let extractor = CountingExtractor::default();
        let runner = perl_runner();
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let mut download = Download::new("https://example.com/nasm.zip");
        download.sha256 = Some(Sha256Digest::compute(&payload));
        download.sha256_url = Some("https://example.com/nasm.zip.sha256".into());

        let path = installer.fetch("nasm", &download, &PathMap::new()).await.unwrap();
        installer.fetch("nasm", &download, &PathMap::new()).await.unwrap();
        assert_eq!(path, ws.temp_dir().join("nasm.zip"));
        assert_eq!(fetcher.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(installer.digests().computations(), 1);
    }

    #[tokio::test]
    async fn fetch_all_walks_every_width() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let dep: DependencyDescriptor = serde_json::from_str(
            r#"{
                "name": "nasm",
                "download_x86": "https://example.com/nasm-win32.zip",
                "download_x64": "https://example.com/nasm-win64.zip"
            }"#,
        )
        .unwrap();

        let fetcher = FakeFetcher::new(b"zip".to_vec());
        let extractor = CountingExtractor::default();
        let runner = perl_runner();
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        assert_eq!(installer.fetch_all(&dep, &PathMap::new()).await.unwrap(), 2);
        assert!(ws.temp_dir().join("nasm-win32.zip").is_file());
        assert!(ws.temp_dir().join("nasm-win64.zip").is_file());
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_preferred_output_forces_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = tar_gz(&[("bin/perl", b"#!perl")]);
        let digest = Sha256Digest::compute(&payload);
        let json = descriptor(digest.as_str(), "https://example.com/perl.tar.gz").replace(
            r#""required_output": "This is perl""#,
            r#""required_output": "This is perl", "preferred_output": "/v5\\.38/", "preferred_alert": "Perl 5.38 is recommended.""#,
        );
        let desc = loader::parse_version("3.1", &json).unwrap();
        let dep = &desc.architectures[0].dependencies[0];
        assert!(dep.as_direct().unwrap().verify.as_ref().unwrap().preferred_output.is_some());
        let paths = ws.base_paths("3.1");
        let manifest_path = ws.manifest_path("3.1");

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = perl_runner();

        for _ in 0..2 {
            let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter)
                .with_policy(PreferredPolicy::Warn);
            let outcome = installer.install(dep, &paths, &manifest_path).await.unwrap();
            assert_eq!(outcome, InstallOutcome::Installed);
        }
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.downloads.load(Ordering::SeqCst), 1);
    }

    fn installer_descriptor(digest: &str) -> String {
        format!(
            r#"{{
                "name": "OpenSSL 3.1",
                "architectures": [{{
                    "architecture": "x64",
                    "name": "Win64",
                    "dependencies": [{{
                        "name": "nasm",
                        "download": "https://example.com/nasm-2.16-installer-x64.exe",
                        "download_sha256": "{digest}",
                        "download_type": "exe",
                        "download_extract_path": "[[DEPS_DIR]]/nasm",
                        "download_install_opts": "/S /D=[[DEPS_DIR]]/nasm"
                    }}]
                }}]
            }}"#
        )
    }

    #[tokio::test]
    async fn installer_download_is_run_with_its_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = b"MZ installer".to_vec();
        let digest = Sha256Digest::compute(&payload);
        let desc = loader::parse_version("3.1", &installer_descriptor(digest.as_str())).unwrap();
        let dep = &desc.architectures[0].dependencies[0];
        let paths = ws.base_paths("3.1");
        let manifest_path = ws.manifest_path("3.1");
        let nasm_dir = ws.deps_dir("3.1").join("nasm");

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let target = nasm_dir.clone();
        let runner = FakeRunner::new(move |_: &CommandSpec<'_>, _: &Path| {
            std::fs::create_dir_all(&target).unwrap();
            Ok(String::new())
        });
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let outcome = installer.install(dep, &paths, &manifest_path).await.unwrap();
        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(extractor.extractions.load(Ordering::SeqCst), 0);

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let (program, args) = &calls[0];
        assert!(program.ends_with("nasm-2.16-installer-x64.exe"), "{program}");
        assert_eq!(args[0], "/S");
        assert!(args[1].starts_with("/D="), "{args:?}");
        assert!(args[1].ends_with("nasm"), "{args:?}");

        let manifest = InstalledManifest::load(&manifest_path).await.unwrap();
        let dest_key = paths.substitute("[[DEPS_DIR]]/nasm");
        assert!(manifest.is_current(&dest_key, "https://example.com/nasm-2.16-installer-x64.exe"));
    }

    #[tokio::test]
    async fn installer_stderr_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let payload = b"MZ installer".to_vec();
        let digest = Sha256Digest::compute(&payload);
        let desc = loader::parse_version("3.1", &installer_descriptor(digest.as_str())).unwrap();
        let dep = &desc.architectures[0].dependencies[0];
        let manifest_path = ws.manifest_path("3.1");

        let fetcher = FakeFetcher::new(payload);
        let extractor = CountingExtractor::default();
        let runner = FakeRunner::new(|_: &CommandSpec<'_>, log: &Path| {
            std::fs::create_dir_all(log.parent().unwrap()).unwrap();
            std::fs::write(log, "Access is denied.\n").unwrap();
            Ok(String::new())
        });
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let err = installer
            .install(dep, &ws.base_paths("3.1"), &manifest_path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }), "{err:?}");
        assert!(err.to_string().contains("Access is denied."), "{err}");
        assert!(!manifest_path.exists());
        assert_eq!(runner.programs().len(), 1);
    }

    #[tokio::test]
    async fn digest_mismatch_discards_the_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let fetcher = FakeFetcher::new(b"truncated".to_vec());
        let extractor = CountingExtractor::default();
        let runner = perl_runner();
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let mut download = Download::new("https://example.com/nasm.zip");
        download.sha256 = Some(Sha256Digest::compute(b"complete archive"));

        for _ in 0..2 {
            let err = installer
                .fetch("nasm", &download, &PathMap::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Integrity { .. }));
            assert!(!ws.temp_dir().join("nasm.zip").exists());
        }
        assert_eq!(fetcher.downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_install_path_is_not_installable() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let dep: DependencyDescriptor =
            serde_json::from_str(r#"{"name": "vs", "verify": "cl"}"#).unwrap();

        let fetcher = FakeFetcher::new(Vec::new());
        let extractor = CountingExtractor::default();
        let runner = perl_runner();
        let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, &NullReporter);

        let outcome = installer
            .install(&dep, &PathMap::new(), &ws.manifest_path("3.1"))
            .await
            .unwrap();
        assert_eq!(outcome, InstallOutcome::NotInstallable);
    }
}
