//! Init command: install every dependency of a base version

use anyhow::{Context, Result};
use serde_json::json;
use sslpack_core::config::Config;
use sslpack_core::environment::EnvironmentProfile;
use sslpack_core::io::{ArchiveExtractor, HttpFetcher, InstallOutcome, Installer};
use sslpack_core::runner::SystemRunner;
use sslpack_core::workspace::portable;
use sslpack_core::{Reporter, loader};

use crate::ui::ConsoleReporter;

/// Download, verify, extract and self-check the dependencies of every
/// architecture of `base`.
///
/// Dependencies already recorded in the manifest, present on disk and
/// passing their self-check are left alone.
pub async fn init(config: &Config, reporter: &ConsoleReporter, base: &str) -> Result<()> {
    let ws = config.workspace();
    super::require_base(&ws, reporter, base)?;
    let desc = loader::load_and_expand(&ws, base)
        .with_context(|| format!("Unable to load base version '{base}'"))?;

    let deps_dir = ws.deps_dir(base);
    std::fs::create_dir_all(&deps_dir)
        .with_context(|| format!("Failed to create '{}'", deps_dir.display()))?;
    std::fs::create_dir_all(ws.logs_dir()).context("Failed to create the logs directory")?;

    let paths = ws.base_paths(base);
    let manifest = ws.manifest_path(base);
    let fetcher = HttpFetcher::new();
    let extractor = ArchiveExtractor;
    let runner = SystemRunner;
    let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, reporter)
        .with_base_env(EnvironmentProfile::capture())
        .with_policy(config.preferred_policy());

    let mut installed = 0usize;
    let mut up_to_date = 0usize;
    for arch in &desc.architectures {
        reporter.section(&format!("{} ({})", arch.name, arch.architecture));
        for dep in &arch.dependencies {
            let outcome = installer
                .install(dep, &paths, &manifest)
                .await
                .with_context(|| {
                    format!("Unable to set up '{}' for {}", dep.name, arch.architecture)
                })?;
            match outcome {
                InstallOutcome::Installed => installed += 1,
                InstallOutcome::UpToDate => up_to_date += 1,
                InstallOutcome::NotInstallable => {
                    tracing::debug!("'{}' has nothing to install on this host", dep.name);
                }
            }
        }
    }

    reporter.success(&format!(
        "{} ready: {installed} installed, {up_to_date} up to date",
        desc.name
    ));
    super::display_result(&json!({
        "success": true,
        "path": portable(&ws.base_version_dir(base)),
        "installed": installed,
        "up_to_date": up_to_date,
    }))
}
