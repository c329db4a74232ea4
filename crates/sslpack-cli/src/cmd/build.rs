//! Build command: every runtime variant of one architecture, then packaging

use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde_json::json;
use sslpack_core::builder::{BuildJob, BuildPipeline};
use sslpack_core::config::Config;
use sslpack_core::environment::EnvironmentProfile;
use sslpack_core::package::Packager;
use sslpack_core::runner::SystemRunner;
use sslpack_core::workspace::portable;
use sslpack_core::{Reporter, loader};

use crate::ui::ConsoleReporter;

pub fn build(config: &Config, reporter: &ConsoleReporter, version: &str, arch: &str) -> Result<()> {
    let ws = config.workspace();
    let base = super::base_for(&ws, reporter, version)?;
    super::require_prepared(&ws, &base, version)?;
    let desc = loader::load_and_expand(&ws, &base)
        .with_context(|| format!("Unable to load base version '{base}'"))?;

    let profiles = super::profiled_arches(&ws, &desc)?;
    if profiles.is_empty() {
        bail!(
            "No environment profiles have been defined for {base}. \
             Run 'sslpack save-profile {base} <arch>' from a configured build shell."
        );
    }
    if !profiles.iter().any(|p| p == arch) {
        bail!(
            "No environment profile for '{arch}'. Available architectures to build: {}",
            profiles.join(", ")
        );
    }
    let Some(archinfo) = desc.architecture(arch) else {
        bail!("Architecture '{arch}' is not declared by {base}");
    };

    let prefix = format!("[{version}; {arch}]");
    let profile_path = ws.profile_path(&base, arch);
    let profile = EnvironmentProfile::load(&profile_path)
        .with_context(|| format!("{prefix} Unable to load the saved environment profile"))?;

    let job = BuildJob::new(
        version,
        archinfo.clone(),
        &profile,
        ws.build_paths(&base, version, arch),
    );

    let started = Instant::now();
    let runner = SystemRunner;
    let summary = BuildPipeline::new(&job, &runner, reporter)
        .run()
        .with_context(|| format!("{prefix} Build failed"))?;
    let package = Packager::new(&job, &runner, reporter)
        .run()
        .with_context(|| format!("{prefix} Packaging failed"))?;

    let elapsed = started.elapsed().as_secs();
    reporter.info(&format!(
        "{prefix} Done.  Total time:  {} min {} sec",
        elapsed / 60,
        elapsed % 60
    ));

    let artifacts: Vec<String> = package
        .iter()
        .flat_map(|p| p.artifacts.iter())
        .map(|a| portable(a))
        .collect();
    super::display_result(&json!({
        "success": true,
        "version": version,
        "arch": arch,
        "built": summary.built,
        "skipped": summary.skipped,
        "artifacts": artifacts,
    }))
}
