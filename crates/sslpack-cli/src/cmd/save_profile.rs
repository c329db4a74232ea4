//! Save-profile command

use anyhow::{Context, Result, bail};
use serde_json::json;
use sslpack_core::config::Config;
use sslpack_core::environment::{EnvironmentProfile, Verifier};
use sslpack_core::runner::SystemRunner;
use sslpack_core::workspace::portable;
use sslpack_core::{Reporter, loader};

use crate::ui::ConsoleReporter;

/// Verify each dependency of `arch` against the current environment, then
/// save that environment as the architecture's build profile.
///
/// Run from a shell already configured for the target toolchain (for
/// example a Visual Studio developer prompt for the matching CPU).
pub fn save_profile(
    config: &Config,
    reporter: &ConsoleReporter,
    base: &str,
    arch: &str,
) -> Result<()> {
    let ws = config.workspace();
    super::require_base(&ws, reporter, base)?;
    let desc = loader::load_and_expand(&ws, base)
        .with_context(|| format!("Unable to load base version '{base}'"))?;

    let Some(archinfo) = desc
        .architecture(arch)
        .filter(|a| a.build.is_some())
    else {
        let buildable: Vec<&str> = desc
            .architectures
            .iter()
            .filter(|a| a.build.is_some())
            .map(|a| a.architecture.as_str())
            .collect();
        bail!(
            "Unknown architecture '{arch}' for {base}. Available architectures: {}",
            buildable.join(", ")
        );
    };

    let logs = ws.logs_dir();
    std::fs::create_dir_all(&logs).context("Failed to create the logs directory")?;

    let env = EnvironmentProfile::capture();
    let runner = SystemRunner;
    let verifier = Verifier::new(&env, &runner, &logs);
    let paths = ws.base_paths(base);

    reporter.section(&format!("Verifying {} dependencies", archinfo.name));
    for dep in &archinfo.dependencies {
        verifier
            .verify(dep, &paths, config.preferred_policy(), reporter)
            .with_context(|| format!("Dependency verification failed for '{}'", dep.name))?;
        reporter.done(&dep.name, "verified");
    }

    let profile = ws.profile_path(base, arch);
    env.save(&profile)
        .with_context(|| format!("Unable to save profile '{}'", profile.display()))?;

    reporter.success(&format!("Saved {} variables for {arch}", env.len()));
    super::display_result(&json!({ "success": true, "profile": portable(&profile) }))
}
