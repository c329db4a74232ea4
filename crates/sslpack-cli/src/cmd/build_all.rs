//! Build-all command: one `build` process per (version, architecture)

use anyhow::{Context, Result, bail};
use serde_json::json;
use sslpack_core::config::Config;
use sslpack_core::supervisor::{JobSpec, Supervisor};
use sslpack_core::{Reporter, loader};

use crate::ui::ConsoleReporter;

/// Launch a quiet `build` child for every profiled architecture of every
/// version and forward their output until all have exited.
pub async fn build_all(config: &Config, reporter: &ConsoleReporter, versions: &[String]) -> Result<()> {
    let ws = config.workspace();
    let exe = std::env::current_exe().context("Unable to locate the sslpack executable")?;

    // Validate everything before starting any process.
    let mut jobs = Vec::new();
    for version in versions {
        let base = super::base_for(&ws, reporter, version)?;
        super::require_prepared(&ws, &base, version)?;
        let desc = loader::load_and_expand(&ws, &base)
            .with_context(|| format!("Unable to load base version '{base}'"))?;
        let arches = super::profiled_arches(&ws, &desc)?;
        if arches.is_empty() {
            bail!(
                "No environment profiles have been defined for {version}. \
                 Run 'sslpack save-profile {base} <arch>' first."
            );
        }
        for arch in arches {
            jobs.push(job_for(config, &exe, version, &arch));
        }
    }

    let mut supervisor = Supervisor::new(config.poll_interval);
    for job in jobs {
        if !reporter.is_quiet() {
            reporter.info(&format!("Starting '{}'...", job.label));
        }
        supervisor.push(job);
    }

    let outcomes = supervisor.run(&mut std::io::stdout()).await?;
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .map(|o| o.label.as_str())
        .collect();
    if !failed.is_empty() {
        bail!(
            "{} of {} builds failed: {}",
            failed.len(),
            outcomes.len(),
            failed.join(", ")
        );
    }

    let built: Vec<&str> = outcomes.iter().map(|o| o.label.as_str()).collect();
    super::display_result(&json!({ "success": true, "builds": built }))
}

/// Child invocation: global flags first, then `build <version> <arch>`.
pub fn job_for(config: &Config, exe: &std::path::Path, version: &str, arch: &str) -> JobSpec {
    let mut args = vec![
        "--root".to_string(),
        config.root.to_string_lossy().into_owned(),
        "--quiet".to_string(),
    ];
    if config.strict {
        args.push("--strict".to_string());
    }
    args.extend(["build".to_string(), version.to_string(), arch.to_string()]);
    JobSpec::new(format!("{version} {arch}"), exe).args(args)
}
