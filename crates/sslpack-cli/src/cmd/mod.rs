//! Subcommand handlers
//!
//! Every handler finishes by printing a JSON result on stdout, so `-s`
//! output can be captured by scripts.

pub mod build;
pub mod build_all;
pub mod completions;
pub mod init;
pub mod prepare;
pub mod save_profile;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use sslpack_core::{Reporter, Workspace, loader};
use sslpack_schema::VersionDescriptor;

/// Print a command's result as JSON on stdout.
pub fn display_result(result: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

/// Fail unless `base` names a loadable base version template.
pub fn require_base(ws: &Workspace, reporter: &dyn Reporter, base: &str) -> Result<()> {
    let versions = loader::list_base_versions(ws, reporter)?;
    if !versions.contains_key(base) {
        let available: Vec<String> = versions
            .iter()
            .map(|(id, name)| format!("{id} ({name})"))
            .collect();
        bail!(
            "Unknown base version '{base}'. Available versions: {}",
            available.join(", ")
        );
    }
    Ok(())
}

/// The base version a release such as `3.1.4` belongs to.
pub fn base_for(ws: &Workspace, reporter: &dyn Reporter, version: &str) -> Result<String> {
    let versions = loader::list_base_versions(ws, reporter)?;
    Ok(loader::resolve_base_version(
        version,
        versions.keys().map(String::as_str),
    )?)
}

/// Fail unless `prepare` has produced the installers directory.
pub fn require_prepared(ws: &Workspace, base: &str, version: &str) -> Result<()> {
    if !ws.installers_dir(base, version).is_dir() {
        bail!(
            "The entered version ({version}) does not exist or is not prepared correctly. \
             Run 'sslpack prepare {version}' first."
        );
    }
    Ok(())
}

/// Descriptor architectures that have a saved environment profile.
pub fn profiled_arches(ws: &Workspace, desc: &VersionDescriptor) -> Result<Vec<String>> {
    let saved = ws
        .list_profiles(&desc.id)
        .with_context(|| format!("Unable to read profiles of {}", desc.id))?;
    Ok(saved
        .into_iter()
        .filter(|arch| desc.architecture(arch).is_some())
        .collect())
}
