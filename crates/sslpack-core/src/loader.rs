//! Descriptor loading and inheritance expansion.

use std::collections::{BTreeMap, HashMap};

use sslpack_schema::{DependencyDescriptor, DirectDependency, VersionDescriptor};

use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::workspace::Workspace;

/// Parse descriptor JSON for base version `id`.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] for malformed JSON, a missing or empty
/// `architectures` list, or an inherited `source`.
pub fn parse_version(id: &str, json: &str) -> Result<VersionDescriptor> {
    let mut desc: VersionDescriptor = serde_json::from_str(json)
        .map_err(|e| Error::descriptor(format!("Unable to decode descriptor for '{id}': {e}")))?;
    desc.id = id.to_string();

    if desc.architectures.is_empty() {
        return Err(Error::descriptor(format!(
            "Descriptor for '{id}' does not specify any architectures"
        )));
    }

    if let Some(from) = desc.source.as_ref().and_then(DependencyDescriptor::inherits_from) {
        return Err(Error::descriptor(format!(
            "Descriptor for '{id}': the source cannot use expand_from ('{from}')"
        )));
    }

    Ok(desc)
}

/// Read and parse `templates/<id>/info.json`.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] if the file cannot be read or parsed.
pub fn load_version(workspace: &Workspace, id: &str) -> Result<VersionDescriptor> {
    let path = workspace.descriptor_path(id);
    let json = std::fs::read_to_string(&path)
        .map_err(|e| Error::descriptor(format!("Unable to read '{}': {e}", path.display())))?;
    parse_version(id, &json)
}

/// Resolve every `expand_from` reference into a copy of its donor.
///
/// Donors are looked up by (architecture, dependency name) among direct
/// entries only, so chains of inheritance are not followed. Expanding an
/// expanded descriptor returns an identical copy.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] if a donor does not exist.
pub fn expand(desc: &VersionDescriptor) -> Result<VersionDescriptor> {
    let mut donors: HashMap<(&str, &str), &DirectDependency> = HashMap::new();
    for arch in &desc.architectures {
        for dep in &arch.dependencies {
            if let Some(direct) = dep.as_direct() {
                donors.insert((arch.architecture.as_str(), dep.name.as_str()), direct);
            }
        }
    }

    let mut expanded = desc.clone();
    for arch in &mut expanded.architectures {
        for dep in &mut arch.dependencies {
            let Some(from) = dep.inherits_from() else {
                continue;
            };
            let donor = donors.get(&(from, dep.name.as_str())).ok_or_else(|| {
                Error::descriptor(format!(
                    "Unable to expand '{}' for '{}' in '{}'. Mapping does not exist",
                    dep.name, arch.architecture, desc.id
                ))
            })?;
            tracing::debug!("Expanded '{}' for '{}' from '{from}'", dep.name, arch.architecture);
            *dep = DependencyDescriptor::direct(dep.name.clone(), (*donor).clone());
        }
    }

    Ok(expanded)
}

/// Load a base version and expand it.
///
/// # Errors
///
/// See [`load_version`] and [`expand`].
pub fn load_and_expand(workspace: &Workspace, id: &str) -> Result<VersionDescriptor> {
    expand(&load_version(workspace, id)?)
}

/// Scan `templates/*/info.json`, returning base version id → display name.
///
/// Unreadable descriptors are reported and skipped.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] when no base version could be loaded.
pub fn list_base_versions(
    workspace: &Workspace,
    reporter: &dyn Reporter,
) -> Result<BTreeMap<String, String>> {
    let templates = workspace.templates_dir();
    let pattern = format!(
        "{}/*/info.json",
        glob::Pattern::escape(&templates.to_string_lossy())
    );

    let mut versions = BTreeMap::new();
    let entries = glob::glob(&pattern).map_err(|e| Error::descriptor(e.to_string()))?;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping unreadable template entry: {e}");
                continue;
            }
        };
        let Some(id) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        else {
            continue;
        };
        match load_version(workspace, id) {
            Ok(desc) => {
                versions.insert(id.to_string(), desc.name);
            }
            Err(e) => {
                tracing::warn!("Skipping base version '{id}': {e}");
                reporter.warning(&format!("Skipping base version '{id}': {e}"));
            }
        }
    }

    if versions.is_empty() {
        return Err(Error::descriptor(format!(
            "No base versions found under '{}'",
            templates.display()
        )));
    }
    Ok(versions)
}

/// Pick the base version a specific version belongs to.
///
/// A base matches when each of its dotted components equals the specific
/// version's component at the same position, comparing the leading integer
/// of each (`1.1.1t` matches `1.1.1`), and it is not the specific version
/// itself. The last match in iteration order wins.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] if no base version matches.
pub fn resolve_base_version<'a>(
    specific: &str,
    bases: impl IntoIterator<Item = &'a str>,
) -> Result<String> {
    let parts: Vec<&str> = specific.split('.').collect();

    let mut found = None;
    for base in bases {
        if base == specific {
            continue;
        }
        let base_parts: Vec<&str> = base.split('.').collect();
        if base_parts.len() > parts.len() {
            continue;
        }
        let matches = base_parts
            .iter()
            .zip(&parts)
            .all(|(a, b)| leading_int(a) == leading_int(b));
        if matches {
            found = Some(base.to_string());
        }
    }

    found.ok_or_else(|| {
        Error::descriptor(format!("A supported base version was not found for '{specific}'"))
    })
}

fn leading_int(part: &str) -> u64 {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}
