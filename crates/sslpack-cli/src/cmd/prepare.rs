//! Prepare command: source tarball plus versioned installer scripts

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;
use sslpack_core::config::Config;
use sslpack_core::environment::EnvironmentProfile;
use sslpack_core::io::{ArchiveExtractor, HttpFetcher, InstallOutcome, Installer};
use sslpack_core::runner::SystemRunner;
use sslpack_core::template::PathMap;
use sslpack_core::workspace::portable;
use sslpack_core::{Reporter, loader};
use sslpack_schema::Token;

use crate::ui::ConsoleReporter;

/// Install the source tarball of `version` and render the installer script
/// templates of every architecture into `versions/<base>/<version>/installers`.
pub async fn prepare(config: &Config, reporter: &ConsoleReporter, version: &str) -> Result<()> {
    let ws = config.workspace();
    let base = super::base_for(&ws, reporter, version)?;
    let desc = loader::load_and_expand(&ws, &base)
        .with_context(|| format!("Unable to load base version '{base}'"))?;

    let Some(source) = &desc.source else {
        bail!("Base version '{base}' does not declare a source download");
    };

    std::fs::create_dir_all(ws.logs_dir()).context("Failed to create the logs directory")?;
    std::fs::create_dir_all(ws.deps_dir(&base))
        .with_context(|| format!("Failed to create '{}'", ws.deps_dir(&base).display()))?;

    let paths = ws.version_paths(&base, version);
    let fetcher = HttpFetcher::new();
    let extractor = ArchiveExtractor;
    let runner = SystemRunner;
    let mut installer = Installer::new(&ws, &fetcher, &extractor, &runner, reporter)
        .with_base_env(EnvironmentProfile::capture())
        .with_policy(config.preferred_policy());

    reporter.section(&format!("OpenSSL {version} source"));
    let outcome = installer
        .install(source, &paths, &ws.manifest_path(&base))
        .await
        .with_context(|| format!("Unable to set up the source of {version}"))?;
    if outcome == InstallOutcome::NotInstallable {
        bail!("The source download of '{base}' has no download or install path");
    }

    let installers = ws.installers_dir(&base, version);
    let mut rendered = 0usize;
    for arch in &desc.architectures {
        let templates = ws.installer_templates_dir(&base, &arch.architecture);
        if !templates.is_dir() {
            tracing::warn!("No installer templates at {}", templates.display());
            reporter.warning(&format!(
                "No installer templates for {}, it will be built without packaging",
                arch.architecture
            ));
            continue;
        }

        let script_dir = installers.join(&arch.architecture);
        let arch_paths = paths
            .clone()
            .with(Token::InstallerScriptDir, portable(&script_dir))
            .with(Token::InstallerSourceDir, portable(&script_dir.join("final")));
        rendered += render_templates(&templates, &script_dir, &arch_paths)?;
    }
    std::fs::create_dir_all(&installers)
        .with_context(|| format!("Failed to create '{}'", installers.display()))?;

    reporter.success(&format!("Prepared {version} ({rendered} installer scripts)"));
    super::display_result(&json!({
        "success": true,
        "path": portable(&ws.version_dir(&base, version)),
        "scripts": rendered,
    }))
}

/// Copy every regular file of `src` into `dest`, substituting tokens with
/// native separators. Returns the number of files written.
pub fn render_templates(src: &Path, dest: &Path, paths: &PathMap) -> Result<usize> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create '{}'", dest.display()))?;

    let mut entries: Vec<_> = std::fs::read_dir(src)
        .with_context(|| format!("Unable to open directory '{}'", src.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Unable to read directory '{}'", src.display()))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    let mut count = 0;
    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let target = dest.join(entry.file_name());
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read '{}'", path.display()))?;
        let data = match String::from_utf8(bytes) {
            Ok(text) => paths.substitute_native(&text).into_bytes(),
            Err(e) => {
                tracing::warn!("'{}' is not UTF-8, copying verbatim", path.display());
                e.into_bytes()
            }
        };
        std::fs::write(&target, data)
            .with_context(|| format!("Failed to write '{}'", target.display()))?;
        tracing::debug!("Rendered {}", target.display());
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tokens_with_native_separators() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("templates");
        let dest = tmp.path().join("out");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(
            src.join("setup.iss"),
            "OutputBaseFilename=openssl-[[UNDERSCORE_VERSION]]\nSource: [[INSTALLER_SOURCE_DIR]]/bin\n",
        )
        .unwrap();
        std::fs::write(src.join("nested").join("skip.txt"), "x").unwrap();

        let paths = PathMap::new()
            .with(Token::UnderscoreVersion, "3_1_4")
            .with(Token::InstallerSourceDir, "C:/sslpack/final");
        let count = render_templates(&src, &dest, &paths).unwrap();
        assert_eq!(count, 1);
        assert!(!dest.join("nested").exists());

        let text = std::fs::read_to_string(dest.join("setup.iss")).unwrap();
        assert!(text.contains("OutputBaseFilename=openssl-3_1_4"));
        let sep = std::path::MAIN_SEPARATOR;
        assert!(text.contains(&format!("Source: C:{sep}sslpack{sep}final/bin")));
    }

    #[test]
    fn non_utf8_templates_are_copied_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("templates");
        std::fs::create_dir_all(&src).unwrap();
        let raw = vec![0x5b, 0x5b, 0xff, 0xfe, 0x5d];
        std::fs::write(src.join("logo.bmp"), &raw).unwrap();

        render_templates(&src, &tmp.path().join("out"), &PathMap::new()).unwrap();
        assert_eq!(std::fs::read(tmp.path().join("out/logo.bmp")).unwrap(), raw);
    }
}
