//! Per-architecture build state machine.
//!
//! A build runs the six [`VARIANTS`] in order. Each variant goes through
//! Clone → Configure → Patch → Compile → Harvest inside a private clone of
//! the extracted source tree (`temp_<arch>`), and lands in its own
//! `out_<arch>/<label>` directory. A variant whose output directory already
//! exists is skipped, so a failed run resumes where it stopped.
//!
//! ## Variants
//!
//! | # | Output | `Configure` flags | Runtime | Harvest |
//! |---|---|---|---|---|
//! | 1 | `dll_MD` | `shared` | `/MD` | all subtrees |
//! | 2 | `dll_MT` | `shared no-tests` | `/MT` | `apps` |
//! | 3 | `dll_MDd` | `--debug shared no-tests` | `/MDd` | none |
//! | 4 | `dll_MTd` | `--debug shared no-tests` | `/MTd` | none |
//! | 5 | `static_MD` | `no-shared no-tests` | `/MD` | `apps` |
//! | 6 | `static_MT` | `no-shared no-tests` | `/MT` | `apps` |
//!
//! The first variant also builds the test suite and harvests the public
//! headers into `out_<arch>/inc/openssl`, shared by every variant.

use std::path::{Path, PathBuf};
use std::time::Instant;

use sslpack_schema::{ArchitectureDescriptor, BuildSpec, Token};
use walkdir::WalkDir;

use crate::environment::EnvironmentProfile;
use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::runner::{CommandRunner, CommandSpec, split_args, with_log_tail};
use crate::template::PathMap;

/// MSVC runtime library selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFlag {
    /// Multithreaded DLL runtime.
    Md,
    /// Static multithreaded runtime.
    Mt,
    /// Debug DLL runtime.
    MdDebug,
    /// Debug static runtime.
    MtDebug,
}

impl RuntimeFlag {
    pub const ALL: [Self; 4] = [Self::MtDebug, Self::Mt, Self::MdDebug, Self::Md];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md => "/MD",
            Self::Mt => "/MT",
            Self::MdDebug => "/MDd",
            Self::MtDebug => "/MTd",
        }
    }
}

/// Which build subtrees a variant keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestMode {
    /// `apps`, `engines`, `fuzz`, `providers`, `test` and `tools`.
    All,
    /// `apps` only.
    Apps,
    /// Root libraries only.
    Nothing,
}

/// One build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub number: u8,
    pub label: &'static str,
    pub configure_flags: &'static str,
    pub runtime: RuntimeFlag,
    pub harvest: HarvestMode,
    /// Builds tests and harvests the shared headers.
    pub primary: bool,
}

impl Variant {
    pub fn is_shared(&self) -> bool {
        !self.configure_flags.contains("no-shared")
    }
}

pub const VARIANTS: [Variant; 6] = [
    Variant {
        number: 1,
        label: "dll_MD",
        configure_flags: "shared",
        runtime: RuntimeFlag::Md,
        harvest: HarvestMode::All,
        primary: true,
    },
    Variant {
        number: 2,
        label: "dll_MT",
        configure_flags: "shared no-tests",
        runtime: RuntimeFlag::Mt,
        harvest: HarvestMode::Apps,
        primary: false,
    },
    Variant {
        number: 3,
        label: "dll_MDd",
        configure_flags: "--debug shared no-tests",
        runtime: RuntimeFlag::MdDebug,
        harvest: HarvestMode::Nothing,
        primary: false,
    },
    Variant {
        number: 4,
        label: "dll_MTd",
        configure_flags: "--debug shared no-tests",
        runtime: RuntimeFlag::MtDebug,
        harvest: HarvestMode::Nothing,
        primary: false,
    },
    Variant {
        number: 5,
        label: "static_MD",
        configure_flags: "no-shared no-tests",
        runtime: RuntimeFlag::Md,
        harvest: HarvestMode::Apps,
        primary: false,
    },
    Variant {
        number: 6,
        label: "static_MT",
        configure_flags: "no-shared no-tests",
        runtime: RuntimeFlag::Mt,
        harvest: HarvestMode::Apps,
        primary: false,
    },
];

/// Extensions never harvested from a build tree.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    ".c", ".d", ".ec", ".h", ".obj", ".ilk", ".pdb", ".in", ".info", ".md", ".asm", ".mar",
];

/// Root-level artifacts every variant keeps.
const ROOT_EXTENSIONS: &[&str] = &[".exp", ".lib", ".def", ".dll", ".pdb"];

/// Subtrees harvested under [`HarvestMode::All`], and whether each recurses.
const ALL_SUBTREES: &[(&str, bool)] = &[
    ("apps", true),
    ("engines", false),
    ("fuzz", false),
    ("providers", false),
    ("test", true),
    ("tools", true),
];

/// Everything one (version, architecture) build needs, resolved up front.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub version: String,
    pub arch: ArchitectureDescriptor,
    /// Saved profile with every dependency recipe applied.
    pub env: EnvironmentProfile,
    pub paths: PathMap,
}

impl BuildJob {
    /// Apply the architecture's dependency recipes to its saved profile.
    pub fn new(
        version: impl Into<String>,
        arch: ArchitectureDescriptor,
        profile: &EnvironmentProfile,
        paths: PathMap,
    ) -> Self {
        let env = profile.apply_all(&arch.dependencies, &paths);
        Self {
            version: version.into(),
            arch,
            env,
            paths,
        }
    }

    /// `[<version>; <arch>]`, the prefix of every progress message.
    pub fn prefix(&self) -> String {
        format!("[{}; {}]", self.version, self.arch.architecture)
    }

    /// A mapped directory token as a native path.
    ///
    /// # Errors
    ///
    /// [`Error::Descriptor`] if the token is not mapped.
    pub fn dir(&self, token: Token) -> Result<PathBuf> {
        self.paths
            .get(token)
            .map(PathBuf::from)
            .ok_or_else(|| Error::descriptor(format!("{token} is not mapped for this build")))
    }

    fn build_spec(&self) -> Result<&BuildSpec> {
        self.arch.build.as_ref().ok_or_else(|| {
            Error::descriptor(format!(
                "{} Unable to build due to missing 'build' information",
                self.prefix()
            ))
        })
    }
}

/// Per-run result: which variants ran and which were already on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub built: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

/// Drives [`VARIANTS`] for one [`BuildJob`].
pub struct BuildPipeline<'a> {
    job: &'a BuildJob,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(job: &'a BuildJob, runner: &'a dyn CommandRunner, reporter: &'a dyn Reporter) -> Self {
        Self {
            job,
            runner,
            reporter,
        }
    }

    /// Clean, then build every variant not already harvested.
    ///
    /// # Errors
    ///
    /// [`Error::Descriptor`] without a build spec, [`Error::BuildStage`] when
    /// a stage artifact is missing, [`Error::ProcessStart`] when a tool
    /// cannot run. Completed variants stay on disk.
    pub fn run(&self) -> Result<BuildSummary> {
        let build = self.job.build_spec()?;
        let temp_dir = self.job.dir(Token::SourceTempDir)?;
        let out_dir = self.job.dir(Token::BuildOutputDir)?;

        self.clean()?;
        let logs = out_dir.join("logs");
        std::fs::create_dir_all(&logs).map_err(|e| Error::io_at(&logs, e))?;

        let mut summary = BuildSummary::default();
        for variant in &VARIANTS {
            if is_harvested(&out_dir, variant) {
                tracing::debug!("{} {} already harvested", self.job.prefix(), variant.label);
                summary.skipped.push(variant.label);
                continue;
            }
            self.run_variant(build, variant)?;
            summary.built.push(variant.label);
        }

        remove_dir_if_exists(&temp_dir)?;
        Ok(summary)
    }

    /// Remove the stale clone and any staged installer tree.
    fn clean(&self) -> Result<()> {
        self.reporter
            .info(&format!("{} Cleaning up previous builds...", self.job.prefix()));
        remove_dir_if_exists(&self.job.dir(Token::SourceTempDir)?)?;
        remove_dir_if_exists(&self.job.dir(Token::InstallerSourceDir)?)
    }

    fn run_variant(&self, build: &BuildSpec, variant: &Variant) -> Result<()> {
        let prefix = format!(
            "[{}; {}; Build {}; {}]",
            self.job.version, self.job.arch.architecture, variant.number, variant.label
        );
        let started = Instant::now();
        self.reporter.info(&format!(
            "{prefix} Started build at {}.",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        tracing::info!("{prefix} starting");

        let source = self.job.dir(Token::SourceOrigDir)?;
        let temp_dir = self.job.dir(Token::SourceTempDir)?;
        let out_dir = self.job.dir(Token::BuildOutputDir)?;
        let logs = out_dir.join("logs");

        // Clone
        remove_dir_if_exists(&temp_dir)?;
        self.reporter.info(&format!("{prefix} Cloning source tree..."));
        copy_dir_all(&source, &temp_dir)?;

        // Configure
        let configure = CommandSpec::new("perl")
            .arg("Configure")
            .arg(&build.configure_target)
            .args(split_args(variant.configure_flags))
            .args(split_args(&build.configure_extra))
            .current_dir(&temp_dir)
            .env(&self.job.env);
        let configure_log =
            self.run_logged(&prefix, &configure, &logs, &format!("{}_perl_configure_{}", variant.number, variant.label))?;

        let makefile = temp_dir.join("makefile");
        if !makefile.is_file() {
            return Err(Error::build_stage(
                "configure",
                with_log_tail(
                    format!("{prefix} Failed to generate '{}'", makefile.display()),
                    &configure_log,
                ),
            ));
        }

        // Patch
        let data = std::fs::read(&makefile).map_err(|e| Error::io_at(&makefile, e))?;
        let patched = patch_makefile(&String::from_utf8_lossy(&data), &build.patches, variant);
        std::fs::write(&makefile, patched).map_err(|e| Error::io_at(&makefile, e))?;

        // Compile
        let nmake = CommandSpec::new("nmake")
            .args(["-f", "makefile"])
            .current_dir(&temp_dir)
            .env(&self.job.env);
        let nmake_log =
            self.run_logged(&prefix, &nmake, &logs, &format!("{}_nmake_{}", variant.number, variant.label))?;

        let exe = temp_dir.join("apps").join("openssl.exe");
        if !exe.is_file() {
            return Err(Error::build_stage(
                "compile",
                with_log_tail(format!("{prefix} Failed to generate '{}'", exe.display()), &nmake_log),
            ));
        }

        // Harvest
        let dest = out_dir.join(variant.label);
        std::fs::create_dir_all(&dest).map_err(|e| Error::io_at(&dest, e))?;
        let subtrees: &[(&str, bool)] = match variant.harvest {
            HarvestMode::All => ALL_SUBTREES,
            HarvestMode::Apps => &ALL_SUBTREES[..1],
            HarvestMode::Nothing => &[],
        };
        for (subtree, recurse) in subtrees {
            copy_build_files(&temp_dir, &dest, subtree, *recurse, None)?;
        }
        copy_build_files(&temp_dir, &dest, "", false, Some(ROOT_EXTENSIONS))?;

        if variant.primary {
            harvest_headers(&temp_dir, &out_dir.join("inc").join("openssl"))?;
        }

        let elapsed = started.elapsed().as_secs();
        self.reporter.info(&format!(
            "{prefix} Finished build at {}.  Build time:  {} min {} sec",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            elapsed / 60,
            elapsed % 60
        ));
        Ok(())
    }

    /// Run `cmd`, writing stdout to `<stem>_out.log` and stderr to `<stem>_error.log`.
    /// Run `cmd` with its output logged under `logs`. Returns the stderr log path.
    fn run_logged(&self, prefix: &str, cmd: &CommandSpec<'_>, logs: &Path, stem: &str) -> Result<PathBuf> {
        self.reporter
            .info(&format!("{prefix} Running '{}'...", cmd.display()));
        let error_log = logs.join(format!("{stem}_error.log"));
        let stdout = self.runner.run(cmd, &error_log)?;
        let out_log = logs.join(format!("{stem}_out.log"));
        std::fs::write(&out_log, stdout).map_err(|e| Error::io_at(&out_log, e))?;
        Ok(error_log)
    }
}

impl std::fmt::Debug for BuildPipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPipeline")
            .field("job", &self.job.prefix())
            .finish_non_exhaustive()
    }
}

/// The primary variant also needs the shared headers to count as done.
fn is_harvested(out_dir: &Path, variant: &Variant) -> bool {
    out_dir.join(variant.label).is_dir() && (!variant.primary || out_dir.join("inc").is_dir())
}

/// Apply the declared rules, then force the variant's runtime flag.
///
/// Static variants also drop the legacy provider module, which only exists
/// as a DLL.
pub fn patch_makefile(data: &str, rules: &[(String, String)], variant: &Variant) -> String {
    let mut data = data.to_string();
    for (find, replace) in rules {
        data = data.replace(find.as_str(), replace);
    }

    if !variant.is_shared() {
        data = data
            .replace(r"MODULES=providers\legacy.dll", "MODULES=")
            .replace(r"MODULEPDBS=providers\legacy.pdb", "MODULEPDBS=");
    }

    let wanted = variant.runtime.as_str();
    for flag in RuntimeFlag::ALL.map(RuntimeFlag::as_str) {
        data = data
            .replace(&format!(" {flag} "), &format!(" {wanted} "))
            .replace(&format!(" {flag}\r\n"), &format!(" {wanted}\r\n"));
    }
    data
}

/// Copy `src_root/subdir` into `dest_root/subdir`, skipping intermediate
/// build products and extension-less files. `only` further restricts the
/// copied extensions.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be walked or a file copied.
pub fn copy_build_files(
    src_root: &Path,
    dest_root: &Path,
    subdir: &str,
    recurse: bool,
    only: Option<&[&str]>,
) -> Result<usize> {
    let src = src_root.join(subdir);
    if !src.is_dir() {
        return Ok(0);
    }

    let walker = WalkDir::new(&src)
        .min_depth(1)
        .max_depth(if recurse { usize::MAX } else { 1 });

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(ext) = name.rfind('.').map(|i| &name[i..]) else {
            continue;
        };
        if EXCLUDED_EXTENSIONS.contains(&ext) || only.is_some_and(|only| !only.contains(&ext)) {
            continue;
        }

        let rel = entry.path().strip_prefix(src_root).unwrap_or(entry.path());
        let dest = dest_root.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        std::fs::copy(entry.path(), &dest).map_err(|e| Error::io_at(entry.path(), e))?;
        copied += 1;
    }
    Ok(copied)
}

/// `include/openssl/*.h` and `ms/applink.c`, converted to CRLF.
fn harvest_headers(build_dir: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;

    let include = build_dir.join("include").join("openssl");
    let entries = std::fs::read_dir(&include).map_err(|e| Error::io_at(&include, e))?;
    for entry in entries {
        let path = entry?.path();
        let is_header = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("h"));
        if is_header {
            if let Some(name) = path.file_name() {
                copy_text_file(&path, &dest.join(name))?;
            }
        }
    }

    copy_text_file(&build_dir.join("ms").join("applink.c"), &dest.join("applink.c"))
}

/// Normalize every line ending to CRLF.
pub fn to_crlf(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n")
}

/// Copy a text file, converting line endings to CRLF.
///
/// # Errors
///
/// Returns an I/O error naming whichever path failed.
pub fn copy_text_file(src: &Path, dest: &Path) -> Result<()> {
    let data = std::fs::read(src).map_err(|e| Error::io_at(src, e))?;
    std::fs::write(dest, to_crlf(&String::from_utf8_lossy(&data))).map_err(|e| Error::io_at(dest, e))
}

/// Recursively copy a directory tree from `src` to `dst`.
///
/// Uses `fs_extra` for recursive copying with overwrite semantics.
///
/// # Errors
///
/// Returns an error if any file or directory cannot be copied.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    std::fs::create_dir_all(dst).map_err(|e| Error::io_at(dst, e))?;
    fs_extra::dir::copy(
        src,
        dst,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| {
        Error::Io(std::io::Error::other(format!(
            "Copy of '{}' to '{}' failed: {e}",
            src.display(),
            dst.display()
        )))
    })?;
    Ok(())
}

/// Delete a directory tree; a missing directory is not an error.
pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_at(path, e)),
    }
}
