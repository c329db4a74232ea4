//! Installer staging and packaging.
//!
//! After every variant is harvested, the layout an installer ships is staged
//! under `installers/<arch>/final`, then the configured packaging tools run
//! against it: MinGW `dlltool` for import libraries, Inno Setup for `.iss`
//! scripts and WiX `candle`/`light` for `.wxs` sources. Each tool run is
//! checked for the artifact it should have produced.

use std::path::{Path, PathBuf};

use sslpack_schema::{PackageSpec, Token};
use walkdir::WalkDir;

use crate::builder::{BuildJob, copy_text_file};
use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::runner::{CommandRunner, CommandSpec, split_args};

/// Text files shipped under `text/`, with their staged names.
const TEXT_FILES: &[(&str, &str)] = &[
    ("ACKNOWLEDGEMENTS", "acknowledgements.txt"),
    ("AUTHORS", "authors.txt"),
    ("CHANGES", "changes.txt"),
    ("FAQ", "faq.txt"),
    ("LICENSE", "license.txt"),
    ("NEWS", "news.txt"),
    ("README", "readme.txt"),
];

const DLL: &[&str] = &[".dll"];
const EXP: &[&str] = &[".exp"];
const EXE: &[&str] = &[".exe"];
const CNF: &[&str] = &[".cnf"];
const PERL: &[&str] = &[".pl"];
const PEM: &[&str] = &[".pem", ".srl"];
const DEF: &[&str] = &[".def"];
const LIBS: &[&str] = &[".lib", ".def"];

/// What a packaging run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSummary {
    /// The staged installer tree.
    pub staged: PathBuf,
    /// Import libraries, setup executables and MSI files, in creation order.
    pub artifacts: Vec<PathBuf>,
}

pub struct Packager<'a> {
    job: &'a BuildJob,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> Packager<'a> {
    pub fn new(job: &'a BuildJob, runner: &'a dyn CommandRunner, reporter: &'a dyn Reporter) -> Self {
        Self {
            job,
            runner,
            reporter,
        }
    }

    /// Stage and package. Returns `None` when the version was prepared
    /// without installer templates for this architecture.
    ///
    /// # Errors
    ///
    /// [`Error::Descriptor`] without a package spec, [`Error::BuildStage`]
    /// when a tool does not produce its artifact.
    pub fn run(&self) -> Result<Option<PackageSummary>> {
        let scripts = self.job.dir(Token::InstallersArchDir)?;
        if !scripts.is_dir() {
            tracing::debug!("{} no installer templates, skipping packaging", self.job.prefix());
            return Ok(None);
        }
        let spec = self.job.arch.package.as_ref().ok_or_else(|| {
            Error::descriptor(format!(
                "{} Unable to package the build due to missing 'package' information",
                self.job.prefix()
            ))
        })?;

        self.reporter.info(&format!(
            "{} Started packaging at {}.",
            self.job.prefix(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        let dest = self.job.dir(Token::InstallerSourceDir)?;
        self.reporter
            .info(&format!("{} Copying files to '{}'...", self.job.prefix(), dest.display()));
        self.stage(&scripts, &dest)?;
        if !has_tools(spec) {
            self.reporter
                .warning(&format!("{} No packaging tools configured", self.job.prefix()));
        }

        let mut artifacts = Vec::new();
        if let Some(dlltool) = spec.dlltool() {
            artifacts.extend(self.mingw_import_libs(dlltool, &dest)?);
        }
        if let Some(inno) = spec.inno_setup() {
            artifacts.extend(self.inno_setup(inno, &scripts, &dest)?);
        }
        if let (Some(wix), Some(target)) = (spec.wix_toolset(), spec.wix_toolset_target.as_deref()) {
            artifacts.extend(self.wix(wix, target, &scripts, &dest)?);
        }

        Ok(Some(PackageSummary {
            staged: dest,
            artifacts,
        }))
    }

    /// Lay out `final/` from the harvested variants.
    fn stage(&self, scripts: &Path, dest: &Path) -> Result<()> {
        let out = self.job.dir(Token::BuildOutputDir)?;
        let source = self.job.dir(Token::SourceOrigDir)?;
        let arch = &self.job.arch.architecture;
        let md = out.join("dll_MD");
        let apps = md.join("apps");

        std::fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;

        copy_files(&md, dest, false, Some(DLL), false)?;
        copy_files(&md, &dest.join("bin"), true, Some(DLL), true)?;
        copy_files(&md, &dest.join("exp"), true, Some(EXP), true)?;

        // VC++ libraries, one directory per runtime.
        let lib_dir = dest.join("lib").join("VC").join(arch);
        let static_dir = lib_dir.join("static");
        std::fs::create_dir_all(&static_dir).map_err(|e| Error::io_at(&static_dir, e))?;
        copy_files(&md, &lib_dir.join("MD"), true, Some(LIBS), true)?;
        for runtime in ["MDd", "MT", "MTd"] {
            copy_files(&out.join(format!("dll_{runtime}")), &lib_dir.join(runtime), false, Some(LIBS), false)?;
        }

        copy_files(&apps, &dest.join("bin"), false, Some(EXE), false)?;
        copy_files(&out.join("static_MT").join("apps"), &dest.join("bin_static"), false, Some(EXE), false)?;

        // openssl.cfg is the historical name of the default configuration.
        let cnf = apps.join("openssl.cnf");
        if cnf.is_file() {
            let bin = dest.join("bin");
            std::fs::create_dir_all(&bin).map_err(|e| Error::io_at(&bin, e))?;
            let cfg = bin.join("openssl.cfg");
            std::fs::copy(&cnf, &cfg).map_err(|e| Error::io_at(&cnf, e))?;
        }
        copy_files(&apps, &dest.join("bin").join("cnf"), false, Some(CNF), false)?;
        copy_files(&apps, &dest.join("conf"), false, Some(CNF), false)?;

        copy_files(&apps, &dest.join("bin"), false, Some(PERL), false)?;
        copy_files(&md.join("tools"), &dest.join("tools"), true, None, false)?;

        let tests = dest.join("tests");
        copy_files(&md.join("test"), &tests, true, None, false)?;
        copy_files(&md, &tests, false, Some(DLL), false)?;
        copy_files(&md.join("fuzz"), &tests.join("fuzz"), true, None, false)?;
        copy_files(&md, &tests.join("fuzz"), false, Some(DLL), false)?;

        let pem = dest.join("bin").join("PEM");
        copy_files(&apps, &pem, false, Some(PEM), false)?;
        copy_files(&apps.join("demoCA"), &pem.join("demoCA"), true, None, false)?;
        copy_files(&apps.join("demoSRP"), &pem.join("demoSRP"), true, None, false)?;

        copy_files(&out.join("inc"), &dest.join("include"), true, None, false)?;

        let text = dest.join("text");
        std::fs::create_dir_all(&text).map_err(|e| Error::io_at(&text, e))?;
        for (name, staged) in TEXT_FILES {
            stage_text_file(&source.join(name), &text.join(staged))?;
        }
        stage_text_file(&source.join("LICENSE"), &dest.join("license.txt"))?;

        let start = scripts.join("start.bat");
        if start.is_file() {
            std::fs::copy(&start, dest.join("start.bat")).map_err(|e| Error::io_at(&start, e))?;
        }
        Ok(())
    }

    fn mingw_import_libs(&self, dlltool: &str, dest: &Path) -> Result<Vec<PathBuf>> {
        self.reporter
            .info(&format!("{} Generating MinGW libraries...", self.job.prefix()));

        let arch = &self.job.arch.architecture;
        let mingw = dest.join("lib").join("MinGW").join(arch);
        let out = self.job.dir(Token::BuildOutputDir)?;
        copy_files(&out.join("dll_MD"), &mingw, false, Some(DEF), false)?;

        let program = self.job.paths.substitute_path(dlltool);
        let relative = Path::new(".").join("lib").join("MinGW").join(arch);
        let mut artifacts = Vec::new();
        for def in files_with_extension(&mingw, "def")? {
            let Some(stem) = def.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let cmd = CommandSpec::new(program.as_str())
                .arg("--def")
                .arg(relative.join(format!("{stem}.def")).to_string_lossy())
                .arg("--dllname")
                .arg(format!("{stem}.dll"))
                .arg("--output-lib")
                .arg(relative.join(format!("{stem}.dll.a")).to_string_lossy())
                .current_dir(dest)
                .env(&self.job.env);
            self.run_logged(&cmd, &format!("package_mingw_dlltool_{arch}_{stem}"))?;
            artifacts.push(expect_artifact(mingw.join(format!("{stem}.dll.a")))?);
        }
        Ok(artifacts)
    }

    fn inno_setup(&self, inno_dir: &str, scripts: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        self.reporter
            .info(&format!("{} Running Inno Setup compiler...", self.job.prefix()));

        let arch = &self.job.arch.architecture;
        let program = self.job.paths.substitute_path(&format!("{inno_dir}/iscc.exe"));
        let mut artifacts = Vec::new();
        for iss in files_with_extension(scripts, "iss")? {
            let stem = file_stem(&iss);
            let cmd = CommandSpec::new(program.as_str())
                .arg(iss.to_string_lossy())
                .current_dir(dest)
                .env(&self.job.env);
            self.run_logged(&cmd, &format!("package_inno_setup_{arch}_{stem}"))?;

            let script = std::fs::read_to_string(&iss).map_err(|e| Error::io_at(&iss, e))?;
            let base = inno_output_base(&script).ok_or_else(|| {
                Error::build_stage(
                    "package",
                    format!("{} No 'OutputBaseFilename' in '{}'", self.job.prefix(), iss.display()),
                )
            })?;
            artifacts.push(expect_artifact(dest.join("Output").join(format!("{base}.exe")))?);
        }
        Ok(artifacts)
    }

    fn wix(&self, wix_dir: &str, target: &str, scripts: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        self.reporter
            .info(&format!("{} Running Wix toolset compiler...", self.job.prefix()));

        let arch = &self.job.arch.architecture;
        let candle = self.job.paths.substitute_path(&format!("{wix_dir}/candle.exe"));
        let light = self.job.paths.substitute_path(&format!("{wix_dir}/light.exe"));
        let output = dest.join("Output");
        let mut artifacts = Vec::new();

        for wxs in files_with_extension(scripts, "wxs")? {
            let stem = file_stem(&wxs);
            let source = std::fs::read_to_string(&wxs).map_err(|e| Error::io_at(&wxs, e))?;
            let base = wix_source_setup_file(&source).ok_or_else(|| {
                Error::build_stage(
                    "package",
                    format!("{} Unable to find 'SourceSetupFile' in '{}'", self.job.prefix(), wxs.display()),
                )
            })?;
            let wixobj = output.join(format!("{base}.wixobj"));
            let wixpdb = output.join(format!("{base}.wixpdb"));
            let msi = output.join(format!("{base}.msi"));

            let cmd = CommandSpec::new(candle.as_str())
                .args(split_args(target))
                .arg("-o")
                .arg(wixobj.to_string_lossy())
                .arg(wxs.to_string_lossy())
                .current_dir(dest)
                .env(&self.job.env);
            self.run_logged(&cmd, &format!("package_wix_toolset_candle_{arch}_{stem}"))?;
            expect_artifact(wixobj.clone())?;

            let cmd = CommandSpec::new(light.as_str())
                .arg("-b")
                .arg(output.to_string_lossy())
                .args(["-ext", "WixUtilExtension.dll", "-out"])
                .arg(msi.to_string_lossy())
                .arg(wixobj.to_string_lossy())
                .current_dir(dest)
                .env(&self.job.env);
            self.run_logged(&cmd, &format!("package_wix_toolset_light_{arch}_{stem}"))?;
            artifacts.push(expect_artifact(msi)?);

            std::fs::remove_file(&wixobj).ok();
            std::fs::remove_file(&wixpdb).ok();
        }
        Ok(artifacts)
    }

    fn run_logged(&self, cmd: &CommandSpec<'_>, stem: &str) -> Result<()> {
        self.reporter
            .info(&format!("{} Running '{}'...", self.job.prefix(), cmd.display()));
        let logs = self.job.dir(Token::BuildOutputDir)?.join("logs");
        std::fs::create_dir_all(&logs).map_err(|e| Error::io_at(&logs, e))?;
        let stdout = self.runner.run(cmd, &logs.join(format!("{stem}_error.log")))?;
        let out_log = logs.join(format!("{stem}_out.log"));
        std::fs::write(&out_log, stdout).map_err(|e| Error::io_at(&out_log, e))
    }
}

impl std::fmt::Debug for Packager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packager")
            .field("job", &self.job.prefix())
            .finish_non_exhaustive()
    }
}

fn expect_artifact(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::build_stage(
            "package",
            format!("Unable to generate '{}'", path.display()),
        ))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Files directly in `dir` with extension `ext`, sorted. A missing directory
/// has none.
fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Copy files from `src` into `dest`.
///
/// `suffixes` limits which file names are copied. With `flatten`, files from
/// every subdirectory land directly in `dest`. A missing `src` copies nothing.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be walked or a file copied.
pub fn copy_files(
    src: &Path,
    dest: &Path,
    recurse: bool,
    suffixes: Option<&[&str]>,
    flatten: bool,
) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }

    let walker = WalkDir::new(src)
        .min_depth(1)
        .max_depth(if recurse { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if suffixes.is_some_and(|s| !s.iter().any(|suffix| name.ends_with(suffix))) {
            continue;
        }

        let target = if flatten {
            dest.join(entry.file_name())
        } else {
            dest.join(entry.path().strip_prefix(src).unwrap_or(entry.path()))
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        std::fs::copy(entry.path(), &target).map_err(|e| Error::io_at(entry.path(), e))?;
        copied += 1;
    }
    Ok(copied)
}

/// Copy a release text file, falling back to its `.md` then `.txt` form.
fn stage_text_file(src: &Path, dest: &Path) -> Result<()> {
    let candidates = [
        src.to_path_buf(),
        src.with_extension("md"),
        src.with_extension("txt"),
    ];
    match candidates.iter().find(|p| p.is_file()) {
        Some(found) => copy_text_file(found, dest),
        None => {
            tracing::warn!("No '{}' in the source tree", src.display());
            Ok(())
        }
    }
}

/// `OutputBaseFilename` from an Inno Setup script. The last assignment wins.
pub fn inno_output_base(script: &str) -> Option<String> {
    script
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .filter(|(key, _)| key.trim() == "OutputBaseFilename")
        .map(|(_, value)| value.trim().to_string())
        .next_back()
}

/// The `SourceSetupFile` define of a WiX source, without its `.exe` suffix.
pub fn wix_source_setup_file(source: &str) -> Option<String> {
    source
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = &line[line.find(" SourceSetupFile ")?..];
            let quoted = &rest[rest.find('"')? + 1..];
            let value = &quoted[..quoted.rfind('"')?];
            value.get(..value.len().checked_sub(4)?).map(str::to_string)
        })
        .next_back()
}

/// Does `spec` configure any packaging tool at all?
pub fn has_tools(spec: &PackageSpec) -> bool {
    spec.dlltool().is_some() || spec.inno_setup().is_some() || spec.wix_toolset().is_some()
}
