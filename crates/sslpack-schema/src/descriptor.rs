//! Version descriptors (`templates/<base>/info.json`).
//!
//! A descriptor lists, per target architecture, the toolchain dependencies
//! the build needs, how to configure the library and how to package it.
//! Dependencies are either declared in full (*direct*) or borrowed from the
//! same-named dependency of another architecture (*inherited*, written as
//! `"expand_from": "<arch>"`). The JSON keeps the flat key layout of the
//! descriptor files; the in-memory form is a tagged enum so the rest of the
//! engine never has to guess which fields are meaningful.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ordered::{self, Pairs};
use crate::{CpuWidth, DigestError, Sha256Digest};

/// Errors raised while turning descriptor JSON into typed records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorFieldError {
    /// A digest literal failed validation.
    #[error("dependency '{name}': {source}")]
    Digest {
        /// Dependency name.
        name: String,
        /// Underlying digest error.
        source: DigestError,
    },
    /// A qualifier key was given without the download it qualifies.
    #[error("dependency '{name}': '{key}' is set but '{base}' is not")]
    Orphan {
        /// Dependency name.
        name: String,
        /// The qualifier key, e.g. `download_x64_sha256`.
        key: String,
        /// The missing download key.
        base: &'static str,
    },
}

/// How a downloaded artifact is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadKind {
    /// Gzip-compressed tarball, unpacked into the install path.
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zip archive, unpacked into the install path.
    #[serde(rename = "zip")]
    Zip,
    /// Native installer executable, run with the declared arguments.
    #[serde(rename = "exe")]
    Installer,
}

impl DownloadKind {
    /// Descriptor spelling of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
            Self::Installer => "exe",
        }
    }
}

impl std::fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable artifact and its integrity information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Source URL.
    pub url: String,
    /// Expected SHA-256 digest, when declared inline.
    pub sha256: Option<Sha256Digest>,
    /// URL of a companion file holding the expected digest.
    pub sha256_url: Option<String>,
    /// Cache file name override (`_temp`).
    pub cache_name: Option<String>,
}

impl Download {
    /// A download with no integrity information.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
            sha256_url: None,
            cache_name: None,
        }
    }

    /// Name of the file this download is cached under in `temp/`.
    ///
    /// The `_temp` override wins; otherwise the last path segment of
    /// `resolved_url`, the download URL after token substitution.
    pub fn cache_file_name<'a>(&'a self, resolved_url: &'a str) -> &'a str {
        match &self.cache_name {
            Some(name) => name,
            None => resolved_url.split('/').next_back().unwrap_or(""),
        }
    }
}

/// The per-width download slots of a dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Downloads {
    /// Width-agnostic `download`.
    pub any: Option<Download>,
    /// `download_x86`.
    pub x86: Option<Download>,
    /// `download_x64`.
    pub x64: Option<Download>,
}

impl Downloads {
    /// The download to install on a host of the given width.
    ///
    /// The width-specific slot wins; otherwise `download`.
    pub fn for_width(&self, width: CpuWidth) -> Option<&Download> {
        let specific = match width {
            CpuWidth::X64 => self.x64.as_ref(),
            CpuWidth::X86 => self.x86.as_ref(),
        };
        specific.or(self.any.as_ref())
    }

    /// Every declared download, in `download`, `x86`, `x64` order.
    pub fn iter(&self) -> impl Iterator<Item = &Download> {
        [&self.any, &self.x86, &self.x64]
            .into_iter()
            .filter_map(Option::as_ref)
    }

    /// True when no download is declared at all.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A dependency's self-check: a command plus the output it must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfCheck {
    /// Command to run; may contain tokens. Relative names are looked up on PATH.
    pub command: String,
    /// Argument string, split shell-style.
    pub args: Option<String>,
    /// Pattern that must match some output line; either a bare regex or a
    /// delimited one with trailing modifiers, e.g. `/This is perl/i`.
    pub required_output: Option<String>,
    /// Shown when the required pattern is absent.
    pub required_alert: Option<String>,
    /// Pattern that should match some output line, in the same forms.
    pub preferred_output: Option<String>,
    /// Shown when the preferred pattern is absent.
    pub preferred_alert: Option<String>,
}

impl SelfCheck {
    /// A self-check with no patterns; any output satisfies it.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: None,
            required_output: None,
            required_alert: None,
            preferred_output: None,
            preferred_alert: None,
        }
    }
}

/// A fully declared dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectDependency {
    /// Download slots.
    pub downloads: Downloads,
    /// How the download is installed.
    pub kind: Option<DownloadKind>,
    /// Install destination template (`download_extract_path`).
    pub install_path: Option<String>,
    /// Installer argument template (`download_install_opts`).
    pub install_args: Option<String>,
    /// PATH additions, in order.
    pub env_paths: Vec<String>,
    /// Extra environment variables, in declaration order.
    pub env_extras: Pairs,
    /// Self-check run after installation and before builds.
    pub verify: Option<SelfCheck>,
}

/// Where a dependency's fields come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Declared in place.
    Direct(Box<DirectDependency>),
    /// Copied from the same-named dependency of architecture `from`.
    Inherited {
        /// Donor architecture id.
        from: String,
    },
}

/// A named dependency of one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDependency", into = "RawDependency")]
pub struct DependencyDescriptor {
    /// Dependency name, unique within an architecture.
    pub name: String,
    /// Declared or inherited fields.
    pub source: DependencySource,
}

impl DependencyDescriptor {
    /// A direct dependency.
    pub fn direct(name: impl Into<String>, dep: DirectDependency) -> Self {
        Self {
            name: name.into(),
            source: DependencySource::Direct(Box::new(dep)),
        }
    }

    /// An inherited dependency.
    pub fn inherited(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: DependencySource::Inherited { from: from.into() },
        }
    }

    /// The declared fields, or `None` for an unexpanded inheritance reference.
    pub fn as_direct(&self) -> Option<&DirectDependency> {
        match &self.source {
            DependencySource::Direct(dep) => Some(dep),
            DependencySource::Inherited { .. } => None,
        }
    }

    /// Donor architecture of an inheritance reference.
    pub fn inherits_from(&self) -> Option<&str> {
        match &self.source {
            DependencySource::Direct(_) => None,
            DependencySource::Inherited { from } => Some(from),
        }
    }
}

/// Makefile configuration for one architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// `Configure` target, e.g. `VC-WIN64A`.
    pub configure_target: String,
    /// Extra `Configure` arguments appended after the variant flags.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configure_extra: String,
    /// Literal find/replace rules applied to the generated makefile, in order.
    #[serde(default, with = "ordered::pairs", skip_serializing_if = "Vec::is_empty")]
    pub patches: Pairs,
}

/// Packaging tool locations for one architecture. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Path to MinGW `dlltool`, used to generate `.dll.a` import libraries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mingw_dlltool: Option<String>,
    /// Inno Setup install directory containing `iscc.exe`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inno_setup_dir: Option<String>,
    /// WiX toolset `bin` directory containing `candle.exe` and `light.exe`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wix_toolset_dir: Option<String>,
    /// Extra `candle` arguments, e.g. `-arch x64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wix_toolset_target: Option<String>,
}

impl PackageSpec {
    /// `dlltool` path when configured.
    pub fn dlltool(&self) -> Option<&str> {
        configured(self.mingw_dlltool.as_ref())
    }

    /// Inno Setup directory when configured.
    pub fn inno_setup(&self) -> Option<&str> {
        configured(self.inno_setup_dir.as_ref())
    }

    /// WiX directory when configured.
    pub fn wix_toolset(&self) -> Option<&str> {
        configured(self.wix_toolset_dir.as_ref())
    }
}

fn configured(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// One target architecture of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureDescriptor {
    /// Architecture id, e.g. `x64`; names the profile and output directories.
    pub architecture: String,
    /// Display name.
    pub name: String,
    /// Dependencies, applied to the environment in this order.
    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,
    /// Makefile configuration; architectures without one cannot be built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    /// Packaging tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageSpec>,
}

/// Contents of `templates/<base>/info.json`.
///
/// The library source tarball is declared with top-level `download*` keys,
/// as on a dependency. A nested `source` object is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVersion", into = "RawVersion")]
pub struct VersionDescriptor {
    /// Base version id; the template directory name, not stored in the file.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Library source tarball, installed by `prepare`.
    pub source: Option<DependencyDescriptor>,
    /// Target architectures, in build order.
    pub architectures: Vec<ArchitectureDescriptor>,
}

impl VersionDescriptor {
    /// Find an architecture by id.
    pub fn architecture(&self, id: &str) -> Option<&ArchitectureDescriptor> {
        self.architectures.iter().find(|a| a.architecture == id)
    }
}

/// Flat on-disk form of a dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawDependency {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expand_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_sha256_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_temp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x86: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x86_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x86_sha256_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x86_temp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x64_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x64_sha256_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_x64_temp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_type: Option<DownloadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_extract_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_install_opts: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env_paths: Vec<String>,
    #[serde(default, with = "ordered::pairs", skip_serializing_if = "Vec::is_empty")]
    env_extras: Pairs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    verify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verify_opts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required_alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_alert: Option<String>,
}

/// Flat on-disk form of a version descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawVersion {
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_sha256_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_temp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_type: Option<DownloadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_extract_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_install_opts: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<DependencyDescriptor>,
    #[serde(default)]
    architectures: Vec<ArchitectureDescriptor>,
}

impl TryFrom<RawVersion> for VersionDescriptor {
    type Error = DescriptorFieldError;

    fn try_from(raw: RawVersion) -> Result<Self, Self::Error> {
        let flat = RawDependency {
            name: raw.name.clone(),
            download: raw.download,
            download_sha256: raw.download_sha256,
            download_sha256_url: raw.download_sha256_url,
            download_temp: raw.download_temp,
            download_type: raw.download_type,
            download_extract_path: raw.download_extract_path,
            download_install_opts: raw.download_install_opts,
            ..RawDependency::default()
        };
        let declared = flat.download.as_deref().is_some_and(|url| !url.is_empty())
            || flat.download_sha256.is_some()
            || flat.download_sha256_url.is_some()
            || flat.download_temp.is_some();

        let source = if declared {
            Some(DependencyDescriptor::try_from(flat)?)
        } else {
            raw.source
        };

        Ok(Self {
            id: String::new(),
            name: raw.name,
            source,
            architectures: raw.architectures,
        })
    }
}

impl From<VersionDescriptor> for RawVersion {
    fn from(desc: VersionDescriptor) -> Self {
        let flatten = desc.source.as_ref().is_some_and(|dep| {
            dep.name == desc.name
                && dep.as_direct().is_some_and(|d| {
                    d.downloads.any.is_some()
                        && d.downloads.x86.is_none()
                        && d.downloads.x64.is_none()
                        && d.env_paths.is_empty()
                        && d.env_extras.is_empty()
                        && d.verify.is_none()
                })
        });
        let mut raw = Self {
            name: desc.name,
            architectures: desc.architectures,
            ..Self::default()
        };
        match desc.source {
            Some(dep) if flatten => {
                let flat = RawDependency::from(dep);
                raw.download = flat.download;
                raw.download_sha256 = flat.download_sha256;
                raw.download_sha256_url = flat.download_sha256_url;
                raw.download_temp = flat.download_temp;
                raw.download_type = flat.download_type;
                raw.download_extract_path = flat.download_extract_path;
                raw.download_install_opts = flat.download_install_opts;
            }
            other => raw.source = other,
        }
        raw
    }
}

/// Raw key group for one download slot.
struct RawSlot {
    base: &'static str,
    url: Option<String>,
    sha256: Option<String>,
    sha256_url: Option<String>,
    temp: Option<String>,
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl RawSlot {
    fn into_download(self, name: &str) -> Result<Option<Download>, DescriptorFieldError> {
        let sha256 = nonempty(self.sha256);
        let sha256_url = nonempty(self.sha256_url);
        let temp = nonempty(self.temp);

        let Some(url) = nonempty(self.url) else {
            let orphan = [
                (sha256.is_some(), "_sha256"),
                (sha256_url.is_some(), "_sha256_url"),
                (temp.is_some(), "_temp"),
            ]
            .into_iter()
            .find_map(|(set, suffix)| set.then_some(suffix));
            return match orphan {
                Some(suffix) => Err(DescriptorFieldError::Orphan {
                    name: name.to_string(),
                    key: format!("{}{suffix}", self.base),
                    base: self.base,
                }),
                None => Ok(None),
            };
        };

        let sha256 = sha256
            .map(Sha256Digest::new)
            .transpose()
            .map_err(|source| DescriptorFieldError::Digest {
                name: name.to_string(),
                source,
            })?;

        Ok(Some(Download {
            url,
            sha256,
            sha256_url,
            cache_name: temp,
        }))
    }
}

fn split_download(download: Option<Download>) -> [Option<String>; 4] {
    match download {
        Some(d) => [
            Some(d.url),
            d.sha256.map(|s| s.as_str().to_string()),
            d.sha256_url,
            d.cache_name,
        ],
        None => [None, None, None, None],
    }
}

impl TryFrom<RawDependency> for DependencyDescriptor {
    type Error = DescriptorFieldError;

    fn try_from(raw: RawDependency) -> Result<Self, Self::Error> {
        if let Some(from) = nonempty(raw.expand_from) {
            return Ok(Self::inherited(raw.name, from));
        }

        let name = raw.name;
        let downloads = Downloads {
            any: RawSlot {
                base: "download",
                url: raw.download,
                sha256: raw.download_sha256,
                sha256_url: raw.download_sha256_url,
                temp: raw.download_temp,
            }
            .into_download(&name)?,
            x86: RawSlot {
                base: "download_x86",
                url: raw.download_x86,
                sha256: raw.download_x86_sha256,
                sha256_url: raw.download_x86_sha256_url,
                temp: raw.download_x86_temp,
            }
            .into_download(&name)?,
            x64: RawSlot {
                base: "download_x64",
                url: raw.download_x64,
                sha256: raw.download_x64_sha256,
                sha256_url: raw.download_x64_sha256_url,
                temp: raw.download_x64_temp,
            }
            .into_download(&name)?,
        };

        let verify = nonempty(raw.verify).map(|command| SelfCheck {
            command,
            args: nonempty(raw.verify_opts),
            required_output: raw.required_output,
            required_alert: raw.required_alert,
            preferred_output: raw.preferred_output,
            preferred_alert: raw.preferred_alert,
        });

        Ok(Self::direct(
            name,
            DirectDependency {
                downloads,
                kind: raw.download_type,
                install_path: nonempty(raw.download_extract_path),
                install_args: nonempty(raw.download_install_opts),
                env_paths: raw.env_paths,
                env_extras: raw.env_extras,
                verify,
            },
        ))
    }
}

impl From<DependencyDescriptor> for RawDependency {
    fn from(dep: DependencyDescriptor) -> Self {
        let direct = match dep.source {
            DependencySource::Inherited { from } => {
                return Self {
                    name: dep.name,
                    expand_from: Some(from),
                    ..Self::default()
                };
            }
            DependencySource::Direct(direct) => *direct,
        };

        let [download, download_sha256, download_sha256_url, download_temp] =
            split_download(direct.downloads.any);
        let [download_x86, download_x86_sha256, download_x86_sha256_url, download_x86_temp] =
            split_download(direct.downloads.x86);
        let [download_x64, download_x64_sha256, download_x64_sha256_url, download_x64_temp] =
            split_download(direct.downloads.x64);

        let mut raw = Self {
            name: dep.name,
            expand_from: None,
            download,
            download_sha256,
            download_sha256_url,
            download_temp,
            download_x86,
            download_x86_sha256,
            download_x86_sha256_url,
            download_x86_temp,
            download_x64,
            download_x64_sha256,
            download_x64_sha256_url,
            download_x64_temp,
            download_type: direct.kind,
            download_extract_path: direct.install_path,
            download_install_opts: direct.install_args,
            env_paths: direct.env_paths,
            env_extras: direct.env_extras,
            ..Self::default()
        };

        if let Some(check) = direct.verify {
            raw.verify = Some(check.command);
            raw.verify_opts = check.args;
            raw.required_output = check.required_output;
            raw.required_alert = check.required_alert;
            raw.preferred_output = check.preferred_output;
            raw.preferred_alert = check.preferred_alert;
        }
        raw
    }
}
