//! Symbolic path placeholders.
//!
//! Descriptors and installer templates refer to workspace locations through
//! a fixed set of `[[NAME]]` markers. No marker is a substring of another,
//! so substituting them one at a time is unambiguous.

/// A substitution token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Workspace root.
    RootPath,
    /// `versions/<base>`.
    BaseVersionDir,
    /// `versions/<base>/deps`.
    DepsDir,
    /// `versions/<base>/<version>`.
    VersionDir,
    /// The specific version as written, e.g. `3.1.0`.
    DottedVersion,
    /// Digits and dots only, at most four components.
    WindowsDottedVersion,
    /// Digits and dots only, at most three components.
    MsiDottedVersion,
    /// Dots replaced by underscores.
    UnderscoreVersion,
    /// Dots replaced by hyphens.
    HyphenVersion,
    /// The pristine extracted source tree.
    SourceOrigDir,
    /// Per-architecture working clone of the source tree.
    SourceTempDir,
    /// Per-architecture harvest output (`out_<arch>`).
    BuildOutputDir,
    /// `versions/<base>/<version>/installers`.
    InstallersDir,
    /// `installers/<arch>`.
    InstallersArchDir,
    /// Directory of the installer template currently being rendered.
    InstallerScriptDir,
    /// Staging directory the installer scripts package from.
    InstallerSourceDir,
}

impl Token {
    /// Every token, in the order a full path map declares them.
    pub const ALL: [Self; 16] = [
        Self::RootPath,
        Self::BaseVersionDir,
        Self::DepsDir,
        Self::VersionDir,
        Self::DottedVersion,
        Self::WindowsDottedVersion,
        Self::MsiDottedVersion,
        Self::UnderscoreVersion,
        Self::HyphenVersion,
        Self::SourceOrigDir,
        Self::SourceTempDir,
        Self::BuildOutputDir,
        Self::InstallersDir,
        Self::InstallersArchDir,
        Self::InstallerScriptDir,
        Self::InstallerSourceDir,
    ];

    /// The literal marker text, brackets included.
    pub fn marker(self) -> &'static str {
        match self {
            Self::RootPath => "[[ROOTPATH]]",
            Self::BaseVersionDir => "[[BASE_VERSION_DIR]]",
            Self::DepsDir => "[[DEPS_DIR]]",
            Self::VersionDir => "[[VERSION_DIR]]",
            Self::DottedVersion => "[[DOTTED_VERSION]]",
            Self::WindowsDottedVersion => "[[WINDOWS_DOTTED_VERSION]]",
            Self::MsiDottedVersion => "[[MSI_DOTTED_VERSION]]",
            Self::UnderscoreVersion => "[[UNDERSCORE_VERSION]]",
            Self::HyphenVersion => "[[HYPHEN_VERSION]]",
            Self::SourceOrigDir => "[[SOURCE_ORIG_DIR]]",
            Self::SourceTempDir => "[[SOURCE_TEMP_DIR]]",
            Self::BuildOutputDir => "[[BUILD_OUTPUT_DIR]]",
            Self::InstallersDir => "[[INSTALLERS_DIR]]",
            Self::InstallersArchDir => "[[INSTALLERS_ARCH_DIR]]",
            Self::InstallerScriptDir => "[[INSTALLER_SCRIPT_DIR]]",
            Self::InstallerSourceDir => "[[INSTALLER_SOURCE_DIR]]",
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.marker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_contains_another() {
        for a in Token::ALL {
            for b in Token::ALL {
                if a != b {
                    assert!(
                        !a.marker().contains(b.marker()),
                        "{a} contains {b}"
                    );
                }
            }
        }
    }
}
