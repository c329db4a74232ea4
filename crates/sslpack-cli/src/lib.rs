//! sslpack - OpenSSL installer builds for Windows
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Downloads and verifies toolchain dependencies, builds every OpenSSL
//! runtime variant for each architecture, and packages the result with
//! MinGW dlltool, Inno Setup and the WiX toolset.
//!
//! # Workspace Layout
//!
//! ```text
//! <root>/
//! ├── templates/<base>/info.json         # Version descriptor
//! ├── templates/<base>/<arch>/            # Installer script templates
//! ├── temp/                               # Download cache and logs
//! └── versions/<base>/
//!     ├── deps/installed.json             # Installed dependency manifest
//!     ├── profiles/<arch>.json            # Saved build environments
//!     └── <version>/                      # Sources, builds and installers
//! ```
//!
//! # Workflow
//!
//! `init` → `save-profile` (once per architecture, from a configured
//! toolchain shell) → `prepare` → `build` or `build-all`.

pub mod cmd;
pub mod ui;

pub use sslpack_core::USER_AGENT;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sslpack")]
#[command(author, version, about = "sslpack - build OpenSSL installers for Windows")]
pub struct Cli {
    /// Suppress most output. Useful for capturing JSON output
    #[arg(short = 's', long, global = true)]
    pub quiet: bool,

    /// Fail when a dependency self-check misses its preferred output
    #[arg(long, global = true)]
    pub strict: bool,

    /// Workspace root containing `templates/` (defaults to the current directory)
    #[arg(long, global = true, env = sslpack_core::workspace::ROOT_ENV)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download, verify and install the dependencies of a base version
    Init {
        /// Base version (a directory under templates/)
        base: String,
    },
    /// Check that every download of a base version works and matches its digest
    InitTest {
        /// Base version
        base: String,
    },
    /// Verify dependencies and save the current environment for an architecture
    SaveProfile {
        /// Base version
        base: String,
        /// Architecture id, e.g. x64
        arch: String,
    },
    /// Fetch a release source tarball and generate its installer scripts
    Prepare {
        /// Release version of a supported base version, e.g. 3.1.4
        version: String,
    },
    /// Build a prepared version for one architecture
    Build {
        /// Prepared release version
        version: String,
        /// Architecture with a saved environment profile
        arch: String,
    },
    /// Build prepared versions for every profiled architecture in parallel
    BuildAll {
        /// Prepared release versions
        #[arg(required = true)]
        versions: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["sslpack", "build", "3.1.4", "x64", "-s", "--strict"]);
        assert!(cli.quiet);
        assert!(cli.strict);
        match cli.command {
            Commands::Build { version, arch } => {
                assert_eq!(version, "3.1.4");
                assert_eq!(arch, "x64");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn subcommands_are_kebab_case() {
        let cli = Cli::parse_from(["sslpack", "init-test", "3.1"]);
        assert!(matches!(cli.command, Commands::InitTest { base } if base == "3.1"));

        let cli = Cli::parse_from(["sslpack", "build-all", "1.1.1w", "3.1.4"]);
        assert!(
            matches!(cli.command, Commands::BuildAll { versions } if versions == ["1.1.1w", "3.1.4"])
        );
    }

    #[test]
    fn build_all_requires_a_version() {
        assert!(Cli::try_parse_from(["sslpack", "build-all"]).is_err());
    }
}
