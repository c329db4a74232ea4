//! Error types for sslpack-core.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine.
///
/// Every variant is fatal for the operation that raised it. A missing
/// preferred self-check output only becomes an error under strict policy.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed descriptor, missing field, or unresolvable inheritance.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Transport failure or non-success HTTP status.
    #[error("Network error fetching '{url}': {message}")]
    Network { url: String, message: String },

    /// Computed digest differs from the declared one.
    #[error("Integrity error: the SHA-256 for '{}' is '{actual}' but expected '{expected}'", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Archive could not be opened or unpacked, or an installer reported errors.
    #[error("Extraction error for '{}': {message}", .archive.display())]
    Extraction { archive: PathBuf, message: String },

    /// An external command could not be spawned.
    #[error("Failed to start process '{command}': {source}")]
    ProcessStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A self-check did not print its required output.
    #[error("Required output was not returned by '{command}'. {alert}{}", errors_suffix(.errors))]
    MissingRequired {
        command: String,
        alert: String,
        errors: String,
    },

    /// A self-check did not print its preferred output (strict mode only).
    #[error("Preferred output was not returned by '{command}'. {alert}{}", errors_suffix(.errors))]
    MissingPreferred {
        command: String,
        alert: String,
        errors: String,
    },

    /// An expected stage artifact is missing.
    #[error("Build stage '{stage}' failed: {message}")]
    BuildStage { stage: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn errors_suffix(errors: &str) -> String {
    if errors.trim().is_empty() {
        String::new()
    } else {
        format!("\nErrors:\n{}", errors.trim_end())
    }
}

impl Error {
    /// Create a descriptor error
    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::Descriptor(message.into())
    }

    /// Create a network error
    pub fn network(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error
    pub fn extraction(archive: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        Self::Extraction {
            archive: archive.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a process start error
    pub fn process_start(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::ProcessStart {
            command: command.into(),
            source,
        }
    }

    /// Create a build stage error
    pub fn build_stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildStage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Attach the path an I/O error concerns, so the message names it.
    pub fn io_at(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display();
        Self::Io(std::io::Error::new(err.kind(), format!("{path}: {err}")))
    }
}
