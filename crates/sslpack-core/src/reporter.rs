//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific console implementation.

use std::path::Path;

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Fetching", "Installing").
    fn section(&self, title: &str);

    /// Updates the progress of a download.
    fn downloading(&self, name: &str, current: u64, total: Option<u64>);

    /// A download finished and passed its integrity check.
    fn verified(&self, name: &str, path: &Path);

    /// An archive or installer is being unpacked into `dest`.
    fn extracting(&self, name: &str, dest: &Path);

    /// Marks a dependency operation as successfully completed.
    fn done(&self, name: &str, detail: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        (**self).downloading(name, current, total)
    }
    fn verified(&self, name: &str, path: &Path) {
        (**self).verified(name, path)
    }
    fn extracting(&self, name: &str, dest: &Path) {
        (**self).extracting(name, dest)
    }
    fn done(&self, name: &str, detail: &str) {
        (**self).done(name, detail)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn success(&self, msg: &str) {
        (**self).success(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn verified(&self, _: &str, _: &Path) {}
    fn extracting(&self, _: &str, _: &Path) {}
    fn done(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
