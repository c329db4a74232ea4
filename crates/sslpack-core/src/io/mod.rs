//! Network, integrity and archive I/O, and the install pipeline built on them.

pub mod digest;
pub mod download;
pub mod extract;
pub mod install;

pub use digest::DigestCache;
pub use download::{Fetcher, HttpFetcher};
pub use extract::{ArchiveExtractor, Extractor};
pub use install::{InstallOutcome, Installer};
