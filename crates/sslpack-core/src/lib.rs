pub mod builder;
pub mod config;
pub mod environment;
pub mod error;
pub mod io;
pub mod loader;
pub mod manifest;
pub mod package;
pub mod runner;
pub mod supervisor;
pub mod template;
pub mod workspace;

pub mod reporter;

pub use error::{Error, Result};
pub use reporter::{NullReporter, Reporter};
pub use workspace::Workspace;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("sslpack-core/", env!("CARGO_PKG_VERSION"));
