//! Descriptor types and wire formats shared by the sslpack crates.
//!
//! Everything that is read from or written to disk in a stable shape lives
//! here: version descriptors, validated digests, substitution tokens and the
//! ordered-object serde adapter.

pub mod arch;
pub mod descriptor;
pub mod hash;
pub mod ordered;
pub mod token;

// Re-exports
pub use arch::*;
pub use descriptor::*;
pub use hash::*;
pub use token::Token;
