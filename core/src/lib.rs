//! A3S Build Core - Foundational Types
//!
//! Error taxonomy, configuration and identity types shared by the
//! COPY/ADD source resolver and its command-line harness.

pub mod config;
pub mod error;
pub mod identity;

// Re-export commonly used types
pub use config::{CopyConfig, LogLevel};
pub use error::{BuildError, Result};
pub use identity::{IdMap, Identity, IdentityMapping};

/// A3S Build version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
