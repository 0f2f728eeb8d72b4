//! Fingerprint caching for prior-image sources.
//!
//! Image content is immutable once identified, so a fingerprint computed
//! for `(image id, path)` stays valid for the life of the process.

pub mod path_cache;

pub use path_cache::{PathCache, SharedPathCache};
