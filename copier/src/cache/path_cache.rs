//! Path → fingerprint cache shared by concurrently running build stages.

use dashmap::DashMap;

/// Storage for fingerprints of paths inside prior images.
///
/// Implementations must tolerate concurrent loads and stores from several
/// resolver sessions. Two sessions storing the same key is harmless: the
/// stored fingerprint is a pure function of the image content.
pub trait PathCache: Send + Sync {
    /// Previously stored fingerprint for `path` inside `image_id`.
    fn load(&self, image_id: &str, path: &str) -> Option<String>;

    /// Record the fingerprint of `path` inside `image_id`.
    fn store(&self, image_id: &str, path: &str, fingerprint: &str);
}

/// In-memory [`PathCache`] backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct SharedPathCache {
    entries: DashMap<(String, String), String>,
}

impl SharedPathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl PathCache for SharedPathCache {
    fn load(&self, image_id: &str, path: &str) -> Option<String> {
        self.entries
            .get(&(image_id.to_string(), path.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn store(&self, image_id: &str, path: &str, fingerprint: &str) {
        self.entries.insert(
            (image_id.to_string(), path.to_string()),
            fingerprint.to_string(),
        );
    }
}
