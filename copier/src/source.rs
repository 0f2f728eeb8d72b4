//! Build sources: the local context, a prior image layer, or a downloaded URL.
//!
//! All three are directory trees on disk. They share one capability set
//! (`root`, `stat`, `hash`) and differ only in what they own: a remote
//! source owns the temporary directory its download lives in.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::hash::hash_entry;

/// Upper bound on symlinks followed while resolving a single path.
const MAX_SYMLINK_DEPTH: usize = 255;

/// A directory tree whose entry hashes are computed on first use.
#[derive(Debug)]
pub struct LazySource {
    root: PathBuf,
    sums: Mutex<HashMap<String, String>>,
}

impl LazySource {
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            BuildError::Layer(format!(
                "failed to create context for copy from {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            sums: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel`, following symlinks without leaving the root.
    pub fn full_path(&self, rel: &str) -> Result<PathBuf> {
        follow_symlink_in_scope(&join_under(&self.root, rel), &self.root)
    }

    /// Metadata of `rel` after scoped symlink resolution.
    pub fn stat(&self, rel: &str) -> Result<Metadata> {
        let full = self.full_path(rel)?;
        std::fs::metadata(&full).map_err(|e| not_found_or(e, rel))
    }

    /// Fingerprint of the single entry at `rel` (header fields and, for
    /// regular files, contents).
    pub fn hash(&self, rel: &str) -> Result<String> {
        let full = self.full_path(rel)?;
        std::fs::symlink_metadata(&full).map_err(|e| not_found_or(e, rel))?;
        let resolved = self.relative(&full)?;

        if let Some(sum) = self.sums.lock().get(&resolved) {
            return Ok(sum.clone());
        }
        let sum = hash_entry(&full, &resolved).map_err(|e| not_found_or(e, rel))?;
        self.sums.lock().insert(resolved, sum.clone());
        Ok(sum)
    }

    /// Root-relative, slash-separated form of an absolute path inside the root.
    pub fn relative(&self, full: &Path) -> Result<String> {
        let rel = full.strip_prefix(&self.root).map_err(|_| {
            BuildError::InvalidInstruction(format!(
                "path {} is outside of source root",
                full.display()
            ))
        })?;
        Ok(rel.to_string_lossy().into_owned())
    }
}

/// A source of files for a COPY or ADD instruction.
#[derive(Debug)]
pub enum Source {
    /// The local build context
    Context(LazySource),
    /// A read-write layer on top of a prior image or build stage
    ImageLayer { tree: LazySource, image_id: String },
    /// A URL downloaded into a temporary directory owned by this source
    Remote { tree: LazySource, dir: TempDir },
}

impl Source {
    /// Wrap a build context directory.
    pub fn context(root: &Path) -> Result<Self> {
        Ok(Source::Context(LazySource::new(root)?))
    }

    pub fn tree(&self) -> &LazySource {
        match self {
            Source::Context(tree) => tree,
            Source::ImageLayer { tree, .. } => tree,
            Source::Remote { tree, .. } => tree,
        }
    }

    pub fn root(&self) -> &Path {
        self.tree().root()
    }

    pub fn stat(&self, rel: &str) -> Result<Metadata> {
        self.tree().stat(rel)
    }

    pub fn hash(&self, rel: &str) -> Result<String> {
        self.tree().hash(rel)
    }

    pub fn full_path(&self, rel: &str) -> Result<PathBuf> {
        self.tree().full_path(rel)
    }

    /// Identity of the image behind this source, if it is an image layer.
    pub fn image_id(&self) -> Option<&str> {
        match self {
            Source::ImageLayer { image_id, .. } if !image_id.is_empty() => Some(image_id),
            _ => None,
        }
    }

    /// Remove any temporary storage owned by this source.
    pub fn close(self) -> io::Result<()> {
        match self {
            Source::Remote { dir, .. } => dir.close(),
            _ => Ok(()),
        }
    }
}

/// Join a source-relative path under `root`. Leading separators in `rel`
/// are dropped so an absolute-looking path can't replace the root.
pub fn join_under(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

/// Resolve `path` through symlinks as if `root` were `/`.
///
/// Absolute link targets restart from `root`, and `..` never climbs above
/// it, so the result always lies inside `root`. Missing components are kept
/// as-is, which lets callers resolve destinations that don't exist yet.
pub fn follow_symlink_in_scope(path: &Path, root: &Path) -> Result<PathBuf> {
    let rel = path.strip_prefix(root).map_err(|_| {
        BuildError::InvalidInstruction(format!(
            "path {} is not in root {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut pending = split_components(rel);
    let mut resolved = PathBuf::new();
    let mut links = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&part);
        let full = root.join(&candidate);
        match std::fs::symlink_metadata(&full) {
            Ok(meta) if meta.file_type().is_symlink() => {
                links += 1;
                if links > MAX_SYMLINK_DEPTH {
                    return Err(BuildError::InvalidInstruction(format!(
                        "too many links while resolving {}",
                        path.display()
                    )));
                }
                let target = std::fs::read_link(&full)?;
                if target.is_absolute() {
                    resolved = PathBuf::new();
                }
                let mut next = split_components(&target);
                next.extend(pending.drain(..));
                pending = next;
            }
            Ok(_) => resolved = candidate,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = candidate,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(root.join(resolved))
}

fn split_components(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}

fn not_found_or(err: io::Error, rel: &str) -> BuildError {
    if err.kind() == io::ErrorKind::NotFound {
        BuildError::NotFound {
            path: rel.to_string(),
        }
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_full_path_plain_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let full = source.full_path("a.txt").unwrap();
        assert_eq!(full, source.root().join("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_symlink_stays_in_root() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("etc")).unwrap();
        fs::write(tmp.path().join("etc/passwd"), "root:x:0:0::/root:/bin/sh").unwrap();
        std::os::unix::fs::symlink("/etc/passwd", tmp.path().join("link")).unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let full = source.full_path("link").unwrap();
        assert_eq!(full, source.root().join("etc/passwd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_escape_is_clamped() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("../../../../outside", tmp.path().join("sub/escape")).unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let full = source.full_path("sub/escape").unwrap();
        assert_eq!(full, source.root().join("outside"));
        assert!(full.starts_with(source.root()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("b", tmp.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", tmp.path().join("b")).unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let err = source.full_path("a").unwrap_err();
        assert!(err.to_string().contains("too many links"));
    }

    #[test]
    fn test_dotdot_in_request_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let full = source.full_path("../../etc/shadow").unwrap();
        assert_eq!(full, source.root().join("etc/shadow"));
    }

    #[test]
    fn test_stat_missing_reports_relative_path() {
        let tmp = TempDir::new().unwrap();
        let source = Source::context(tmp.path()).unwrap();

        let err = source.stat("missing/file").unwrap_err();
        assert_eq!(err.to_string(), "stat missing/file: file does not exist");
    }

    #[test]
    fn test_hash_is_memoized() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "one").unwrap();
        let source = LazySource::new(tmp.path()).unwrap();

        let first = source.hash("a.txt").unwrap();
        fs::write(tmp.path().join("a.txt"), "two").unwrap();
        let second = source.hash("a.txt").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_image_id_only_for_image_layers() {
        let tmp = TempDir::new().unwrap();
        let context = Source::context(tmp.path()).unwrap();
        assert!(context.image_id().is_none());

        let layer = Source::ImageLayer {
            tree: LazySource::new(tmp.path()).unwrap(),
            image_id: "sha256:abc".to_string(),
        };
        assert_eq!(layer.image_id(), Some("sha256:abc"));

        let anonymous = Source::ImageLayer {
            tree: LazySource::new(tmp.path()).unwrap(),
            image_id: String::new(),
        };
        assert!(anonymous.image_id().is_none());
    }

    #[test]
    fn test_remote_close_removes_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let source = Source::Remote {
            tree: LazySource::new(&path).unwrap(),
            dir,
        };
        source.close().unwrap();
        assert!(!path.exists());
    }
}
