//! Ownership handling for copied files.
//!
//! Covers `--chown` parsing (numeric ids or names looked up in the
//! destination's `/etc/passwd` and `/etc/group`), translation through the
//! user-namespace mapping, and changing ownership of copied trees.

use std::path::{Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};
use a3s_build_core::identity::{Identity, IdentityMapping};
use walkdir::WalkDir;

use crate::archive::lchown;
use crate::perform::is_existing_directory;
use crate::source::{follow_symlink_in_scope, join_under};

/// Changes ownership of files produced by a copy.
pub trait IdentityRemapper: Send + Sync {
    /// Chown every path in `destination` that corresponds to an entry under
    /// `source`. When `override_skip` is false and `destination` already
    /// existed as a directory, its top-level ownership is left alone.
    fn chown_tree(
        &self,
        source: &Path,
        destination: &Path,
        identity: Identity,
        override_skip: bool,
    ) -> Result<()>;
}

/// [`IdentityRemapper`] using `lchown(2)`, so symlinks themselves are
/// re-owned rather than their targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LchownRemapper;

impl IdentityRemapper for LchownRemapper {
    fn chown_tree(
        &self,
        source: &Path,
        destination: &Path,
        identity: Identity,
        override_skip: bool,
    ) -> Result<()> {
        fix_permissions(source, destination, identity, override_skip)
    }
}

/// Walk `source` and chown the matching paths under `destination`.
///
/// The walk runs over the source, not the destination, so entries that
/// were already in the destination and untouched by the copy keep their
/// owner.
pub fn fix_permissions(
    source: &Path,
    destination: &Path,
    identity: Identity,
    override_skip: bool,
) -> Result<()> {
    let skip_chown_root = !override_skip && is_existing_directory(destination)?;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| BuildError::Ownership(e.to_string()))?;
        if skip_chown_root && entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| BuildError::Ownership(e.to_string()))?;
        let target = if rel.as_os_str().is_empty() {
            destination.to_path_buf()
        } else {
            destination.join(rel)
        };
        lchown(&target, identity)?;
    }
    Ok(())
}

/// Create `path` and any missing parents with `mode`, chowning them to
/// `identity`. With `only_new`, directories that already existed keep their
/// owner.
pub fn mkdir_all_and_chown(path: &Path, mode: u32, identity: Identity, only_new: bool) -> Result<()> {
    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cursor = Some(path);
    while let Some(dir) = cursor {
        if dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        cursor = dir.parent();
    }

    create_dir_all_with_mode(path, mode)?;

    let targets: Vec<PathBuf> = if only_new {
        missing
    } else {
        vec![path.to_path_buf()]
    };
    for dir in targets.iter().rev() {
        lchown(dir, identity)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_all_with_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| BuildError::CopyFailed {
            op: "create new directory".to_string(),
            message: format!("{}: {}", path.display(), e),
        })
}

#[cfg(not(unix))]
fn create_dir_all_with_mode(path: &Path, _mode: u32) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| BuildError::CopyFailed {
        op: "create new directory".to_string(),
        message: format!("{}: {}", path.display(), e),
    })
}

/// Resolve a `--chown` value (`user`, `user:group`, names or numbers)
/// against the container filesystem at `container_root` and translate it
/// to host ids.
///
/// A bare `user` is also used as the group.
pub fn parse_chown_flag(
    chown: &str,
    container_root: &Path,
    mapping: &IdentityMapping,
) -> Result<Identity> {
    let parts: Vec<&str> = chown.split(':').collect();
    let (user, group) = match parts.as_slice() {
        [user] => (*user, *user),
        [user, group] => (*user, *group),
        _ => {
            return Err(BuildError::Ownership(format!(
                "invalid chown string format: {}",
                chown
            )))
        }
    };

    let passwd = follow_symlink_in_scope(&join_under(container_root, "etc/passwd"), container_root)?;
    let group_file = follow_symlink_in_scope(&join_under(container_root, "etc/group"), container_root)?;

    let uid = lookup_id(user, &passwd).map_err(|e| {
        BuildError::Ownership(format!("can't find uid for user {}: {}", user, e))
    })?;
    let gid = lookup_id(group, &group_file).map_err(|e| {
        BuildError::Ownership(format!("can't find gid for group {}: {}", group, e))
    })?;

    mapping.to_host(Identity::new(uid, gid))
}

/// Numeric ids are used verbatim; names are looked up in a passwd- or
/// group-format file (`name:x:id:...`).
fn lookup_id(name: &str, db: &Path) -> std::result::Result<u32, String> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(id);
    }
    let db_name = db.file_name().unwrap_or_default().to_string_lossy();
    let content = std::fs::read_to_string(db).map_err(|e| format!("cannot read {}: {}", db_name, e))?;

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            let entry_name = fields.next()?;
            let _password = fields.next()?;
            let id = fields.next()?;
            (entry_name == name).then(|| id.parse::<u32>().ok()).flatten()
        })
        .ok_or_else(|| format!("no matching entries in {} file", db_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_build_core::identity::IdMap;
    use std::fs;
    use tempfile::TempDir;

    fn rootfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("etc")).unwrap();
        fs::write(
            tmp.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\n# comment\napp:x:1000:1000::/home/app:/bin/sh\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("etc/group"),
            "root:x:0:\nstaff:x:50:app\n",
        )
        .unwrap();
        tmp
    }

    fn current_identity() -> Identity {
        // SAFETY: getuid/getgid have no preconditions and cannot fail.
        unsafe { Identity::new(libc::getuid(), libc::getgid()) }
    }

    #[test]
    fn test_parse_chown_numeric() {
        let tmp = TempDir::new().unwrap();
        let id = parse_chown_flag("1001:1002", tmp.path(), &IdentityMapping::default()).unwrap();
        assert_eq!(id, Identity::new(1001, 1002));
    }

    #[test]
    fn test_parse_chown_user_only_reuses_user_as_group() {
        let tmp = TempDir::new().unwrap();
        let id = parse_chown_flag("42", tmp.path(), &IdentityMapping::default()).unwrap();
        assert_eq!(id, Identity::new(42, 42));
    }

    #[test]
    fn test_parse_chown_names() {
        let tmp = rootfs();
        let id = parse_chown_flag("app:staff", tmp.path(), &IdentityMapping::default()).unwrap();
        assert_eq!(id, Identity::new(1000, 50));
    }

    #[test]
    fn test_parse_chown_unknown_user() {
        let tmp = rootfs();
        let err = parse_chown_flag("ghost", tmp.path(), &IdentityMapping::default()).unwrap_err();
        assert!(err.to_string().contains("can't find uid for user ghost"));
        assert!(err.to_string().contains("no matching entries in passwd file"));
    }

    #[test]
    fn test_parse_chown_unknown_group_names_group_file() {
        let tmp = rootfs();
        let err = parse_chown_flag("app:ghosts", tmp.path(), &IdentityMapping::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("can't find gid for group ghosts"));
        assert!(message.contains("no matching entries in group file"));
    }

    #[test]
    fn test_parse_chown_name_without_passwd() {
        let tmp = TempDir::new().unwrap();
        let err = parse_chown_flag("app", tmp.path(), &IdentityMapping::default()).unwrap_err();
        assert!(err.to_string().contains("can't find uid for user app"));
    }

    #[test]
    fn test_parse_chown_too_many_parts() {
        let tmp = TempDir::new().unwrap();
        let err = parse_chown_flag("a:b:c", tmp.path(), &IdentityMapping::default()).unwrap_err();
        assert!(err.to_string().contains("invalid chown string format: a:b:c"));
    }

    #[test]
    fn test_parse_chown_translates_through_mapping() {
        let tmp = rootfs();
        let mapping = IdentityMapping {
            uid_maps: vec![IdMap {
                container_id: 0,
                host_id: 100_000,
                size: 65_536,
            }],
            gid_maps: vec![IdMap {
                container_id: 0,
                host_id: 100_000,
                size: 65_536,
            }],
        };
        let id = parse_chown_flag("app:root", tmp.path(), &mapping).unwrap();
        assert_eq!(id, Identity::new(101_000, 100_000));
    }

    #[cfg(unix)]
    #[test]
    fn test_mkdir_all_and_chown_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/c");
        mkdir_all_and_chown(&path, 0o755, current_identity(), true).unwrap();
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_fix_permissions_walks_source() {
        use std::os::unix::fs::MetadataExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/f"), "f").unwrap();
        let dst = tmp.path().join("dst");
        fs::create_dir_all(dst.join("sub")).unwrap();
        fs::write(dst.join("sub/f"), "f").unwrap();

        let me = current_identity();
        fix_permissions(&src, &dst, me, false).unwrap();
        assert_eq!(fs::metadata(dst.join("sub/f")).unwrap().uid(), me.uid);
    }
}
