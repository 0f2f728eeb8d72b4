//! Content fingerprints for build sources.
//!
//! A file fingerprint covers the entry's header fields (name, type,
//! permissions, ownership, size, link target) and its bytes. Timestamps are
//! left out so identical content materialized at different times hashes the
//! same. A directory fingerprint combines the sorted fingerprints of every
//! entry beneath it, which makes it independent of readdir order.

use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

use a3s_build_core::error::{BuildError, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::source::Source;

/// Kind tag of single-file fingerprints
pub const FILE_PREFIX: &str = "file";
/// Kind tag of directory fingerprints
pub const DIR_PREFIX: &str = "dir";

/// Fingerprint a path of any kind: directories recursively, everything else
/// as a single file.
pub fn hash_path(source: &Source, rel: &str) -> Result<String> {
    if source.stat(rel)?.is_dir() {
        hash_directory(source, rel)
    } else {
        hash_file(source, rel)
    }
}

/// Fingerprint of a single file, tagged `file:`.
pub fn hash_file(source: &Source, rel: &str) -> Result<String> {
    Ok(format!("{}:{}", FILE_PREFIX, source.hash(rel)?))
}

/// Fingerprint of a directory subtree, tagged `dir:`.
pub fn hash_directory(source: &Source, rel: &str) -> Result<String> {
    let dir = source.full_path(rel)?;
    let mut members = Vec::new();

    for entry in WalkDir::new(&dir).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(e, rel))?;
        let member = source.tree().relative(entry.path())?;
        match source.hash(&member) {
            Ok(sum) => members.push(sum),
            Err(e) => {
                tracing::debug!(path = %member, error = %e, "Skipping unhashable entry");
            }
        }
    }

    Ok(hash_string_slice(DIR_PREFIX, &mut members))
}

/// Combine fingerprints into one, independent of their order.
pub fn hash_string_slice(kind: &str, items: &mut [String]) -> String {
    items.sort();
    format!("{}:{}", kind, sha256_bytes(items.join(",").as_bytes()))
}

/// Hash one entry: header fields, then contents for regular files.
pub(crate) fn hash_entry(full: &Path, name: &str) -> io::Result<String> {
    let meta = std::fs::symlink_metadata(full)?;
    let mut hasher = Sha256::new();

    for (key, value) in header_fields(full, name, &meta)? {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    if meta.file_type().is_file() {
        let mut file = File::open(full)?;
        io::copy(&mut file, &mut hasher)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

fn header_fields(full: &Path, name: &str, meta: &Metadata) -> io::Result<Vec<(&'static str, String)>> {
    let file_type = meta.file_type();
    let (typeflag, size, linkname) = if file_type.is_symlink() {
        let target = std::fs::read_link(full)?;
        ('2', 0, target.to_string_lossy().into_owned())
    } else if file_type.is_dir() {
        ('5', 0, String::new())
    } else if file_type.is_file() {
        ('0', meta.len(), String::new())
    } else {
        ('?', 0, String::new())
    };

    let (mode, uid, gid) = ownership(meta);
    Ok(vec![
        ("name", name.to_string()),
        ("mode", format!("{:o}", mode)),
        ("uid", uid.to_string()),
        ("gid", gid.to_string()),
        ("size", size.to_string()),
        ("typeflag", typeflag.to_string()),
        ("linkname", linkname),
    ])
}

#[cfg(unix)]
fn ownership(meta: &Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.mode() & 0o7777, meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn ownership(meta: &Metadata) -> (u32, u32, u32) {
    let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    (mode, 0, 0)
}

fn walk_error(err: walkdir::Error, rel: &str) -> BuildError {
    let io_err: io::Error = err.into();
    if io_err.kind() == io::ErrorKind::NotFound {
        BuildError::NotFound {
            path: rel.to_string(),
        }
    } else {
        io_err.into()
    }
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
