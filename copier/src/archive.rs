//! Tar-based copy and extraction.
//!
//! Copies are made by streaming a tar of the source into the destination so
//! that permissions, symlinks and id remapping are handled in one place.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};
use a3s_build_core::identity::{Identity, IdentityMapping};
use walkdir::WalkDir;

/// Options for [`Archiver::untar`].
#[derive(Debug, Clone, Default)]
pub struct TarOptions {
    /// Translation applied to the uid/gid recorded in each entry
    pub id_mapping: IdentityMapping,
    /// Owner forced onto every extracted entry, overriding the archive
    pub chown: Option<Identity>,
    /// Skip extended attributes entirely. When false they are restored and a
    /// failure to set one fails the extraction.
    pub best_effort_xattrs: bool,
}

/// Archive primitives consumed by the copy executor.
pub trait Archiver: Send + Sync {
    /// Copy a single file to `dst`, creating parent directories.
    fn copy_file_with_tar(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Copy the contents of directory `src` into directory `dst`.
    fn copy_with_tar(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Extract a (possibly compressed) tar stream into `dst`.
    fn untar(&self, reader: &mut dyn Read, dst: &Path, options: &TarOptions) -> Result<()>;

    /// Whether `path` is a tar archive, compressed or not.
    fn is_archive_path(&self, path: &Path) -> bool;

    /// Identity mapping applied to copied entries.
    fn id_mapping(&self) -> &IdentityMapping;
}

/// [`Archiver`] built on the `tar` crate with gzip, bzip2 and xz support.
#[derive(Debug, Clone, Default)]
pub struct TarArchiver {
    id_mapping: IdentityMapping,
    best_effort_xattrs: bool,
}

impl TarArchiver {
    pub fn new(id_mapping: IdentityMapping, best_effort_xattrs: bool) -> Self {
        Self {
            id_mapping,
            best_effort_xattrs,
        }
    }

    fn copy_options(&self) -> TarOptions {
        TarOptions {
            id_mapping: self.id_mapping.clone(),
            chown: None,
            best_effort_xattrs: self.best_effort_xattrs,
        }
    }

    /// Pack `entries` (source path, archive name) into an anonymous temp file.
    fn pack(&self, entries: &[(PathBuf, PathBuf)]) -> Result<File> {
        let file = tempfile::tempfile()?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);
        for (path, name) in entries {
            builder.append_path_with_name(path, name).map_err(|e| {
                BuildError::CopyFailed {
                    op: "archive source".to_string(),
                    message: format!("{}: {}", path.display(), e),
                }
            })?;
        }
        let mut file = builder.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

impl Archiver for TarArchiver {
    fn copy_file_with_tar(&self, src: &Path, dst: &Path) -> Result<()> {
        let name = dst.file_name().ok_or_else(|| BuildError::CopyFailed {
            op: "copy file".to_string(),
            message: format!("invalid destination {}", dst.display()),
        })?;
        let parent = dst.parent().unwrap_or_else(|| Path::new("/"));
        std::fs::create_dir_all(parent)?;

        let mut file = self.pack(&[(src.to_path_buf(), PathBuf::from(name))])?;
        self.untar(&mut file, parent, &self.copy_options())
    }

    fn copy_with_tar(&self, src: &Path, dst: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(src)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
        {
            let entry = entry.map_err(|e| BuildError::Io(e.into()))?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| BuildError::CopyFailed {
                    op: "copy directory".to_string(),
                    message: e.to_string(),
                })?
                .to_path_buf();
            entries.push((entry.path().to_path_buf(), rel));
        }

        std::fs::create_dir_all(dst)?;
        let mut file = self.pack(&entries)?;
        self.untar(&mut file, dst, &self.copy_options())
    }

    fn untar(&self, reader: &mut dyn Read, dst: &Path, options: &TarOptions) -> Result<()> {
        std::fs::create_dir_all(dst)?;

        // Sniff compression from the leading bytes
        let mut archive = tar::Archive::new(decompress_stream(reader)?);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_overwrite(true);
        archive.set_unpack_xattrs(!options.best_effort_xattrs);

        let remap_ids = options.chown.is_some() || !options.id_mapping.is_empty() || is_root();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            if !entry.unpack_in(dst)? {
                tracing::debug!(path = %path.display(), "Skipped archive entry outside destination");
                continue;
            }
            if !remap_ids {
                continue;
            }

            // Blank numeric fields read as 0
            let owner = match options.chown {
                Some(owner) => owner,
                None => {
                    let header = entry.header();
                    let recorded = Identity::new(
                        header.uid().unwrap_or(0) as u32,
                        header.gid().unwrap_or(0) as u32,
                    );
                    options.id_mapping.to_host(recorded)?
                }
            };
            // Chown the path unpack_in wrote, never the raw entry name
            let target = dst.join(confined_entry_path(&path));
            if target != dst {
                lchown(&target, owner)?;
            }
        }

        Ok(())
    }

    fn is_archive_path(&self, path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let Ok(reader) = decompress_stream(&mut file) else {
            return false;
        };
        let mut archive = tar::Archive::new(reader);
        let is_tar = match archive.entries() {
            Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
            Err(_) => false,
        };
        is_tar
    }

    fn id_mapping(&self) -> &IdentityMapping {
        &self.id_mapping
    }
}

/// Entry path reduced to its normal components, as `unpack_in` lays it out.
fn confined_entry_path(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Compression formats recognised by their leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Uncompressed,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(&[0x1f, 0x8b, 0x08]) {
            Compression::Gzip
        } else if header.starts_with(b"BZh") {
            Compression::Bzip2
        } else if header.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Compression::Xz
        } else {
            Compression::Uncompressed
        }
    }
}

/// Wrap `reader` in the decompressor matching its magic bytes.
pub fn decompress_stream<'a>(reader: &'a mut dyn Read) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let compression = Compression::detect(buffered.fill_buf()?);
    Ok(match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(buffered)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(buffered)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(buffered)),
        Compression::Uncompressed => Box::new(buffered),
    })
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(unix)]
pub(crate) fn lchown(path: &Path, owner: Identity) -> Result<()> {
    std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid)).map_err(|e| {
        BuildError::Ownership(format!(
            "failed to chown {} to {}: {}",
            path.display(),
            owner,
            e
        ))
    })
}

#[cfg(not(unix))]
pub(crate) fn lchown(_path: &Path, _owner: Identity) -> Result<()> {
    Ok(())
}
