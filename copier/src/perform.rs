//! Applying resolved sources to the destination filesystem.

use std::fs::File;
use std::path::Path;

use a3s_build_core::error::{BuildError, Result};
use a3s_build_core::identity::{Identity, IdentityMapping};

use crate::archive::{Archiver, TarOptions};
use crate::copier::{normalize_dest, CopyInfo, CopyInstruction};
use crate::idtools::{mkdir_all_and_chown, parse_chown_flag, IdentityRemapper};

/// Per-instruction settings for [`perform_copy_for_info`].
pub struct CopyFileOptions<'a> {
    /// Extract recognised archives instead of copying them (ADD)
    pub decompress: bool,
    /// Owner for the copied files; `None` keeps the owners from the source
    pub identity: Option<Identity>,
    pub archiver: &'a dyn Archiver,
    pub remapper: &'a dyn IdentityRemapper,
}

/// Copy one resolved source to `dest`.
///
/// Directories are merged into the destination. Archives are unpacked when
/// `decompress` is set and the source allows it. Everything else is copied
/// as a single file, into `dest` itself or, if `dest` is a directory or is
/// declared with a trailing `/`, to `dest/<basename>`.
pub fn perform_copy_for_info(
    dest: &CopyInfo,
    source: &CopyInfo,
    options: &CopyFileOptions<'_>,
) -> Result<()> {
    let src_path = source.full_path()?;
    let mut dest_path = dest.full_path()?;

    let meta = std::fs::metadata(&src_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BuildError::NotFound {
                path: source.path.clone(),
            }
        } else {
            e.into()
        }
    })?;

    if meta.is_dir() {
        return copy_directory(options, &src_path, &dest_path);
    }

    if options.decompress && !source.no_decompress && options.archiver.is_archive_path(&src_path) {
        let mut file = File::open(&src_path)?;
        tracing::debug!(
            source = %source.path,
            dest = %dest_path.display(),
            "Extracting archive"
        );
        let tar_options = TarOptions {
            id_mapping: options.archiver.id_mapping().clone(),
            chown: options.identity,
            best_effort_xattrs: true,
        };
        return options
            .archiver
            .untar(&mut file, &dest_path, &tar_options)
            .map_err(|e| copy_failed("extract archive", e));
    }

    // The declared path keeps the trailing slash that `dest_path` lost.
    if is_existing_directory(&dest_path)? || dest.path.ends_with('/') {
        // Use the declared name so a symlinked source keeps its own name.
        let base = Path::new(&source.path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        dest_path = dest_path.join(base);
    }
    copy_file(options, &src_path, &dest_path)
}

fn copy_directory(options: &CopyFileOptions<'_>, source: &Path, dest: &Path) -> Result<()> {
    let dest_exists = is_existing_directory(dest).map_err(|e| copy_failed("query destination path", e))?;

    options
        .archiver
        .copy_with_tar(source, dest)
        .map_err(|e| copy_failed("copy directory", e))?;

    match options.identity {
        Some(identity) => options
            .remapper
            .chown_tree(source, dest, identity, !dest_exists),
        None => Ok(()),
    }
}

fn copy_file(options: &CopyFileOptions<'_>, source: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("/"));
    match options.identity {
        Some(identity) => mkdir_all_and_chown(parent, 0o755, identity, true)?,
        None => std::fs::create_dir_all(parent).map_err(|e| BuildError::CopyFailed {
            op: "create new directory".to_string(),
            message: format!("{}: {}", parent.display(), e),
        })?,
    }

    options
        .archiver
        .copy_file_with_tar(source, dest)
        .map_err(|e| copy_failed("copy file", e))?;

    match options.identity {
        Some(identity) => options.remapper.chown_tree(source, dest, identity, false),
        None => Ok(()),
    }
}

fn copy_failed(op: &str, err: BuildError) -> BuildError {
    match err {
        err @ (BuildError::CopyFailed { .. } | BuildError::Ownership(_)) => err,
        other => BuildError::CopyFailed {
            op: op.to_string(),
            message: other.to_string(),
        },
    }
}

/// Whether `path` exists and is a directory (following symlinks).
pub fn is_existing_directory(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Apply a resolved instruction to the filesystem rooted at `dest_root`.
///
/// A relative destination is taken relative to `workdir`. The owner comes
/// from `--chown` (resolved against `dest_root`'s user and group databases
/// and translated through `mapping`) unless ownership is preserved.
pub fn perform_copy(
    inst: &CopyInstruction,
    dest_root: &Path,
    workdir: &str,
    archiver: &dyn Archiver,
    remapper: &dyn IdentityRemapper,
    mapping: &IdentityMapping,
) -> Result<()> {
    apply_instruction(inst, dest_root, workdir, archiver, remapper, mapping)
        .map_err(|e| e.in_instruction(&inst.cmd_name))
}

fn apply_instruction(
    inst: &CopyInstruction,
    dest_root: &Path,
    workdir: &str,
    archiver: &dyn Archiver,
    remapper: &dyn IdentityRemapper,
    mapping: &IdentityMapping,
) -> Result<()> {
    let identity = match (&inst.chown, inst.preserve_ownership) {
        (_, true) => None,
        (Some(chown), false) if !chown.is_empty() => {
            Some(parse_chown_flag(chown, dest_root, mapping)?)
        }
        _ => None,
    };

    let dest = CopyInfo {
        root: dest_root.to_path_buf(),
        path: normalize_dest(workdir, &inst.dest),
        hash: String::new(),
        no_decompress: false,
    };
    let options = CopyFileOptions {
        decompress: inst.allow_local_decompression,
        identity,
        archiver,
        remapper,
    };

    for info in &inst.infos {
        tracing::debug!(
            command = %inst.cmd_name,
            source = %info.path,
            dest = %dest.path,
            "Copying source"
        );
        perform_copy_for_info(&dest, info, &options)?;
    }
    Ok(())
}
