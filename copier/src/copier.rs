//! Resolution of COPY/ADD sources into fingerprinted copy descriptors.
//!
//! A [`Copier`] lives for one build step. It owns everything that step
//! creates on the side (the read-write layer of a `--from` image and any
//! downloaded URLs) and removes it in [`Copier::cleanup`], which also runs on
//! drop.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use a3s_build_core::error::{BuildError, Result};
use serde::Serialize;

use crate::cache::PathCache;
use crate::hash::{hash_file, hash_path};
use crate::layer::{ImageMount, RwLayer};
use crate::remote::{is_url, SourceDownloader, UNNAMED_FILENAME};
use crate::source::{follow_symlink_in_scope, join_under, LazySource, Source};
use crate::wildcard::{contains_wildcards, expand};

/// A resolved source (or destination) of a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyInfo {
    /// Root of the tree `path` is relative to
    pub root: PathBuf,
    /// Path as given by the user, relative to `root`
    pub path: String,
    /// Content fingerprint; empty for destinations
    pub hash: String,
    /// Never unpack this source, even on ADD
    pub no_decompress: bool,
}

impl CopyInfo {
    pub fn new(source: &Source, path: &str, hash: String) -> Self {
        Self {
            root: source.root().to_path_buf(),
            path: path.to_string(),
            hash,
            no_decompress: false,
        }
    }

    /// Absolute path, with symlinks resolved inside `root`.
    pub fn full_path(&self) -> Result<PathBuf> {
        follow_symlink_in_scope(&join_under(&self.root, &self.path), &self.root)
    }
}

/// The sources and destination of a COPY/ADD as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcesAndDest {
    pub source_paths: Vec<String>,
    pub dest_path: String,
}

impl SourcesAndDest {
    pub fn new(source_paths: Vec<String>, dest_path: impl Into<String>) -> Self {
        Self {
            source_paths,
            dest_path: dest_path.into(),
        }
    }
}

/// A fully resolved COPY/ADD, ready for [`crate::perform::perform_copy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInstruction {
    pub cmd_name: String,
    pub infos: Vec<CopyInfo>,
    pub dest: String,
    pub chown: Option<String>,
    pub allow_local_decompression: bool,
    pub preserve_ownership: bool,
}

impl CopyInstruction {
    pub fn with_chown(mut self, chown: impl Into<String>) -> Self {
        self.chown = Some(chown.into());
        self
    }

    /// Unpack local archives into the destination (ADD).
    pub fn with_local_decompression(mut self, allow: bool) -> Self {
        self.allow_local_decompression = allow;
        self
    }

    pub fn with_preserve_ownership(mut self, preserve: bool) -> Self {
        self.preserve_ownership = preserve;
        self
    }
}

/// Per-step source resolver.
pub struct Copier {
    source: Option<Source>,
    image_source: Option<Arc<dyn ImageMount>>,
    path_cache: Arc<dyn PathCache>,
    downloader: Arc<dyn SourceDownloader>,
    active_layer: Option<Box<dyn RwLayer>>,
    downloads: Vec<Source>,
}

impl Copier {
    /// Resolver over the build context `source` (if any).
    pub fn new(
        source: Option<Source>,
        path_cache: Arc<dyn PathCache>,
        downloader: Arc<dyn SourceDownloader>,
    ) -> Self {
        Self {
            source,
            image_source: None,
            path_cache,
            downloader,
            active_layer: None,
            downloads: Vec::new(),
        }
    }

    /// Read sources from a prior image instead of the build context.
    pub fn with_image_source(mut self, image: Arc<dyn ImageMount>) -> Self {
        self.image_source = Some(image);
        self
    }

    /// Resolve `sources_and_dest` for the instruction `cmd_name`.
    pub async fn create_copy_instruction(
        &mut self,
        sources_and_dest: &SourcesAndDest,
        cmd_name: &str,
    ) -> Result<CopyInstruction> {
        let dest = sources_and_dest.dest_path.clone();
        let infos = self
            .copy_infos_for_source_paths(&sources_and_dest.source_paths, &dest)
            .await
            .map_err(|e| e.in_instruction(cmd_name))?;

        if infos.len() > 1 && !dest.ends_with('/') {
            return Err(BuildError::InvalidInstruction(format!(
                "When using {} with more than one source file, the destination must be a directory and end with a /",
                cmd_name
            )));
        }

        Ok(CopyInstruction {
            cmd_name: cmd_name.to_string(),
            infos,
            dest,
            chown: None,
            allow_local_decompression: false,
            preserve_ownership: false,
        })
    }

    /// Resolve every pattern in declared order.
    pub async fn copy_infos_for_source_paths(
        &mut self,
        sources: &[String],
        dest: &str,
    ) -> Result<Vec<CopyInfo>> {
        let mut infos = Vec::new();
        for orig in sources {
            infos.extend(self.copy_info_for_source_path(orig, dest).await?);
        }

        if infos.is_empty() {
            return Err(BuildError::InvalidInstruction(
                "no source files were specified".to_string(),
            ));
        }
        Ok(infos)
    }

    async fn copy_info_for_source_path(&mut self, orig: &str, dest: &str) -> Result<Vec<CopyInfo>> {
        if !is_url(orig) {
            return self.calc_copy_info(orig, true);
        }

        let download = self.downloader.download(orig).await?;
        let path = if download.filename.is_empty() {
            if dest.ends_with('/') {
                return Err(BuildError::InvalidInstruction(format!(
                    "cannot determine filename for source {}",
                    orig
                )));
            }
            UNNAMED_FILENAME.to_string()
        } else {
            download.filename
        };

        let hashed = hash_file(&download.source, &path);
        let mut info = CopyInfo::new(&download.source, &path, String::new());
        // Tracked before the hash is checked so cleanup always removes it.
        self.downloads.push(download.source);

        info.hash = hashed?;
        info.no_decompress = true;
        tracing::debug!(url = %orig, path = %path, hash = %info.hash, "Resolved remote source");
        Ok(vec![info])
    }

    fn calc_copy_info(&mut self, orig: &str, allow_wildcards: bool) -> Result<Vec<CopyInfo>> {
        // Mount the prior image once per resolver
        if let Some(image) = &self.image_source {
            if self.active_layer.is_none() {
                let layer = image.new_rw_layer()?;
                let tree = LazySource::new(layer.root());
                self.active_layer = Some(layer);
                self.source = Some(Source::ImageLayer {
                    tree: tree?,
                    image_id: image.image_id().to_string(),
                });
            }
        }

        let Some(source) = &self.source else {
            return Err(BuildError::InvalidInstruction(
                "missing build context".to_string(),
            ));
        };

        let path = orig.strip_prefix('/').unwrap_or(orig);
        let path = path.strip_prefix("./").unwrap_or(path);

        if allow_wildcards && contains_wildcards(path) {
            return self.copy_with_wildcards(path);
        }

        // Check the path cache
        let image_id = source.image_id().map(str::to_string);
        if let Some(image_id) = &image_id {
            if let Some(hash) = self.path_cache.load(image_id, path) {
                tracing::debug!(image = %image_id, path, "Path cache hit");
                return Ok(vec![CopyInfo::new(source, path, hash)]);
            }
        }

        // Hash from disk
        let hash = match hash_path(source, path) {
            Ok(hash) => hash,
            Err(BuildError::NotFound { path }) if matches!(source, Source::Context(_)) => {
                return Err(BuildError::MissingFromContext { path });
            }
            Err(e) => return Err(e),
        };

        if let Some(image_id) = &image_id {
            self.path_cache.store(image_id, path, &hash);
        }
        Ok(vec![CopyInfo::new(source, path, hash)])
    }

    fn copy_with_wildcards(&mut self, pattern: &str) -> Result<Vec<CopyInfo>> {
        let root = match &self.source {
            Some(source) => source.root().to_path_buf(),
            None => {
                return Err(BuildError::InvalidInstruction(
                    "missing build context".to_string(),
                ))
            }
        };

        let mut infos = Vec::new();
        for rel in expand(&root, pattern)? {
            // Matches may contain metacharacters themselves.
            infos.extend(self.calc_copy_info(&rel, false)?);
        }
        Ok(infos)
    }

    /// Release the read-write layer and remove all downloads.
    ///
    /// Safe to call any number of times. Every resource is released even if
    /// an earlier one fails; the first failure is returned.
    pub fn cleanup(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(layer) = self.active_layer.take() {
            if let Err(e) = layer.release() {
                tracing::warn!(error = %e, "Failed to release read-write layer");
                first_error.get_or_insert(e);
            }
        }

        for download in self.downloads.drain(..) {
            let root = download.root().to_path_buf();
            if let Err(e) = download.close() {
                tracing::warn!(path = %root.display(), error = %e, "Failed to remove download");
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Copier {
    fn drop(&mut self) {
        // Errors were already logged.
        let _ = self.cleanup();
    }
}

/// Make `requested` absolute, resolving a relative destination against
/// `workdir`. A trailing `/` is kept since it marks a directory destination.
pub fn normalize_dest(workdir: &str, requested: &str) -> String {
    if requested.starts_with('/') {
        return requested.to_string();
    }

    let ends_in_slash = requested.ends_with('/');
    let joined = Path::new("/").join(workdir).join(requested);
    let mut clean = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            _ => {}
        }
    }

    let mut dest = clean.to_string_lossy().into_owned();
    if ends_in_slash && !dest.ends_with('/') {
        dest.push('/');
    }
    dest
}
