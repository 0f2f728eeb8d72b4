//! Read-write layers over prior images.
//!
//! A COPY or ADD that reads from another image (`--from`) needs that image's
//! filesystem on disk. The resolver asks an [`ImageMount`] for a read-write
//! layer the first time such a source is dereferenced and releases it when
//! the step is cleaned up.

use std::fs::File;
use std::path::{Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};
use tempfile::TempDir;

use crate::archive::decompress_stream;

/// A mounted read-write layer.
pub trait RwLayer: Send {
    /// Directory at which the layer's filesystem is visible.
    fn root(&self) -> &Path;

    /// Unmount and discard the layer.
    fn release(self: Box<Self>) -> Result<()>;
}

/// An image whose filesystem can be mounted as a read-write layer.
pub trait ImageMount: Send + Sync {
    /// Content identity of the image; empty when the image is anonymous.
    fn image_id(&self) -> &str;

    /// Create a new read-write layer on top of the image.
    fn new_rw_layer(&self) -> Result<Box<dyn RwLayer>>;
}

/// An image stored as an ordered list of layer tarballs.
///
/// Each read-write layer is a scratch directory into which every layer is
/// extracted in order.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    image_id: String,
    layers: Vec<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl ExtractedImage {
    pub fn new(image_id: impl Into<String>, layers: Vec<PathBuf>) -> Self {
        Self {
            image_id: image_id.into(),
            layers,
            scratch_dir: None,
        }
    }

    /// Create scratch layers under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }
}

impl ImageMount for ExtractedImage {
    fn image_id(&self) -> &str {
        &self.image_id
    }

    fn new_rw_layer(&self) -> Result<Box<dyn RwLayer>> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("a3s-rwlayer");
            builder
        };
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| BuildError::Layer(format!("Failed to create read-write layer: {}", e)))?;

        for layer in &self.layers {
            extract_layer(layer, dir.path())?;
        }

        tracing::debug!(
            image = %self.image_id,
            layers = self.layers.len(),
            root = %dir.path().display(),
            "Created read-write layer"
        );

        Ok(Box::new(ScratchLayer { dir }))
    }
}

/// Read-write layer backed by a temporary directory.
#[derive(Debug)]
pub struct ScratchLayer {
    dir: TempDir,
}

impl RwLayer for ScratchLayer {
    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn release(self: Box<Self>) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            BuildError::Layer(format!(
                "Failed to release layer {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Extract a single layer tarball (optionally compressed) into `target_dir`.
pub fn extract_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    if !layer_path.exists() {
        return Err(BuildError::Layer(format!(
            "Layer file not found: {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| {
        BuildError::Layer(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let mut file = File::open(layer_path).map_err(|e| {
        BuildError::Layer(format!(
            "Failed to open layer file {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    let mut archive = tar::Archive::new(decompress_stream(&mut file)?);
    archive.set_preserve_permissions(true);
    archive.unpack(target_dir).map_err(|e| {
        BuildError::Layer(format!(
            "Failed to extract layer to {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        "Extracted image layer"
    );

    Ok(())
}
