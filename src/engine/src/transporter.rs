//! Top-level push, pull and clone operations.
//!
//! The transporter glues the layout mapper to a remote blob store. Push
//! uploads only digests the registry does not already hold (optionally
//! mounting them across repositories first); pull downloads only segments
//! no local image can supply.

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use diskferry_core::cancel::CancelToken;
use diskferry_core::config::TransportConfig;
use diskferry_core::error::{FerryError, Result};
use diskferry_core::progress::ProgressSink;
use oci_spec::image::ImageManifest;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::blobstore::RemoteBlobStore;
use crate::image::sha256_digest;
use crate::layout::{ImageProperties, LayerSource, LayoutMapper};
use crate::reference::ImageRef;
use crate::segment::SegmentLayer;
use crate::sketch::SketchConstructor;

/// Orchestrates transfers between the local layout and a remote blob store.
pub struct Transporter {
    config: TransportConfig,
    layout: Arc<LayoutMapper>,
    store: Arc<dyn RemoteBlobStore>,
    sketch: Option<Arc<dyn SketchConstructor>>,
    progress: Option<ProgressSink>,
    cancel: CancelToken,
}

impl Transporter {
    /// Create a transporter over the given blob store.
    pub fn new(config: TransportConfig, store: Arc<dyn RemoteBlobStore>) -> Self {
        let cancel = CancelToken::new();
        let layout = Arc::new(LayoutMapper::new(&config).with_cancel(cancel.clone()));
        Self {
            config,
            layout,
            store,
            sketch: None,
            progress: None,
            cancel,
        }
    }

    /// Attach a progress sink receiving `(bytes_transferred, total)` updates.
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach a cancellation token propagated into all worker pools.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self.rebuild_layout();
        self
    }

    /// Replace the sketch constructor used on the pull path.
    pub fn with_sketch(mut self, sketch: Arc<dyn SketchConstructor>) -> Self {
        self.sketch = Some(sketch);
        self.rebuild_layout();
        self
    }

    fn rebuild_layout(&mut self) {
        let mut layout = LayoutMapper::new(&self.config).with_cancel(self.cancel.clone());
        if let Some(sketch) = &self.sketch {
            layout = layout.with_sketch(Arc::clone(sketch));
        }
        self.layout = Arc::new(layout);
    }

    /// The layout mapper backing this transporter.
    pub fn layout(&self) -> &LayoutMapper {
        &self.layout
    }

    /// Package the local image as segment layers and upload whatever the
    /// registry is missing, then publish the manifest.
    pub async fn push(&self, reference: &ImageRef) -> Result<()> {
        self.cancel.check()?;
        let image = self.layout.read(reference).await?;

        let mount_from = match &self.config.mount_ref {
            Some(mount_ref) => Some(ImageRef::parse(mount_ref)?),
            None => None,
        };

        // The same digest may back several segments; transfer it once.
        let mut seen = HashSet::new();
        let mut unique_layers: Vec<Arc<SegmentLayer>> = Vec::new();
        for layer in image.layers() {
            if seen.insert(layer.digest()?) {
                unique_layers.push(Arc::clone(layer));
            }
        }

        let total: u64 = unique_layers.iter().map(|l| l.uncompressed_size()).sum();
        let transferred = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.workers_count.max(1)));
        let mut set: JoinSet<Result<()>> = JoinSet::new();

        for layer in unique_layers {
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let store = Arc::clone(&self.store);
            let repository = reference.repository.clone();
            let mount_repository = mount_from.as_ref().map(|r| r.repository.clone());
            let transferred = Arc::clone(&transferred);
            let progress = self.progress.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FerryError::Cancelled)?;
                cancel.check()?;

                let digest = layer.digest()?;
                let layer_size = layer.uncompressed_size();
                if !store.exists(&repository, &digest).await? {
                    let mounted = match &mount_repository {
                        Some(from) => store.mount(&repository, &digest, from).await?,
                        None => false,
                    };
                    if !mounted {
                        let bytes =
                            tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                                let mut compressed = Vec::new();
                                layer.compressed()?.read_to_end(&mut compressed)?;
                                Ok(compressed)
                            })
                            .await
                            .map_err(|e| {
                                FerryError::Io(std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    e,
                                ))
                            })??;
                        store.upload(&repository, &digest, bytes).await?;
                    }
                } else {
                    tracing::debug!(digest = %digest, "Blob already present, skipping upload");
                }

                if let Some(progress) = progress {
                    let done = transferred.fetch_add(layer_size, Ordering::SeqCst) + layer_size;
                    progress.send(done, total);
                }
                Ok(())
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = joined
                .map_err(|e| FerryError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
                .and_then(|r| r);
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        // Blobs must exist before the manifest references them.
        let config_digest = image.config_descriptor().digest().to_string();
        if !self
            .store
            .exists(&reference.repository, &config_digest)
            .await?
        {
            self.store
                .upload(
                    &reference.repository,
                    &config_digest,
                    image.config_bytes().to_vec(),
                )
                .await?;
        }

        self.store
            .put_manifest(reference, image.manifest_bytes().to_vec())
            .await?;

        tracing::info!(
            reference = %reference,
            digest = %image.manifest_digest(),
            layers = image.layers().len(),
            "Pushed image"
        );
        Ok(())
    }

    /// Fetch the manifest and materialize the image locally, downloading
    /// only segments that cannot be resolved from images already on disk.
    pub async fn pull(&self, reference: &ImageRef) -> Result<()> {
        self.cancel.check()?;
        let manifest_bytes = self.store.get_manifest(reference).await?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)?;

        let source = Arc::new(DedupingLayerSource {
            layout: Arc::clone(&self.layout),
            store: Arc::clone(&self.store),
            repository: reference.repository.clone(),
        });

        self.layout
            .write(
                &manifest,
                &manifest_bytes,
                reference,
                source,
                self.progress.clone(),
            )
            .await?;

        tracing::info!(reference = %reference, "Pulled image");
        Ok(())
    }

    /// Clone a local image under a new reference. Never contacts the
    /// registry.
    pub fn clone_image(&self, src: &ImageRef, dst: &ImageRef) -> Result<()> {
        self.layout.clone_image(src, dst)
    }

    /// Adopt an external flat directory as a local image.
    pub fn adopt(&self, src_dir: &std::path::Path, reference: &ImageRef) -> Result<()> {
        self.layout.adopt(src_dir, reference)
    }

    /// Remove a local image.
    pub fn remove(&self, reference: &ImageRef) -> Result<()> {
        self.layout.remove(reference)
    }

    /// List local images.
    pub fn list(&self) -> Result<Vec<ImageProperties>> {
        self.layout.list()
    }
}

/// Layer source that prefers intact local content over the network and
/// verifies every downloaded blob against its declared digest.
struct DedupingLayerSource {
    layout: Arc<LayoutMapper>,
    store: Arc<dyn RemoteBlobStore>,
    repository: String,
}

#[async_trait]
impl LayerSource for DedupingLayerSource {
    async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        let layout = Arc::clone(&self.layout);
        let wanted = digest.to_string();
        let local = tokio::task::spawn_blocking(move || layout.read_local_blob(&wanted))
            .await
            .map_err(|e| {
                FerryError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })??;
        if let Some(bytes) = local {
            return Ok(bytes);
        }

        let bytes = self.store.download(&self.repository, digest).await?;
        let computed = sha256_digest(&bytes);
        if computed != digest {
            return Err(FerryError::HashMismatch {
                digest: digest.to_string(),
                computed,
            });
        }
        Ok(bytes)
    }
}
