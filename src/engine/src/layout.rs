//! Bidirectional mapping between local image directories and segment images.
//!
//! The `LayoutMapper` owns the local layout root. `read` turns a flat
//! directory of large files into an in-memory image whose layers are
//! chunk-sized byte ranges, hashing segments in parallel. `write` turns a
//! manifest back into files, downloading only the segments a layer source
//! cannot resolve locally and writing them sparsely at their offsets.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use diskferry_core::cancel::CancelToken;
use diskferry_core::config::TransportConfig;
use diskferry_core::error::{FerryError, Result};
use diskferry_core::progress::ProgressSink;
use flate2::read::GzDecoder;
use oci_spec::image::ImageManifest;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::duplicator::{clone_tree, is_flat_dir};
use crate::image::{sha256_digest, SegmentImage};
use crate::recipe::{recipes_from_manifest, segment_bounds, FileSegmentRecipe};
use crate::reference::ImageRef;
use crate::segment::SegmentLayer;
use crate::sketch::{NoopSketchConstructor, SketchConstructor};
use crate::sparse::sparse_copy;

/// Name of the manifest cache file inside each image directory.
pub const LOCAL_MANIFEST_FILENAME: &str = ".oci.manifest.json";

/// Resolves a layer digest to its compressed blob bytes.
#[async_trait]
pub trait LayerSource: Send + Sync {
    async fn fetch(&self, digest: &str) -> Result<Vec<u8>>;
}

/// Size accounting for one local image directory.
#[derive(Debug, Clone)]
pub struct ImageProperties {
    pub reference: ImageRef,
    /// Apparent size: the sum of file lengths.
    pub size: u64,
    /// Allocated size on disk; less than `size` when files contain holes.
    pub disk_usage: u64,
}

/// Maps image references onto flat directories under a layout root.
pub struct LayoutMapper {
    root_dir: PathBuf,
    chunk_size: u64,
    workers_count: usize,
    write_workers: usize,
    sketch: Arc<dyn SketchConstructor>,
    cancel: CancelToken,
}

impl LayoutMapper {
    /// Create a mapper from transport configuration.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            root_dir: config.images_path.clone(),
            chunk_size: config.chunk_size,
            workers_count: config.workers_count.max(1),
            write_workers: config.effective_write_workers(),
            sketch: Arc::new(NoopSketchConstructor),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the sketch constructor run before pull-side writes.
    pub fn with_sketch(mut self, sketch: Arc<dyn SketchConstructor>) -> Self {
        self.sketch = sketch;
        self
    }

    /// Attach a cancellation token checked between chunks in both pools.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The layout root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding the given image.
    pub fn ref_to_dir(&self, reference: &ImageRef) -> PathBuf {
        self.root_dir.join(reference.to_dir_path())
    }

    /// Build an in-memory image from the directory of `reference`.
    ///
    /// Files are visited in name order; each is split into chunk-sized
    /// segment layers whose hashes are computed by the splitter pool, so
    /// the resulting manifest digest is independent of worker count.
    pub async fn read(&self, reference: &ImageRef) -> Result<SegmentImage> {
        let dir = self.ref_to_dir(reference);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                tracing::debug!(name = %name, "Skipping unexpected subdirectory");
                continue;
            }
            if name.starts_with('.') {
                tracing::debug!(name = %name, "Skipping dotfile");
                continue;
            }
            if entry.metadata()?.len() == 0 {
                tracing::warn!(name = %name, "Skipping empty file");
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut layers = Vec::new();
        for name in names {
            layers.extend(self.split_to_layers(dir.join(&name)).await?);
        }
        SegmentImage::from_layers(layers)
    }

    /// Split one file into segment layers, hashing chunks in parallel and
    /// post-sorting by start for a deterministic order.
    async fn split_to_layers(&self, path: PathBuf) -> Result<Vec<Arc<SegmentLayer>>> {
        let file_size = std::fs::metadata(&path)?.len();
        if file_size < self.chunk_size {
            self.cancel.check()?;
            let layer = tokio::task::spawn_blocking(move || -> Result<Arc<SegmentLayer>> {
                let layer = SegmentLayer::from_file(&path)?;
                layer.digest()?;
                Ok(Arc::new(layer))
            })
            .await
            .map_err(join_error)??;
            return Ok(vec![layer]);
        }

        let semaphore = Arc::new(Semaphore::new(self.workers_count));
        let mut set: JoinSet<Result<(u64, Arc<SegmentLayer>)>> = JoinSet::new();
        for (start, stop) in segment_bounds(file_size, self.chunk_size) {
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let path = path.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FerryError::Cancelled)?;
                cancel.check()?;
                tokio::task::spawn_blocking(move || -> Result<(u64, Arc<SegmentLayer>)> {
                    let layer = SegmentLayer::from_range(&path, start, stop)?;
                    // Precompute hashes while we hold a pool slot.
                    layer.digest()?;
                    Ok((start, Arc::new(layer)))
                })
                .await
                .map_err(join_error)?
            });
        }

        let mut results = Vec::new();
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined.map_err(join_error).and_then(|r| r) {
                Ok(item) => results.push(item),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        results.sort_by_key(|(start, _)| *start);
        Ok(results.into_iter().map(|(_, layer)| layer).collect())
    }

    /// Materialize a manifest into the directory of `reference`.
    ///
    /// Creates the directory, runs the sketch constructor, truncates every
    /// destination file to its recipe's total size (stale bytes past the
    /// new end must not survive), then writes all segments through the
    /// writer pool. The raw manifest bytes are persisted last, so a
    /// directory with a manifest is always complete.
    pub async fn write(
        &self,
        manifest: &ImageManifest,
        manifest_bytes: &[u8],
        reference: &ImageRef,
        source: Arc<dyn LayerSource>,
        progress: Option<ProgressSink>,
    ) -> Result<()> {
        let recipes = recipes_from_manifest(manifest)?;
        let dir = self.ref_to_dir(reference);
        std::fs::create_dir_all(&dir)?;

        self.sketch.construct(&dir, &recipes)?;

        for recipe in &recipes {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(dir.join(&recipe.filename))?;
            file.set_len(recipe.total_size())?;
        }

        let total: u64 = recipes.iter().map(|r| r.total_size()).sum();
        let transferred = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(self.write_workers));
        let mut set: JoinSet<Result<()>> = JoinSet::new();

        for recipe in &recipes {
            for segment in &recipe.segments {
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                let source = Arc::clone(&source);
                let segment = segment.clone();
                let dir = dir.clone();
                let transferred = Arc::clone(&transferred);
                let progress = progress.clone();
                set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| FerryError::Cancelled)?;
                    cancel.check()?;

                    let bytes = source.fetch(&segment.digest).await?;
                    let stats = tokio::task::spawn_blocking(move || {
                        write_segment(&dir, &segment, &bytes)
                    })
                    .await
                    .map_err(join_error)??;

                    tracing::debug!(
                        written = stats.written,
                        skipped = stats.skipped,
                        "Wrote segment"
                    );
                    if let Some(progress) = progress {
                        let done = transferred.fetch_add(stats.total(), Ordering::SeqCst)
                            + stats.total();
                        progress.send(done, total);
                    }
                    Ok(())
                });
            }
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined.map_err(join_error).and_then(|r| r) {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        tokio::fs::write(dir.join(LOCAL_MANIFEST_FILENAME), manifest_bytes).await?;
        Ok(())
    }

    /// Resolve a digest against the manifests already on disk and return
    /// the blob's compressed bytes if some local image still holds intact
    /// content for it.
    ///
    /// The candidate range is recompressed and its digest compared before
    /// use; locally modified files fall through to the remote.
    pub fn read_local_blob(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        for dir in self.image_dirs()? {
            let manifest_path = dir.join(LOCAL_MANIFEST_FILENAME);
            let manifest: ImageManifest = match std::fs::read(&manifest_path)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            {
                Some(manifest) => manifest,
                None => continue,
            };
            let recipes = match recipes_from_manifest(&manifest) {
                Ok(recipes) => recipes,
                Err(_) => continue,
            };

            for recipe in recipes {
                for segment in &recipe.segments {
                    if segment.digest != digest {
                        continue;
                    }
                    let path = dir.join(&segment.filename);
                    let file_size = match std::fs::metadata(&path) {
                        Ok(meta) => meta.len(),
                        Err(_) => continue,
                    };
                    if file_size <= segment.stop {
                        continue;
                    }
                    let layer = SegmentLayer::from_range(&path, segment.start, segment.stop)?;
                    let mut compressed = Vec::new();
                    layer.compressed()?.read_to_end(&mut compressed)?;
                    if sha256_digest(&compressed) == digest {
                        tracing::debug!(
                            digest = %digest,
                            path = %path.display(),
                            "Resolved blob from local layout"
                        );
                        return Ok(Some(compressed));
                    }
                    tracing::warn!(
                        digest = %digest,
                        path = %path.display(),
                        "Local segment content does not match its manifest, ignoring"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Clone one local image into another reference. Never touches the
    /// registry.
    pub fn clone_image(&self, src: &ImageRef, dst: &ImageRef) -> Result<()> {
        clone_tree(&self.ref_to_dir(src), &self.ref_to_dir(dst))
    }

    /// Adopt an external flat directory as a local image.
    pub fn adopt(&self, src_dir: &Path, reference: &ImageRef) -> Result<()> {
        if !is_flat_dir(src_dir)? {
            return Err(FerryError::InvalidInput(
                "directories with subdirectories are not supported".to_string(),
            ));
        }
        clone_tree(src_dir, &self.ref_to_dir(reference))
    }

    /// Remove a local image directory. Removing an absent image is not an
    /// error.
    pub fn remove(&self, reference: &ImageRef) -> Result<()> {
        let dir = self.ref_to_dir(reference);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Whether a manifest has been persisted for `reference`.
    pub fn contains_manifest(&self, reference: &ImageRef) -> bool {
        self.ref_to_dir(reference)
            .join(LOCAL_MANIFEST_FILENAME)
            .is_file()
    }

    /// List local images with their apparent and on-disk sizes. Only
    /// directories that parse as a reference and hold a persisted manifest
    /// are reported.
    pub fn list(&self) -> Result<Vec<ImageProperties>> {
        let mut properties = Vec::new();
        for dir in self.image_dirs()? {
            let rel = match dir.strip_prefix(&self.root_dir) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let reference = match rel
                .to_str()
                .and_then(|s| ImageRef::parse_canonical(s).ok())
            {
                Some(reference) => reference,
                None => continue,
            };

            let mut size = 0u64;
            let mut disk_usage = 0u64;
            for entry in std::fs::read_dir(&dir)? {
                let meta = entry?.metadata()?;
                if meta.is_file() {
                    size += meta.len();
                    disk_usage += allocated_size(&meta);
                }
            }
            properties.push(ImageProperties {
                reference,
                size,
                disk_usage,
            });
        }
        properties.sort_by_key(|p| p.reference.full_reference());
        Ok(properties)
    }

    /// All directories under the root that contain a persisted manifest.
    fn image_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if self.root_dir.is_dir() {
            collect_image_dirs(&self.root_dir, &mut dirs)?;
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Write one segment: open a fresh handle, seek to the segment start,
/// gunzip the blob and copy it sparsely.
fn write_segment(
    dir: &Path,
    segment: &FileSegmentRecipe,
    compressed: &[u8],
) -> Result<crate::sparse::SparseCopyStats> {
    let segment_write = |source: std::io::Error| FerryError::SegmentWrite {
        filename: segment.filename.clone(),
        offset: segment.start,
        source,
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join(&segment.filename))
        .map_err(segment_write)?;
    file.seek(SeekFrom::Start(segment.start))
        .map_err(segment_write)?;

    let decoder = GzDecoder::new(compressed);
    let stats = sparse_copy(&mut file, decoder).map_err(segment_write)?;
    if stats.total() != segment.size() {
        return Err(FerryError::MalformedRecipe(format!(
            "segment {}-{} of '{}' decompressed to {} bytes, expected {}",
            segment.start,
            segment.stop,
            segment.filename,
            stats.total(),
            segment.size()
        )));
    }
    Ok(stats)
}

/// Recursively collect directories containing a manifest cache file.
fn collect_image_dirs(current: &Path, dirs: &mut Vec<PathBuf>) -> Result<()> {
    if current.join(LOCAL_MANIFEST_FILENAME).is_file() {
        dirs.push(current.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(current)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_image_dirs(&path, dirs)?;
        }
    }
    Ok(())
}

/// Bytes actually allocated for a file, counting holes as free.
#[cfg(unix)]
fn allocated_size(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_size(meta: &std::fs::Metadata) -> u64 {
    meta.len()
}

fn join_error(err: tokio::task::JoinError) -> FerryError {
    FerryError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves blobs from the layers of an already-read image.
    struct ImageLayerSource {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl ImageLayerSource {
        fn from_image(image: &SegmentImage) -> Self {
            let mut blobs = HashMap::new();
            for layer in image.layers() {
                let mut compressed = Vec::new();
                layer
                    .compressed()
                    .unwrap()
                    .read_to_end(&mut compressed)
                    .unwrap();
                blobs.insert(layer.digest().unwrap(), compressed);
            }
            Self { blobs }
        }
    }

    #[async_trait]
    impl LayerSource for ImageLayerSource {
        async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
            self.blobs
                .get(digest)
                .cloned()
                .ok_or_else(|| FerryError::Registry(format!("unknown blob {}", digest)))
        }
    }

    fn mapper_at(root: &Path, chunk_size: u64) -> LayoutMapper {
        LayoutMapper::new(
            &TransportConfig::new(root)
                .with_chunk_size(chunk_size)
                .with_workers_count(4),
        )
    }

    fn make_image_dir(mapper: &LayoutMapper, reference: &ImageRef, files: &[(&str, Vec<u8>)]) {
        let dir = mapper.ref_to_dir(reference);
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_read_splits_large_file_into_chunks() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let reference = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(&mapper, &reference, &[("disk.img", patterned(2500))]);

        let image = mapper.read(&reference).await.unwrap();
        assert_eq!(image.layers().len(), 3);
        assert_eq!(image.layers()[0].range_annotation(), "0-1023");
        assert_eq!(image.layers()[1].range_annotation(), "1024-2047");
        assert_eq!(image.layers()[2].range_annotation(), "2048-2499");
    }

    #[tokio::test]
    async fn test_read_skips_dotfiles_and_subdirs() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let reference = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(
            &mapper,
            &reference,
            &[("disk.img", patterned(100)), (".hidden", b"x".to_vec())],
        );
        std::fs::create_dir(mapper.ref_to_dir(&reference).join("sub")).unwrap();

        let image = mapper.read(&reference).await.unwrap();
        assert_eq!(image.layers().len(), 1);
        assert_eq!(image.layers()[0].filename().unwrap(), "disk.img");
    }

    #[tokio::test]
    async fn test_read_is_deterministic_across_worker_counts() {
        let tmp = TempDir::new().unwrap();
        let reference = ImageRef::parse("registry.local/vm:1.0").unwrap();
        let mapper = mapper_at(tmp.path(), 512);
        make_image_dir(
            &mapper,
            &reference,
            &[("a.img", patterned(3000)), ("b.img", patterned(700))],
        );

        let one = LayoutMapper::new(
            &TransportConfig::new(tmp.path())
                .with_chunk_size(512)
                .with_workers_count(1),
        );
        let many = LayoutMapper::new(
            &TransportConfig::new(tmp.path())
                .with_chunk_size(512)
                .with_workers_count(8),
        );

        let digest_one = one.read(&reference).await.unwrap().manifest_digest();
        let digest_many = many.read(&reference).await.unwrap().manifest_digest();
        assert_eq!(digest_one, digest_many);
    }

    #[tokio::test]
    async fn test_write_round_trips_read() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src_ref = ImageRef::parse("registry.local/vm:1.0").unwrap();
        let content = patterned(5000);
        make_image_dir(&mapper, &src_ref, &[("disk.img", content.clone())]);

        let image = mapper.read(&src_ref).await.unwrap();
        let source = Arc::new(ImageLayerSource::from_image(&image));

        let dst_ref = ImageRef::parse("registry.local/vm:copy").unwrap();
        mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &dst_ref,
                source,
                None,
            )
            .await
            .unwrap();

        let written =
            std::fs::read(mapper.ref_to_dir(&dst_ref).join("disk.img")).unwrap();
        assert_eq!(written, content);
        assert!(mapper.contains_manifest(&dst_ref));
    }

    #[tokio::test]
    async fn test_write_truncates_stale_longer_file() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src_ref = ImageRef::parse("registry.local/vm:short").unwrap();
        let content = b"testvm123456789".to_vec();
        make_image_dir(&mapper, &src_ref, &[("disk.img", content.clone())]);

        let image = mapper.read(&src_ref).await.unwrap();
        let source = Arc::new(ImageLayerSource::from_image(&image));

        // Destination already holds a longer file with trailing garbage.
        let dst_ref = ImageRef::parse("registry.local/vm:dst").unwrap();
        make_image_dir(
            &mapper,
            &dst_ref,
            &[("disk.img", b"testvm123456789appendix".to_vec())],
        );

        mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &dst_ref,
                source,
                None,
            )
            .await
            .unwrap();

        let written =
            std::fs::read(mapper.ref_to_dir(&dst_ref).join("disk.img")).unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn test_write_surfaces_missing_blob_error() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src_ref = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(&mapper, &src_ref, &[("disk.img", patterned(100))]);

        let image = mapper.read(&src_ref).await.unwrap();
        let empty = Arc::new(ImageLayerSource {
            blobs: HashMap::new(),
        });

        let dst_ref = ImageRef::parse("registry.local/vm:broken").unwrap();
        let err = mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &dst_ref,
                empty,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::Registry(_)));
        // No manifest persisted: the directory stays partial.
        assert!(!mapper.contains_manifest(&dst_ref));
    }

    #[tokio::test]
    async fn test_read_local_blob_resolves_written_image() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src_ref = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(&mapper, &src_ref, &[("disk.img", patterned(2048))]);

        let image = mapper.read(&src_ref).await.unwrap();
        let source = Arc::new(ImageLayerSource::from_image(&image));
        mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &src_ref,
                source,
                None,
            )
            .await
            .unwrap();

        let digest = image.layers()[0].digest().unwrap();
        let local = mapper.read_local_blob(&digest).unwrap();
        assert!(local.is_some());
        assert_eq!(sha256_digest(&local.unwrap()), digest);

        assert!(mapper.read_local_blob("sha256:doesnotexist").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_local_blob_ignores_modified_content() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src_ref = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(&mapper, &src_ref, &[("disk.img", patterned(512))]);

        let image = mapper.read(&src_ref).await.unwrap();
        let source = Arc::new(ImageLayerSource::from_image(&image));
        mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &src_ref,
                source,
                None,
            )
            .await
            .unwrap();

        // Corrupt the file behind the manifest's back.
        let path = mapper.ref_to_dir(&src_ref).join("disk.img");
        let mut corrupted = std::fs::read(&path).unwrap();
        corrupted[0] ^= 0xff;
        std::fs::write(&path, corrupted).unwrap();

        let digest = image.layers()[0].digest().unwrap();
        assert!(mapper.read_local_blob(&digest).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_reports_only_dirs_with_manifest() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let with_manifest = ImageRef::parse("registry.local/vm:1.0").unwrap();
        let without_manifest = ImageRef::parse("registry.local/vm:partial").unwrap();
        make_image_dir(&mapper, &with_manifest, &[("disk.img", patterned(100))]);
        make_image_dir(&mapper, &without_manifest, &[("disk.img", patterned(100))]);

        let image = mapper.read(&with_manifest).await.unwrap();
        let source = Arc::new(ImageLayerSource::from_image(&image));
        mapper
            .write(
                image.manifest(),
                image.manifest_bytes(),
                &with_manifest,
                source,
                None,
            )
            .await
            .unwrap();

        let listed = mapper.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reference, with_manifest);
        assert!(listed[0].size >= 100);
    }

    #[tokio::test]
    async fn test_clone_and_remove() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let src = ImageRef::parse("registry.local/vm:1.0").unwrap();
        let dst = ImageRef::parse("registry.local/vm:1.1").unwrap();
        make_image_dir(&mapper, &src, &[("disk.img", patterned(100))]);

        mapper.clone_image(&src, &dst).unwrap();
        assert!(mapper.ref_to_dir(&dst).join("disk.img").is_file());

        mapper.remove(&dst).unwrap();
        assert!(!mapper.ref_to_dir(&dst).exists());
        // Removing again is fine.
        mapper.remove(&dst).unwrap();
    }

    #[tokio::test]
    async fn test_adopt_rejects_nested_directory() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let external = tmp.path().join("external");
        std::fs::create_dir_all(external.join("nested")).unwrap();

        let reference = ImageRef::parse("registry.local/vm:adopted").unwrap();
        assert!(mapper.adopt(&external, &reference).is_err());
    }

    #[tokio::test]
    async fn test_adopt_flat_directory() {
        let tmp = TempDir::new().unwrap();
        let mapper = mapper_at(tmp.path(), 1024);
        let external = tmp.path().join("external");
        std::fs::create_dir(&external).unwrap();
        std::fs::write(external.join("disk.img"), patterned(64)).unwrap();

        let reference = ImageRef::parse("registry.local/vm:adopted").unwrap();
        mapper.adopt(&external, &reference).unwrap();
        assert!(mapper.ref_to_dir(&reference).join("disk.img").is_file());
    }

    #[tokio::test]
    async fn test_cancelled_read_returns_cancelled() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mapper = mapper_at(tmp.path(), 64).with_cancel(cancel);

        let reference = ImageRef::parse("registry.local/vm:1.0").unwrap();
        make_image_dir(&mapper, &reference, &[("disk.img", patterned(1000))]);

        let err = mapper.read(&reference).await.unwrap_err();
        assert!(matches!(err, FerryError::Cancelled));
    }
}
