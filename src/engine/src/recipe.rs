//! File reconstruction recipes.
//!
//! A recipe describes how a file is assembled from segment layers: an
//! ordered, contiguous, non-overlapping list of byte ranges with the layer
//! digest that carries each range. Recipes are derived from an image
//! manifest on the pull side and from chunk-size splitting on the push side.

use std::collections::HashMap;

use diskferry_core::error::{FerryError, Result};
use oci_spec::image::ImageManifest;

/// Annotation key naming the file a layer belongs to.
pub const FILENAME_ANNOTATION_KEY: &str = "filename";

/// Annotation key carrying a layer's `"<start>-<stop>"` byte range.
pub const RANGE_ANNOTATION_KEY: &str = "range";

/// One segment of a file: where its bytes land and which blob carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegmentRecipe {
    pub filename: String,
    pub start: u64,
    pub stop: u64,
    pub digest: String,
}

impl FileSegmentRecipe {
    /// Uncompressed length of the segment.
    pub fn size(&self) -> u64 {
        self.stop - self.start + 1
    }
}

/// All segments of one file, sorted by start and covering `[0, size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecipe {
    pub filename: String,
    pub segments: Vec<FileSegmentRecipe>,
}

impl FileRecipe {
    /// Reconstructed file size: the sum of all segment sizes.
    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size()).sum()
    }
}

/// Chunk boundaries for a file of `file_size` bytes: one `(start, stop)`
/// pair per `chunk_size` slice, the final slice possibly shorter. A file
/// smaller than `chunk_size` yields a single whole-file pair.
pub fn segment_bounds(file_size: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if file_size == 0 {
        return Vec::new();
    }
    if file_size < chunk_size {
        return vec![(0, file_size - 1)];
    }
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < file_size {
        let stop = (start + chunk_size - 1).min(file_size - 1);
        bounds.push((start, stop));
        start += chunk_size;
    }
    bounds
}

/// Derive per-file recipes from an image manifest.
///
/// Walks the layers in declaration order, reads the `filename` and `range`
/// annotations, groups by filename preserving first-seen order and sorts
/// each group by start. Overlapping, non-contiguous or missing ranges fail
/// with `MalformedRecipe`.
pub fn recipes_from_manifest(manifest: &ImageManifest) -> Result<Vec<FileRecipe>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<FileSegmentRecipe>> = HashMap::new();

    for descriptor in manifest.layers() {
        let annotations = descriptor.annotations().as_ref().ok_or_else(|| {
            FerryError::MalformedRecipe(format!(
                "layer {} has no annotations",
                descriptor.digest()
            ))
        })?;

        let filename = annotations.get(FILENAME_ANNOTATION_KEY).ok_or_else(|| {
            FerryError::MalformedRecipe(format!(
                "layer {} has no '{}' annotation",
                descriptor.digest(),
                FILENAME_ANNOTATION_KEY
            ))
        })?;
        if filename.contains('/') || filename.contains('\\') || filename.is_empty() {
            return Err(FerryError::MalformedRecipe(format!(
                "invalid filename '{}' in layer {}",
                filename,
                descriptor.digest()
            )));
        }

        let range = annotations.get(RANGE_ANNOTATION_KEY).ok_or_else(|| {
            FerryError::MalformedRecipe(format!(
                "layer {} has no '{}' annotation",
                descriptor.digest(),
                RANGE_ANNOTATION_KEY
            ))
        })?;
        let (start, stop) = parse_range(range)?;

        if !groups.contains_key(filename) {
            order.push(filename.clone());
        }
        groups.entry(filename.clone()).or_default().push(FileSegmentRecipe {
            filename: filename.clone(),
            start,
            stop,
            digest: descriptor.digest().to_string(),
        });
    }

    let mut recipes = Vec::with_capacity(order.len());
    for filename in order {
        let mut segments = groups.remove(&filename).unwrap_or_default();
        segments.sort_by_key(|s| s.start);
        validate_contiguous(&filename, &segments)?;
        recipes.push(FileRecipe { filename, segments });
    }
    Ok(recipes)
}

/// Parse a `"<start>-<stop>"` annotation value.
fn parse_range(range: &str) -> Result<(u64, u64)> {
    let (start, stop) = range.split_once('-').ok_or_else(|| {
        FerryError::MalformedRecipe(format!("invalid range annotation '{}'", range))
    })?;
    let start: u64 = start.parse().map_err(|_| {
        FerryError::MalformedRecipe(format!("invalid range annotation '{}'", range))
    })?;
    let stop: u64 = stop.parse().map_err(|_| {
        FerryError::MalformedRecipe(format!("invalid range annotation '{}'", range))
    })?;
    if start > stop {
        return Err(FerryError::MalformedRecipe(format!(
            "range '{}' has start after stop",
            range
        )));
    }
    Ok((start, stop))
}

/// Segments must start at 0 and tile the file without gaps or overlap.
fn validate_contiguous(filename: &str, segments: &[FileSegmentRecipe]) -> Result<()> {
    let mut expected_start = 0u64;
    for segment in segments {
        if segment.start != expected_start {
            return Err(FerryError::MalformedRecipe(format!(
                "file '{}': segment starts at {} but {} was expected",
                filename, segment.start, expected_start
            )));
        }
        expected_start = segment.stop + 1;
    }
    Ok(())
}
