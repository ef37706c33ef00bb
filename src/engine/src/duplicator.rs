//! Flat directory cloning.
//!
//! Clones one image directory into another. Every file is copied through
//! the sparse copier so holes in the source stay holes in the destination.

use std::fs::OpenOptions;
use std::path::Path;

use diskferry_core::error::{FerryError, Result};

use crate::sparse::sparse_copy;

/// Whether `path` is a directory containing only regular files.
pub fn is_flat_dir(path: &Path) -> Result<bool> {
    if !std::fs::metadata(path)?.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(path)? {
        if entry?.path().is_dir() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Clone the flat directory `src` into `dst`, creating `dst`.
///
/// TODO: use copy-on-write reflinks (FICLONE / clonefile) where the
/// filesystem supports them instead of a byte copy.
pub fn clone_tree(src: &Path, dst: &Path) -> Result<()> {
    if !is_flat_dir(src)? {
        return Err(FerryError::InvalidInput(format!(
            "'{}' is not a flat directory",
            src.display()
        )));
    }
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let src_file = std::fs::File::open(&src_path)?;
        let mut dst_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&dst_path)?;
        let stats = sparse_copy(&mut dst_file, src_file)?;

        tracing::debug!(
            src = %src_path.display(),
            dst = %dst_path.display(),
            written = stats.written,
            skipped = stats.skipped,
            "Cloned file"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_flat_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.img"), b"data").unwrap();
        assert!(is_flat_dir(tmp.path()).unwrap());

        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        assert!(!is_flat_dir(tmp.path()).unwrap());
    }

    #[test]
    fn test_is_flat_dir_on_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.img");
        std::fs::write(&file, b"data").unwrap();
        assert!(!is_flat_dir(&file).unwrap());
    }

    #[test]
    fn test_clone_tree_copies_contents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("disk.img"), vec![7u8; 5000]).unwrap();
        std::fs::write(src.join(".oci.manifest.json"), b"{}").unwrap();

        clone_tree(&src, &dst).unwrap();

        assert_eq!(std::fs::read(dst.join("disk.img")).unwrap(), vec![7u8; 5000]);
        assert_eq!(std::fs::read(dst.join(".oci.manifest.json")).unwrap(), b"{}");
    }

    #[test]
    fn test_clone_tree_rejects_nested_source() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();

        let err = clone_tree(&src, &tmp.path().join("dst")).unwrap_err();
        assert!(matches!(err, FerryError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_clone_tree_preserves_sparseness() {
        use std::os::unix::fs::MetadataExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        std::fs::create_dir(&src).unwrap();

        // Mostly-zero source file
        let mut content = vec![0u8; 4 * 1024 * 1024];
        content[0] = 1;
        std::fs::write(src.join("disk.img"), &content).unwrap();

        clone_tree(&src, &dst).unwrap();

        let meta = std::fs::metadata(dst.join("disk.img")).unwrap();
        assert_eq!(meta.len(), content.len() as u64);
        assert!(meta.blocks() * 512 < meta.len());
    }
}
