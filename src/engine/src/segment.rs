//! File segment layers.
//!
//! A `SegmentLayer` represents a `[start, stop]` byte range of a local file
//! as an OCI layer: gzip-compressed on the wire, addressed by the digest of
//! its compressed bytes, identified by the diff-ID of its uncompressed
//! bytes. Hashes are computed lazily in one streaming pass and cached.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use diskferry_core::error::{FerryError, Result};
use flate2::read::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

/// Media type identifying a gzip-compressed file segment layer.
pub const FILE_SEGMENT_MEDIA_TYPE: &str =
    "application/online.jarosik.tomasz.v1.file.segment+gzip";

/// Cached hash results for one segment.
#[derive(Debug, Clone)]
struct SegmentHashes {
    diff_id: String,
    digest: String,
    compressed_size: u64,
}

/// A byte range of a file, exposed as an OCI layer.
#[derive(Debug)]
pub struct SegmentLayer {
    path: PathBuf,
    start: u64,
    stop: u64,
    size: u64,
    hashes: Mutex<Option<SegmentHashes>>,
}

impl SegmentLayer {
    /// A layer covering the whole file. Used for files smaller than the
    /// chunk size.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self {
            stop: size.saturating_sub(1),
            start: 0,
            size,
            path,
            hashes: Mutex::new(None),
        })
    }

    /// A layer covering `[start, stop]` (inclusive) of the file.
    pub fn from_range(path: impl AsRef<Path>, start: u64, stop: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if start > stop {
            return Err(FerryError::InvalidInput(format!(
                "invalid segment range {}-{} for '{}'",
                start,
                stop,
                path.display()
            )));
        }
        let file_size = std::fs::metadata(&path)?.len();
        if stop >= file_size {
            return Err(FerryError::InvalidInput(format!(
                "segment range {}-{} exceeds size {} of '{}'",
                start,
                stop,
                file_size,
                path.display()
            )));
        }
        Ok(Self {
            size: stop - start + 1,
            path,
            start,
            stop,
            hashes: Mutex::new(None),
        })
    }

    /// First byte offset covered by this segment.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset covered by this segment (inclusive).
    pub fn stop(&self) -> u64 {
        self.stop
    }

    /// Uncompressed length of the segment.
    pub fn uncompressed_size(&self) -> u64 {
        self.size
    }

    /// Basename of the underlying file.
    pub fn filename(&self) -> Result<&str> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                FerryError::InvalidInput(format!("no filename in '{}'", self.path.display()))
            })
    }

    /// The `"<start>-<stop>"` annotation value for this segment.
    pub fn range_annotation(&self) -> String {
        format!("{}-{}", self.start, self.stop)
    }

    /// Layer media type.
    pub fn media_type(&self) -> &'static str {
        FILE_SEGMENT_MEDIA_TYPE
    }

    /// A bounded reader over the uncompressed segment bytes. Opens a fresh
    /// file handle on each call, so concurrent readers never share a cursor.
    pub fn uncompressed(&self) -> Result<impl Read> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.start))?;
        Ok(file.take(self.size))
    }

    /// A gzip-compressing reader over the uncompressed segment bytes.
    pub fn compressed(&self) -> Result<impl Read> {
        Ok(GzEncoder::new(self.uncompressed()?, Compression::default()))
    }

    /// SHA-256 of the uncompressed bytes, as `sha256:<hex>`. Cached.
    pub fn diff_id(&self) -> Result<String> {
        Ok(self.ensure_hashes()?.diff_id)
    }

    /// SHA-256 of the compressed bytes, as `sha256:<hex>`. Cached.
    pub fn digest(&self) -> Result<String> {
        Ok(self.ensure_hashes()?.digest)
    }

    /// Compressed length in bytes. Cached.
    pub fn compressed_size(&self) -> Result<u64> {
        Ok(self.ensure_hashes()?.compressed_size)
    }

    /// Compute diff-ID, digest and compressed size in a single streaming
    /// pass over the range, under the cache lock: the first computer wins
    /// and later readers see the cached value.
    fn ensure_hashes(&self) -> Result<SegmentHashes> {
        let mut guard = match self.hashes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(hashes) = guard.as_ref() {
            return Ok(hashes.clone());
        }

        let tee = HashingReader::new(self.uncompressed()?);
        let mut encoder = GzEncoder::new(tee, Compression::default());
        let mut digest_hasher = Sha256::new();
        let mut compressed_size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = encoder.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digest_hasher.update(&buf[..n]);
            compressed_size += n as u64;
        }

        let hashes = SegmentHashes {
            diff_id: format!("sha256:{}", hex::encode(encoder.into_inner().finalize())),
            digest: format!("sha256:{}", hex::encode(digest_hasher.finalize())),
            compressed_size,
        };
        *guard = Some(hashes.clone());
        Ok(hashes)
    }
}

/// Reader adapter that hashes every byte passing through it.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finalize(self) -> impl AsRef<[u8]> {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sha256_hex(data: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(data)))
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_from_file_covers_whole_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "disk.img", b"testvm123456789");

        let layer = SegmentLayer::from_file(&path).unwrap();
        assert_eq!(layer.start(), 0);
        assert_eq!(layer.stop(), 14);
        assert_eq!(layer.uncompressed_size(), 15);
        assert_eq!(layer.range_annotation(), "0-14");
        assert_eq!(layer.filename().unwrap(), "disk.img");
    }

    #[test]
    fn test_from_range_validates_bounds() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "disk.img", &[0u8; 100]);

        assert!(SegmentLayer::from_range(&path, 10, 9).is_err());
        assert!(SegmentLayer::from_range(&path, 0, 100).is_err());
        assert!(SegmentLayer::from_range(&path, 0, 99).is_ok());
    }

    #[test]
    fn test_uncompressed_reads_exact_range() {
        let tmp = TempDir::new().unwrap();
        let content: Vec<u8> = (0..=255u8).collect();
        let path = write_file(&tmp, "disk.img", &content);

        let layer = SegmentLayer::from_range(&path, 16, 31).unwrap();
        let mut bytes = Vec::new();
        layer.uncompressed().unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, &content[16..32]);
    }

    #[test]
    fn test_diff_id_matches_range_hash() {
        let tmp = TempDir::new().unwrap();
        let content = vec![42u8; 4096];
        let path = write_file(&tmp, "disk.img", &content);

        let layer = SegmentLayer::from_range(&path, 1024, 2047).unwrap();
        assert_eq!(layer.diff_id().unwrap(), sha256_hex(&content[1024..2048]));
    }

    #[test]
    fn test_digest_matches_compressed_stream() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "disk.img", &vec![7u8; 8192]);

        let layer = SegmentLayer::from_file(&path).unwrap();
        let mut compressed = Vec::new();
        layer
            .compressed()
            .unwrap()
            .read_to_end(&mut compressed)
            .unwrap();

        assert_eq!(layer.digest().unwrap(), sha256_hex(&compressed));
        assert_eq!(layer.compressed_size().unwrap(), compressed.len() as u64);
    }

    #[test]
    fn test_hashes_are_stable_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "disk.img", &vec![9u8; 1 << 16]);

        let a = SegmentLayer::from_range(&path, 0, 4095).unwrap();
        let b = SegmentLayer::from_range(&path, 0, 4095).unwrap();

        // Order of first access must not matter.
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.diff_id().unwrap(), b.diff_id().unwrap());
        assert_eq!(a.compressed_size().unwrap(), b.compressed_size().unwrap());
    }

    #[test]
    fn test_concurrent_hash_access_returns_same_value() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "disk.img", &vec![3u8; 1 << 18]);
        let layer = Arc::new(SegmentLayer::from_file(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let layer = Arc::clone(&layer);
                std::thread::spawn(move || layer.digest().unwrap())
            })
            .collect();

        let digests: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_empty_file_layer() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "empty.img", b"");

        let layer = SegmentLayer::from_file(&path).unwrap();
        assert_eq!(layer.uncompressed_size(), 0);
        assert_eq!(layer.diff_id().unwrap(), sha256_hex(b""));
    }
}
