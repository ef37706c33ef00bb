use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default segment size used when splitting files into layers: 64 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Default splitter (hashing) pool size.
pub const DEFAULT_WORKERS_COUNT: usize = 8;

/// Configuration for transport operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Root directory for the local image layout.
    pub images_path: PathBuf,

    /// Segment size in bytes. Files larger than this are split at every
    /// `chunk_size` boundary; the final segment may be shorter.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Splitter pool size (CPU-bound hashing workers).
    #[serde(default = "default_workers_count")]
    pub workers_count: usize,

    /// Writer pool size override. When unset, `min(8, available CPUs)`.
    #[serde(default)]
    pub write_workers_count: Option<usize>,

    /// On push, attempt a cross-repository blob mount from this reference
    /// before uploading a missing layer.
    #[serde(default)]
    pub mount_ref: Option<String>,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_workers_count() -> usize {
    DEFAULT_WORKERS_COUNT
}

impl TransportConfig {
    /// Create a configuration with defaults rooted at `images_path`.
    pub fn new(images_path: impl Into<PathBuf>) -> Self {
        Self {
            images_path: images_path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers_count: DEFAULT_WORKERS_COUNT,
            write_workers_count: None,
            mount_ref: None,
        }
    }

    /// Set the segment size in bytes.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the splitter pool size.
    pub fn with_workers_count(mut self, workers_count: usize) -> Self {
        self.workers_count = workers_count;
        self
    }

    /// Set the reference to mount blobs from during push.
    pub fn with_mount_ref(mut self, mount_ref: impl Into<String>) -> Self {
        self.mount_ref = Some(mount_ref.into());
        self
    }

    /// Effective writer pool size: the override if set, otherwise
    /// `min(8, available CPUs)`.
    pub fn effective_write_workers(&self) -> usize {
        self.write_workers_count.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            cpus.min(8)
        })
        .max(1)
    }
}
