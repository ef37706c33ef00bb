//! Remote blob store contract.
//!
//! The minimal registry surface the transporter consumes: blob existence,
//! upload, cross-repository mount, download, and manifest get/put. The
//! production implementation speaks the OCI distribution HTTP protocol;
//! tests substitute an in-memory store.

use async_trait::async_trait;
use diskferry_core::error::Result;

use crate::reference::ImageRef;

/// A content-addressed blob store with tag-addressed manifests.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Whether the repository already holds a blob with this digest.
    async fn exists(&self, repository: &str, digest: &str) -> Result<bool>;

    /// Upload a blob under its digest.
    async fn upload(&self, repository: &str, digest: &str, bytes: Vec<u8>) -> Result<()>;

    /// Attempt a cross-repository mount of `digest` from `from_repository`.
    /// Returns `false` when the registry declines and the caller must fall
    /// back to a regular upload.
    async fn mount(&self, repository: &str, digest: &str, from_repository: &str)
        -> Result<bool>;

    /// Download a blob's bytes.
    async fn download(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;

    /// Fetch the raw manifest for a reference. An unknown reference fails
    /// with `NameUnknown`.
    async fn get_manifest(&self, reference: &ImageRef) -> Result<Vec<u8>>;

    /// Store the raw manifest for a reference.
    async fn put_manifest(&self, reference: &ImageRef, bytes: Vec<u8>) -> Result<()>;
}
