//! In-memory segment images.
//!
//! A `SegmentImage` is the transient value built by the read path: the
//! ordered segment layers of a local directory plus a synthesized config
//! blob and the serialized manifest. The manifest digest is a pure function
//! of the directory contents — no timestamps, no host identity.

use std::collections::HashMap;
use std::sync::Arc;

use diskferry_core::error::{FerryError, Result};
use oci_spec::image::{
    Arch, Descriptor, DescriptorBuilder, ImageConfigurationBuilder, ImageManifest,
    ImageManifestBuilder, MediaType, Os, RootFsBuilder,
};
use sha2::{Digest, Sha256};

use crate::recipe::{FILENAME_ANNOTATION_KEY, RANGE_ANNOTATION_KEY};
use crate::segment::{SegmentLayer, FILE_SEGMENT_MEDIA_TYPE};

/// Media type of the synthetic config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/online.jarosik.tomasz.v1.config+json";

/// An ordered sequence of segment layers plus config blob and manifest.
#[derive(Debug)]
pub struct SegmentImage {
    layers: Vec<Arc<SegmentLayer>>,
    manifest: ImageManifest,
    manifest_bytes: Vec<u8>,
    config_bytes: Vec<u8>,
}

impl SegmentImage {
    /// Build an image from segment layers in their final order.
    ///
    /// Layer hashes are expected to be precomputed by the splitter; any
    /// that are not are computed here.
    pub fn from_layers(layers: Vec<Arc<SegmentLayer>>) -> Result<Self> {
        let mut diff_ids = Vec::with_capacity(layers.len());
        let mut descriptors = Vec::with_capacity(layers.len());
        for layer in &layers {
            diff_ids.push(layer.diff_id()?);

            let mut annotations = HashMap::new();
            annotations.insert(
                FILENAME_ANNOTATION_KEY.to_string(),
                layer.filename()?.to_string(),
            );
            annotations.insert(RANGE_ANNOTATION_KEY.to_string(), layer.range_annotation());

            descriptors.push(
                DescriptorBuilder::default()
                    .media_type(MediaType::Other(FILE_SEGMENT_MEDIA_TYPE.to_string()))
                    .digest(layer.digest()?)
                    .size(layer.compressed_size()? as i64)
                    .annotations(annotations)
                    .build()
                    .map_err(oci_err)?,
            );
        }

        let rootfs = RootFsBuilder::default()
            .typ("layers".to_string())
            .diff_ids(diff_ids)
            .build()
            .map_err(oci_err)?;
        let config = ImageConfigurationBuilder::default()
            .architecture(Arch::Amd64)
            .os(Os::Linux)
            .rootfs(rootfs)
            .build()
            .map_err(oci_err)?;
        let config_bytes = serde_json::to_vec(&config)?;

        let config_descriptor = DescriptorBuilder::default()
            .media_type(MediaType::Other(CONFIG_MEDIA_TYPE.to_string()))
            .digest(sha256_digest(&config_bytes))
            .size(config_bytes.len() as i64)
            .build()
            .map_err(oci_err)?;

        let manifest = ImageManifestBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageManifest)
            .config(config_descriptor)
            .layers(descriptors)
            .build()
            .map_err(oci_err)?;
        let manifest_bytes = serde_json::to_vec(&manifest)?;

        Ok(Self {
            layers,
            manifest,
            manifest_bytes,
            config_bytes,
        })
    }

    /// The segment layers in manifest order.
    pub fn layers(&self) -> &[Arc<SegmentLayer>] {
        &self.layers
    }

    /// The image manifest.
    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    /// Raw manifest bytes, as uploaded and persisted.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.manifest_bytes
    }

    /// Digest of the raw manifest bytes.
    pub fn manifest_digest(&self) -> String {
        sha256_digest(&self.manifest_bytes)
    }

    /// Raw config blob bytes.
    pub fn config_bytes(&self) -> &[u8] {
        &self.config_bytes
    }

    /// The config blob descriptor.
    pub fn config_descriptor(&self) -> &Descriptor {
        self.manifest.config()
    }
}

/// `sha256:<hex>` digest of a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn oci_err(err: oci_spec::OciSpecError) -> FerryError {
    FerryError::Serialization(err.to_string())
}
