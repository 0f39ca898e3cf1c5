//! Output strategy: where built blobs go.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::oci::Descriptor;

/// Persists blobs either to the local content-addressed store or to a
/// remote OCI registry. All three operations deduplicate: a blob or
/// manifest whose digest already exists at the destination is not written
/// again.
#[async_trait]
pub trait OutputStrategy: Send + Sync {
    /// Stream one file as a tar layer to the destination. The returned
    /// descriptor carries the filepath annotation.
    async fn output_layer(
        &self,
        media_type: &str,
        work_dir: &Path,
        rel_path: &str,
    ) -> Result<Descriptor>;

    /// Persist the model config blob.
    async fn output_config(&self, media_type: &str, config_json: Vec<u8>) -> Result<Descriptor>;

    /// Persist the manifest blob and bind it to the target tag.
    async fn output_manifest(&self, media_type: &str, manifest_json: Vec<u8>)
        -> Result<Descriptor>;
}
