//! OCI wire types for model artifacts: descriptors, the image manifest and
//! the model config blob, together with the media-type and annotation
//! constants of the model artifact layout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Media type of the OCI image manifest.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of the model config blob.
pub const MEDIA_TYPE_MODEL_CONFIG: &str = "application/vnd.cnai.model.config.v1+json";

/// Per-category layer media types. The `.tar` suffix marks the layer byte
/// stream as an uncompressed tar.
pub const MEDIA_TYPE_MODEL_WEIGHT: &str = "application/vnd.cnai.model.weight.v1.tar";
pub const MEDIA_TYPE_MODEL_WEIGHT_CONFIG: &str = "application/vnd.cnai.model.weight.config.v1.tar";
pub const MEDIA_TYPE_MODEL_CODE: &str = "application/vnd.cnai.model.code.v1.tar";
pub const MEDIA_TYPE_MODEL_DOC: &str = "application/vnd.cnai.model.doc.v1.tar";
pub const MEDIA_TYPE_MODEL_DATASET: &str = "application/vnd.cnai.model.dataset.v1.tar";

/// Media type a layer is rewritten to by the nydus interceptor.
pub const MEDIA_TYPE_NYDUS_BLOB: &str = "application/vnd.oci.image.layer.nydus.blob.v1";

/// Annotation carrying the workspace-relative path of a layer's file.
pub const ANNOTATION_FILEPATH: &str = "org.cnai.model.filepath";

/// Annotation on the manifest carrying the rendered Modelfile text.
pub const ANNOTATION_MODELFILE: &str = "org.cnai.modctl.modelfile";

/// Category marker annotations stamped on layer descriptors.
pub const ANNOTATION_CONFIG: &str = "org.cnai.model.config";
pub const ANNOTATION_MODEL: &str = "org.cnai.model.model";
pub const ANNOTATION_README: &str = "org.cnai.model.readme";
pub const ANNOTATION_LICENSE: &str = "org.cnai.model.license";

/// Annotation marking a layer as a nydus blob.
pub const ANNOTATION_NYDUS_BLOB: &str = "containerd.io/snapshot/nydus-blob";

/// Pointer to a blob inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    /// The workspace-relative file path this layer was built from, if any.
    pub fn filepath(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_FILEPATH).map(String::as_str)
    }
}

/// OCI image manifest: the only object reachable by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The model config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub descriptor: ModelDescriptor,
    pub config: ModelParameters,
    pub modelfs: ModelFs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub family: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub precision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quantization: String,
    #[serde(rename = "paramSize", default, skip_serializing_if = "String::is_empty")]
    pub param_size: String,
}

/// The layer filesystem section of the model config. `diff_ids` lists layer
/// digests in manifest order; layers are uncompressed tar, so a diff-id
/// equals the stored layer digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

/// Serialize to canonical JSON: keys sorted, no trailing newline.
///
/// The value round-trip rebuilds every JSON object on a sorted-key map, so
/// two assemblies of the same data are byte-identical.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// SHA-256 digest of a byte slice in `sha256:<hex>` form.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest_format() {
        let digest = sha256_digest(b"hello");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let manifest = Manifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            config: Descriptor::new(MEDIA_TYPE_MODEL_CONFIG, "sha256:abc", 10),
            layers: vec![],
            annotations: BTreeMap::new(),
        };

        let bytes = canonical_json(&manifest).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        // Keys come out alphabetically regardless of struct declaration order.
        assert!(text.find("\"config\"").unwrap() < text.find("\"layers\"").unwrap());
        assert!(text.find("\"layers\"").unwrap() < text.find("\"mediaType\"").unwrap());
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn test_descriptor_annotations_round_trip() {
        let desc = Descriptor::new(MEDIA_TYPE_MODEL_WEIGHT, "sha256:def", 42)
            .with_annotation(ANNOTATION_FILEPATH, "weights/model.bin")
            .with_annotation(ANNOTATION_MODEL, "true");

        let bytes = canonical_json(&desc).unwrap();
        let parsed: Descriptor = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, desc);
        assert_eq!(parsed.filepath(), Some("weights/model.bin"));
    }

    #[test]
    fn test_empty_annotations_are_omitted() {
        let desc = Descriptor::new(MEDIA_TYPE_MODEL_CODE, "sha256:0", 1);
        let text = String::from_utf8(canonical_json(&desc).unwrap()).unwrap();
        assert!(!text.contains("annotations"));
    }

    #[test]
    fn test_model_config_shape() {
        let config = ModelConfig {
            descriptor: ModelDescriptor {
                name: "llama-2".to_string(),
                family: "llama".to_string(),
                created_at: DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            },
            config: ModelParameters {
                architecture: "transformer".to_string(),
                format: "gguf".to_string(),
                precision: "fp16".to_string(),
                quantization: "q4_0".to_string(),
                param_size: "7B".to_string(),
            },
            modelfs: ModelFs {
                fs_type: "layers".to_string(),
                diff_ids: vec!["sha256:layer-1".to_string(), "sha256:layer-2".to_string()],
            },
        };

        let text = String::from_utf8(canonical_json(&config).unwrap()).unwrap();
        assert!(text.contains("\"createdAt\""));
        assert!(text.contains("\"paramSize\":\"7B\""));
        assert!(text.contains("\"type\":\"layers\""));
        assert!(text.contains("\"diff_ids\":[\"sha256:layer-1\",\"sha256:layer-2\"]"));
    }
}
