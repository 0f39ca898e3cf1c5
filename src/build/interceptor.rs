//! Layer stream interception.
//!
//! An interceptor decorates the layer pipeline: it receives the byte stream
//! before the output strategy consumes it and returns the stream to use plus
//! a descriptor mutator the strategy applies before returning. It may
//! rewrite the media type and annotations; the file identity visible to the
//! user (the filepath annotation) stays untouched.

use std::io::Read;

use crate::error::Result;
use crate::oci::{self, Descriptor};

/// The kind of stream handed to an interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderType {
    /// Raw file bytes.
    Raw,
    /// A single-member tar stream.
    Tar,
}

/// Mutation applied to the layer descriptor before it is returned.
pub type DescriptorMutator = Box<dyn FnOnce(&mut Descriptor) + Send>;

pub trait Interceptor: Send + Sync {
    fn intercept(
        &self,
        media_type: &str,
        rel_path: &str,
        reader_type: ReaderType,
        reader: Box<dyn Read + Send>,
    ) -> Result<(Box<dyn Read + Send>, DescriptorMutator)>;
}

/// Built-in nydus interceptor: the stream passes through unmodified and the
/// descriptor is rewritten to the nydus blob media type.
pub struct NydusInterceptor;

impl Interceptor for NydusInterceptor {
    fn intercept(
        &self,
        _media_type: &str,
        _rel_path: &str,
        _reader_type: ReaderType,
        reader: Box<dyn Read + Send>,
    ) -> Result<(Box<dyn Read + Send>, DescriptorMutator)> {
        Ok((
            reader,
            Box::new(|desc: &mut Descriptor| {
                desc.media_type = oci::MEDIA_TYPE_NYDUS_BLOB.to_string();
                desc.annotations
                    .insert(oci::ANNOTATION_NYDUS_BLOB.to_string(), "true".to_string());
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_nydus_rewrites_descriptor_not_stream() {
        let interceptor = NydusInterceptor;
        let (mut reader, mutate) = interceptor
            .intercept(
                oci::MEDIA_TYPE_MODEL_WEIGHT,
                "model.bin",
                ReaderType::Tar,
                Box::new(Cursor::new(b"stream bytes".to_vec())),
            )
            .unwrap();

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"stream bytes");

        let mut desc = Descriptor::new(oci::MEDIA_TYPE_MODEL_WEIGHT, "sha256:abc", 12)
            .with_annotation(oci::ANNOTATION_FILEPATH, "model.bin");
        mutate(&mut desc);
        assert_eq!(desc.media_type, oci::MEDIA_TYPE_NYDUS_BLOB);
        assert_eq!(desc.annotations.get(oci::ANNOTATION_NYDUS_BLOB).unwrap(), "true");
        assert_eq!(desc.filepath(), Some("model.bin"));
    }
}
