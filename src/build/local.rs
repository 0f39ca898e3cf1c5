//! Output strategy backed by the local content-addressed store.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::archive::{CancelFlag, HashingReader, LayerSource};
use crate::build::hooks::Progress;
use crate::build::interceptor::{Interceptor, ReaderType};
use crate::build::output::OutputStrategy;
use crate::error::Result;
use crate::oci::{self, Descriptor};
use crate::store::LocalStore;

pub struct LocalOutput {
    store: Arc<LocalStore>,
    repo: String,
    tag: String,
    progress: Arc<dyn Progress>,
    interceptor: Option<Arc<dyn Interceptor>>,
    cancel: CancelFlag,
}

impl LocalOutput {
    pub fn new(
        store: Arc<LocalStore>,
        repo: impl Into<String>,
        tag: impl Into<String>,
        progress: Arc<dyn Progress>,
        interceptor: Option<Arc<dyn Interceptor>>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            store,
            repo: repo.into(),
            tag: tag.into(),
            progress,
            interceptor,
            cancel,
        }
    }
}

#[async_trait]
impl OutputStrategy for LocalOutput {
    async fn output_layer(
        &self,
        media_type: &str,
        work_dir: &Path,
        rel_path: &str,
    ) -> Result<Descriptor> {
        let store = self.store.clone();
        let progress = self.progress.clone();
        let interceptor = self.interceptor.clone();
        let cancel = self.cancel.clone();
        let media_type = media_type.to_string();
        let work_dir: PathBuf = work_dir.to_path_buf();
        let rel_path = rel_path.to_string();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let source = LayerSource::new(&work_dir, &rel_path)?;
            let reader = source.open()?;
            let reader = progress.on_start(&rel_path, source.tar_size(), reader);
            let (reader, mutate) = match &interceptor {
                Some(interceptor) => {
                    let (reader, mutate) =
                        interceptor.intercept(&media_type, &rel_path, ReaderType::Tar, reader)?;
                    (reader, Some(mutate))
                }
                None => (reader, None),
            };

            // Single pass: the tee hashes while the store persists.
            let mut hashing = HashingReader::new(reader, cancel);
            let mut staged = store.stage()?;
            io::copy(&mut hashing, &mut staged)?;
            let (digest, size) = hashing.finalize();
            if !staged.commit(&digest)? {
                debug!(%digest, path = %rel_path, "layer already stored");
            }

            let mut desc = Descriptor::new(media_type, digest, size)
                .with_annotation(oci::ANNOTATION_FILEPATH, rel_path.clone());
            if let Some(mutate) = mutate {
                mutate(&mut desc);
            }

            progress.on_complete(&rel_path, &desc);
            Ok(desc)
        })
        .await)
    }

    async fn output_config(&self, media_type: &str, config_json: Vec<u8>) -> Result<Descriptor> {
        let store = self.store.clone();
        let progress = self.progress.clone();
        let media_type = media_type.to_string();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let digest = oci::sha256_digest(&config_json);
            let size = config_json.len() as u64;

            let mut reader =
                progress.on_start("config", size, Box::new(Cursor::new(config_json)));
            store.push(&digest, size, &mut reader)?;

            let desc = Descriptor::new(media_type, digest, size);
            progress.on_complete("config", &desc);
            Ok(desc)
        })
        .await)
    }

    async fn output_manifest(
        &self,
        media_type: &str,
        manifest_json: Vec<u8>,
    ) -> Result<Descriptor> {
        let store = self.store.clone();
        let progress = self.progress.clone();
        let media_type = media_type.to_string();
        let repo = self.repo.clone();
        let tag = self.tag.clone();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let digest = oci::sha256_digest(&manifest_json);
            let size = manifest_json.len() as u64;

            let mut reader =
                progress.on_start("manifest", size, Box::new(Cursor::new(manifest_json)));
            store.push(&digest, size, &mut reader)?;
            store.tag(&repo, &tag, &digest)?;

            let desc = Descriptor::new(media_type, digest, size);
            progress.on_complete("manifest", &desc);
            Ok(desc)
        })
        .await)
    }
}
