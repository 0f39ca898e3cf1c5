//! The build orchestrator: drives Modelfile parsing, file claiming, layer
//! streaming, and config/manifest assembly against an output strategy.

mod hooks;
mod interceptor;
mod local;
mod output;
mod processor;
mod remote;

pub use hooks::{NoopProgress, Progress, TracingProgress};
pub use interceptor::{DescriptorMutator, Interceptor, NydusInterceptor, ReaderType};
pub use local::LocalOutput;
pub use output::OutputStrategy;
pub use processor::Processor;
pub use remote::RemoteOutput;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::archive::CancelFlag;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::modelfile::Modelfile;
use crate::oci::{
    self, Descriptor, Manifest, ModelConfig, ModelDescriptor, ModelFs, ModelParameters,
};
use crate::reference::Reference;
use crate::store::LocalStore;
use crate::walker;

/// Builds model artifacts from a workspace.
pub struct Builder {
    store: Arc<LocalStore>,
    progress: Arc<dyn Progress>,
    clock: Option<DateTime<Utc>>,
    cancel: CancelFlag,
}

impl Builder {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            progress: Arc::new(TracingProgress),
            clock: None,
            cancel: CancelFlag::default(),
        }
    }

    /// Replace the progress sink.
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Pin the timestamp used for the config `createdAt` and the rendered
    /// Modelfile header, making build output byte-reproducible.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    /// Share a cancellation flag with the caller. Cancelling stops new
    /// layer tasks and aborts in-flight streams at their next read.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the artifact described by the Modelfile in `work_dir` and bind
    /// it to `cfg.target`. Returns the manifest descriptor.
    pub async fn build(&self, work_dir: &Path, cfg: &BuildConfig) -> Result<Descriptor> {
        cfg.validate()?;

        let reference = Reference::parse(&cfg.target)
            .map_err(|err| Error::phase("parse target", err))?;
        let repo = reference.repository().to_string();
        let tag = reference.tag().ok_or(Error::TagRequired)?.to_string();

        let modelfile_path = resolve_modelfile_path(work_dir, &cfg.modelfile);
        let modelfile = Modelfile::from_file(&modelfile_path)
            .map_err(|err| Error::phase("parse modelfile", err))?;

        let cancel = self.cancel.clone();
        let interceptor: Option<Arc<dyn Interceptor>> = cfg
            .nydusify
            .then(|| Arc::new(NydusInterceptor) as Arc<dyn Interceptor>);

        let strategy: Arc<dyn OutputStrategy> = if cfg.output_remote {
            Arc::new(RemoteOutput::new(
                &repo,
                &tag,
                cfg.plain_http,
                cfg.insecure,
                self.progress.clone(),
                interceptor,
                cancel.clone(),
            )?)
        } else {
            Arc::new(LocalOutput::new(
                self.store.clone(),
                &repo,
                &tag,
                self.progress.clone(),
                interceptor,
                cancel.clone(),
            ))
        };

        // Default readme/license processors apply in local builds only; a
        // remote build packages exactly what the Modelfile declares.
        let processors = processor_set(&modelfile, !cfg.output_remote)?;
        let layers = self
            .process_files(work_dir, &processors, strategy.clone(), cfg.concurrency, &cancel)
            .await
            .map_err(|err| Error::phase("process files", err))?;

        let now = self.clock.unwrap_or_else(Utc::now);

        let model_config = assemble_model_config(&modelfile, &layers, now);
        let config_json = oci::canonical_json(&model_config)
            .map_err(|err| Error::phase("build model config", err))?;
        let config_desc = strategy
            .output_config(oci::MEDIA_TYPE_MODEL_CONFIG, config_json)
            .await
            .map_err(|err| Error::phase("build model config", err))?;

        let mut annotations = BTreeMap::new();
        annotations.insert(oci::ANNOTATION_MODELFILE.to_string(), modelfile.render(now));
        let manifest = Manifest {
            schema_version: 2,
            media_type: oci::MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            config: config_desc,
            layers,
            annotations,
        };
        let manifest_json = oci::canonical_json(&manifest)
            .map_err(|err| Error::phase("build model manifest", err))?;
        let manifest_desc = strategy
            .output_manifest(oci::MEDIA_TYPE_IMAGE_MANIFEST, manifest_json)
            .await
            .map_err(|err| Error::phase("build model manifest", err))?;

        info!(target = %cfg.target, digest = %manifest_desc.digest, "built model artifact");
        Ok(manifest_desc)
    }

    /// Walk the workspace once, let processors claim files, and stream every
    /// claimed file through the output strategy on a bounded worker pool.
    /// Descriptors come back in deterministic (filepath, media type) order.
    async fn process_files(
        &self,
        work_dir: &Path,
        processors: &[Processor],
        strategy: Arc<dyn OutputStrategy>,
        concurrency: usize,
        cancel: &CancelFlag,
    ) -> Result<Vec<Descriptor>> {
        let files = walker::walk_files(work_dir)?;

        // A file may be claimed by more than one processor; each claim
        // yields its own layer.
        let mut claims: Vec<(String, usize)> = Vec::new();
        for rel_path in &files {
            for (idx, processor) in processors.iter().enumerate() {
                if processor.claims(rel_path) {
                    claims.push((rel_path.clone(), idx));
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for (rel_path, idx) in claims {
            let semaphore = semaphore.clone();
            let strategy = strategy.clone();
            let cancel = cancel.clone();
            let progress = self.progress.clone();
            let media_type = processors[idx].media_type();
            let marker = processors[idx].marker();
            let work_dir = work_dir.to_path_buf();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                match strategy.output_layer(media_type, &work_dir, &rel_path).await {
                    Ok(mut desc) => {
                        if let Some(marker) = marker {
                            desc.annotations.insert(marker.to_string(), "true".to_string());
                        }
                        Ok(desc)
                    }
                    Err(err) => {
                        progress.on_error(&rel_path, &err);
                        Err(err)
                    }
                }
            });
        }

        let mut layers = Vec::new();
        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|err| {
                Err(Error::Io(std::io::Error::other(err)))
            });
            match result {
                Ok(desc) => layers.push(desc),
                Err(err) => {
                    // Fail fast: peers observe the flag and abort.
                    cancel.cancel();
                    match &first_error {
                        None => first_error = Some(err),
                        Some(existing) if existing.is_cancelled() && !err.is_cancelled() => {
                            first_error = Some(err)
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Total order: a file claimed by two processors yields descriptors
        // differing only in annotations, so those tiebreak after the
        // filepath and media type.
        layers.sort_by(|a, b| {
            (a.filepath().unwrap_or(""), &a.media_type, &a.digest, &a.annotations)
                .cmp(&(b.filepath().unwrap_or(""), &b.media_type, &b.digest, &b.annotations))
        });
        Ok(layers)
    }
}

/// A relative Modelfile path resolves against the workspace.
fn resolve_modelfile_path(work_dir: &Path, modelfile: &str) -> PathBuf {
    let path = Path::new(modelfile);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        work_dir.join(path)
    }
}

/// One processor per non-empty Modelfile category, plus the readme/license
/// defaults in local mode.
fn processor_set(modelfile: &Modelfile, local_mode: bool) -> Result<Vec<Processor>> {
    let mut processors = Vec::new();
    if !modelfile.configs().is_empty() {
        processors.push(Processor::config(modelfile.configs())?);
    }
    if !modelfile.models().is_empty() {
        processors.push(Processor::model(modelfile.models())?);
    }
    if !modelfile.codes().is_empty() {
        processors.push(Processor::code(modelfile.codes())?);
    }
    if !modelfile.docs().is_empty() {
        processors.push(Processor::doc(modelfile.docs())?);
    }
    if !modelfile.datasets().is_empty() {
        processors.push(Processor::dataset(modelfile.datasets())?);
    }
    if local_mode {
        processors.push(Processor::readme()?);
        processors.push(Processor::license()?);
    }
    Ok(processors)
}

/// Assemble the model config blob. `diff_ids` lists layer digests in
/// manifest order.
fn assemble_model_config(
    modelfile: &Modelfile,
    layers: &[Descriptor],
    created_at: DateTime<Utc>,
) -> ModelConfig {
    ModelConfig {
        descriptor: ModelDescriptor {
            name: modelfile.name().to_string(),
            family: modelfile.family().to_string(),
            created_at,
        },
        config: ModelParameters {
            architecture: modelfile.arch().to_string(),
            format: modelfile.format().to_string(),
            precision: modelfile.precision().to_string(),
            quantization: modelfile.quantization().to_string(),
            param_size: modelfile.param_size().to_string(),
        },
        modelfs: ModelFs {
            fs_type: "layers".to_string(),
            diff_ids: layers.iter().map(|layer| layer.digest.clone()).collect(),
        },
    }
}

/// Unwrap a spawn_blocking join result.
pub(crate) fn blocking<T>(
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(Error::Io(std::io::Error::other(err))),
    }
}
