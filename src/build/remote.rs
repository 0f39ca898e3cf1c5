//! Output strategy backed by a remote OCI registry.
//!
//! Uploads are monolithic: the layer digest is computed in a hashing pass
//! over the tar stream, the registry is probed for it, and only a missing
//! blob is uploaded by re-opening the stream. A weight file is read at most
//! twice and never buffered in memory. Transient failures (5xx, connection
//! resets) are retried with exponential backoff.

use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::blocking::{Body, Client};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::archive::{CancelFlag, HashingReader, LayerSource};
use crate::build::hooks::Progress;
use crate::build::interceptor::{Interceptor, ReaderType};
use crate::build::output::OutputStrategy;
use crate::error::{calculate_backoff, Error, Result, RetryConfig};
use crate::oci::{self, Descriptor};

pub struct RemoteOutput {
    client: Arc<RegistryClient>,
    tag: String,
    progress: Arc<dyn Progress>,
    interceptor: Option<Arc<dyn Interceptor>>,
    cancel: CancelFlag,
}

impl RemoteOutput {
    pub fn new(
        repo: &str,
        tag: impl Into<String>,
        plain_http: bool,
        insecure: bool,
        progress: Arc<dyn Progress>,
        interceptor: Option<Arc<dyn Interceptor>>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RegistryClient::new(repo, plain_http, insecure)?),
            tag: tag.into(),
            progress,
            interceptor,
            cancel,
        })
    }
}

#[async_trait]
impl OutputStrategy for RemoteOutput {
    async fn output_layer(
        &self,
        media_type: &str,
        work_dir: &Path,
        rel_path: &str,
    ) -> Result<Descriptor> {
        let client = self.client.clone();
        let progress = self.progress.clone();
        let interceptor = self.interceptor.clone();
        let cancel = self.cancel.clone();
        let media_type = media_type.to_string();
        let work_dir: PathBuf = work_dir.to_path_buf();
        let rel_path = rel_path.to_string();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let source = LayerSource::new(&work_dir, &rel_path)?;

            // Hashing pass. The interceptor transforms this stream the same
            // way it will transform the upload stream.
            let reader = source.open()?;
            let (reader, mutate) = match &interceptor {
                Some(interceptor) => {
                    let (reader, mutate) =
                        interceptor.intercept(&media_type, &rel_path, ReaderType::Tar, reader)?;
                    (reader, Some(mutate))
                }
                None => (reader, None),
            };
            let mut hashing = HashingReader::new(reader, cancel.clone());
            io::copy(&mut hashing, &mut io::sink())?;
            let (digest, size) = hashing.finalize();

            let mut desc = Descriptor::new(media_type.clone(), digest, size)
                .with_annotation(oci::ANNOTATION_FILEPATH, rel_path.clone());
            if let Some(mutate) = mutate {
                mutate(&mut desc);
            }

            if client.blob_exists(&desc.digest)? {
                debug!(digest = %desc.digest, path = %rel_path, "blob already in registry");
            } else {
                client.push_blob(&desc.digest, size, &|| {
                    let reader = source.open()?;
                    let reader = match &interceptor {
                        Some(interceptor) => {
                            interceptor
                                .intercept(&media_type, &rel_path, ReaderType::Tar, reader)?
                                .0
                        }
                        None => reader,
                    };
                    let reader = progress.on_start(&rel_path, size, reader);
                    Ok(Box::new(HashingReader::new(reader, cancel.clone()))
                        as Box<dyn Read + Send>)
                })?;
            }

            progress.on_complete(&rel_path, &desc);
            Ok(desc)
        })
        .await)
    }

    async fn output_config(&self, media_type: &str, config_json: Vec<u8>) -> Result<Descriptor> {
        let client = self.client.clone();
        let progress = self.progress.clone();
        let media_type = media_type.to_string();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let digest = oci::sha256_digest(&config_json);
            let size = config_json.len() as u64;
            let desc = Descriptor::new(media_type, digest.clone(), size);

            if !client.blob_exists(&digest)? {
                let bytes = config_json.clone();
                client.push_blob(&digest, size, &|| {
                    Ok(progress.on_start("config", size, Box::new(Cursor::new(bytes.clone()))))
                })?;
            }

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
        let client = self.client.clone();
        let progress = self.progress.clone();
        let media_type = media_type.to_string();
        let tag = self.tag.clone();

        crate::build::blocking(tokio::task::spawn_blocking(move || {
            let digest = oci::sha256_digest(&manifest_json);
            let size = manifest_json.len() as u64;
            let desc = Descriptor::new(media_type.clone(), digest.clone(), size);

            let mut reader =
                progress.on_start("manifest", size, Box::new(Cursor::new(manifest_json)));
            let mut bytes = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut bytes)?;

            if !client.manifest_exists(&digest, &media_type)? {
                client.push_manifest(&digest, &media_type, bytes.clone())?;
            }
            // The name tag is a manifest put under the tag reference.
            client.push_manifest(&tag, &media_type, bytes)?;

            progress.on_complete("manifest", &desc);
            Ok(desc)
        })
        .await)
    }
}

/// Minimal OCI distribution client for pushing.
pub(crate) struct RegistryClient {
    http: Client,
    /// Scheme and host, e.g. `https://registry.example.com`.
    origin: String,
    /// Repository endpoint, e.g. `https://registry.example.com/v2/models/llama`.
    base: String,
    retry: RetryConfig,
}

impl RegistryClient {
    pub(crate) fn new(repo: &str, plain_http: bool, insecure: bool) -> Result<Self> {
        let (host, path) = repo
            .split_once('/')
            .filter(|(host, path)| is_registry_host(host) && !path.is_empty())
            .ok_or_else(|| {
                Error::registry(
                    format!("repository {repo} does not include a registry host"),
                    false,
                )
            })?;

        let scheme = if plain_http { "http" } else { "https" };
        let http = Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|err| Error::registry(format!("failed to build http client: {err}"), false))?;

        Ok(Self {
            http,
            origin: format!("{scheme}://{host}"),
            base: format!("{scheme}://{host}/v2/{path}"),
            retry: RetryConfig::default(),
        })
    }

    fn with_retry<T>(&self, context: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = calculate_backoff(attempt, &self.retry);
                    warn!(context, attempt, delay_ms = delay, %err, "retrying registry request");
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn blob_exists(&self, digest: &str) -> Result<bool> {
        let url = format!("{}/blobs/{}", self.base, digest);
        self.with_retry("check blob", || self.head(&url))
    }

    pub(crate) fn manifest_exists(&self, reference: &str, media_type: &str) -> Result<bool> {
        let url = format!("{}/manifests/{}", self.base, reference);
        self.with_retry("check manifest", || {
            let resp = self
                .http
                .head(&url)
                .header(reqwest::header::ACCEPT, media_type)
                .send()
                .map_err(transport_error)?;
            classify_exists(resp.status())
        })
    }

    fn head(&self, url: &str) -> Result<bool> {
        let resp = self.http.head(url).send().map_err(transport_error)?;
        classify_exists(resp.status())
    }

    /// Monolithic blob upload. `open` yields a fresh stream per attempt.
    pub(crate) fn push_blob(
        &self,
        digest: &str,
        size: u64,
        open: &dyn Fn() -> Result<Box<dyn Read + Send>>,
    ) -> Result<()> {
        self.with_retry("push blob", || {
            let start = format!("{}/blobs/uploads/", self.base);
            let resp = self.http.post(&start).send().map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(status_error("failed to start blob upload", resp.status()));
            }

            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    Error::registry("upload session returned no location", false)
                })?;
            let upload_url = self.upload_url(location, digest);

            let reader = open()?;
            let resp = self
                .http
                .put(&upload_url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .header(reqwest::header::CONTENT_LENGTH, size)
                .body(Body::sized(reader, size))
                .send()
                .map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(status_error("failed to upload blob", resp.status()));
            }
            Ok(())
        })
    }

    pub(crate) fn push_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest_json: Vec<u8>,
    ) -> Result<()> {
        let url = format!("{}/manifests/{}", self.base, reference);
        self.with_retry("push manifest", || {
            let resp = self
                .http
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, media_type)
                .body(manifest_json.clone())
                .send()
                .map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(status_error("failed to upload manifest", resp.status()));
            }
            Ok(())
        })
    }

    /// Registries return absolute or host-relative upload locations; either
    /// way the digest lands as a query parameter.
    fn upload_url(&self, location: &str, digest: &str) -> String {
        let absolute = if location.starts_with('/') {
            format!("{}{}", self.origin, location)
        } else {
            location.to_string()
        };
        if absolute.contains('?') {
            format!("{absolute}&digest={digest}")
        } else {
            format!("{absolute}?digest={digest}")
        }
    }
}

fn is_registry_host(host: &str) -> bool {
    host == "localhost" || host.contains('.') || host.contains(':')
}

fn classify_exists(status: StatusCode) -> Result<bool> {
    if status.is_success() {
        return Ok(true);
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    Err(status_error("existence check failed", status))
}

fn status_error(context: &str, status: StatusCode) -> Error {
    Error::registry(format!("{context}: {status}"), status.is_server_error())
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::registry(err.to_string(), true)
}
