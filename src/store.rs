//! Content-addressed blob store on disk.
//!
//! Layout, rooted at the configured storage directory:
//!
//! ```text
//! <root>/
//!   repositories/<repo>/_manifests/tags/<tag>/current/link   -> "sha256:..."
//!   blobs/sha256/<first2>/<hex>/data
//! ```
//!
//! Blobs land via "write to temp file, fsync, rename", so concurrent writers
//! of the same digest are safe: both streams are byte-identical and the last
//! rename wins.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::oci::Manifest;

const COPY_BUF: usize = 64 * 1024;

/// Local content-addressed store.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs").join("sha256"))?;
        fs::create_dir_all(root.join("repositories"))?;
        Ok(Self { root })
    }

    /// Storage root from `MODELPACK_STORAGE_DIR`, else `$HOME/.modelpack`.
    pub fn default_root() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("MODELPACK_STORAGE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var("HOME")
            .map_err(|_| Error::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".modelpack"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_data_path(&self, digest: &str) -> Result<PathBuf> {
        let hex = validate_digest(digest)?;
        Ok(self
            .root
            .join("blobs")
            .join("sha256")
            .join(&hex[..2])
            .join(hex)
            .join("data"))
    }

    pub fn exists(&self, digest: &str) -> Result<bool> {
        Ok(self.blob_data_path(digest)?.is_file())
    }

    /// Open a temp file destined for the blob area.
    pub fn stage(&self) -> Result<StagedBlob> {
        let staging = self.root.join("blobs").join("staging");
        fs::create_dir_all(&staging)?;
        let temp = tempfile::NamedTempFile::new_in(&staging)?;
        Ok(StagedBlob {
            temp,
            root: self.root.clone(),
        })
    }

    /// Store a blob under a digest the caller already knows, verifying size
    /// and digest while writing. Pushing an existing digest is a no-op.
    pub fn push(&self, digest: &str, size: u64, reader: &mut dyn Read) -> Result<()> {
        validate_digest(digest)?;
        if self.exists(digest)? {
            debug!(digest, "blob already present, skipping push");
            return Ok(());
        }

        let mut staged = self.stage()?;
        let mut hasher = Sha256::new();
        let mut count: u64 = 0;
        let mut buf = [0u8; COPY_BUF];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            staged.write_all(&buf[..n])?;
            count += n as u64;
        }

        if count != size {
            return Err(Error::SizeMismatch {
                expected: size,
                actual: count,
            });
        }

        let actual = format!("sha256:{:x}", hasher.finalize());
        if actual != digest {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        staged.commit(digest)?;
        Ok(())
    }

    /// Open a stored blob for reading.
    pub fn pull(&self, digest: &str) -> Result<File> {
        let path = self.blob_data_path(digest)?;
        File::open(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(digest.to_string())
            } else {
                err.into()
            }
        })
    }

    fn tag_link_path(&self, repo: &str, tag: &str) -> PathBuf {
        self.root
            .join("repositories")
            .join(repo)
            .join("_manifests")
            .join("tags")
            .join(tag)
            .join("current")
            .join("link")
    }

    /// Point `repo:tag` at a manifest digest.
    pub fn tag(&self, repo: &str, tag: &str, manifest_digest: &str) -> Result<()> {
        validate_digest(manifest_digest)?;
        let link = self.tag_link_path(repo, tag);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&link, manifest_digest)?;
        Ok(())
    }

    /// The manifest digest a tag currently points at.
    pub fn resolve_tag(&self, repo: &str, tag: &str) -> Result<String> {
        let link = self.tag_link_path(repo, tag);
        match fs::read_to_string(&link) {
            Ok(digest) => Ok(digest.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::TagNotFound {
                repo: repo.to_string(),
                tag: tag.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
        let tags_dir = self
            .root
            .join("repositories")
            .join(repo)
            .join("_manifests")
            .join("tags");

        let mut tags = Vec::new();
        let entries = match fs::read_dir(&tags_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(tags),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Mark-and-sweep garbage collection. A blob survives when it is
    /// reachable from a current tag link: the manifest itself, its config
    /// and its layers. Returns the removed digests.
    pub fn prune(&self) -> Result<Vec<String>> {
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        for link in self.tag_links()? {
            let digest = fs::read_to_string(&link)?.trim().to_string();
            referenced.insert(digest.clone());

            let mut manifest_json = Vec::new();
            match self.pull(&digest) {
                Ok(mut file) => {
                    file.read_to_end(&mut manifest_json)?;
                }
                Err(Error::BlobNotFound(_)) => {
                    warn!(%digest, link = %link.display(), "tag points at a missing manifest");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let manifest: Manifest = match serde_json::from_slice(&manifest_json) {
                Ok(m) => m,
                Err(err) => {
                    warn!(%digest, %err, "skipping unparseable manifest");
                    continue;
                }
            };
            referenced.insert(manifest.config.digest.clone());
            for layer in &manifest.layers {
                referenced.insert(layer.digest.clone());
            }
        }

        let mut removed = Vec::new();
        let sha_dir = self.root.join("blobs").join("sha256");
        for prefix in fs::read_dir(&sha_dir)? {
            let prefix = prefix?;
            if !prefix.file_type()?.is_dir() {
                continue;
            }
            for blob in fs::read_dir(prefix.path())? {
                let blob = blob?;
                let digest = format!("sha256:{}", blob.file_name().to_string_lossy());
                if !referenced.contains(&digest) {
                    fs::remove_dir_all(blob.path())?;
                    removed.push(digest);
                }
            }
        }

        removed.sort();
        Ok(removed)
    }

    fn tag_links(&self) -> Result<Vec<PathBuf>> {
        let mut links = Vec::new();
        let repos = self.root.join("repositories");
        for entry in walkdir::WalkDir::new(&repos).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_file() && entry.file_name().to_str() == Some("link") {
                links.push(entry.path().to_path_buf());
            }
        }
        links.sort();
        Ok(links)
    }
}

/// A blob being written; commit renames it into the content-addressed area.
pub struct StagedBlob {
    temp: tempfile::NamedTempFile,
    root: PathBuf,
}

impl StagedBlob {
    /// Fsync and rename into place. Returns false when the digest was
    /// already present and the staged bytes were discarded.
    pub fn commit(self, digest: &str) -> Result<bool> {
        let hex = validate_digest(digest)?;
        let final_path = self
            .root
            .join("blobs")
            .join("sha256")
            .join(&hex[..2])
            .join(hex)
            .join("data");

        if final_path.is_file() {
            return Ok(false);
        }

        self.temp.as_file().sync_all()?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.temp
            .persist(&final_path)
            .map_err(|err| Error::Io(err.error))?;
        Ok(true)
    }
}

impl Write for StagedBlob {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.temp.as_file_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.temp.as_file_mut().flush()
    }
}

fn validate_digest(digest: &str) -> Result<&str> {
    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| Error::InvalidDigest(digest.to_string()))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidDigest(digest.to_string()));
    }
    Ok(hex)
}
