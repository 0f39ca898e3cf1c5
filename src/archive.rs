//! Single-file tar streaming and digest computation.
//!
//! A layer is one regular file packaged as a single-member tar stream. The
//! stream is assembled lazily (header, file bytes, block padding, two
//! trailing zero blocks) so a multi-gigabyte weight file is never resident
//! in memory, and [`HashingReader`] tees every drained byte into SHA-256 so
//! digest and size fall out of the same pass that uploads or persists the
//! stream.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const TAR_BLOCK: u64 = 512;
const TAR_TRAILER: u64 = 1024;

/// Cancellation signal shared across a build. Streams observe it and abort
/// at the next read.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One regular file to be packaged as a tar-stream layer.
///
/// Construction validates the path; [`LayerSource::open`] can then be called
/// any number of times, each yielding an identical byte stream.
#[derive(Debug)]
pub struct LayerSource {
    path: PathBuf,
    rel_path: String,
    size: u64,
    mode: u32,
    mtime: u64,
}

impl LayerSource {
    pub fn new(work_dir: &Path, rel_path: &str) -> Result<Self> {
        let path = work_dir.join(rel_path);
        let metadata = fs::metadata(&path)?;
        if metadata.is_dir() {
            return Err(Error::IsADirectory(path.display().to_string()));
        }

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let mode = 0o644;

        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            path,
            rel_path: rel_path.to_string(),
            size: metadata.len(),
            mode,
            mtime,
        })
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn file_size(&self) -> u64 {
        self.size
    }

    /// Exact length of the tar stream: header block, file content padded to
    /// the block boundary, two trailing zero blocks.
    pub fn tar_size(&self) -> u64 {
        TAR_BLOCK + self.size.div_ceil(TAR_BLOCK) * TAR_BLOCK + TAR_TRAILER
    }

    /// Open the streaming tar reader for this file.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        let header = self.header()?;
        let file = File::open(&self.path)?;
        let padding = self.tar_size() - TAR_BLOCK - self.size;

        Ok(Box::new(
            Cursor::new(header)
                .chain(file.take(self.size))
                .chain(io::repeat(0).take(padding)),
        ))
    }

    fn header(&self) -> Result<Vec<u8>> {
        let mut header = tar::Header::new_gnu();
        header.set_path(&self.rel_path)?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(self.size);
        header.set_mode(self.mode);
        header.set_mtime(self.mtime);
        // Zero owner and empty owner names keep the stream reproducible
        // across hosts.
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        Ok(header.as_bytes().to_vec())
    }
}

/// Reader tee: hands bytes through unchanged while folding them into a
/// SHA-256 state, and aborts at the next read once the build is cancelled.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
    cancel: CancelFlag,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, cancel: CancelFlag) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
            cancel,
        }
    }

    /// Digest (`sha256:<hex>`) and byte count of everything read so far.
    pub fn finalize(self) -> (String, u64) {
        (format!("sha256:{:x}", self.hasher.finalize()), self.count)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            // Not Interrupted: io::copy transparently retries that kind.
            return Err(io::Error::other("build cancelled"));
        }

        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}
