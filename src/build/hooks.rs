//! Lifecycle progress events for built artifacts.
//!
//! The sink is a capability handed into the build, not process state. Every
//! artifact (layer, config, manifest) emits `on_start` before its stream is
//! consumed, then exactly one of `on_complete` / `on_error`. Sink behavior
//! never gates correctness.

use std::io::Read;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::oci::Descriptor;

/// Observer for artifact lifecycle events.
pub trait Progress: Send + Sync {
    /// Called when an artifact's stream is about to be consumed. The
    /// returned reader replaces the stream, so a sink may wrap it to count
    /// bytes for display.
    fn on_start(&self, name: &str, size: u64, reader: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
        let _ = (name, size);
        reader
    }

    fn on_complete(&self, name: &str, desc: &Descriptor) {
        let _ = (name, desc);
    }

    fn on_error(&self, name: &str, err: &Error) {
        let _ = (name, err);
    }
}

/// Sink that ignores every event.
pub struct NoopProgress;

impl Progress for NoopProgress {}

/// Default sink: reports lifecycle events as tracing events.
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn on_start(&self, name: &str, size: u64, reader: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
        debug!(name, size_bytes = size, "building artifact");
        reader
    }

    fn on_complete(&self, name: &str, desc: &Descriptor) {
        info!(name, digest = %desc.digest, size_bytes = desc.size, "built artifact");
    }

    fn on_error(&self, name: &str, err: &Error) {
        warn!(name, %err, "failed to build artifact");
    }
}
