//! Error types for modelpack operations.

use thiserror::Error;

/// Result type alias for modelpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modelpack.
#[derive(Error, Debug)]
pub enum Error {
    /// Modelfile syntax error. The line number counts every physical line,
    /// blanks and comments included.
    #[error("parse error on line {line}: {content}")]
    Parse { line: usize, content: String },

    /// A single-valued Modelfile directive was assigned twice.
    #[error("duplicate {field} command on line {line}")]
    DuplicateCommand { field: &'static str, line: usize },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("tag is required")]
    TagRequired,

    #[error("empty workspace")]
    EmptyWorkspace,

    #[error("unrecognized file type: {0}")]
    UnrecognizedFile(String),

    #[error("{0} is a directory and not supported yet")]
    IsADirectory(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("digest mismatch: expected {expected}, actual {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected}, actual {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("tag not found: {repo}:{tag}")]
    TagNotFound { repo: String, tag: String },

    #[error("registry request failed: {reason}")]
    Registry { reason: String, retryable: bool },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("build cancelled")]
    Cancelled,

    /// Error wrapped with the build phase it surfaced in.
    #[error("failed to {phase}: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(std::io::Error),
}

impl Error {
    /// Wraps an error with a phase prefix, e.g. "failed to process files: ...".
    pub fn phase(phase: &str, err: Error) -> Error {
        Error::Phase {
            phase: phase.to_string(),
            source: Box::new(err),
        }
    }

    pub fn registry(reason: impl Into<String>, retryable: bool) -> Error {
        Error::Registry {
            reason: reason.into(),
            retryable,
        }
    }

    /// True when the error is (or wraps) a caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Phase { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// True when retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Registry { retryable: true, .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // Cancellation aborts in-flight reads as an io error; surface it as
        // the cancellation it is.
        if err.to_string().contains("build cancelled") {
            return Error::Cancelled;
        }
        Error::Io(err)
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Io(err.into())
    }
}

/// Retry configuration for transient registry failures.
#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Calculates exponential backoff with jitter.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> u64 {
    let backoff = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powi(attempt as i32))
    .min(config.max_backoff_ms as f64) as u64;

    // ±20% jitter, clamped to the configured maximum.
    let jitter = (backoff as f64) * (rand::random::<f64>() * 0.4 - 0.2);
    ((backoff as f64) + jitter)
        .max(0.0)
        .min(config.max_backoff_ms as f64) as u64
}
