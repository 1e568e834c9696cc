//! Error types at the library boundary

use thiserror::Error;

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Rejections raised while ingesting a probe
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("target '{0}' is not configured")]
    UnknownTarget(String),

    #[error("inconsistent probe for '{target}': {reason}")]
    InconsistentProbe { target: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
