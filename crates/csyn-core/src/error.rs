//! Error types for the concatenative synthesis engine

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CsynError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse corpus: {0}")]
    Parse(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("holder not found: {0}")]
    NotFound(String),

    #[error("pattern scheduler given an empty buffer list")]
    EmptyBufferList,

    #[error("dsp transport error: {0}")]
    DspTransport(String),

    #[error("corpus json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type CsynResult<T> = Result<T, CsynError>;
