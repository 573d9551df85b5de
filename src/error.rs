//! Crate error type.

use thiserror::Error;

pub type TracedownResult<T> = Result<T, TracedownError>;

#[derive(Debug, Error)]
pub enum TracedownError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive: {0}")]
    Archive(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("render: {0}")]
    Render(String),
}
