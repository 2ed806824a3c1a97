//! Error taxonomy for the write path.
//!
//! `ZarrError` is the single error type returned by every fallible public
//! API. It is intentionally a flat taxonomy (not a tree of per-module error
//! types) because the original driver reports errors the same way: a
//! `ZarrError_*` code plus a human-readable string (`zarr_errors.h`,
//! `zarr.common.cpp::Zarr_get_error_message`). Jobs dispatched to the
//! [`crate::threadpool::ThreadPool`] report failures as a bare `String`
//! rather than `ZarrError` — the pool is generic over any caller's error
//! type, same as the C++ `JobT = std::function<bool(std::string&)>`.

use thiserror::Error;

/// The error taxonomy named in the write-path specification.
#[derive(Debug, Error)]
pub enum ZarrError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("not yet implemented: {0}")]
    NotYetImplemented(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, ZarrError>;

impl From<std::io::Error> for ZarrError {
    fn from(e: std::io::Error) -> Self {
        ZarrError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for ZarrError {
    fn from(e: serde_json::Error) -> Self {
        ZarrError::InvalidSettings(format!("malformed JSON: {e}"))
    }
}
