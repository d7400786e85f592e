//! Detection error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during gap detection
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Vocal separation failed at chunk {chunk_start_ms}ms: {message}")]
    Separation { chunk_start_ms: u64, message: String },

    #[error("Failed to read audio file: {path}")]
    AudioRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model download failed: {0}")]
    ModelDownloadFailed(String),

    #[error("Backend initialization failed: {0}")]
    BackendInitFailed(String),

    #[error("Invalid song file {path}: {message}")]
    SongFile { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DetectionError>;
