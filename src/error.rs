use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR executable not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("OCR process failed to start: {0}")]
    StartupFailed(String),

    #[error("OCR process has already been closed")]
    AlreadyClosed,

    #[error("OCR process has been closed")]
    Closed,

    #[error("OCR process exited unexpectedly: {status}")]
    WorkerExited { status: String },

    #[error("OCR process output is out of sync after an interrupted request, restart required")]
    OutOfSync,

    #[error("OCR process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed OCR response: {0}")]
    Malformed(String),

    #[error("Failed to encode OCR request: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OcrError {
    /// True for errors raised by the worker pipe itself (broken pipe, EOF).
    pub fn is_io(&self) -> bool {
        matches!(self, OcrError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
