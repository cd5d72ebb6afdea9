//! Error taxonomy for capture processing
//!
//! Per-file errors are recoverable: the analyzer converts them into a logged
//! skip. Only `Discovery` and `DecoderNotFound` end a run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, normalizing or reading a capture
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No capture files with extension '{extension}' found under {}", root.display())]
    Discovery { root: PathBuf, extension: String },

    #[error("Capture decoder not found: {0}")]
    DecoderNotFound(String),

    #[error("Capture file is empty (0 bytes): {}", .0.display())]
    EmptyCapture(PathBuf),

    #[error("Capture file is locked by another process: {}", .0.display())]
    LockedFile(PathBuf),

    #[error("Decoder failed to convert {}: {diagnostic}", path.display())]
    Conversion { path: PathBuf, diagnostic: String },

    #[error("Failed to import decoder output: {0}")]
    Import(String),

    #[error("Expected counters missing: {0}")]
    DataGap(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Short machine-friendly label used in skip logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => "discovery",
            Self::DecoderNotFound(_) => "decoder-not-found",
            Self::EmptyCapture(_) => "empty-capture",
            Self::LockedFile(_) => "locked-file",
            Self::Conversion { .. } => "conversion",
            Self::Import(_) => "import",
            Self::DataGap(_) => "data-gap",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_capture_message_names_file() {
        let err = CaptureError::EmptyCapture(PathBuf::from("/data/host1.blg"));
        assert!(err.to_string().contains("host1.blg"));
        assert_eq!(err.kind(), "empty-capture");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CaptureError = io.into();
        assert_eq!(err.kind(), "io");
    }
}
