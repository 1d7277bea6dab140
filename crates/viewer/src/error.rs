use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload failed: server returned {0}")]
    UploadFailed(StatusCode),

    #[error("Stream request rejected: server returned {0}")]
    StreamStatus(StatusCode),

    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

// Convenience type alias
pub type ViewerResult<T> = Result<T, ViewerError>;
