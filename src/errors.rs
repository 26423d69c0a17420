use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("VK API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("HLS parse error: {0}")]
    HlsParse(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
