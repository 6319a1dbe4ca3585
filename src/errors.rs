use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("backend responded with code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected payload: {0}")]
    Parse(String),
    #[error("thumbnail load failed: {0}")]
    Thumbnail(String),
    #[error("location unavailable: {0}")]
    Location(String),
    #[error("location permission denied")]
    PermissionDenied,
    #[error("coordinate out of range ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

impl AppError {
    pub fn notice_text(&self) -> String {
        match self {
            AppError::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            AppError::Http(err) if err.is_timeout() => "request timed out".to_string(),
            AppError::Http(_) => "network unavailable".to_string(),
            other => other.to_string(),
        }
    }
}
