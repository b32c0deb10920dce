//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Every configured credential is inactive, or none is configured
    #[error("No available API credential")]
    NoAvailableCredential,

    /// Remote provider answered with a non-success status
    #[error("Remote call failed: {status} - {message}")]
    RemoteCallFailure {
        status: u16,
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Local model has not finished downloading
    #[error("Local translation model is not ready")]
    EngineNotReady,

    /// Local model runtime failure
    #[error("Local model error: {message}")]
    ModelError {
        message: String,
    },

    /// Persistence layer failure that is not a SQLite error
    #[error("Cache error: {message}")]
    CacheError {
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// SQLite error
    #[error("Cache database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Settings source error
    #[error("Settings error: {0}")]
    SettingsError(#[from] config::ConfigError),
}

impl TranslationError {
    /// True for failures of the persistence layer.
    pub fn is_cache_failure(&self) -> bool {
        matches!(
            self,
            TranslationError::CacheError { .. } | TranslationError::SqliteError(_)
        )
    }

    /// True when the local model simply is not downloaded yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, TranslationError::EngineNotReady)
    }
}

impl From<tokio::task::JoinError> for TranslationError {
    fn from(err: tokio::task::JoinError) -> Self {
        TranslationError::CacheError {
            message: format!("cache task failed: {}", err),
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
