//! Error types for the download pipeline and the catalog surface.

use thiserror::Error;

/// Result type for boundary operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures reported by a [`StreamProvider`](crate::provider::StreamProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The URL is malformed, unreachable or the resource is gone.
    #[error("video not found: {0}")]
    NotFound(String),

    #[error("stream provider failed: {0}")]
    Failed(String),
}

impl ProviderError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors surfaced to callers of [`VideoService`](crate::service::VideoService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("requested video resolution not available: {resolution}")]
    RenditionUnavailable { resolution: String },

    #[error("requested video has no audio available")]
    AudioUnavailable,

    #[error("mux failed: {message}")]
    MuxFailure {
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("stream provider failed: {0}")]
    Provider(String),

    #[error("catalog store failed: {0:#}")]
    Store(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn mux_failed(
        message: impl Into<String>,
        exit_code: Option<i32>,
        stderr: Option<String>,
    ) -> Self {
        Self::MuxFailure {
            message: message.into(),
            exit_code,
            stderr,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for the 404-class variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::RenditionUnavailable { .. } | Self::AudioUnavailable
        )
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(message) => Self::NotFound(message),
            ProviderError::Failed(message) => Self::Provider(message),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("task join error: {err}"))
    }
}
