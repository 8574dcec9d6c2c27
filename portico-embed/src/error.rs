//! Error types for the embedding system

/// Result type for embedding operations.
///
/// Convenience alias using [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// The variant that matters most to callers is [`EmbedError::ModelUnavailable`]:
/// it signals that the underlying model could not be loaded at all, and by
/// contract callers degrade to weaker search tiers instead of failing the
/// surrounding operation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedding model could not be loaded (missing runtime, failed
    /// download, unsupported platform). Soft failure: callers degrade.
    #[error("embedding model unavailable: {message}")]
    ModelUnavailable { message: String },

    /// The provider configuration is invalid
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during embedding generation
    #[error("embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Async task join errors
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("external error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create a [`EmbedError::ModelUnavailable`] with a custom message.
    pub fn model_unavailable<S: Into<String>>(message: S) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    /// Create an [`EmbedError::InvalidConfig`] with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an embedding generation error from any error type.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    /// True when the failure means "no model, degrade" rather than a bug.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ModelUnavailable { .. })
    }
}
