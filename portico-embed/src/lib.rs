//! # portico-embed
//!
//! Text embedding layer for the portico semantic index: a provider trait with
//! a local-ONNX implementation via FastEmbed. Async-first, with a global model
//! cache so repeated engine construction never reloads the same weights.
//!
//! ## Availability contract
//!
//! Embedding is an optional capability. When the model cannot be loaded the
//! provider fails with [`EmbedError::ModelUnavailable`], and callers are
//! expected to degrade (keyword-only search, zero-count builds) rather than
//! propagate the failure.
//!
//! ## Quick start
//!
//! ```no_run
//! use portico_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> portico_embed::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::minilm()).await?;
//! let texts = vec!["How do I renew my passport?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//! println!("{} rows of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod provider;

// Re-export main types for easy access
pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbedConfig::default();
        assert_eq!(config.model_name(), "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_unavailable_is_soft() {
        let err = EmbedError::model_unavailable("onnx runtime missing");
        assert!(err.is_unavailable());
        let err = EmbedError::invalid_config("bad");
        assert!(!err.is_unavailable());
    }
}
