//! Configuration for embedding models

use serde::{Deserialize, Serialize};

/// Default sentence-embedding model: 384-dimensional MiniLM, small enough to
/// run on the portal hosts without a GPU.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Configuration for an embedding provider.
///
/// Serializes deterministically; the provider hashes the serialized form to
/// key its global model cache, so two configs with identical fields share one
/// loaded model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedConfig {
    /// Name of the embedding model to use (a fastembed built-in)
    pub model_name: String,
    /// Maximum batch size for embedding generation
    pub batch_size: usize,
    /// Show model download progress on first load
    pub show_download_progress: bool,
}

impl EmbedConfig {
    /// Create a configuration for a named built-in model.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// The 384-dimensional MiniLM sentence model used by the portal index.
    pub fn minilm() -> Self {
        Self::new(DEFAULT_MODEL)
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            batch_size: 16,
            show_download_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::minilm();
        assert_eq!(config.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(config.batch_size, 16);

        let config = EmbedConfig::new("bge-small-en-v1.5").with_batch_size(64);
        assert_eq!(config.model_name(), "bge-small-en-v1.5");
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_config_serializes_deterministically() {
        let a = serde_json::to_string(&EmbedConfig::minilm()).unwrap();
        let b = serde_json::to_string(&EmbedConfig::minilm()).unwrap();
        assert_eq!(a, b);
    }
}
