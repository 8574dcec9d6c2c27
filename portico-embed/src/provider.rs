//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one row per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a result from a batch of rows. The dimension is inferred from
    /// the first row; an empty batch has dimension 0.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding rows in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// This is the seam the index core depends on: the real ONNX provider lives
/// behind it in production, deterministic doubles behind it in tests.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize)
    /// before embedding, or use [`create`](Self::create).
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 384,
        }
    }

    /// Creates and initializes a provider in one step.
    ///
    /// Returns [`EmbedError::ModelUnavailable`] when the model cannot be
    /// loaded; callers treat that as "embeddings off" rather than fatal.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Loads the embedding model, reusing the global cache when another
    /// provider already initialized the same configuration.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key();

        let cached = {
            let cache = get_model_cache().lock().unwrap();
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((model, dimension)) = cached {
            tracing::debug!("Using cached model for: {}", self.config.model_name());
            self.model = Some(model);
            self.dimension = dimension;
            return Ok(());
        }

        let builtin = resolve_builtin_model(self.config.model_name())?;
        let show_progress = self.config.show_download_progress;

        // Model load touches the filesystem and may download on first use,
        // so it runs on the blocking pool.
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let init_options =
                    InitOptions::new(builtin).with_show_download_progress(show_progress);

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::model_unavailable(e.to_string()))?;

                // Probe the dimension with a throwaway embedding
                let probe = model
                    .embed(vec!["probe".to_string()], None)
                    .map_err(|e| EmbedError::model_unavailable(e.to_string()))?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(384);

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        {
            let mut cache = get_model_cache().lock().unwrap();
            cache.insert(cache_key, (Arc::clone(&model_arc), dimension));
        }

        self.model = Some(model_arc);
        self.dimension = dimension;
        Ok(())
    }

    /// Create a cache key from the deterministic JSON form of the config
    fn create_cache_key(&self) -> String {
        let config_json =
            serde_json::to_string(&self.config).expect("Config should always serialize");

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        format!("v1:{:x}", hasher.finish())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        let cache = get_model_cache();
        cache.lock().unwrap().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        get_model_cache().lock().unwrap().len()
    }
}

/// Map a configured model name onto a fastembed built-in.
fn resolve_builtin_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        other => Err(EmbedError::invalid_config(format!(
            "unknown embedding model: {other}"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        // Process in batches to bound peak memory
        let batch_size = self.config.batch_size.max(1);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(model);

            let batch = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model_clone.lock().unwrap();
                model_guard
                    .embed(chunk, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(batch);
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());

        let empty = EmbeddingResult::new(vec![]);
        assert!(empty.is_empty());
        assert_eq!(empty.dimension, 0);
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let provider = FastEmbedProvider::new(EmbedConfig::minilm());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.embedding_dimension(), 384);
    }

    #[test]
    fn test_resolve_builtin_model() {
        assert!(resolve_builtin_model("all-MiniLM-L6-v2").is_ok());
        assert!(resolve_builtin_model("bge-small-en-v1.5").is_ok());
        assert!(matches!(
            resolve_builtin_model("no-such-model"),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_cache_key_generation() {
        let provider1 = FastEmbedProvider::new(EmbedConfig::minilm());
        let provider2 = FastEmbedProvider::new(EmbedConfig::minilm());
        assert_eq!(provider1.create_cache_key(), provider2.create_cache_key());
        assert!(provider1.create_cache_key().starts_with("v1:"));

        let provider3 = FastEmbedProvider::new(EmbedConfig::new("bge-small-en-v1.5"));
        assert_ne!(provider1.create_cache_key(), provider3.create_cache_key());

        let provider4 = FastEmbedProvider::new(EmbedConfig::minilm().with_batch_size(64));
        assert_ne!(provider1.create_cache_key(), provider4.create_cache_key());
    }

    #[tokio::test]
    async fn test_embed_before_initialize_errors() {
        let provider = FastEmbedProvider::new(EmbedConfig::minilm());
        let err = provider
            .embed_texts(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        // No model needed: an empty input never touches the backend
        let provider = FastEmbedProvider::new(EmbedConfig::minilm());
        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    #[ignore] // Integration test: downloads the real MiniLM model - run with: cargo test -- --ignored
    async fn test_minilm_download_and_embedding() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let provider = FastEmbedProvider::create(EmbedConfig::minilm()).await?;
        assert_eq!(provider.embedding_dimension(), 384);

        let texts = vec![
            "How do I renew my passport?".to_string(),
            "Where can I register a birth?".to_string(),
        ];
        let result = provider.embed_texts(&texts).await?;
        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 384);
        for row in &result.embeddings {
            assert!(row.iter().all(|v| v.is_finite()));
            assert!(row.iter().any(|v| *v != 0.0));
        }

        // Same config reuses the cached model
        assert!(FastEmbedProvider::cache_size() >= 1);
        Ok(())
    }
}
