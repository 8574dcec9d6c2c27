//! Engine wiring: one [`IndexEngine`] owns the corpus source, the optional
//! embedding provider, the ANN backend and its availability state, the
//! artifact store, the job manager, and the query engine, and exposes the
//! operations the CLI and API surface call.

use super::ann::{AnnBackend, AnnState, HnswBackend};
use super::artifact::{BackendKind, BuildResult};
use super::builder::IndexBuilder;
use super::jobs::{BuildRunner, JobError, JobManager, JobRecord};
use super::query::{QueryEngine, SearchHit};
use super::store::{ArtifactStore, LoadSummary};
use crate::corpus::CorpusSource;
use anyhow::Result;
use async_trait::async_trait;
use portico_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for the index engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for the durable store and the local artifact mirror
    pub base_path: PathBuf,
    /// Embedding configuration; `None` disables the semantic tiers outright
    pub embedding: Option<EmbedConfig>,
    /// Whether to start with the ANN backend enabled
    pub enable_ann: bool,
    /// Build workers draining the job queue
    pub worker_count: usize,
}

impl EngineConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            embedding: Some(EmbedConfig::minilm()),
            enable_ann: true,
            worker_count: 2,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<EmbedConfig>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_ann(mut self, enable: bool) -> Self {
        self.enable_ann = enable;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}

/// Point-in-time status of the index subsystem.
#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub ann_available: bool,
    pub embeddings_available: bool,
    pub artifact_found: bool,
    pub backend: Option<BackendKind>,
    pub documents: usize,
    /// Jobs known to this process (the in-memory registry)
    pub jobs: HashMap<String, JobRecord>,
}

struct EngineBuildRunner {
    corpus: Arc<dyn CorpusSource>,
    builder: IndexBuilder,
}

#[async_trait]
impl BuildRunner for EngineBuildRunner {
    async fn run_build(&self) -> Result<BuildResult> {
        let corpus = self.corpus.load().await?;
        self.builder.build(&corpus).await
    }
}

/// The assembled semantic index subsystem.
pub struct IndexEngine {
    store: Arc<ArtifactStore>,
    ann_state: Arc<AnnState>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    runner: Arc<EngineBuildRunner>,
    jobs: JobManager,
    query: QueryEngine,
}

impl IndexEngine {
    /// Create an engine with persistent storage under the configured base
    /// path. A missing embedding model is a warning, not a failure: the
    /// engine comes up with the semantic tiers disabled.
    pub async fn new(config: EngineConfig, corpus: Arc<dyn CorpusSource>) -> Result<Self> {
        let store = Arc::new(ArtifactStore::open(&config.base_path).await?);

        let embedder: Option<Arc<dyn EmbeddingProvider>> = match &config.embedding {
            Some(embed_config) => match FastEmbedProvider::create(embed_config.clone()).await {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    warn!("embedding model unavailable: {e}; semantic search tiers disabled");
                    None
                }
            },
            None => None,
        };
        let ann: Option<Arc<dyn AnnBackend>> = config.enable_ann.then(|| {
            let backend: Arc<dyn AnnBackend> = Arc::new(HnswBackend::new());
            backend
        });

        Self::assemble(config, corpus, store, embedder, ann).await
    }

    /// Create an engine with an in-memory durable store and injected
    /// provider/backend doubles. Intended for tests.
    pub async fn new_memory(
        config: EngineConfig,
        corpus: Arc<dyn CorpusSource>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        ann: Option<Arc<dyn AnnBackend>>,
    ) -> Result<Self> {
        let store = Arc::new(ArtifactStore::open_memory(&config.base_path).await?);
        Self::assemble(config, corpus, store, embedder, ann).await
    }

    async fn assemble(
        config: EngineConfig,
        corpus: Arc<dyn CorpusSource>,
        store: Arc<ArtifactStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        ann: Option<Arc<dyn AnnBackend>>,
    ) -> Result<Self> {
        let ann_state = Arc::new(AnnState::new(ann.is_some()));

        let builder = IndexBuilder::new(
            embedder.clone(),
            ann.clone(),
            Arc::clone(&ann_state),
            Arc::clone(&store),
        );
        let runner = Arc::new(EngineBuildRunner { corpus, builder });
        let jobs = JobManager::new(
            store.pool().clone(),
            Arc::clone(&runner) as Arc<dyn BuildRunner>,
            config.worker_count,
        )
        .await?;
        let query = QueryEngine::new(
            Arc::clone(&store),
            embedder.clone(),
            ann,
            Arc::clone(&ann_state),
        );

        info!(
            "index engine ready (embeddings={}, ann={}, workers={})",
            embedder.is_some(),
            ann_state.is_available(),
            config.worker_count.max(1)
        );

        Ok(Self {
            store,
            ann_state,
            embedder,
            runner,
            jobs,
            query,
        })
    }

    /// Submit an asynchronous build job; returns the pending record.
    pub async fn submit_build(&self, simulate: bool) -> Result<JobRecord> {
        self.jobs.submit(simulate).await
    }

    /// Run a build synchronously on the caller's task (admin tooling).
    pub async fn run_build(&self) -> Result<BuildResult> {
        self.runner.run_build().await
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.jobs.status(job_id).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        self.jobs.list(limit).await
    }

    pub async fn job_detail(&self, job_id: &str) -> std::result::Result<JobRecord, JobError> {
        self.jobs.detail(job_id).await
    }

    /// Cascading search against the current artifact set.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.query.search(query, top_k).await
    }

    /// Pull current artifacts from the durable store into the local mirror.
    pub async fn load(&self) -> Result<LoadSummary> {
        self.store.load().await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let pointer = self.store.local_pointer().await?;
        Ok(IndexStatus {
            ann_available: self.ann_state.is_available(),
            embeddings_available: self.embedder.is_some(),
            artifact_found: pointer.is_some(),
            backend: pointer.map(|p| p.backend),
            documents: pointer.map(|p| p.doc_count).unwrap_or(0),
            jobs: self.jobs.jobs_snapshot().await,
        })
    }

    /// Stop accepting new jobs; in-flight builds finish on their workers.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
    }
}
