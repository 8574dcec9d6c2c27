//! Index construction: embed, normalize, build, persist.
//!
//! The builder consumes the flattened document list, embeds every content
//! string in one batch, L2-normalizes the rows, and produces an artifact:
//! an ANN index when that backend is present and healthy, otherwise the
//! normalized matrix itself. Identical corpus plus a deterministic provider
//! yields an identical artifact; there is no randomness on this path.

use super::ann::{AnnBackend, AnnState};
use super::artifact::{BackendKind, BuildResult, DenseMatrix, IndexArtifact};
use super::store::ArtifactStore;
use crate::corpus::{Corpus, flatten_corpus};
use anyhow::{Result, ensure};
use portico_embed::EmbeddingProvider;
use std::sync::Arc;
use tracing::{info, warn};

pub struct IndexBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    ann: Option<Arc<dyn AnnBackend>>,
    ann_state: Arc<AnnState>,
    store: Arc<ArtifactStore>,
}

impl IndexBuilder {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        ann: Option<Arc<dyn AnnBackend>>,
        ann_state: Arc<AnnState>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            embedder,
            ann,
            ann_state,
            store,
        }
    }

    /// Build and persist an index over the given corpus.
    ///
    /// Soft outcomes (empty corpus, embeddings unavailable) complete with a
    /// zero-count result; only genuine build failures return `Err` and are
    /// turned into the job's `error` state by the worker boundary.
    pub async fn build(&self, corpus: &Corpus) -> Result<BuildResult> {
        let documents = flatten_corpus(corpus);
        if documents.is_empty() {
            info!("no documents found to build index");
            return Ok(BuildResult::empty());
        }

        let Some(embedder) = self.embedder.as_ref() else {
            warn!("embedding model unavailable; skipping index build");
            return Ok(BuildResult::degraded("embedding model unavailable"));
        };

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        info!("encoding {} documents", texts.len());
        let embedded = match embedder.embed_texts(&texts).await {
            Ok(result) => result,
            Err(e) if e.is_unavailable() => {
                warn!("embedding model unavailable: {e}; skipping index build");
                return Ok(BuildResult::degraded(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        ensure!(
            embedded.len() == documents.len(),
            "embedding row count {} does not match document count {}",
            embedded.len(),
            documents.len()
        );

        let dim = embedded.dimension;
        let mut matrix = DenseMatrix::from_rows(embedded.embeddings)?;
        matrix.l2_normalize();

        let artifact = self.make_artifact(matrix, dim, documents);
        let backend = artifact.backend;
        let count = artifact.documents.len();
        self.store.persist(&artifact).await?;

        Ok(BuildResult {
            count,
            backend: Some(backend),
            note: None,
        })
    }

    /// ANN index over the normalized matrix when possible, dense fallback
    /// otherwise. An ANN failure here demotes the backend for the process.
    fn make_artifact(
        &self,
        matrix: DenseMatrix,
        dim: usize,
        documents: Vec<crate::corpus::CorpusDocument>,
    ) -> IndexArtifact {
        if let Some(ann) = self
            .ann
            .as_ref()
            .filter(|_| self.ann_state.is_available())
        {
            match ann.build(&matrix).and_then(|index| index.serialize()) {
                Ok(blob) => {
                    return IndexArtifact {
                        backend: BackendKind::Ann,
                        dim,
                        blob,
                        documents,
                    };
                }
                Err(e) => self.ann_state.mark_build_failed(&e.to_string()),
            }
        }

        IndexArtifact {
            backend: BackendKind::Dense,
            dim,
            blob: matrix.to_bytes(),
            documents,
        }
    }
}
