//! Query-time cascading search.
//!
//! Three tiers, tried in order until one produces hits:
//!
//! 1. **ANN**: inner-product top-k against the HNSW index, when the backend
//!    is healthy, an ANN artifact is current, and a query embedding can be
//!    produced. A runtime failure here demotes the backend for the rest of
//!    the process and falls through.
//! 2. **Dense**: brute-force dot product against every row of a dense
//!    artifact. Vectors are unit-normalized, so this ranks identically to
//!    the ANN tier for the same query.
//! 3. **Keyword**: substring scoring over title + content, always
//!    available as long as a document list exists.
//!
//! "No matches" is an empty list, never an error. Searches run against a
//! locally-loaded snapshot: pointer, document list, and blob fetched
//! together, cached, and revalidated against the pointer on every call.

use super::ann::{AnnBackend, AnnIndex, AnnState};
use super::artifact::{BackendKind, DenseMatrix};
use super::store::{ArtifactStore, LocalSnapshot};
use crate::corpus::CorpusDocument;
use anyhow::Result;
use portico_embed::EmbeddingProvider;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Score awarded when the raw query is a substring of a document.
const PHRASE_SCORE: u32 = 10;
/// Score awarded per matching query token.
const TOKEN_SCORE: u32 = 1;

/// One search result: a document and its tier-specific score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: CorpusDocument,
    pub score: f32,
}

/// A materialized artifact set ready to search.
#[derive(Clone)]
struct LoadedSnapshot {
    updated_at: i64,
    backend: BackendKind,
    documents: Arc<Vec<CorpusDocument>>,
    ann_index: Option<Arc<dyn AnnIndex>>,
    matrix: Option<Arc<DenseMatrix>>,
}

/// Read-only search over the current artifact set.
pub struct QueryEngine {
    store: Arc<ArtifactStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    ann: Option<Arc<dyn AnnBackend>>,
    ann_state: Arc<AnnState>,
    cached: RwLock<Option<LoadedSnapshot>>,
}

impl QueryEngine {
    pub fn new(
        store: Arc<ArtifactStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        ann: Option<Arc<dyn AnnBackend>>,
        ann_state: Arc<AnnState>,
    ) -> Self {
        Self {
            store,
            embedder,
            ann,
            ann_state,
            cached: RwLock::new(None),
        }
    }

    /// Cascading search. Returns at most `top_k` hits sorted by descending
    /// score, with original corpus order as the tie-break.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(vec![]);
        }
        let Some(snapshot) = self.snapshot().await? else {
            debug!("no index artifact present; search returns no hits");
            return Ok(vec![]);
        };

        let query_vec = match &self.embedder {
            Some(embedder) => match embed_query(embedder.as_ref(), query).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("query embedding unavailable: {e}; using textual fallback");
                    None
                }
            },
            None => None,
        };

        let mut hits: Vec<SearchHit> = Vec::new();

        if let (Some(q), Some(index)) = (&query_vec, &snapshot.ann_index) {
            if self.ann_state.is_available() {
                match index.search(q, top_k) {
                    Ok(pairs) => {
                        hits = pairs
                            .into_iter()
                            .filter(|(row, _)| *row < snapshot.documents.len())
                            .map(|(row, score)| SearchHit {
                                document: snapshot.documents[row].clone(),
                                score,
                            })
                            .collect();
                    }
                    Err(e) => self.ann_state.mark_search_failed(&e.to_string()),
                }
            }
        }

        if hits.is_empty() {
            if let (Some(q), Some(matrix)) = (&query_vec, &snapshot.matrix) {
                if q.len() == matrix.dim {
                    hits = dense_search(matrix, q, &snapshot.documents, top_k);
                } else {
                    warn!(
                        "query dimension {} does not match artifact dimension {}; skipping dense tier",
                        q.len(),
                        matrix.dim
                    );
                }
            }
        }

        if hits.is_empty() {
            hits = keyword_search(&snapshot.documents, query, top_k);
        }

        Ok(hits)
    }

    /// Current snapshot, revalidated against the local pointer. The cache is
    /// replaced wholesale when the pointer changes; a torn mirror keeps the
    /// previous set in service.
    async fn snapshot(&self) -> Result<Option<LoadedSnapshot>> {
        let Some(pointer) = self.store.local_pointer().await? else {
            *self.cached.write().await = None;
            return Ok(None);
        };

        {
            let cached = self.cached.read().await;
            if let Some(snapshot) = cached.as_ref() {
                if snapshot.updated_at == pointer.updated_at && snapshot.backend == pointer.backend
                {
                    return Ok(Some(snapshot.clone()));
                }
            }
        }

        let Some(local) = self.store.snapshot().await? else {
            return Ok(self.cached.read().await.clone());
        };
        let snapshot = self.materialize(local);
        *self.cached.write().await = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    fn materialize(&self, local: LocalSnapshot) -> LoadedSnapshot {
        let mut ann_index = None;
        let mut matrix = None;

        match local.pointer.backend {
            BackendKind::Ann => {
                if let Some(backend) = self.ann.as_ref().filter(|_| self.ann_state.is_available())
                {
                    match backend.deserialize(&local.blob, local.pointer.dim) {
                        Ok(index) => ann_index = Some(Arc::from(index)),
                        Err(e) => self.ann_state.mark_search_failed(&e.to_string()),
                    }
                }
            }
            BackendKind::Dense => match DenseMatrix::from_bytes(&local.blob, local.pointer.dim) {
                Ok(m) => matrix = Some(Arc::new(m)),
                Err(e) => warn!("unreadable dense artifact: {e}"),
            },
        }

        LoadedSnapshot {
            updated_at: local.pointer.updated_at,
            backend: local.pointer.backend,
            documents: Arc::new(local.documents),
            ann_index,
            matrix,
        }
    }
}

async fn embed_query(embedder: &dyn EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    let mut vector = embedder.embed_text(query).await?;
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    for v in vector.iter_mut() {
        *v /= norm + 1e-10;
    }
    Ok(vector)
}

fn dense_search(
    matrix: &DenseMatrix,
    query: &[f32],
    documents: &[CorpusDocument],
    top_k: usize,
) -> Vec<SearchHit> {
    let scores = matrix.dot(query);
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    // Stable sort keeps corpus order for equal scores
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
        .into_iter()
        .filter(|(row, _)| *row < documents.len())
        .map(|(row, score)| SearchHit {
            document: documents[row].clone(),
            score,
        })
        .collect()
}

fn keyword_search(documents: &[CorpusDocument], query: &str, top_k: usize) -> Vec<SearchHit> {
    let q_low = query.to_lowercase();
    let mut scored: Vec<(u32, usize)> = Vec::new();

    for (i, doc) in documents.iter().enumerate() {
        let text = format!("{} {}", doc.title, doc.content).to_lowercase();
        let mut score = 0u32;
        if text.contains(&q_low) {
            score += PHRASE_SCORE;
        }
        for token in q_low.split_whitespace() {
            if text.contains(token) {
                score += TOKEN_SCORE;
            }
        }
        if score > 0 {
            scored.push((score, i));
        }
    }

    // Stable sort keeps corpus order for equal scores
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(top_k);
    scored
        .into_iter()
        .map(|(score, i)| SearchHit {
            document: documents[i].clone(),
            score: score as f32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ann::{AnnError, HnswBackend};
    use crate::index::builder::IndexBuilder;
    use crate::index::test_support::{HashEmbedder, corpus_with_titles, doc_with_title};

    const TITLES: [&str; 4] = [
        "How to renew a passport abroad?",
        "How to register a birth?",
        "How to replace a lost driving licence?",
        "How to renew a driving licence?",
    ];

    async fn built_store(ann: bool) -> (tempfile::TempDir, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open_memory(dir.path()).await.unwrap());
        let backend: Option<Arc<dyn AnnBackend>> = ann.then(|| {
            let b: Arc<dyn AnnBackend> = Arc::new(HnswBackend::new());
            b
        });
        let builder = IndexBuilder::new(
            Some(Arc::new(HashEmbedder::new(32))),
            backend,
            Arc::new(AnnState::new(ann)),
            Arc::clone(&store),
        );
        builder
            .build(&corpus_with_titles(&TITLES))
            .await
            .unwrap();
        (dir, store)
    }

    fn engine(
        store: Arc<ArtifactStore>,
        embedder: bool,
        ann: bool,
        ann_state: Arc<AnnState>,
    ) -> QueryEngine {
        let embedder: Option<Arc<dyn EmbeddingProvider>> = embedder.then(|| {
            let e: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(32));
            e
        });
        let backend: Option<Arc<dyn AnnBackend>> = ann.then(|| {
            let b: Arc<dyn AnnBackend> = Arc::new(HnswBackend::new());
            b
        });
        QueryEngine::new(store, embedder, backend, ann_state)
    }

    #[tokio::test]
    async fn test_ann_and_dense_tiers_rank_identically() {
        let (_d1, ann_store) = built_store(true).await;
        let (_d2, dense_store) = built_store(false).await;

        let ann_engine = engine(ann_store, true, true, Arc::new(AnnState::new(true)));
        let dense_engine = engine(dense_store, true, false, Arc::new(AnnState::new(false)));

        // Every document shares tokens with this query, so scores are
        // distinct and the orderings must match exactly
        let query = "how to renew a passport";
        let ann_hits = ann_engine.search(query, 3).await.unwrap();
        let dense_hits = dense_engine.search(query, 3).await.unwrap();

        assert_eq!(ann_hits.len(), dense_hits.len());
        for (a, d) in ann_hits.iter().zip(dense_hits.iter()) {
            assert_eq!(a.document.doc_id, d.document.doc_id);
            assert!((a.score - d.score).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_dense_results_sorted_descending_and_bounded() {
        let (_dir, store) = built_store(false).await;
        let engine = engine(store, true, false, Arc::new(AnnState::new(false)));

        let hits = engine.search("driving licence", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_keyword_tier_when_embeddings_unavailable() {
        let (_dir, store) = built_store(false).await;
        let engine = engine(store, false, false, Arc::new(AnnState::new(false)));

        let hits = engine.search("passport", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].document.title, "How to renew a passport abroad?");
        assert!(hits[0].score >= PHRASE_SCORE as f32);
    }

    #[tokio::test]
    async fn test_no_artifact_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open_memory(dir.path()).await.unwrap());
        let engine = engine(store, true, true, Arc::new(AnnState::new(true)));
        assert!(engine.search("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let (_dir, store) = built_store(false).await;
        let engine = engine(store, true, false, Arc::new(AnnState::new(false)));
        assert!(engine.search("   ", 5).await.unwrap().is_empty());
        assert!(engine.search("passport", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ann_runtime_failure_demotes_and_falls_through() {
        struct FlakyIndex {
            rows: usize,
        }

        impl AnnIndex for FlakyIndex {
            fn search(&self, _q: &[f32], _k: usize) -> Result<Vec<(usize, f32)>, AnnError> {
                Err(AnnError::SearchFailed {
                    message: "graph corrupted".to_string(),
                })
            }
            fn serialize(&self) -> Result<Vec<u8>, AnnError> {
                Ok(vec![])
            }
            fn row_count(&self) -> usize {
                self.rows
            }
        }

        struct FlakyBackend;

        impl AnnBackend for FlakyBackend {
            fn build(&self, _m: &DenseMatrix) -> Result<Box<dyn AnnIndex>, AnnError> {
                unreachable!("query-side backend never builds")
            }
            fn deserialize(
                &self,
                bytes: &[u8],
                dim: usize,
            ) -> Result<Box<dyn AnnIndex>, AnnError> {
                Ok(Box::new(FlakyIndex {
                    rows: bytes.len() / (dim * 4),
                }))
            }
            fn name(&self) -> &'static str {
                "flaky"
            }
        }

        let (_dir, store) = built_store(true).await;
        let ann_state = Arc::new(AnnState::new(true));
        let engine = QueryEngine::new(
            store,
            Some(Arc::new(HashEmbedder::new(32))),
            Some(Arc::new(FlakyBackend)),
            Arc::clone(&ann_state),
        );

        // First search hits the flaky ANN tier, demotes it, and falls through
        // to the keyword tier (no dense artifact exists for an ANN build)
        let hits = engine.search("passport", 5).await.unwrap();
        assert!(!ann_state.is_available());
        assert!(!hits.is_empty());
        assert!(hits[0].score >= PHRASE_SCORE as f32);

        // Subsequent searches skip ANN entirely and still serve results
        let hits = engine.search("passport", 5).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_revalidates_after_rebuild() {
        let (_dir, store) = built_store(false).await;
        let engine = engine(
            Arc::clone(&store),
            false,
            false,
            Arc::new(AnnState::new(false)),
        );
        assert!(!engine.search("passport", 5).await.unwrap().is_empty());

        // Rebuild with a different corpus; the next search sees the new set
        let builder = IndexBuilder::new(
            Some(Arc::new(HashEmbedder::new(32))),
            None,
            Arc::new(AnnState::new(false)),
            Arc::clone(&store),
        );
        builder
            .build(&corpus_with_titles(&["How to pay property tax?"]))
            .await
            .unwrap();

        let hits = engine.search("property tax", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(engine.search("passport", 5).await.unwrap().is_empty());
    }

    #[test]
    fn test_keyword_scoring_constants() {
        let docs = vec![
            doc_with_title("How to renew a passport abroad?"),
            doc_with_title("Vehicle emission test centers"),
            doc_with_title("Passport collection counters"),
        ];

        // Raw phrase present in doc 0: 10 + 1 per token
        let hits = keyword_search(&docs, "renew a passport", 5);
        assert_eq!(hits[0].document.title, "How to renew a passport abroad?");
        assert_eq!(hits[0].score, (PHRASE_SCORE + 3 * TOKEN_SCORE) as f32);

        // Token-only match ranks below phrase match, zero-score docs excluded
        let hits = keyword_search(&docs, "passport", 5);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score > 0.0));

        let hits = keyword_search(&docs, "zoning permits", 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_keyword_tie_break_is_corpus_order() {
        let docs = vec![
            doc_with_title("passport office hours"),
            doc_with_title("passport office address"),
            doc_with_title("passport office phone"),
        ];
        let hits = keyword_search(&docs, "passport office", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.title, "passport office hours");
        assert_eq!(hits[1].document.title, "passport office address");
    }
}
