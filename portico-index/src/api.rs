//! Wire contracts for the endpoint collaborators, plus the search service
//! that assembles responses from the engine and the optional answer
//! generator.
//!
//! The HTTP layer itself lives elsewhere in the portal; these types define
//! what it sends and receives.

use crate::answer::AnswerGenerator;
use crate::corpus::DocMetadata;
use crate::index::engine::IndexEngine;
use crate::index::jobs::{JobError, JobRecord, JobState};
use crate::index::{artifact::BuildResult, jobs::DEFAULT_LIST_LIMIT};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Default number of sources returned by a search.
pub const DEFAULT_TOP_K: usize = 5;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDoc {
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub metadata: DocMetadata,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Decoration from the optional generator; empty when absent or failed
    pub answer: String,
    pub sources: Vec<SourceDoc>,
    pub hits_count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobState,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogView {
    pub ts: String,
    pub msg: String,
}

/// A job record with RFC 3339 timestamps, as the admin surface renders it.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobState,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub logs: Vec<JobLogView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.state,
            created_at: rfc3339(record.created_at),
            started_at: record.started_at.map(rfc3339),
            finished_at: record.finished_at.map(rfc3339),
            logs: record
                .logs
                .into_iter()
                .map(|line| JobLogView {
                    ts: rfc3339(line.ts),
                    msg: line.msg,
                })
                .collect(),
            result: record.result,
            error: record.error,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

fn rfc3339(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Assembles search and job responses for the endpoint layer.
pub struct SearchService {
    engine: Arc<IndexEngine>,
    generator: Option<Arc<dyn AnswerGenerator>>,
}

impl SearchService {
    pub fn new(engine: Arc<IndexEngine>) -> Self {
        Self {
            engine,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The search contract: retrieval failures yield an empty source list,
    /// and generator failures never touch the sources.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let query = request.query.trim().to_string();
        anyhow::ensure!(!query.is_empty(), "empty query");

        let hits = match self.engine.search(&query, request.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("search failed: {e:#}; returning no sources");
                Vec::new()
            }
        };
        let sources: Vec<SourceDoc> = hits
            .into_iter()
            .map(|hit| SourceDoc {
                doc_id: hit.document.doc_id,
                title: hit.document.title,
                content: hit.document.content,
                metadata: hit.document.metadata,
            })
            .collect();

        let answer = match &self.generator {
            Some(generator) => match generator.answer(&query).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("answer generation failed: {e:#}; returning sources only");
                    String::new()
                }
            },
            None => String::new(),
        };

        Ok(SearchResponse {
            query,
            answer,
            hits_count: sources.len(),
            sources,
        })
    }

    /// The submission contract: respond immediately with a pending job id.
    pub async fn submit_job(&self, request: SubmitJobRequest) -> Result<SubmitJobResponse> {
        let record = self.engine.submit_build(request.simulate).await?;
        Ok(SubmitJobResponse {
            job_id: record.job_id,
            status: record.state,
        })
    }

    /// The listing contract: newest first, bounded by `limit`.
    pub async fn list_jobs(&self, request: ListJobsRequest) -> Result<JobListResponse> {
        let jobs = self.engine.list_jobs(request.limit).await?;
        Ok(JobListResponse {
            jobs: jobs.into_iter().map(JobView::from).collect(),
        })
    }

    /// The detail contract: unknown ids surface as [`JobError::NotFound`].
    pub async fn job_detail(&self, job_id: &str) -> std::result::Result<JobView, JobError> {
        Ok(JobView::from(self.engine.job_detail(job_id).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::StaticCorpusSource;
    use crate::index::engine::EngineConfig;
    use crate::index::test_support::{HashEmbedder, corpus_with_titles};
    use async_trait::async_trait;

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn answer(&self, _query: &str) -> Result<String> {
            anyhow::bail!("generator quota exhausted")
        }
    }

    async fn service_with_built_index(
        generator: Option<Arc<dyn AnswerGenerator>>,
    ) -> (tempfile::TempDir, SearchService) {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus_with_titles(&["How to renew a passport abroad?"]);
        let engine = IndexEngine::new_memory(
            EngineConfig::new(dir.path()),
            Arc::new(StaticCorpusSource(corpus)),
            Some(Arc::new(HashEmbedder::new(16))),
            None,
        )
        .await
        .unwrap();
        engine.run_build().await.unwrap();

        let mut service = SearchService::new(Arc::new(engine));
        if let Some(generator) = generator {
            service = service.with_generator(generator);
        }
        (dir, service)
    }

    #[test]
    fn test_search_request_defaults_top_k() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "passport"}"#).unwrap();
        assert_eq!(request.top_k, 5);

        let request: SearchRequest =
            serde_json::from_str(r#"{"query": "passport", "top_k": 2}"#).unwrap();
        assert_eq!(request.top_k, 2);
    }

    #[test]
    fn test_submit_request_defaults_to_real_build() {
        let request: SubmitJobRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.simulate);
    }

    #[tokio::test]
    async fn test_search_contract_shape() {
        let (_dir, service) = service_with_built_index(None).await;
        let response = service
            .search(SearchRequest {
                query: "renew passport".to_string(),
                top_k: 5,
            })
            .await
            .unwrap();

        assert_eq!(response.hits_count, response.sources.len());
        assert_eq!(response.answer, "");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].title, "How to renew a passport abroad?");
    }

    #[tokio::test]
    async fn test_generator_failure_never_blocks_sources() {
        let (_dir, service) = service_with_built_index(Some(Arc::new(FailingGenerator))).await;
        let response = service
            .search(SearchRequest {
                query: "passport".to_string(),
                top_k: 5,
            })
            .await
            .unwrap();

        assert_eq!(response.answer, "");
        assert_eq!(response.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_client_error() {
        let (_dir, service) = service_with_built_index(None).await;
        let err = service
            .search(SearchRequest {
                query: "   ".to_string(),
                top_k: 5,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty query"));
    }

    #[test]
    fn test_job_view_timestamps_are_rfc3339() {
        assert!(rfc3339(1_700_000_000_000).starts_with("2023-11-14T"));
    }
}
