//! Deterministic doubles and corpus fixtures shared by the unit and
//! integration test suites. Not part of the public API.

use crate::corpus::{
    Agency, Category, Corpus, CorpusDocument, DocMetadata, Entry, LocalizedText, Topic,
};
use async_trait::async_trait;
use portico_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Token-bucket embedder: each lowercased token increments one dimension
/// selected by its hash. Deterministic across runs, and texts sharing tokens
/// land near each other, which is all the ranking tests need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_one(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult, EmbedError> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|t| self.embed_one(t)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dim
    }

    fn provider_name(&self) -> &str {
        "hash-test"
    }
}

/// An embedder that is permanently unavailable, for degradation tests.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::model_unavailable("test model is never available"))
    }

    async fn embed_texts(&self, _texts: &[String]) -> Result<EmbeddingResult, EmbedError> {
        Err(EmbedError::model_unavailable("test model is never available"))
    }

    fn embedding_dimension(&self) -> usize {
        0
    }

    fn provider_name(&self) -> &str {
        "unavailable-test"
    }
}

/// One category/agency/topic with one titled entry per given title.
pub fn corpus_with_titles(titles: &[&str]) -> Corpus {
    Corpus {
        categories: vec![Category {
            id: "citizen".to_string(),
            name: Some(LocalizedText::Plain("Citizen Services".to_string())),
            agencies: vec![Agency {
                id: "registry".to_string(),
                name: Some(LocalizedText::Plain("Civil Registry".to_string())),
                topics: vec![Topic {
                    id: "general".to_string(),
                    name: Some(LocalizedText::Plain("General".to_string())),
                    entries: titles
                        .iter()
                        .map(|title| Entry {
                            question: Some(LocalizedText::Plain(title.to_string())),
                            answer: Some(LocalizedText::Plain(format!("Answer for: {title}"))),
                            ..Entry::default()
                        })
                        .collect(),
                }],
            }],
        }],
    }
}

/// A uniform corpus grid for counting tests.
pub fn corpus_grid(
    categories: usize,
    agencies_per_category: usize,
    topics_per_agency: usize,
    entries_per_topic: usize,
) -> Corpus {
    Corpus {
        categories: (0..categories)
            .map(|c| Category {
                id: format!("cat-{c}"),
                name: Some(LocalizedText::Plain(format!("Category {c}"))),
                agencies: (0..agencies_per_category)
                    .map(|a| Agency {
                        id: format!("agency-{c}-{a}"),
                        name: Some(LocalizedText::Plain(format!("Agency {c}.{a}"))),
                        topics: (0..topics_per_agency)
                            .map(|t| Topic {
                                id: format!("topic-{c}-{a}-{t}"),
                                name: Some(LocalizedText::Plain(format!("Topic {c}.{a}.{t}"))),
                                entries: (0..entries_per_topic)
                                    .map(|e| Entry {
                                        question: Some(LocalizedText::Plain(format!(
                                            "How to complete task {e} of topic {c}.{a}.{t}?"
                                        ))),
                                        answer: Some(LocalizedText::Plain(format!(
                                            "Follow procedure {e}."
                                        ))),
                                        ..Entry::default()
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// A standalone document for scorer-level tests.
pub fn doc_with_title(title: &str) -> CorpusDocument {
    CorpusDocument {
        doc_id: format!("citizen::registry::general::{title}"),
        category_id: "citizen".to_string(),
        agency_id: "registry".to_string(),
        topic_id: "general".to_string(),
        title: title.to_string(),
        content: format!("Citizen Services | Civil Registry | General | {title}"),
        metadata: DocMetadata::default(),
    }
}
