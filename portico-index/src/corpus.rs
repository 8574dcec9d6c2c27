//! Corpus tree types and flattening.
//!
//! The knowledge corpus is a read-only hierarchy maintained elsewhere in the
//! portal: categories contain agencies, agencies contain topics, topics
//! contain question/answer entries. The index core only needs a traversal
//! view, obtained through [`CorpusSource`], and flattens it into the ordered
//! [`CorpusDocument`] list every build starts from.
//!
//! Flattening is deterministic: documents come out in traversal order, and
//! that order is load-bearing. Embedding rows are aligned with it and the
//! keyword tier uses it as the tie-break.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Language used when flattening localized fields.
const DEFAULT_LANG: &str = "en";

/// Delimiter joining ancestor names, title, and answer into document content.
const CONTENT_DELIMITER: &str = " | ";

/// How many characters of the title participate in the document id.
const DOC_ID_TITLE_CHARS: usize = 80;

/// A display string that is either plain or localized per language code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    ByLanguage(HashMap<String, String>),
}

impl LocalizedText {
    /// Resolve for a language, preferring the requested code and falling back
    /// to English for localized maps.
    pub fn get(&self, lang: &str) -> Option<&str> {
        match self {
            LocalizedText::Plain(s) => Some(s.as_str()),
            LocalizedText::ByLanguage(map) => map
                .get(lang)
                .or_else(|| map.get(DEFAULT_LANG))
                .map(|s| s.as_str()),
        }
    }
}

/// One question/answer entry at a leaf of the corpus tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub question: Option<LocalizedText>,
    pub answer: Option<LocalizedText>,
    #[serde(default)]
    pub downloads: Vec<String>,
    pub location: Option<String>,
    pub instructions: Option<String>,
}

/// Leaf group of entries, e.g. "Passport renewal".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: Option<LocalizedText>,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

/// Mid-level group, e.g. a government agency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agency {
    pub id: String,
    pub name: Option<LocalizedText>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

/// Top-level group of the corpus tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: Option<LocalizedText>,
    #[serde(default)]
    pub agencies: Vec<Agency>,
}

/// The full corpus tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub categories: Vec<Category>,
}

/// Read-only access to the corpus tree.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn load(&self) -> Result<Corpus>;
}

/// Corpus source reading a JSON tree from disk.
#[derive(Debug, Clone)]
pub struct JsonCorpusSource {
    path: PathBuf,
}

impl JsonCorpusSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CorpusSource for JsonCorpusSource {
    async fn load(&self) -> Result<Corpus> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading corpus file {}", self.path.display()))?;
        let corpus = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing corpus file {}", self.path.display()))?;
        Ok(corpus)
    }
}

/// In-memory corpus source.
#[derive(Debug, Clone)]
pub struct StaticCorpusSource(pub Corpus);

#[async_trait]
impl CorpusSource for StaticCorpusSource {
    async fn load(&self) -> Result<Corpus> {
        Ok(self.0.clone())
    }
}

/// Metadata bag carried with each searchable document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocMetadata {
    #[serde(default)]
    pub downloads: Vec<String>,
    pub location: Option<String>,
    pub instructions: Option<String>,
}

/// One flattened, searchable unit derived from a leaf entry.
///
/// Immutable once built; every build produces a fresh list. The position of a
/// document in the list equals its embedding row index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusDocument {
    pub doc_id: String,
    pub category_id: String,
    pub agency_id: String,
    pub topic_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: DocMetadata,
}

/// Flatten the corpus tree into the ordered document list.
///
/// Walks categories, agencies, topics, and entries in stable order. Entries
/// without a resolvable question title are skipped silently. An empty corpus
/// yields an empty list, which downstream build treats as a zero-count
/// success.
pub fn flatten_corpus(corpus: &Corpus) -> Vec<CorpusDocument> {
    let mut docs = Vec::new();

    for category in &corpus.categories {
        let category_name = resolve(&category.name);

        for agency in &category.agencies {
            let agency_name = resolve(&agency.name);

            for topic in &agency.topics {
                let topic_name = resolve(&topic.name);

                for entry in &topic.entries {
                    let title = resolve(&entry.question);
                    if title.is_empty() {
                        continue;
                    }
                    let answer = resolve(&entry.answer);

                    let content = [
                        category_name.as_str(),
                        agency_name.as_str(),
                        topic_name.as_str(),
                        title.as_str(),
                        answer.as_str(),
                    ]
                    .iter()
                    .filter(|part| !part.is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(CONTENT_DELIMITER);

                    let title_prefix: String = title.chars().take(DOC_ID_TITLE_CHARS).collect();

                    docs.push(CorpusDocument {
                        doc_id: format!(
                            "{}::{}::{}::{}",
                            category.id, agency.id, topic.id, title_prefix
                        ),
                        category_id: category.id.clone(),
                        agency_id: agency.id.clone(),
                        topic_id: topic.id.clone(),
                        title,
                        content,
                        metadata: DocMetadata {
                            downloads: entry.downloads.clone(),
                            location: entry.location.clone(),
                            instructions: entry.instructions.clone(),
                        },
                    });
                }
            }
        }
    }

    docs
}

fn resolve(text: &Option<LocalizedText>) -> String {
    text.as_ref()
        .and_then(|t| t.get(DEFAULT_LANG))
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(question: &str, answer: &str) -> Entry {
        Entry {
            question: (!question.is_empty()).then(|| LocalizedText::Plain(question.to_string())),
            answer: Some(LocalizedText::Plain(answer.to_string())),
            ..Entry::default()
        }
    }

    fn small_corpus() -> Corpus {
        Corpus {
            categories: vec![Category {
                id: "citizen".into(),
                name: Some(LocalizedText::Plain("Citizen Services".into())),
                agencies: vec![Agency {
                    id: "immigration".into(),
                    name: Some(LocalizedText::Plain("Dept of Immigration".into())),
                    topics: vec![Topic {
                        id: "passports".into(),
                        name: Some(LocalizedText::Plain("Passports".into())),
                        entries: vec![
                            entry("How to renew a passport abroad?", "Visit the mission."),
                            entry("", "untitled entries are skipped"),
                            entry("How to report a lost passport?", "File form LP-2."),
                        ],
                    }],
                }],
            }],
        }
    }

    #[test]
    fn test_flatten_counts_titled_entries_only() {
        let docs = flatten_corpus(&small_corpus());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "How to renew a passport abroad?");
        assert_eq!(docs[1].title, "How to report a lost passport?");
    }

    #[test]
    fn test_flatten_preserves_traversal_order() {
        let docs1 = flatten_corpus(&small_corpus());
        let docs2 = flatten_corpus(&small_corpus());
        assert_eq!(docs1, docs2);
    }

    #[test]
    fn test_content_joins_ancestor_names() {
        let docs = flatten_corpus(&small_corpus());
        assert_eq!(
            docs[0].content,
            "Citizen Services | Dept of Immigration | Passports | \
             How to renew a passport abroad? | Visit the mission."
        );
    }

    #[test]
    fn test_doc_id_composition_and_truncation() {
        let mut corpus = small_corpus();
        let long_title = "q".repeat(200);
        corpus.categories[0].agencies[0].topics[0]
            .entries
            .push(entry(&long_title, "a"));

        let docs = flatten_corpus(&corpus);
        let last = docs.last().unwrap();
        assert_eq!(
            last.doc_id,
            format!("citizen::immigration::passports::{}", "q".repeat(80))
        );
        assert_eq!(docs[0].doc_id.split("::").count(), 4);
    }

    #[test]
    fn test_empty_corpus_flattens_to_empty_list() {
        assert!(flatten_corpus(&Corpus::default()).is_empty());
    }

    #[test]
    fn test_localized_name_resolution() {
        let json = r#"{
            "categories": [{
                "id": "c1",
                "name": {"en": "Health", "si": "සෞඛ්‍ය"},
                "agencies": [{
                    "id": "a1",
                    "name": {"si": "only-localized"},
                    "topics": [{
                        "id": "t1",
                        "name": "Clinics",
                        "entries": [{"question": {"en": "Where is the clinic?"}, "answer": "Main St."}]
                    }]
                }]
            }]
        }"#;
        let corpus: Corpus = serde_json::from_str(json).unwrap();
        let docs = flatten_corpus(&corpus);
        assert_eq!(docs.len(), 1);
        // "en" wins where present; a map without "en" resolves to empty and
        // drops out of the joined content
        assert_eq!(docs[0].content, "Health | Clinics | Where is the clinic? | Main St.");
    }

    #[tokio::test]
    async fn test_json_corpus_source_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("corpus.json");
        tokio::fs::write(&path, serde_json::to_vec(&small_corpus())?).await?;

        let source = JsonCorpusSource::new(&path);
        let corpus = source.load().await?;
        assert_eq!(flatten_corpus(&corpus).len(), 2);
        Ok(())
    }
}
