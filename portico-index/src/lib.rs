//! portico-index: semantic lookup over a hierarchical knowledge corpus.
//!
//! This crate is the build-and-query core behind the portal's "find me the
//! relevant entry" feature: it flattens the corpus tree into searchable
//! documents, embeds and indexes them, persists the artifacts durably with a
//! local mirror, runs rebuilds as asynchronous jobs, and serves similarity
//! queries through a cascading ANN → dense → keyword search that degrades
//! gracefully when the optional acceleration pieces are missing.
//!
//! ## Key Modules
//!
//! - **[`corpus`]**: the corpus tree, its traversal view, and flattening
//! - **[`index`]**: build pipeline, artifact store, jobs, and query engine
//! - **[`api`]**: wire contracts for the endpoint collaborators
//! - **[`answer`]**: optional answer decoration for search responses
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portico_index::corpus::JsonCorpusSource;
//! use portico_index::index::{EngineConfig, IndexEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let corpus = Arc::new(JsonCorpusSource::new("corpus.json"));
//! let engine = IndexEngine::new(EngineConfig::new("."), corpus).await?;
//!
//! let job = engine.submit_build(false).await?;
//! println!("build job {} submitted", job.job_id);
//!
//! let hits = engine.search("how to renew a passport", 5).await?;
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod api;
pub mod corpus;
pub mod index;
