//! The semantic index core: artifact types, ANN backend, build pipeline,
//! persistence, job orchestration, and the cascading query engine.
//!
//! ## Pipeline
//!
//! ```text
//! Corpus tree → flatten → embed → normalize → ANN | dense → ArtifactStore
//!                                                               ↓
//!            JobManager (bounded workers) ← submit       local mirror + SQLite
//!                                                               ↓
//!                         QueryEngine: ANN → dense → keyword cascade
//! ```

pub mod ann;
pub mod artifact;
pub mod builder;
pub mod engine;
pub mod jobs;
pub mod query;
pub mod store;

#[doc(hidden)]
pub mod test_support;

pub use ann::{AnnBackend, AnnIndex, AnnState, HnswBackend};
pub use artifact::{BackendKind, BuildResult, DenseMatrix, IndexArtifact};
pub use builder::IndexBuilder;
pub use engine::{EngineConfig, IndexEngine, IndexStatus};
pub use jobs::{JobError, JobManager, JobRecord, JobState};
pub use query::{QueryEngine, SearchHit};
pub use store::{ArtifactStore, LoadSummary};
