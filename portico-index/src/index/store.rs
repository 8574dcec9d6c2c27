//! Durable and local persistence of index artifacts.
//!
//! Artifacts live in two places:
//!
//! - a **durable SQLite store** (`.portico.db`): blob rows plus a single
//!   `artifact_meta` row named `current` that references the blob and embeds
//!   the document list. This copy survives the process and feeds fresh
//!   processes via [`ArtifactStore::load`].
//! - a **local mirror** under `<base>/data/`: the blob file, `documents.json`,
//!   and an `artifact.json` pointer, written on every persist and read by the
//!   query path with no database round-trip.
//!
//! Durable writes are best-effort: a failure is logged as a warning and the
//! local mirror remains authoritative for the running process. The pointer
//! file is written last and validated on read, so a reader sees the old or
//! the new artifact set, never a mix.

use super::artifact::{BackendKind, IndexArtifact};
use crate::corpus::CorpusDocument;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DB_FILE: &str = ".portico.db";
const DATA_DIR: &str = "data";
const POINTER_FILE: &str = "artifact.json";
const DOCUMENTS_FILE: &str = "documents.json";
const ANN_BLOB_FILE: &str = "index.ann";
const DENSE_BLOB_FILE: &str = "embeddings.bin";

/// The local mirror of the current-artifact pointer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocalPointer {
    pub backend: BackendKind,
    pub doc_count: usize,
    pub dim: usize,
    pub updated_at: i64,
}

/// What [`ArtifactStore::load`] found in the durable store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub found: bool,
    pub doc_count: usize,
    pub backend: Option<BackendKind>,
    pub blob_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A locally-loaded artifact set: pointer, documents, and blob read together.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    pub pointer: LocalPointer,
    pub documents: Vec<CorpusDocument>,
    pub blob: Vec<u8>,
}

/// Artifact persistence over SQLite plus a local file mirror.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    pool: SqlitePool,
    data_dir: PathBuf,
}

impl ArtifactStore {
    /// Opens the store with persistent SQLite storage under `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(DB_FILE);
        tokio::fs::create_dir_all(base).await?;

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(base, pool).await
    }

    /// Opens the store with in-memory SQLite storage for testing. A single
    /// connection keeps every query on the same in-memory database.
    pub async fn open_memory(base: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(base, pool).await
    }

    async fn new_with_pool(base: &Path, pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            data_dir: base.join(DATA_DIR),
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifact_meta (
                name TEXT PRIMARY KEY,
                backend TEXT NOT NULL,
                doc_count INTEGER NOT NULL,
                dim INTEGER NOT NULL,
                blob_id INTEGER REFERENCES blobs(id),
                docs_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blobs_name ON blobs(name)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn blob_path(&self, backend: BackendKind) -> PathBuf {
        match backend {
            BackendKind::Ann => self.data_dir.join(ANN_BLOB_FILE),
            BackendKind::Dense => self.data_dir.join(DENSE_BLOB_FILE),
        }
    }

    /// Persist an artifact set: local mirror first (authoritative for this
    /// process), then the durable store, whose failure is only a warning.
    pub async fn persist(&self, artifact: &IndexArtifact) -> Result<()> {
        artifact.validate()?;
        let updated_at = chrono::Utc::now().timestamp_millis();

        self.write_local_mirror(artifact, updated_at)
            .await
            .context("writing local artifact mirror")?;

        if let Err(e) = self.write_durable(artifact, updated_at).await {
            warn!("could not persist artifact to durable store: {e}");
        }

        info!(
            "artifact persisted: backend={} documents={}",
            artifact.backend,
            artifact.documents.len()
        );
        Ok(())
    }

    async fn write_local_mirror(&self, artifact: &IndexArtifact, updated_at: i64) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        tokio::fs::write(self.blob_path(artifact.backend), &artifact.blob).await?;
        tokio::fs::write(
            self.data_dir.join(DOCUMENTS_FILE),
            serde_json::to_vec(&artifact.documents)?,
        )
        .await?;

        // Pointer goes last: readers validate counts against it, so a swap in
        // flight is observed as the old artifact, never a mix.
        let pointer = LocalPointer {
            backend: artifact.backend,
            doc_count: artifact.documents.len(),
            dim: artifact.dim,
            updated_at,
        };
        tokio::fs::write(
            self.data_dir.join(POINTER_FILE),
            serde_json::to_vec(&pointer)?,
        )
        .await?;

        // Superseded blob of the other backend is stale; drop it quietly
        let other = match artifact.backend {
            BackendKind::Ann => self.blob_path(BackendKind::Dense),
            BackendKind::Dense => self.blob_path(BackendKind::Ann),
        };
        let _ = tokio::fs::remove_file(other).await;

        Ok(())
    }

    async fn write_durable(&self, artifact: &IndexArtifact, updated_at: i64) -> Result<()> {
        let blob_name = format!("{}-{}", artifact.backend, updated_at);
        let insert = sqlx::query("INSERT INTO blobs (name, data, created_at) VALUES (?1, ?2, ?3)")
            .bind(&blob_name)
            .bind(&artifact.blob[..])
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        let blob_id = insert.last_insert_rowid();

        // Keyed replace of the single current pointer (last writer wins)
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO artifact_meta
                (name, backend, doc_count, dim, blob_id, docs_json, updated_at)
            VALUES ('current', ?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(artifact.backend.as_str())
        .bind(artifact.documents.len() as i64)
        .bind(artifact.dim as i64)
        .bind(blob_id)
        .bind(serde_json::to_string(&artifact.documents)?)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        // Pointer now names the new blob; superseded blobs can go
        sqlx::query("DELETE FROM blobs WHERE id != ?1")
            .bind(blob_id)
            .execute(&self.pool)
            .await?;

        debug!("durable artifact stored: {blob_name}");
        Ok(())
    }

    /// Pull the current artifacts from the durable store into the local
    /// mirror. Absence is not an error: fresh deployments simply have no
    /// build yet, and the summary says so.
    pub async fn load(&self) -> Result<LoadSummary> {
        let row = sqlx::query(
            "SELECT backend, doc_count, dim, blob_id, docs_json, updated_at
             FROM artifact_meta WHERE name = 'current'",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(LoadSummary {
                found: false,
                message: Some("no current artifact in durable store".to_string()),
                ..LoadSummary::default()
            });
        };

        let backend_str: String = row.get("backend");
        let doc_count: i64 = row.get("doc_count");
        let dim: i64 = row.get("dim");
        let blob_id: Option<i64> = row.get("blob_id");
        let docs_json: String = row.get("docs_json");
        let updated_at: i64 = row.get("updated_at");

        let backend = match backend_str.as_str() {
            "ann" => BackendKind::Ann,
            "dense" => BackendKind::Dense,
            other => {
                // Corrupt pointer reads as "not found", never as a failure
                return Ok(LoadSummary {
                    found: false,
                    message: Some(format!("invalid artifact metadata: backend {other:?}")),
                    ..LoadSummary::default()
                });
            }
        };
        let documents: Vec<CorpusDocument> = match serde_json::from_str(&docs_json) {
            Ok(docs) => docs,
            Err(e) => {
                return Ok(LoadSummary {
                    found: false,
                    message: Some(format!("invalid artifact metadata: {e}")),
                    ..LoadSummary::default()
                });
            }
        };

        let mut summary = LoadSummary {
            found: true,
            doc_count: doc_count as usize,
            backend: Some(backend),
            blob_loaded: false,
            message: None,
        };

        let blob: Option<Vec<u8>> = match blob_id {
            Some(id) => sqlx::query("SELECT data FROM blobs WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(|r| r.get("data")),
            None => None,
        };

        match blob {
            Some(blob) => {
                let artifact = IndexArtifact {
                    backend,
                    dim: dim as usize,
                    blob,
                    documents,
                };
                match self.write_local_mirror(&artifact, updated_at).await {
                    Ok(()) => summary.blob_loaded = true,
                    Err(e) => summary.message = Some(format!("could not mirror artifact: {e}")),
                }
            }
            None => {
                summary.message = Some("artifact blob missing from durable store".to_string());
            }
        }

        Ok(summary)
    }

    /// Read the local pointer, tolerating absence and torn writes.
    pub async fn local_pointer(&self) -> Result<Option<LocalPointer>> {
        let path = self.data_dir.join(POINTER_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(pointer) => Ok(Some(pointer)),
            Err(e) => {
                warn!("unreadable artifact pointer at {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Read the full local artifact set (pointer, documents, blob) as one
    /// unit. Returns `None` when there is no artifact or the mirror does not
    /// match its pointer (a swap in flight).
    pub async fn snapshot(&self) -> Result<Option<LocalSnapshot>> {
        let Some(pointer) = self.local_pointer().await? else {
            return Ok(None);
        };

        let docs_bytes = match tokio::fs::read(self.data_dir.join(DOCUMENTS_FILE)).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        let documents: Vec<CorpusDocument> = match serde_json::from_slice(&docs_bytes) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("unreadable document list in local mirror: {e}");
                return Ok(None);
            }
        };
        let blob = match tokio::fs::read(self.blob_path(pointer.backend)).await {
            Ok(blob) => blob,
            Err(_) => return Ok(None),
        };

        let expected_blob_len = pointer.doc_count * pointer.dim * std::mem::size_of::<f32>();
        if documents.len() != pointer.doc_count || blob.len() != expected_blob_len {
            warn!(
                "local mirror does not match its pointer (docs={} blob={}B, expected docs={} blob={}B)",
                documents.len(),
                blob.len(),
                pointer.doc_count,
                expected_blob_len
            );
            return Ok(None);
        }

        Ok(Some(LocalSnapshot {
            pointer,
            documents,
            blob,
        }))
    }
}
