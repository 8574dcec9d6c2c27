//! Index artifact types: the dense vector matrix and the persisted artifact
//! wrapper that keeps the blob and its document list together.

use crate::corpus::CorpusDocument;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Which numeric tier produced the persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Approximate-nearest-neighbor index over the normalized matrix
    Ann,
    /// The normalized matrix itself, searched by brute-force dot product
    Dense,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ann => "ann",
            BackendKind::Dense => "dense",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-major f32 matrix of embedding vectors.
///
/// Row index == corpus document index; that alignment is the core invariant
/// of the whole index and must never drift.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    pub rows: usize,
    pub dim: usize,
    data: Vec<f32>,
}

impl DenseMatrix {
    /// Build a matrix from embedding rows, rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == dim,
                "ragged embedding batch: row {} has dimension {}, expected {}",
                i,
                row.len(),
                dim
            );
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// L2-normalize every row in place. Zero-norm rows are scaled by 1.0 so
    /// the division never produces NaN.
    pub fn l2_normalize(&mut self) {
        for i in 0..self.rows {
            let start = i * self.dim;
            let row = &mut self.data[start..start + self.dim];
            let mut norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm == 0.0 {
                norm = 1.0;
            }
            for v in row.iter_mut() {
                *v /= norm;
            }
        }
    }

    /// Dot product of a query vector against every row.
    pub fn dot(&self, query: &[f32]) -> Vec<f32> {
        (0..self.rows)
            .map(|i| {
                self.row(i)
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }

    /// Raw little-endian f32 bytes, row-major.
    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.data).to_vec()
    }

    /// Rebuild a matrix from raw f32 bytes and a known dimension.
    pub fn from_bytes(bytes: &[u8], dim: usize) -> Result<Self> {
        ensure!(dim > 0, "matrix dimension must be nonzero");
        ensure!(
            bytes.len() % (dim * std::mem::size_of::<f32>()) == 0,
            "matrix blob length {} is not a multiple of row size for dimension {}",
            bytes.len(),
            dim
        );
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
        Ok(Self {
            rows: data.len() / dim,
            dim,
            data,
        })
    }
}

/// A persisted index artifact: the serialized blob plus the document list it
/// was built from. The two are swapped together, never separately.
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    pub backend: BackendKind,
    pub dim: usize,
    pub blob: Vec<u8>,
    pub documents: Vec<CorpusDocument>,
}

impl IndexArtifact {
    /// Rows encoded in the blob (both backends serialize the row matrix).
    pub fn row_count(&self) -> usize {
        if self.dim == 0 {
            return 0;
        }
        self.blob.len() / (self.dim * std::mem::size_of::<f32>())
    }

    /// Check the artifact/document alignment invariant.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.row_count() == self.documents.len(),
            "artifact row count {} does not match document count {}",
            self.row_count(),
            self.documents.len()
        );
        Ok(())
    }
}

/// Summary of one completed build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildResult {
    /// Number of documents indexed
    pub count: usize,
    /// Backend the artifact was actually built with; `None` when nothing was
    /// persisted (empty corpus, embeddings unavailable)
    pub backend: Option<BackendKind>,
    /// Degradation note, e.g. embeddings unavailable or simulated run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl BuildResult {
    pub fn empty() -> Self {
        Self {
            count: 0,
            backend: None,
            note: None,
        }
    }

    pub fn degraded(note: impl Into<String>) -> Self {
        Self {
            count: 0,
            backend: None,
            note: Some(note.into()),
        }
    }
}
