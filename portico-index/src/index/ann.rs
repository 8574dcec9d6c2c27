//! Approximate-nearest-neighbor backend.
//!
//! The ANN backend is an optional capability: when it is missing or fails,
//! the build path persists the dense matrix instead and the query path falls
//! through to the brute-force tier. [`AnnState`] carries that availability as
//! explicit instance state, demoted through events and never silently
//! re-promoted; only a fresh engine (or rebuild) starts available again.
//!
//! The HNSW implementation searches by inner product over unit-normalized
//! vectors. The library cannot serialize its graph directly, so persistence
//! stores the row matrix and rebuilds the graph on load.

use super::artifact::DenseMatrix;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// HNSW graph connectivity (M).
const MAX_NB_CONNECTION: usize = 16;
/// Construction-time candidate list width.
const EF_CONSTRUCTION: usize = 200;
/// Graph layer cap; generous for corpora far larger than ours.
const MAX_LAYER: usize = 16;
/// Floor for the search-time candidate list width.
const EF_SEARCH_MIN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AnnError {
    #[error("ANN index construction failed: {message}")]
    BuildFailed { message: String },

    #[error("ANN search failed: {message}")]
    SearchFailed { message: String },

    #[error("invalid ANN index blob: {message}")]
    InvalidBlob { message: String },

    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A built ANN index, searchable and serializable.
pub trait AnnIndex: Send + Sync {
    /// Inner-product top-k search. Returns (row, score) pairs, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AnnError>;

    /// Serialize the index for persistence.
    fn serialize(&self) -> Result<Vec<u8>, AnnError>;

    fn row_count(&self) -> usize;
}

/// Factory for ANN indexes over a normalized vector matrix.
pub trait AnnBackend: Send + Sync {
    fn build(&self, matrix: &DenseMatrix) -> Result<Box<dyn AnnIndex>, AnnError>;

    fn deserialize(&self, bytes: &[u8], dim: usize) -> Result<Box<dyn AnnIndex>, AnnError>;

    fn name(&self) -> &'static str;
}

/// HNSW-backed ANN implementation.
#[derive(Debug, Default)]
pub struct HnswBackend;

impl HnswBackend {
    pub fn new() -> Self {
        Self
    }

    fn build_graph(matrix: &DenseMatrix) -> Hnsw<'static, f32, DistDot> {
        let hnsw = Hnsw::<f32, DistDot>::new(
            MAX_NB_CONNECTION,
            matrix.rows.max(1),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistDot {},
        );
        for i in 0..matrix.rows {
            hnsw.insert_slice((matrix.row(i), i));
        }
        debug!("HNSW graph built: rows={} dim={}", matrix.rows, matrix.dim);
        hnsw
    }
}

impl AnnBackend for HnswBackend {
    fn build(&self, matrix: &DenseMatrix) -> Result<Box<dyn AnnIndex>, AnnError> {
        if matrix.dim == 0 {
            return Err(AnnError::BuildFailed {
                message: "cannot build index over zero-dimensional vectors".to_string(),
            });
        }
        let hnsw = Self::build_graph(matrix);
        Ok(Box::new(HnswIndex {
            hnsw,
            vectors: matrix.clone(),
        }))
    }

    fn deserialize(&self, bytes: &[u8], dim: usize) -> Result<Box<dyn AnnIndex>, AnnError> {
        let vectors = DenseMatrix::from_bytes(bytes, dim).map_err(|e| AnnError::InvalidBlob {
            message: e.to_string(),
        })?;
        let hnsw = Self::build_graph(&vectors);
        Ok(Box::new(HnswIndex { hnsw, vectors }))
    }

    fn name(&self) -> &'static str {
        "hnsw"
    }
}

struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistDot>,
    /// Kept alongside the graph: the library has no blob serialization, so
    /// persistence stores these rows and re-inserts them on load.
    vectors: DenseMatrix,
}

impl AnnIndex for HnswIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AnnError> {
        if query.len() != self.vectors.dim {
            return Err(AnnError::DimensionMismatch {
                expected: self.vectors.dim,
                actual: query.len(),
            });
        }
        if self.vectors.rows == 0 || k == 0 {
            return Ok(vec![]);
        }

        let ef_search = (2 * k).max(EF_SEARCH_MIN);
        let neighbours = self.hnsw.search(query, k, ef_search);

        // DistDot distance is 1 - dot over unit vectors
        Ok(neighbours
            .into_iter()
            .map(|n| (n.d_id, 1.0 - n.distance))
            .collect())
    }

    fn serialize(&self) -> Result<Vec<u8>, AnnError> {
        Ok(self.vectors.to_bytes())
    }

    fn row_count(&self) -> usize {
        self.vectors.rows
    }
}

/// Availability of the ANN capability for one engine instance.
///
/// Self-degrading: a build or search failure demotes it for the remainder of
/// the process. It is never re-promoted in place; a rebuilt engine starts
/// fresh.
#[derive(Debug)]
pub struct AnnState {
    available: AtomicBool,
}

impl AnnState {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn mark_build_failed(&self, message: &str) {
        warn!("ANN index construction failed: {message}; falling back to dense matrix");
        self.available.store(false, Ordering::Release);
    }

    pub fn mark_search_failed(&self, message: &str) {
        warn!("ANN search failed: {message}; disabling ANN tier for this process");
        self.available.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_matrix(rows: Vec<Vec<f32>>) -> DenseMatrix {
        let mut m = DenseMatrix::from_rows(rows).unwrap();
        m.l2_normalize();
        m
    }

    #[test]
    fn test_build_and_search_ranks_by_inner_product() {
        let matrix = unit_matrix(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.7, 0.7, 0.0],
        ]);
        let backend = HnswBackend::new();
        let index = backend.build(&matrix).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-4);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn test_serialize_deserialize_preserves_results() {
        let matrix = unit_matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]]);
        let backend = HnswBackend::new();
        let index = backend.build(&matrix).unwrap();

        let blob = index.serialize().unwrap();
        let restored = backend.deserialize(&blob, 2).unwrap();
        assert_eq!(restored.row_count(), 3);

        let q = [0.6, 0.8];
        let a = index.search(&q, 3).unwrap();
        let b = restored.search(&q, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let matrix = unit_matrix(vec![vec![1.0, 0.0]]);
        let index = HnswBackend::new().build(&matrix).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(AnnError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_blob() {
        let backend = HnswBackend::new();
        assert!(matches!(
            backend.deserialize(&[0u8; 7], 2),
            Err(AnnError::InvalidBlob { .. })
        ));
    }

    #[test]
    fn test_ann_state_demotes_and_stays_down() {
        let state = AnnState::new(true);
        assert!(state.is_available());
        state.mark_search_failed("boom");
        assert!(!state.is_available());
        // No event re-promotes a demoted state
        assert!(!state.is_available());
    }
}
