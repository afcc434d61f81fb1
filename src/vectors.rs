//! Memory-mapped dense vector store.
//!
//! The index builder produces a single artifact: an N×D matrix of
//! L2-normalized `f32` values, stored row-major little-endian in a raw
//! `.f32` file, accompanied by a JSON sidecar (`<stem>.json`) declaring the
//! shape and the embedding model:
//!
//! ```json
//! { "rows": 123456, "dims": 384, "model": "all-minilm-l6-v2" }
//! ```
//!
//! The store memory-maps the file read-only and never copies the full
//! tensor to the heap. Row `i` corresponds to `chunks.vector_index = i` in
//! the metadata store. Because rows are L2-normalized, the dot product of a
//! row with a normalized query vector is their cosine similarity.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Tolerance for the L2-norm invariant: `|‖v‖ − 1| ≤ 1e-3`.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// Sidecar schema describing the matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSchema {
    pub rows: usize,
    pub dims: usize,
    pub model: String,
}

/// Read-only view over the dense vector matrix.
pub struct VectorStore {
    mmap: Mmap,
    schema: VectorSchema,
    path: PathBuf,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("rows", &self.schema.rows)
            .field("dims", &self.schema.dims)
            .field("model", &self.schema.model)
            .finish()
    }
}

impl VectorStore {
    /// Open the vector file at `path` with its JSON sidecar.
    ///
    /// Fails fast with [`QueryError::NotReady`] when either artifact is
    /// missing or the file size disagrees with the declared shape.
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        if !path.exists() {
            return Err(QueryError::NotReady {
                path: path.to_path_buf(),
                reason: "vector file missing; build the index first".to_string(),
            });
        }

        let sidecar = path.with_extension("json");
        let schema_text =
            std::fs::read_to_string(&sidecar).map_err(|e| QueryError::NotReady {
                path: sidecar.clone(),
                reason: format!("vector schema sidecar unreadable: {e}"),
            })?;
        let schema: VectorSchema =
            serde_json::from_str(&schema_text).map_err(|e| QueryError::NotReady {
                path: sidecar.clone(),
                reason: format!("vector schema sidecar invalid: {e}"),
            })?;

        if schema.dims == 0 {
            return Err(QueryError::NotReady {
                path: sidecar,
                reason: "vector schema declares zero dimensions".to_string(),
            });
        }

        let file = File::open(path).map_err(|e| QueryError::NotReady {
            path: path.to_path_buf(),
            reason: format!("vector file unreadable: {e}"),
        })?;
        // SAFETY: the file is opened read-only and mapped read-only; the map
        // lives as long as `self` and is never mutated through it.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| QueryError::NotReady {
            path: path.to_path_buf(),
            reason: format!("failed to memory-map vector file: {e}"),
        })?;

        let expected = schema.rows * schema.dims * std::mem::size_of::<f32>();
        if mmap.len() != expected {
            return Err(QueryError::NotReady {
                path: path.to_path_buf(),
                reason: format!(
                    "vector file is {} bytes but schema {}x{} implies {}",
                    mmap.len(),
                    schema.rows,
                    schema.dims,
                    expected
                ),
            });
        }

        Ok(Self {
            mmap,
            schema,
            path: path.to_path_buf(),
        })
    }

    pub fn rows(&self) -> usize {
        self.schema.rows
    }

    pub fn dims(&self) -> usize {
        self.schema.dims
    }

    /// Embedding model the matrix was built with.
    pub fn model(&self) -> &str {
        &self.schema.model
    }

    /// Row `i` as an `f32` slice.
    ///
    /// Panics if `i` is out of range; callers index through vetted
    /// `vector_index` values from the metadata store.
    pub fn row(&self, i: usize) -> &[f32] {
        assert!(i < self.schema.rows, "row {i} out of range");
        let floats = self.as_floats();
        &floats[i * self.schema.dims..(i + 1) * self.schema.dims]
    }

    fn as_floats(&self) -> &[f32] {
        let bytes: &[u8] = &self.mmap;
        // SAFETY: the mapping is page-aligned (satisfying f32 alignment),
        // its length is a validated multiple of 4, and the lifetime is tied
        // to `&self`.
        unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4)
        }
    }

    /// Cosine similarities between `query` and the rows at `indices`.
    ///
    /// Each similarity is an independent sequential dot product, so the
    /// result is deterministic regardless of parallel scheduling.
    pub fn subset_scores(&self, indices: &[usize], query: &[f32]) -> Result<Vec<f32>, QueryError> {
        if query.len() != self.schema.dims {
            return Err(QueryError::DimensionMismatch {
                query: query.len(),
                store: self.schema.dims,
            });
        }
        Ok(indices
            .par_iter()
            .map(|&i| dot(self.row(i), query))
            .collect())
    }

    /// Verify the L2-norm invariant over the first `sample` rows
    /// (`usize::MAX` for all).
    pub fn validate_norms(&self, sample: usize) -> Result<(), QueryError> {
        let limit = sample.min(self.schema.rows);
        for i in 0..limit {
            let norm = dot(self.row(i), self.row(i)).sqrt();
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                return Err(QueryError::Internal(anyhow::anyhow!(
                    "vector {} is not L2-normalized (norm = {})",
                    i,
                    norm
                )));
            }
        }
        Ok(())
    }
}

/// Plain dot product; inputs of equal length.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Write a vector file plus sidecar in the store's format.
///
/// This is the contract the index builder (and the test suite) uses to
/// produce artifacts the engine can open. Rows are written as-is; callers
/// are responsible for L2 normalization.
pub fn write_vector_store(path: &Path, rows: &[Vec<f32>], model: &str) -> anyhow::Result<()> {
    use std::io::Write;

    let dims = rows.first().map(|r| r.len()).unwrap_or(0);
    for (i, row) in rows.iter().enumerate() {
        anyhow::ensure!(
            row.len() == dims,
            "row {} has {} dims, expected {}",
            i,
            row.len(),
            dims
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::io::BufWriter::new(File::create(path)?);
    for row in rows {
        for &value in row {
            file.write_all(&value.to_le_bytes())?;
        }
    }
    file.flush()?;

    let schema = VectorSchema {
        rows: rows.len(),
        dims,
        model: model.to_string(),
    };
    std::fs::write(
        path.with_extension("json"),
        serde_json::to_string_pretty(&schema)?,
    )?;

    Ok(())
}
