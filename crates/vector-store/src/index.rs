use crate::embeddings::QueryEmbedder;
use crate::error::{Result, VectorStoreError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const VECTOR_INDEX_SCHEMA_VERSION: u32 = 1;

/// Nearest-neighbour hit. `key` is either a chunk id or the chunk's exact text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub key: String,
    pub similarity: f32,
}

/// Precomputed embeddings, searched by brute-force cosine similarity.
///
/// Rows are stored L2-normalised in a single `Array2` so a query is one
/// matrix-vector product.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    keys: Vec<String>,
    matrix: Array2<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRow {
    key: String,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    schema_version: u32,
    dimension: usize,
    rows: Vec<PersistedRow>,
}

impl VectorIndex {
    pub fn from_rows(dimension: usize, rows: Vec<(String, Vec<f32>)>) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::IndexError(
                "dimension must be positive".to_string(),
            ));
        }

        let mut keys = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * dimension);
        for (key, mut vector) in rows {
            if vector.len() != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            keys.push(key);
            flat.extend(vector);
        }

        let matrix = Array2::from_shape_vec((keys.len(), dimension), flat)
            .map_err(|e| VectorStoreError::IndexError(e.to_string()))?;

        Ok(Self {
            dimension,
            keys,
            matrix,
        })
    }

    /// Index small `(key, text)` sets with `embedder`; production indices are
    /// precomputed and loaded with [`VectorIndex::load`].
    pub async fn embed_items<E, I, K, T>(embedder: &E, items: I) -> Result<Self>
    where
        E: QueryEmbedder + ?Sized,
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: AsRef<str>,
    {
        let mut rows = Vec::new();
        for (key, text) in items {
            let vector = embedder.embed(text.as_ref()).await?;
            rows.push((key.into(), vector));
        }
        Self::from_rows(embedder.dimension(), rows)
    }

    /// Search for k nearest neighbours by cosine similarity, descending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = Array1::from(query.to_vec());
        let norm = q.dot(&q).sqrt();
        if norm == 0.0 {
            return Ok(Vec::new());
        }
        q /= norm;

        let sims = self.matrix.dot(&q);
        let mut scored: Vec<(usize, f32)> = sims.iter().copied().enumerate().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(row, similarity)| VectorHit {
                key: self.keys[row].clone(),
                similarity,
            })
            .collect())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != VECTOR_INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::UnsupportedSchema {
                found: persisted.schema_version,
                expected: VECTOR_INDEX_SCHEMA_VERSION,
            });
        }
        let rows = persisted
            .rows
            .into_iter()
            .map(|row| (row.key, row.vector))
            .collect();
        let index = Self::from_rows(persisted.dimension, rows)?;
        log::info!(
            "Loaded vector index: {} rows, dimension {} ({})",
            index.len(),
            index.dimension,
            path.display()
        );
        Ok(index)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rows = self
            .keys
            .iter()
            .zip(self.matrix.axis_iter(Axis(0)))
            .map(|(key, row)| PersistedRow {
                key: key.clone(),
                vector: row.to_vec(),
            })
            .collect();
        let persisted = PersistedIndex {
            schema_version: VECTOR_INDEX_SCHEMA_VERSION,
            dimension: self.dimension,
            rows,
        };
        let bytes = serde_json::to_vec(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Stored (normalised) vector for row `row`
    #[must_use]
    pub fn row(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.keys.len()).then(|| self.matrix.row(row))
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> VectorIndex {
        VectorIndex::from_rows(
            3,
            vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.9, 0.1, 0.0]),
                ("c".to_string(), vec![0.0, 1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_add_and_search() {
        let index = sample();
        assert_eq!(index.len(), 3);

        let results = index.search(&[2.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "a");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].key, "b");
        assert!(results[1].similarity > 0.9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let rows = vec![("a".to_string(), vec![1.0, 0.0])];
        assert!(matches!(
            VectorIndex::from_rows(3, rows),
            Err(VectorStoreError::InvalidDimension { expected: 3, actual: 2 })
        ));

        let index = sample();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn zero_query_returns_nothing() {
        let index = sample();
        assert!(index.search(&[0.0, 0.0, 0.0], 3).unwrap().is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.json");

        sample().save(&path).await.unwrap();
        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.keys(), &["a", "b", "c"]);

        let hits = loaded.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].key, "c");
    }
}
