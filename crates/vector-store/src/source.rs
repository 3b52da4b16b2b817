use crate::error::VectorStoreError;
use crate::index::VectorIndex;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Place a vector index may be loaded from. Sources are tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    LocalFile(PathBuf),
    /// Environment variable holding a path
    Env(String),
}

impl fmt::Display for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalFile(path) => write!(f, "file:{}", path.display()),
            Self::Env(var) => write!(f, "env:{var}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("{origin}: not found")]
    Missing { origin: IndexSource },

    #[error("{origin}: corrupt index ({reason})")]
    Corrupt { origin: IndexSource, reason: String },

    #[error("{origin}: unsupported schema_version {found}")]
    Schema { origin: IndexSource, found: u32 },
}

impl IndexSource {
    fn resolve(&self) -> Option<PathBuf> {
        match self {
            Self::LocalFile(path) => Some(path.clone()),
            Self::Env(var) => std::env::var_os(var)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    async fn load(&self) -> std::result::Result<VectorIndex, LoadFailure> {
        let Some(path) = self.resolve() else {
            return Err(LoadFailure::Missing {
                origin: self.clone(),
            });
        };
        match VectorIndex::load(&path).await {
            Ok(index) => Ok(index),
            Err(VectorStoreError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadFailure::Missing {
                    origin: self.clone(),
                })
            }
            Err(VectorStoreError::UnsupportedSchema { found, .. }) => Err(LoadFailure::Schema {
                origin: self.clone(),
                found,
            }),
            Err(err) => Err(LoadFailure::Corrupt {
                origin: self.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

/// Try each source in order; return the first index that loads, or every failure.
pub async fn load_first_available(
    sources: &[IndexSource],
) -> std::result::Result<(VectorIndex, IndexSource), Vec<LoadFailure>> {
    let mut failures = Vec::new();
    for source in sources {
        match source.load().await {
            Ok(index) => {
                log::info!("Vector index loaded from {source}");
                return Ok((index, source.clone()));
            }
            Err(failure) => {
                log::debug!("Vector index source skipped: {failure}");
                failures.push(failure);
            }
        }
    }
    Err(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn falls_through_to_first_loadable_source() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.json");
        let corrupt = tmp.path().join("corrupt.json");
        let schema = tmp.path().join("schema.json");

        VectorIndex::from_rows(2, vec![("k".to_string(), vec![1.0, 0.0])])
            .unwrap()
            .save(&good)
            .await
            .unwrap();
        tokio::fs::write(&corrupt, b"{not json").await.unwrap();
        tokio::fs::write(&schema, br#"{"schema_version":7,"dimension":2,"rows":[]}"#)
            .await
            .unwrap();

        let sources = vec![
            IndexSource::LocalFile(tmp.path().join("missing.json")),
            IndexSource::Env("DOCRAG_TEST_UNSET_VECTOR_INDEX".to_string()),
            IndexSource::LocalFile(corrupt),
            IndexSource::LocalFile(schema),
            IndexSource::LocalFile(good.clone()),
        ];
        let (index, source) = load_first_available(&sources).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(source, IndexSource::LocalFile(good));
    }

    #[tokio::test]
    async fn reports_every_failure_in_order() {
        let tmp = TempDir::new().unwrap();
        let corrupt = tmp.path().join("corrupt.json");
        tokio::fs::write(&corrupt, b"[]").await.unwrap();

        let sources = vec![
            IndexSource::LocalFile(tmp.path().join("missing.json")),
            IndexSource::LocalFile(corrupt),
        ];
        let failures = load_first_available(&sources).await.unwrap_err();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], LoadFailure::Missing { .. }));
        assert!(matches!(failures[1], LoadFailure::Corrupt { .. }));
    }
}
