//! # Docrag Vector Store
//!
//! Precomputed passage embeddings and cosine nearest-neighbour search.
//!
//! ## Architecture
//!
//! ```text
//! IndexSource[] (file, env var)
//!     │
//!     ├──> load_first_available  ── LoadFailure per skipped source
//!     │
//!     └──> VectorIndex (Array2<f32>, rows L2-normalised)
//!            └─> search(query_vec, k) -> VectorHit{key, similarity}
//!
//! query text ──> QueryEmbedder (HashingEmbedder offline) ──> query_vec
//! ```
//!
//! Row keys are chunk ids or exact chunk texts; correlation back to the
//! corpus happens in the search layer.

mod embeddings;
mod error;
mod index;
mod source;

pub use embeddings::{HashingEmbedder, QueryEmbedder, DEFAULT_HASHING_DIMENSION};
pub use error::{Result, VectorStoreError};
pub use index::{VectorHit, VectorIndex, VECTOR_INDEX_SCHEMA_VERSION};
pub use source::{load_first_available, IndexSource, LoadFailure};
