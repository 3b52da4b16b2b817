//! # Docrag Corpus
//!
//! Typed, immutable documentation chunks shared by every retrieval index.
//!
//! ## Architecture
//!
//! ```text
//! (text, ChunkMetadata)[]   ← produced by the ingestion pipeline
//!     │
//!     ├──> Validation (non-empty text, unique ids)
//!     │
//!     └──> Corpus
//!            ├─ ordered Arc<Chunk> list (chunk index = position)
//!            ├─ id   -> index
//!            └─ text -> index (exact-text correlation for vector hits)
//! ```

mod corpus;
mod error;
mod types;

pub use corpus::{Corpus, CORPUS_SCHEMA_VERSION};
pub use error::{CorpusError, Result};
pub use types::{Chunk, ChunkMetadata, ContentType};
