//! # Docrag Graph
//!
//! Typed knowledge graph of documentation concepts and the retrieval layer
//! that turns a query into a relevant subgraph.
//!
//! ## Architecture
//!
//! ```text
//! documentation text (offline)
//!     │
//!     ├──> EntityExtractor (regex + dictionary pattern tables)
//!     │      ├─ entity spans, overlap-resolved by confidence
//!     │      └─ trigger-verb relations between nearby spans
//!     │
//!     ├──> GraphBuilder ──> KnowledgeGraph (petgraph DiGraph, multigraph)
//!     │
//! query
//!     └──> GraphRetriever
//!            ├─ anchors: extracted entities, whole query, token fallback
//!            ├─ BFS neighbour expansion (bounded by max_hops)
//!            └─ GraphContext (entities, relationships, summary, confidence)
//! ```

mod builder;
mod error;
mod extractor;
mod retriever;
mod store;
mod types;

pub use builder::{GraphBuilder, IngestStats};
pub use error::{GraphError, Result};
pub use extractor::{
    EntityExtractor, ExtractedEntity, ExtractedRelation, PatternTable, RelationTriggers,
    TypedPatterns, TypedTerms,
};
pub use retriever::{
    GraphContext, GraphEntityHit, GraphRelationHit, GraphRetriever, DEFAULT_MAX_ENTITIES,
    DEFAULT_MAX_HOPS, EXPANDED_CONTEXT_LABEL,
};
pub use store::{EntityMatch, GraphStats, KnowledgeGraph, Neighbor, GRAPH_SCHEMA_VERSION};
pub use types::{entity_id, EntityType, GraphEntity, GraphRelationship, Properties, RelationType};
