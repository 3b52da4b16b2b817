//! # Docrag Search
//!
//! Hybrid retrieval over a documentation corpus and its knowledge graph.
//!
//! ## Architecture
//!
//! ```text
//! query
//!   │
//!   ├──> QueryRouter ──> RoutingDecision (GraphFirst | VectorFirst | Balanced)
//!   │
//!   ├──> RetrievalEngine (both branches always run, joined concurrently)
//!   │      ├─ FusedRetriever: vector candidates + BM25 (+ fuzzy) fusion
//!   │      │    └─ no vector index / no correlated hit → lexical-only ranking
//!   │      ├─ GraphRetriever (spawn_blocking): anchors → BFS → GraphContext
//!   │      ├─ strategy-weighted confidence
//!   │      └─ weak first round → QueryExpander → second round → merge
//!   │
//!   └──> RetrievalBundle ──> render_context_for_prompt
//! ```

mod config;
mod engine;
mod error;
mod fusion;
mod fuzzy;
mod hybrid;
mod lexical;
mod query_expansion;
mod render;
mod router;

pub use config::{EngineConfig, GraphConfig, OrchestratorConfig, RouterConfig};
pub use engine::{
    graph_quality, strategy_weights, vector_quality, RetrievalBundle, RetrievalEngine,
    RetrievalEngineBuilder,
};
pub use error::{Result, SearchError};
pub use fusion::{fuse, normalize_similarity, FusionConfig, FusionScorer, ScoreBreakdown};
pub use fuzzy::FuzzyScorer;
pub use hybrid::{FusedRetriever, FusedSearch, RetrievalResult};
pub use lexical::{query_tokens, tokenize, Bm25Config, Bm25Index, LexicalScores};
pub use query_expansion::{
    ExpandedQuery, ExpanderStats, ExpansionConfig, Language, QueryExpander, Taxonomy,
    TaxonomyEntry, TaxonomyGroup, TaxonomyTable,
};
pub use render::render_context_for_prompt;
pub use router::{
    MultiEntityRule, PatternRule, QueryRouter, RoutingDecision, RoutingExplanation, RuleTable,
    ShortQueryRule, Strategy, WeightedTerms, DEFAULT_STRATEGY_GAP,
};
