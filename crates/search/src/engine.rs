use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::hybrid::{FusedRetriever, FusedSearch, RetrievalResult};
use crate::query_expansion::{ExpandedQuery, QueryExpander};
use crate::render::render_context_for_prompt;
use crate::router::{QueryRouter, RoutingDecision, Strategy};
use docrag_corpus::Corpus;
use docrag_graph::{EntityExtractor, GraphContext, GraphRetriever, KnowledgeGraph};
use docrag_vector_store::{
    HashingEmbedder, QueryEmbedder, VectorIndex, VectorStoreError, DEFAULT_HASHING_DIMENSION,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything one `retrieve` call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalBundle {
    pub query: String,
    pub vector_results: Vec<RetrievalResult>,

    /// `None` when the graph contributed nothing
    pub graph_context: Option<GraphContext>,
    pub routing: RoutingDecision,
    pub combined_confidence: f32,

    /// Set only when a second round ran with added terms
    pub expansion_used: Option<ExpandedQuery>,
    pub second_round_used: bool,

    /// A branch failed, timed out or was cancelled in some round
    pub fallback_used: bool,

    /// Vector ranking was unavailable and BM25 ranked alone
    pub lexical_fallback: bool,
}

impl RetrievalBundle {
    pub fn is_empty(&self) -> bool {
        self.vector_results.is_empty() && self.graph_context.is_none()
    }
}

/// Relative weight of vector and graph quality per strategy
pub const fn strategy_weights(strategy: Strategy) -> (f32, f32) {
    match strategy {
        Strategy::VectorFirst => (0.7, 0.3),
        Strategy::GraphFirst => (0.3, 0.7),
        Strategy::Balanced => (0.5, 0.5),
    }
}

/// Average fused score, penalised when fewer than `target_docs` results came back.
pub fn vector_quality(results: &[RetrievalResult], target_docs: usize) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let n = results.len() as f32;
    let avg = results
        .iter()
        .map(|r| r.fused_score.clamp(0.0, 1.0))
        .sum::<f32>()
        / n;
    avg * (n / target_docs.max(1) as f32).min(1.0)
}

/// Graph confidence scaled by how rich the subgraph is
pub fn graph_quality(context: &GraphContext, richness_target: usize) -> f32 {
    if context.is_empty() {
        return 0.0;
    }
    let size = (context.entities.len() + context.relationships.len()) as f32;
    let richness = (size / richness_target.max(1) as f32).min(1.0);
    context.confidence.clamp(0.0, 1.0) * (0.5 + 0.5 * richness)
}

struct RoundOutput {
    search: FusedSearch,
    graph: GraphContext,
    failed: bool,
}

struct EngineInner {
    fused: FusedRetriever,
    graph: GraphRetriever,
    router: QueryRouter,
    expander: QueryExpander,
    config: EngineConfig,
}

/// Hybrid retrieval entry point.
///
/// Cheap to clone; every clone shares the same immutable indices, so
/// concurrent `retrieve` calls need no locking.
#[derive(Clone)]
pub struct RetrievalEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("fused", &self.inner.fused)
            .field("graph_entities", &self.inner.graph.graph().entity_count())
            .field("router", &self.inner.router)
            .finish()
    }
}

impl RetrievalEngine {
    pub fn builder(corpus: Arc<Corpus>) -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::new(corpus)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &QueryRouter {
        &self.inner.router
    }

    pub fn expander(&self) -> &QueryExpander {
        &self.inner.expander
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        self.inner.graph.graph()
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> RetrievalBundle {
        self.retrieve_with_cancel(query, k, CancellationToken::new())
            .await
    }

    /// Route, retrieve from both branches, optionally run an expanded second
    /// round, and score the merged result. Never fails: branch errors,
    /// timeouts and cancellation degrade to empty branch output.
    pub async fn retrieve_with_cancel(
        &self,
        query: &str,
        k: usize,
        cancel: CancellationToken,
    ) -> RetrievalBundle {
        let inner = &self.inner;
        let routing = inner.router.route(query);

        let first = self.run_round(query, k, &cancel).await;
        let mut vector_results = first.search.results;
        let mut graph_context = first.graph;
        let mut fallback_used = first.failed;
        let mut lexical_fallback = first.search.lexical_fallback;

        let provisional = self.confidence(routing.strategy, &vector_results, &graph_context);
        log::debug!(
            "First round for '{}': {} results, graph {} entities, confidence {:.3}",
            query,
            vector_results.len(),
            graph_context.entities.len(),
            provisional
        );

        let mut expansion_used = None;
        let mut second_round_used = false;
        if !cancel.is_cancelled()
            && inner
                .expander
                .should_expand(vector_results.len(), provisional)
        {
            let expansion = inner.expander.expand(query);
            if expansion.added_anything() {
                log::debug!("Second round with expanded query '{}'", expansion.expanded);
                let second = self.run_round(&expansion.expanded, k, &cancel).await;
                second_round_used = true;
                fallback_used |= second.failed;
                lexical_fallback |= second.search.lexical_fallback;

                let cap = k.max(inner.config.orchestrator.merge_cap);
                vector_results = merge_results(vector_results, second.search.results, cap);
                graph_context.merge(second.graph);
                expansion_used = Some(expansion);
            }
        }

        let combined_confidence =
            self.confidence(routing.strategy, &vector_results, &graph_context);
        log::info!(
            "Retrieved {} passages for '{}' ({}, confidence {:.3}{})",
            vector_results.len(),
            query,
            routing.strategy,
            combined_confidence,
            if second_round_used { ", expanded" } else { "" }
        );

        RetrievalBundle {
            query: query.to_string(),
            vector_results,
            graph_context: (!graph_context.is_empty()).then_some(graph_context),
            routing,
            combined_confidence,
            expansion_used,
            second_round_used,
            fallback_used,
            lexical_fallback,
        }
    }

    pub fn render_context(&self, bundle: &RetrievalBundle) -> String {
        render_context_for_prompt(bundle, &bundle.query)
    }

    fn confidence(
        &self,
        strategy: Strategy,
        results: &[RetrievalResult],
        graph: &GraphContext,
    ) -> f32 {
        let orchestrator = &self.inner.config.orchestrator;
        let (w_vector, w_graph) = strategy_weights(strategy);
        let combined = w_vector * vector_quality(results, orchestrator.target_docs)
            + w_graph * graph_quality(graph, orchestrator.richness_target);
        combined.clamp(0.0, 1.0)
    }

    async fn run_round(&self, query: &str, k: usize, cancel: &CancellationToken) -> RoundOutput {
        let (vector, graph) = tokio::join!(
            self.vector_branch(query, k, cancel),
            self.graph_branch(query, cancel)
        );

        let mut failed = false;
        let search = vector.unwrap_or_else(|err| {
            log::warn!("Vector retrieval degraded: {err}");
            failed = true;
            FusedSearch::default()
        });
        let graph = graph.unwrap_or_else(|err| {
            log::warn!("Graph retrieval degraded: {err}");
            failed = true;
            GraphContext::empty()
        });

        RoundOutput {
            search,
            graph,
            failed,
        }
    }

    async fn vector_branch(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<FusedSearch> {
        let timeout = self.inner.config.orchestrator.branch_timeout();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SearchError::BranchCancelled("vector")),

            outcome = tokio::time::timeout(timeout, self.inner.fused.search(query, k)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::BranchTimeout {
                        branch: "vector",
                        millis: self.inner.config.orchestrator.branch_timeout_ms,
                    }),
                }
            }
        }
    }

    async fn graph_branch(&self, query: &str, cancel: &CancellationToken) -> Result<GraphContext> {
        let config = &self.inner.config;
        let timeout = config.orchestrator.branch_timeout();
        let retriever = self.inner.graph.clone();
        let query = query.to_string();
        let (max_entities, max_hops) = (config.graph.max_entities, config.graph.max_hops);
        let task = tokio::task::spawn_blocking(move || {
            retriever.retrieve(&query, max_entities, max_hops)
        });

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SearchError::BranchCancelled("graph")),

            outcome = tokio::time::timeout(timeout, task) => {
                match outcome {
                    Ok(Ok(context)) => Ok(context),
                    Ok(Err(join_err)) => Err(SearchError::BranchFailed {
                        branch: "graph",
                        reason: join_err.to_string(),
                    }),
                    Err(_) => Err(SearchError::BranchTimeout {
                        branch: "graph",
                        millis: config.orchestrator.branch_timeout_ms,
                    }),
                }
            }
        }
    }
}

/// Union by chunk id keeping the higher score, best first, at most `cap`.
fn merge_results(
    first: Vec<RetrievalResult>,
    second: Vec<RetrievalResult>,
    cap: usize,
) -> Vec<RetrievalResult> {
    let mut merged: Vec<RetrievalResult> = Vec::with_capacity(first.len() + second.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for result in first.into_iter().chain(second) {
        match positions.get(result.chunk_id()) {
            Some(&i) => {
                if result.fused_score > merged[i].fused_score {
                    merged[i] = result;
                }
            }
            None => {
                positions.insert(result.chunk_id().to_string(), merged.len());
                merged.push(result);
            }
        }
    }
    merged.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id().cmp(b.chunk_id()))
    });
    merged.truncate(cap);
    merged
}

/// Assembles a [`RetrievalEngine`] from loaded artifacts.
///
/// Only the corpus is required. Without a graph the graph branch returns
/// empty contexts; without a vector index ranking is lexical only.
pub struct RetrievalEngineBuilder {
    corpus: Arc<Corpus>,
    graph: Option<Arc<KnowledgeGraph>>,
    vectors: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn QueryEmbedder>>,
    extractor: Option<Arc<EntityExtractor>>,
    router: Option<QueryRouter>,
    expander: Option<QueryExpander>,
    config: EngineConfig,
}

impl RetrievalEngineBuilder {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self {
            corpus,
            graph: None,
            vectors: None,
            embedder: None,
            extractor: None,
            router: None,
            expander: None,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn graph(mut self, graph: Arc<KnowledgeGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn vector_index(mut self, vectors: Arc<VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn QueryEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn extractor(mut self, extractor: Arc<EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Custom router; its strategy gap is replaced by `router.strategy_gap`
    #[must_use]
    pub fn router(mut self, router: QueryRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Custom expander; its thresholds are replaced by the `[expansion]` section
    #[must_use]
    pub fn expander(mut self, expander: QueryExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RetrievalEngine> {
        self.config.validate()?;

        let embedder: Arc<dyn QueryEmbedder> = match self.embedder {
            Some(embedder) => embedder,
            None => {
                let dimension = self
                    .vectors
                    .as_ref()
                    .map_or(DEFAULT_HASHING_DIMENSION, |v| v.dimension());
                Arc::new(HashingEmbedder::new(dimension)?)
            }
        };
        if let Some(vectors) = &self.vectors {
            if vectors.dimension() != embedder.dimension() {
                return Err(VectorStoreError::InvalidDimension {
                    expected: vectors.dimension(),
                    actual: embedder.dimension(),
                }
                .into());
            }
        }

        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => EntityExtractor::builtin()?,
        };
        let graph = self
            .graph
            .unwrap_or_else(|| Arc::new(KnowledgeGraph::new()));
        let router = match self.router {
            Some(router) => router,
            None => QueryRouter::builtin()?,
        }
        .with_strategy_gap(self.config.router.strategy_gap);
        let expander = match self.expander {
            Some(expander) => expander,
            None => QueryExpander::new(
                crate::query_expansion::Taxonomy::builtin()?,
                Arc::clone(&extractor),
                self.config.expansion.clone(),
            ),
        }
        .with_config(self.config.expansion.clone());

        let fused = FusedRetriever::new(
            Arc::clone(&self.corpus),
            self.vectors,
            embedder,
            self.config.fusion.clone(),
            self.config.lexical,
        );

        log::info!(
            "Retrieval engine ready: {} chunks, {} graph entities, vector index {}",
            self.corpus.len(),
            graph.entity_count(),
            if fused.has_vector_index() { "loaded" } else { "absent" }
        );

        Ok(RetrievalEngine {
            inner: Arc::new(EngineInner {
                fused,
                graph: GraphRetriever::new(graph, extractor),
                router,
                expander,
                config: self.config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_corpus::{Chunk, ChunkMetadata};
    use docrag_graph::{GraphEntityHit, GraphRelationHit};

    fn result(id: &str, score: f32) -> RetrievalResult {
        let chunk = Chunk::new(id, format!("text {id}"), ChunkMetadata::default());
        RetrievalResult {
            source_label: id.to_string(),
            url: String::new(),
            fused_score: score,
            chunk: Arc::new(chunk),
            scores: Default::default(),
        }
    }

    fn context(entities: usize, relationships: usize, confidence: f32) -> GraphContext {
        GraphContext {
            entities: (0..entities)
                .map(|i| GraphEntityHit {
                    id: format!("e{i}"),
                    name: format!("E{i}"),
                    entity_type: docrag_graph::EntityType::Feature,
                    description: String::new(),
                    hop_distance: 0,
                })
                .collect(),
            relationships: (0..relationships)
                .map(|i| GraphRelationHit {
                    source_id: "e0".to_string(),
                    target_id: format!("e{i}"),
                    source_name: "E0".to_string(),
                    target_name: format!("E{i}"),
                    relation_type: docrag_graph::RelationType::Uses,
                    description: String::new(),
                })
                .collect(),
            textual_summary: String::new(),
            confidence,
        }
    }

    #[test]
    fn vector_quality_penalises_few_results() {
        assert_eq!(vector_quality(&[], 3), 0.0);
        let one = vector_quality(&[result("a", 0.9)], 3);
        assert!((one - 0.3).abs() < 1e-6);
        let three = vector_quality(&[result("a", 0.9), result("b", 0.6), result("c", 1.5)], 3);
        assert!((three - (0.9 + 0.6 + 1.0) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn graph_quality_scales_with_richness() {
        assert_eq!(graph_quality(&GraphContext::empty(), 8), 0.0);
        let sparse = graph_quality(&context(2, 0, 0.8), 8);
        assert!((sparse - 0.8 * (0.5 + 0.5 * 0.25)).abs() < 1e-6);
        let rich = graph_quality(&context(6, 6, 0.8), 8);
        assert!((rich - 0.8).abs() < 1e-6);
    }

    #[test]
    fn strategy_weights_sum_to_one() {
        for strategy in [Strategy::VectorFirst, Strategy::GraphFirst, Strategy::Balanced] {
            let (v, g) = strategy_weights(strategy);
            assert!((v + g - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn merge_keeps_max_score_per_chunk_and_caps() {
        let first = vec![result("a", 0.4), result("b", 0.9)];
        let second = vec![result("a", 0.7), result("c", 0.1), result("d", 0.5)];
        let merged = merge_results(first, second, 3);
        let ids: Vec<_> = merged.iter().map(|r| r.chunk_id()).collect();
        assert_eq!(ids, vec!["b", "a", "d"]);
        assert!((merged[1].fused_score - 0.7).abs() < 1e-6);
    }
}
