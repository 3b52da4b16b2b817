use crate::error::{GraphError, Result};
use crate::types::{EntityType, GraphEntity, GraphRelationship, RelationType};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

pub const GRAPH_SCHEMA_VERSION: u32 = 1;

const NAME_MATCH_SCORE: u32 = 10;
const DESCRIPTION_MATCH_SCORE: u32 = 5;

/// Entity reached by neighbour expansion
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub entity: &'a GraphEntity,
    pub hop_distance: usize,
}

/// Entity found by substring search
#[derive(Debug, Clone, Copy)]
pub struct EntityMatch<'a> {
    pub entity: &'a GraphEntity,
    pub match_score: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGraph {
    schema_version: u32,
    entities: Vec<GraphEntity>,
    relationships: Vec<GraphRelationship>,
}

/// Typed entity/relationship multigraph
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<GraphEntity, GraphRelationship>,
    id_index: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entity and relationship lists (relationships validated)
    pub fn from_parts(
        entities: impl IntoIterator<Item = GraphEntity>,
        relationships: impl IntoIterator<Item = GraphRelationship>,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for entity in entities {
            graph.add_entity(entity);
        }
        for relationship in relationships {
            graph.add_relationship(relationship)?;
        }
        Ok(graph)
    }

    /// Insert or replace (by id) an entity
    pub fn add_entity(&mut self, entity: GraphEntity) -> NodeIndex {
        if let Some(&idx) = self.id_index.get(&entity.id) {
            log::debug!("Updated entity: {} ({})", entity.name, entity.entity_type);
            self.graph[idx] = entity;
            return idx;
        }
        log::debug!("Added entity: {} ({})", entity.name, entity.entity_type);
        let id = entity.id.clone();
        let idx = self.graph.add_node(entity);
        self.id_index.insert(id, idx);
        idx
    }

    /// Add a directed edge; both endpoints must already exist
    pub fn add_relationship(&mut self, relationship: GraphRelationship) -> Result<()> {
        let from = self
            .node(&relationship.source_id)
            .ok_or_else(|| GraphError::EntityNotFound(relationship.source_id.clone()))?;
        let to = self
            .node(&relationship.target_id)
            .ok_or_else(|| GraphError::EntityNotFound(relationship.target_id.clone()))?;
        log::debug!(
            "Added relationship: {} --{}--> {}",
            relationship.source_id,
            relationship.relation_type,
            relationship.target_id
        );
        self.graph.add_edge(from, to, relationship);
        Ok(())
    }

    fn node(&self, id: &str) -> Option<NodeIndex> {
        self.id_index.get(id).copied()
    }

    #[must_use]
    pub fn get_entity(&self, id: &str) -> Option<&GraphEntity> {
        self.node(id).map(|idx| &self.graph[idx])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.id_index.contains_key(id)
    }

    /// Breadth-first expansion over outgoing edges.
    ///
    /// The anchor is excluded and each entity appears once, at its smallest
    /// hop distance. With `relation_filter`, an edge is followed only if its
    /// relation type is in the allow-list.
    #[must_use]
    pub fn get_neighbors(
        &self,
        id: &str,
        max_hops: usize,
        relation_filter: Option<&[RelationType]>,
    ) -> Vec<Neighbor<'_>> {
        let Some(start) = self.node(id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(start);
        queue.push_back((start, 0usize));

        while let Some((current, hops)) = queue.pop_front() {
            if current != start {
                result.push(Neighbor {
                    entity: &self.graph[current],
                    hop_distance: hops,
                });
            }
            if hops >= max_hops {
                continue;
            }

            for edge in self.graph.edges_directed(current, Direction::Outgoing) {
                let target = edge.target();
                if visited.contains(&target) {
                    continue;
                }
                if let Some(allowed) = relation_filter {
                    if !allowed.contains(&edge.weight().relation_type) {
                        continue;
                    }
                }
                visited.insert(target);
                queue.push_back((target, hops + 1));
            }
        }

        result
    }

    /// Case-insensitive substring search: name hit scores 10, description hit 5.
    ///
    /// Plain substring matching, so misspellings do not match. Results are
    /// sorted by score descending, then id. A blank query matches nothing.
    #[must_use]
    pub fn search_entities(&self, text: &str, limit: usize) -> Vec<EntityMatch<'_>> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut matches: Vec<EntityMatch<'_>> = self
            .graph
            .node_weights()
            .filter_map(|entity| {
                let mut score = 0;
                if entity.name.to_lowercase().contains(&needle) {
                    score += NAME_MATCH_SCORE;
                }
                if entity.description.to_lowercase().contains(&needle) {
                    score += DESCRIPTION_MATCH_SCORE;
                }
                (score > 0).then_some(EntityMatch {
                    entity,
                    match_score: score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.match_score
                .cmp(&a.match_score)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        matches.truncate(limit);
        matches
    }

    /// First `limit` entities of a type, in insertion order
    #[must_use]
    pub fn find_entities_by_type(&self, entity_type: EntityType, limit: usize) -> Vec<&GraphEntity> {
        self.graph
            .node_weights()
            .filter(|entity| entity.entity_type == entity_type)
            .take(limit)
            .collect()
    }

    /// Induced subgraph over `ids` plus their neighbours within `max_hops`
    #[must_use]
    pub fn get_subgraph(&self, ids: &[&str], max_hops: usize) -> Self {
        let mut keep: HashSet<NodeIndex> = HashSet::new();
        for id in ids {
            let Some(idx) = self.node(id) else {
                continue;
            };
            keep.insert(idx);
            for neighbor in self.get_neighbors(id, max_hops, None) {
                if let Some(n) = self.node(&neighbor.entity.id) {
                    keep.insert(n);
                }
            }
        }

        let mut sub = Self::new();
        for idx in self.graph.node_indices() {
            if keep.contains(&idx) {
                sub.add_entity(self.graph[idx].clone());
            }
        }
        for edge in self.graph.edge_references() {
            if keep.contains(&edge.source()) && keep.contains(&edge.target()) {
                let relationship = edge.weight().clone();
                let from = sub.node(&relationship.source_id);
                let to = sub.node(&relationship.target_id);
                if let (Some(from), Some(to)) = (from, to) {
                    sub.graph.add_edge(from, to, relationship);
                }
            }
        }
        sub
    }

    /// All edges `from -> to` (parallel edges included)
    pub fn edges_between<'a>(
        &'a self,
        from: &str,
        to: &str,
    ) -> impl Iterator<Item = &'a GraphRelationship> + 'a {
        let endpoints = self.node(from).zip(self.node(to));
        endpoints
            .into_iter()
            .flat_map(move |(a, b)| self.graph.edges_connecting(a, b))
            .map(|edge| edge.weight())
    }

    #[must_use]
    pub fn has_relationship(&self, from: &str, to: &str, relation_type: &RelationType) -> bool {
        self.edges_between(from, to)
            .any(|rel| &rel.relation_type == relation_type)
    }

    pub fn entities(&self) -> impl Iterator<Item = &GraphEntity> {
        self.graph.node_weights()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &GraphRelationship> {
        self.graph.edge_weights()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.entity_count(),
            total_edges: self.relationship_count(),
            ..Default::default()
        };
        for entity in self.entities() {
            *stats
                .entity_types
                .entry(entity.entity_type.as_str().to_string())
                .or_default() += 1;
        }
        for relationship in self.relationships() {
            *stats
                .relation_types
                .entry(relationship.relation_type.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedGraph = serde_json::from_slice(bytes)?;
        if persisted.schema_version != GRAPH_SCHEMA_VERSION {
            return Err(GraphError::UnsupportedSchema {
                found: persisted.schema_version,
                expected: GRAPH_SCHEMA_VERSION,
            });
        }
        Self::from_parts(persisted.entities, persisted.relationships)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let persisted = PersistedGraph {
            schema_version: GRAPH_SCHEMA_VERSION,
            entities: self.entities().cloned().collect(),
            relationships: self.relationships().cloned().collect(),
        };
        Ok(serde_json::to_vec_pretty(&persisted)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let graph = Self::from_json(&bytes)?;
        log::info!(
            "Graph loaded from {}: {} nodes, {} edges",
            path.display(),
            graph.entity_count(),
            graph.relationship_count()
        );
        Ok(graph)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::info!("Graph saved to {}", path.display());
        Ok(())
    }
}
