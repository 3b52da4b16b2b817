use docrag_graph::{
    entity_id, EntityExtractor, EntityType, GraphEntity, GraphRelationship, GraphRetriever,
    KnowledgeGraph, RelationType,
};
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

fn sample_graph_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/sample_graph.json")
}

#[tokio::test]
async fn sdk_requires_scenario_on_sample_graph() {
    let graph = KnowledgeGraph::load(sample_graph_path())
        .await
        .expect("sample graph loads");
    let retriever = GraphRetriever::new(
        Arc::new(graph),
        EntityExtractor::builtin().expect("builtin patterns compile"),
    );

    let ctx = retriever.retrieve("what does the SDK need", 5, 2);
    assert!(!ctx.is_empty());

    let ids: Vec<&str> = ctx.entities.iter().map(|e| e.id.as_str()).collect();
    assert!(ids.contains(&"netmera_sdk"));
    assert!(ids.contains(&"api_key_config"));
    assert!(ctx.relationships.iter().any(|r| {
        r.source_id == "netmera_sdk"
            && r.target_id == "api_key_config"
            && r.relation_type == RelationType::Requires
    }));
    assert!(ctx.entities.iter().all(|e| e.hop_distance <= 2));
}

#[tokio::test]
async fn sample_graph_stats() {
    let graph = KnowledgeGraph::load(sample_graph_path()).await.unwrap();
    let stats = graph.stats();
    assert_eq!(stats.total_nodes, 9);
    assert_eq!(stats.total_edges, 9);
    assert_eq!(stats.entity_types.get("Feature"), Some(&3));
    assert_eq!(stats.relation_types.get("feeds_into"), Some(&1));
    assert_eq!(
        graph
            .find_entities_by_type(EntityType::Platform, 10)
            .iter()
            .map(|e| e.id.as_str())
            .collect::<Vec<_>>(),
        vec!["ios_platform", "android_platform"]
    );
}

#[test]
fn empty_graph_retrieval_is_empty() {
    let retriever = GraphRetriever::new(
        Arc::new(KnowledgeGraph::new()),
        EntityExtractor::builtin().unwrap(),
    );
    let ctx = retriever.retrieve("How do I configure the Android SDK?", 5, 2);
    assert!(ctx.is_empty());
    assert_eq!(ctx.confidence, 0.0);
}

fn arbitrary_graph(nodes: usize, edges: &[(usize, usize)]) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new();
    for i in 0..nodes {
        graph.add_entity(GraphEntity::with_id(format!("n{i}"), format!("Node {i}"), EntityType::Feature));
    }
    for &(from, to) in edges {
        graph
            .add_relationship(GraphRelationship::new(
                format!("n{}", from % nodes),
                format!("n{}", to % nodes),
                RelationType::Uses,
            ))
            .unwrap();
    }
    graph
}

proptest! {
    #[test]
    fn traversal_terminates_within_hop_bound(
        nodes in 1usize..12,
        edges in prop::collection::vec((0usize..64, 0usize..64), 0..40),
        max_hops in 0usize..6,
        anchor in 0usize..12,
    ) {
        let graph = arbitrary_graph(nodes, &edges);
        let anchor_id = format!("n{}", anchor % nodes);
        let neighbors = graph.get_neighbors(&anchor_id, max_hops, None);

        prop_assert!(neighbors.len() < nodes);
        let mut seen = std::collections::HashSet::new();
        for n in &neighbors {
            prop_assert!(n.hop_distance >= 1 && n.hop_distance <= max_hops);
            prop_assert!(n.entity.id != anchor_id);
            prop_assert!(seen.insert(n.entity.id.clone()));
        }
    }

    #[test]
    fn extraction_is_idempotent(text in "[A-Za-z ,./-]{0,120}") {
        let extractor = EntityExtractor::builtin().unwrap();
        let first = extractor.extract_entities(&text);
        let second = extractor.extract_entities(&text);
        prop_assert_eq!(&first, &second);

        let first_ids: Vec<String> = first.iter().map(|e| e.entity_id()).collect();
        let second_ids: Vec<String> = second.iter().map(|e| e.entity_id()).collect();
        prop_assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn entity_ids_are_stable(name in "\\PC{0,40}") {
        prop_assert_eq!(entity_id(&name, EntityType::Api), entity_id(&name, EntityType::Api));
        prop_assert!(entity_id(&name, EntityType::Api).starts_with("api_"));
    }
}
