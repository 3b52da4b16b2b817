use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::tempdir;

fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../data")
        .join(name)
}

#[allow(deprecated)]
fn docrag() -> Command {
    let mut cmd = Command::cargo_bin("docrag").expect("binary");
    cmd.env_remove("DOCRAG_VECTOR_INDEX").arg("--quiet");
    cmd
}

/// Precomputed index keyed by the sample corpus chunk ids
fn write_vector_index(path: &std::path::Path) {
    let ids = [
        "sdk-setup-1",
        "android-gradle-1",
        "push-limits-1",
        "segmentation-1",
        "campaign-api-1",
        "push-boyut-tr",
    ];
    let rows: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let mut vector = vec![0.1_f32; 8];
            vector[i] = 1.0;
            serde_json::json!({ "key": id, "vector": vector })
        })
        .collect();
    let index = serde_json::json!({ "schema_version": 1, "dimension": 8, "rows": rows });
    std::fs::write(path, serde_json::to_vec(&index).unwrap()).unwrap();
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn route_explains_definition_question() {
    let body = run_json(docrag().args(["route", "What is geofencing?"]));
    assert_eq!(body["strategy"], "vector_first");
    assert!(body["matched_vector_rules"]
        .as_array()
        .unwrap()
        .iter()
        .any(|rule| rule == "definition"));
}

#[test]
fn expand_bridges_turkish_terms() {
    let body = run_json(docrag().args(["expand", "push boyutu limit"]));
    let expanded = body["expanded"].as_str().unwrap();
    assert!(expanded.contains("size"));
    assert!(expanded.contains("limit"));
}

#[test]
fn expand_respects_max_terms() {
    let body = run_json(docrag().args(["expand", "push boyutu limit", "--max-terms", "1"]));
    assert!(body["added_terms"].as_array().unwrap().len() <= 1);
}

#[test]
fn graph_stats_counts_sample_graph() {
    let graph = data_path("sample_graph.json");
    let body = run_json(docrag().arg("graph-stats").arg("--graph").arg(&graph));
    assert_eq!(body["total_nodes"], 9);
    assert_eq!(body["total_edges"], 9);
}

#[test]
fn query_without_vectors_ranks_lexically() {
    let body = run_json(
        docrag()
            .args(["query", "what does the SDK need", "-k", "3"])
            .arg("--corpus")
            .arg(data_path("sample_corpus.json"))
            .arg("--graph")
            .arg(data_path("sample_graph.json")),
    );

    assert_eq!(body["query"], "what does the SDK need");
    assert_eq!(body["lexical_fallback"], true);
    let entities = body["graph_context"]["entities"].as_array().unwrap();
    assert!(entities.iter().any(|e| e["id"] == "netmera_sdk"));
    assert!(body["vector_results"].as_array().unwrap().len() <= 10);
}

#[test]
fn query_with_precomputed_index_uses_vectors() {
    let tmp = tempdir().unwrap();
    let index = tmp.path().join("vectors.json");
    write_vector_index(&index);

    let body = run_json(
        docrag()
            .args(["query", "push notification payload size"])
            .arg("--corpus")
            .arg(data_path("sample_corpus.json"))
            .arg("--vectors")
            .arg(&index),
    );
    assert_eq!(body["lexical_fallback"], false);
    assert_eq!(body["fallback_used"], false);
    assert!(!body["vector_results"].as_array().unwrap().is_empty());
}

#[test]
fn vector_index_from_environment_is_used() {
    let tmp = tempdir().unwrap();
    let index = tmp.path().join("vectors.json");
    write_vector_index(&index);

    let body = run_json(
        docrag()
            .env("DOCRAG_VECTOR_INDEX", &index)
            .args(["query", "user segmentation"])
            .arg("--corpus")
            .arg(data_path("sample_corpus.json")),
    );
    assert_eq!(body["lexical_fallback"], false);
}

#[test]
fn corrupt_vector_index_degrades_to_lexical() {
    let tmp = tempdir().unwrap();
    let index = tmp.path().join("broken.json");
    std::fs::write(&index, "{not json").unwrap();

    let body = run_json(
        docrag()
            .args(["query", "gradle android sdk"])
            .arg("--corpus")
            .arg(data_path("sample_corpus.json"))
            .arg("--vectors")
            .arg(&index),
    );
    assert_eq!(body["lexical_fallback"], true);
    assert_eq!(body["vector_results"][0]["chunk"]["id"], "android-gradle-1");
}

#[test]
fn prompt_format_renders_sections() {
    docrag()
        .args(["query", "What is geofencing?", "--format", "prompt"])
        .arg("--corpus")
        .arg(data_path("sample_corpus.json"))
        .arg("--graph")
        .arg(data_path("sample_graph.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("=== HYBRID CONTEXT MERGE ==="))
        .stdout(predicate::str::contains("Strategy: vector_first"))
        .stdout(predicate::str::contains("=== END HYBRID CONTEXT ==="));
}

#[test]
fn build_graph_writes_loadable_graph() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("graph.json");

    let body = run_json(
        docrag()
            .arg("build-graph")
            .arg("--corpus")
            .arg(data_path("sample_corpus.json"))
            .arg("--out")
            .arg(&out),
    );
    assert_eq!(body["chunks"], 6);
    assert!(out.exists());

    let stats = run_json(docrag().arg("graph-stats").arg("--graph").arg(&out));
    assert_eq!(stats["total_nodes"], body["total_entities"]);
    assert_eq!(stats["total_edges"], body["total_relationships"]);
}

#[test]
fn config_overrides_are_applied() {
    let tmp = tempdir().unwrap();
    let config = tmp.path().join("docrag.toml");
    std::fs::write(&config, "[orchestrator]\ndefault_k = 1\nmerge_cap = 1\n").unwrap();

    let body = run_json(
        docrag()
            .args(["query", "gradle android sdk"])
            .arg("--corpus")
            .arg(data_path("sample_corpus.json"))
            .arg("--config")
            .arg(&config),
    );
    assert_eq!(body["vector_results"].as_array().unwrap().len(), 1);
}

#[test]
fn invalid_config_is_reported() {
    let tmp = tempdir().unwrap();
    let config = tmp.path().join("docrag.toml");
    std::fs::write(&config, "[fusion]\nbm25_weight = 0.9\nvector_weight = 0.9\n").unwrap();

    docrag()
        .args(["route", "what does the SDK need"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn missing_corpus_is_reported() {
    docrag()
        .args(["query", "anything", "--corpus", "/nonexistent/corpus.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load corpus"));
}
