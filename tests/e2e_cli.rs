use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("relevance-eval");
    Command::new(path)
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, value: Value| {
            fs::write(dir.path().join(name), value.to_string()).unwrap();
        };

        write(
            "queries.json",
            json!([
                {"query_id": "q1", "query": "tomato soup"},
                {"query_id": "q2", "query": "chocolate cake"}
            ]),
        );
        write(
            "products.json",
            json!([
                {"product_id": "p1", "title": "Tomato Soup", "brand": "Campbell"},
                {"product_id": "p2", "title": "Chocolate Cake", "category_path": "Bakery"},
                {"product_id": "p3", "title": "Dish Soap"}
            ]),
        );
        write(
            "labels.json",
            json!([
                {"query_id": "q1", "product_id": "p1", "relevance": 3},
                {"query_id": "q1", "product_id": "p2", "relevance": 0},
                {"query_id": "q1", "product_id": "p3", "relevance": 0},
                {"query_id": "q2", "product_id": "p2", "relevance": 3},
                {"query_id": "q2", "product_id": "p1", "relevance": 1},
                {"query_id": "q2", "product_id": "p3", "relevance": 0},
                {"query_id": "q2", "product_id": "p9", "relevance": 2}
            ]),
        );
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn data_args(&self) -> Vec<String> {
        ["queries", "products", "labels"]
            .iter()
            .flat_map(|name| {
                [
                    format!("--{name}"),
                    self.path(&format!("{name}.json")).display().to_string(),
                ]
            })
            .collect()
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn evaluate_outputs_json_metrics() {
    let fx = Fixture::new();
    let assert = bin()
        .arg("evaluate")
        .args(fx.data_args())
        .args(["--all", "--encoder", "hashed:256", "--output", "json"])
        .assert()
        .success();

    let json = stdout_json(assert.get_output());
    assert_eq!(json["name"], "hashed:256");
    assert_eq!(json["ndcg_k"], 10);
    assert_eq!(json["pairs_scored"], 6);
    assert!(json["result"]["spearman"].is_number());
    assert_eq!(json["result"]["per_level_stats"]["3"]["count"], 2);
}

#[test]
fn evaluate_prints_text_tables() {
    let fx = Fixture::new();
    bin()
        .arg("evaluate")
        .args(fx.data_args())
        .args(["--all", "--ndcg-k", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EVALUATION: hashed:1000"))
        .stdout(predicate::str::contains("NDCG@5"));
}

#[test]
fn compare_reports_assessment() {
    let fx = Fixture::new();
    bin()
        .arg("compare")
        .args(fx.data_args())
        .args(["--all", "--baseline", "hashed:64", "--candidate", "hashed:512"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IMPROVEMENT FROM FINE-TUNING"))
        .stdout(predicate::str::contains("ASSESSMENT:"));
}

#[test]
fn predict_then_submit() {
    let fx = Fixture::new();
    let predictions = fx.path("predictions.json");
    let submission = fx.path("submission.json");

    bin()
        .args(["predict", "--queries"])
        .arg(fx.path("queries.json"))
        .arg("--products")
        .arg(fx.path("products.json"))
        .arg("--out")
        .arg(&predictions)
        .args(["--products-per-query", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved 6 predictions for 2 queries"));

    let preds = read_json(&predictions);
    assert_eq!(preds.as_array().unwrap().len(), 6);
    assert_eq!(preds[0]["query_id"], "q1");

    bin()
        .args(["submit", "--predictions"])
        .arg(&predictions)
        .arg("--out")
        .arg(&submission)
        .args(["--min-per-query", "3", "--output", "json"])
        .assert()
        .success();

    let rows = read_json(&submission);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 6);
    let q1_ranks: Vec<u64> = rows
        .iter()
        .filter(|r| r["query_id"] == "q1")
        .map(|r| r["rank"].as_u64().unwrap())
        .collect();
    assert_eq!(q1_ranks, vec![1, 2, 3]);
}

#[test]
fn submit_refuses_short_queries() {
    let fx = Fixture::new();
    let predictions = fx.path("predictions.json");
    let submission = fx.path("submission.json");
    fs::write(
        &predictions,
        json!([
            {"query_id": "q1", "product_id": "p1", "relevance": 3},
            {"query_id": "q1", "product_id": "p2", "relevance": 0}
        ])
        .to_string(),
    )
    .unwrap();

    bin()
        .args(["submit", "--predictions"])
        .arg(&predictions)
        .arg("--out")
        .arg(&submission)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed rank sequence"));
    assert!(!submission.exists());
}

#[test]
fn service_eval_with_offline_encoder() {
    let fx = Fixture::new();
    let assert = bin()
        .arg("service-eval")
        .args(fx.data_args())
        .args(["--all", "--ranker", "encoder:hashed:256", "--output", "json"])
        .assert()
        .success();

    let json = stdout_json(assert.get_output());
    assert_eq!(json["baseline"]["name"], "encoder:hashed:256");
    assert_eq!(json["baseline"]["queries_evaluated"], 2);
    assert_eq!(json["baseline"]["pairs_matched"], 6);
    assert!(json.get("candidate").is_none());
}

#[test]
fn service_eval_skips_unreachable_backend() {
    let fx = Fixture::new();
    let assert = bin()
        .arg("service-eval")
        .args(fx.data_args())
        .args([
            "--all",
            "--ranker",
            "backend:http://127.0.0.1:9#test_products",
            "--timeout",
            "500ms",
            "--output",
            "json",
        ])
        .assert()
        .success();

    let json = stdout_json(assert.get_output());
    assert_eq!(json["baseline"]["queries_evaluated"], 0);
    assert_eq!(json["baseline"]["skipped"].as_array().unwrap().len(), 2);
    assert!(json["baseline"]["result"]["spearman"].is_null());
}

#[test]
fn rejects_unknown_output_format() {
    let fx = Fixture::new();
    bin()
        .arg("evaluate")
        .args(fx.data_args())
        .args(["--output", "yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown output format"));
}

#[test]
fn config_file_overrides_defaults() {
    let fx = Fixture::new();
    let config = fx.path("relevance.toml");
    fs::write(&config, "[evaluation]\nndcg_k = 3\n").unwrap();

    let assert = bin()
        .arg("evaluate")
        .args(fx.data_args())
        .arg("--config")
        .arg(&config)
        .args(["--all", "--output", "json"])
        .assert()
        .success();
    assert_eq!(stdout_json(assert.get_output())["ndcg_k"], 3);
}

#[test]
fn missing_input_is_an_error() {
    bin()
        .args(["evaluate", "--queries", "/nonexistent/queries.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: command failed"));
}

#[test]
fn search_prints_ranked_products() {
    let fx = Fixture::new();
    let assert = bin()
        .arg("search")
        .arg("--products")
        .arg(fx.path("products.json"))
        .args(["--query", "tomato soup", "--encoder", "hashed:256", "--top-k", "2"])
        .args(["--output", "json"])
        .assert()
        .success();

    let json = stdout_json(assert.get_output());
    let hits = json["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["product_id"], "p1");
    assert_eq!(hits[0]["fields"]["brand"], "Campbell");

    bin()
        .arg("search")
        .arg("--products")
        .arg(fx.path("products.json"))
        .args(["--query", "tomato soup", "--top-k", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. [").and(predicate::str::contains("Tomato Soup")));
}

#[test]
fn exported_embeddings_feed_the_fixture_encoder() {
    let fx = Fixture::new();
    let table = fx.path("embeddings.json");
    let assert = bin()
        .arg("embed")
        .arg("--queries")
        .arg(fx.path("queries.json"))
        .arg("--products")
        .arg(fx.path("products.json"))
        .args(["--encoder", "hashed:128", "--output", "json", "--out"])
        .arg(&table)
        .assert()
        .success();
    let summary = stdout_json(assert.get_output());
    assert_eq!(summary["texts"], 5);
    assert_eq!(summary["dimension"], 128);

    let evaluate = |encoder: String| {
        let assert = bin()
            .arg("evaluate")
            .args(fx.data_args())
            .args(["--all", "--output", "json", "--encoder", encoder.as_str()])
            .assert()
            .success();
        stdout_json(assert.get_output())
    };
    let direct = evaluate("hashed:128".to_string());
    let replayed = evaluate(format!("fixture:{}", table.display()));
    assert_eq!(replayed["pairs_scored"], 6);
    assert_eq!(replayed["result"], direct["result"]);
}

#[test]
fn model_info_for_local_encoder() {
    let assert = bin()
        .args(["model-info", "--encoder", "hashed:64", "--output", "json"])
        .assert()
        .success();
    let json = stdout_json(assert.get_output());
    assert_eq!(json["model_name"], "hashed:64");
    assert_eq!(json["embedding_dimension"], 64);
}

#[test]
fn model_info_from_unreachable_service_fails() {
    bin()
        .args(["model-info", "--encoder", "http://127.0.0.1:9", "--timeout", "500ms"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("model-info"));
}

#[test]
fn respond_writes_rows_in_service_order() {
    let fx = Fixture::new();
    let out = fx.path("responses.json");
    bin()
        .arg("respond")
        .arg("--queries")
        .arg(fx.path("queries.json"))
        .arg("--products")
        .arg(fx.path("products.json"))
        .args(["--ranker", "encoder:hashed:256", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved 6 rows for 2 of 2 queries"));

    let rows = read_json(&out);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0]["query_id"], "q1");
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[0]["product_id"], "p1");
    assert_eq!(rows[3]["query_id"], "q2");
    assert_eq!(rows[3]["product_id"], "p2");
}

#[test]
fn service_eval_with_encoder_rerank() {
    let fx = Fixture::new();
    let assert = bin()
        .arg("service-eval")
        .args(fx.data_args())
        .args([
            "--all",
            "--ranker",
            "encoder:hashed:64",
            "--rerank-encoder",
            "hashed:256",
            "--output",
            "json",
        ])
        .assert()
        .success();

    let json = stdout_json(assert.get_output());
    assert_eq!(json["baseline"]["queries_evaluated"], 2);
    assert!(json["baseline"]["skipped"].as_array().unwrap().is_empty());
}
