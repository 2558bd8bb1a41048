use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tcr_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tcr");
    path
}

fn write_case(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

fn setup_test_env(provider: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let cases_dir = root.join("test_cases");
    fs::create_dir_all(&cases_dir).unwrap();
    write_case(
        &cases_dir,
        "push_token.json",
        r#"{
            "id": "TC-A",
            "title": "Push token refresh",
            "priority": "High",
            "preconditions": ["User is logged in", "Notifications are enabled"],
            "steps": [
                {"step_text": "Rotate the push token", "step_expected": "New token is stored"}
            ],
            "tags": ["notifications"]
        }"#,
    );
    write_case(
        &cases_dir,
        "cancellation.json",
        r#"{
            "id": "TC-B",
            "title": "Booking cancellation window",
            "priority": "Medium",
            "preconditions": "A booking exists",
            "steps": [
                {"step_text": "Cancel inside the window", "step_expected": "Refund issued"}
            ]
        }"#,
    );
    write_case(
        &cases_dir,
        "invoice.json",
        r#"{
            "id": "TC-C",
            "title": "Invoice export",
            "priority": "Low",
            "steps": ["Export invoices as spreadsheet"]
        }"#,
    );

    let config_content = format!(
        r#"[db]
path = "{root}/data/tcr.sqlite"

[corpus]
root = "{root}/test_cases"

[retrieval]
min_threshold = 0.1
top_k = 5

[embedding]
provider = "{provider}"
dims = 64
"#,
        root = root.display(),
        provider = provider,
    );

    let config_path = config_dir.join("tcr.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tcr(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tcr_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tcr binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn retrieve_json(config_path: &Path, text: &str) -> serde_json::Value {
    let (stdout, stderr, success) = run_tcr(config_path, &["retrieve", text, "--json"]);
    assert!(success, "retrieve failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("hash");

    let (stdout, stderr, success) = run_tcr(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/tcr.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("hash");

    let (_, _, success1) = run_tcr(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tcr(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_index_reports_corpus() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    let (stdout, stderr, success) = run_tcr(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("embedded: 3"));
}

#[test]
fn test_index_sees_new_files() {
    let (tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    run_tcr(&config_path, &["index"]);

    write_case(
        &tmp.path().join("test_cases"),
        "login.json",
        r#"{"id": "TC-D", "title": "Login with SSO", "priority": "Critical"}"#,
    );
    let (stdout, _, success) = run_tcr(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("documents: 4"), "got: {}", stdout);
}

#[test]
fn test_retrieve_push_token_scenario() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    let out = retrieve_json(&config_path, "push notification token refresh");

    let matches = out["matches"].as_array().unwrap();
    assert!(!matches.is_empty());
    assert_eq!(matches[0]["test_case_id"], "TC-A");
    assert_eq!(matches[0]["rank"], 1);
    assert!(out["notes"].as_array().unwrap().is_empty());

    let keyword_a = matches[0]["keyword_score"].as_f64().unwrap();
    let keyword_b = matches
        .iter()
        .find(|m| m["test_case_id"] == "TC-B")
        .map(|m| m["keyword_score"].as_f64().unwrap())
        .unwrap_or(0.0);
    assert!(keyword_a > keyword_b);
    assert_eq!(keyword_b, 0.0);
}

#[test]
fn test_retrieve_deterministic() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    let (stdout1, _, _) = run_tcr(&config_path, &["retrieve", "cancel booking refund"]);
    let (stdout2, _, _) = run_tcr(&config_path, &["retrieve", "cancel booking refund"]);
    assert_eq!(stdout1, stdout2);
    assert!(stdout1.starts_with("1. ["), "got: {}", stdout1);
    assert!(stdout1.lines().next().unwrap().contains("TC-B"));
}

#[test]
fn test_retrieve_empty_query() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    let (stdout, stderr, success) = run_tcr(&config_path, &["retrieve", ""]);
    assert!(success, "empty retrieve failed: {}", stderr);
    assert!(stdout.contains("No results."));
    assert!(stdout.contains("no searchable terms"));
}

#[test]
fn test_retrieve_degrades_without_provider() {
    let (_tmp, config_path) = setup_test_env("disabled");

    run_tcr(&config_path, &["init"]);
    let out = retrieve_json(&config_path, "push notification token refresh");

    assert_eq!(out["notes"][0]["kind"], "semantic_degraded");
    let matches = out["matches"].as_array().unwrap();
    assert_eq!(matches[0]["test_case_id"], "TC-A");
    assert!(matches.iter().all(|m| m["semantic_score"] == 0.0));
}

#[test]
fn test_retrieve_top_k_flag() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    let (stdout, _, success) = run_tcr(
        &config_path,
        &["retrieve", "push token", "--top-k", "1", "--change-type", "bug_fix"],
    );
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_cache_stats_and_reset() {
    let (_tmp, config_path) = setup_test_env("hash");

    run_tcr(&config_path, &["init"]);
    run_tcr(&config_path, &["index"]);

    let (stdout, _, success) = run_tcr(&config_path, &["cache", "stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["total_records"], 3);
    assert_eq!(stats["stale_records"], 0);
    assert_eq!(stats["current_model_version"], "hash:feature-hash-v1:64");

    let (stdout, _, success) = run_tcr(&config_path, &["cache", "reset"]);
    assert!(success);
    assert!(stdout.contains("records removed: 3"));

    let (stdout, _, _) = run_tcr(&config_path, &["cache", "stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["total_records"], 0);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, config_path) = setup_test_env("hash");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/tcr.sqlite\"\n\n[retrieval]\nmin_threshold = 2.0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_tcr(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("min_threshold"), "got: {}", stderr);
}
