//! Drives the `lens` binary against a throwaway config and database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lens_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lens"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/lens.sqlite"

[storage]
upload_dir = "{root}/data/uploads"

[cache]
dir = "{root}/data/cache"

[budget]
monthly_usd = 5.0

[server]
bind = "127.0.0.1:5731"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("lens.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lens(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lens_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lens binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn document_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("document: "))
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| panic!("no document id in output: {}", stdout))
}

fn submit_demo_bank(config_path: &Path) -> String {
    let (stdout, stderr, success) = run_lens(
        config_path,
        &[
            "submit",
            "--demo",
            "--company",
            "First Bank",
            "file",
            "annual-report.pdf",
        ],
    );
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: completed"), "stdout={}", stdout);
    document_id(&stdout)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_lens(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_lens(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_lens(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_lens(&tmp.path().join("nope.toml"), &["usage"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_demo_submit_prints_financial_insights() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);

    let (stdout, _, success) = run_lens(
        &config_path,
        &["submit", "--demo", "--company", "First Bank", "url", "https://bank.example/ar"],
    );
    assert!(success);
    assert!(stdout.contains("status: completed"));
    assert!(stdout.contains("== Business Summary"));
    assert!(stdout.contains("This bank provides"));
}

#[test]
fn test_status_and_insights_after_submit() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);
    let id = submit_demo_bank(&config_path);

    let (stdout, stderr, success) = run_lens(&config_path, &["status", &id]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("\"status\": \"completed\""));

    let (stdout, _, success) = run_lens(&config_path, &["insights", &id]);
    assert!(success);
    let insights: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let categories: Vec<&str> = insights
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["category"].as_str().unwrap())
        .collect();
    assert!(categories.contains(&"business_summary"));
    assert!(categories.contains(&"moat"));
}

#[test]
fn test_cancel_completed_job_is_refused() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);
    let id = submit_demo_bank(&config_path);

    let (stdout, _, success) = run_lens(&config_path, &["cancel", &id]);
    assert!(success);
    assert!(stdout.contains("Cannot cancel"));
    assert!(stdout.contains("completed"));
}

#[test]
fn test_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);

    let (_, stderr, success) = run_lens(&config_path, &["status", "does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr={}", stderr);
}

#[test]
fn test_regenerate_unknown_category_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);
    let id = submit_demo_bank(&config_path);

    let (_, stderr, success) = run_lens(&config_path, &["regenerate", &id, "horoscope"]);
    assert!(!success);
    assert!(stderr.contains("horoscope"), "stderr={}", stderr);
}

#[test]
fn test_usage_reports_budget() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);

    let (stdout, stderr, success) = run_lens(&config_path, &["usage"]);
    assert!(success, "usage failed: {}", stderr);
    let usage: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(usage["total_requests"], 0);
    assert_eq!(usage["budget"]["monthly_budget"], 5.0);
    assert_eq!(usage["budget"]["within_budget"], true);
}

#[test]
fn test_cache_stats_and_cleanup() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);

    let (stdout, stderr, success) = run_lens(&config_path, &["cache", "stats"]);
    assert!(success, "cache stats failed: {}", stderr);
    assert!(serde_json::from_str::<serde_json::Value>(&stdout).is_ok());

    let (stdout, _, success) = run_lens(&config_path, &["cache", "cleanup", "--max-age-days", "1"]);
    assert!(success);
    assert!(stdout.contains("Removed 0 cache entries."));
}

#[test]
fn test_local_submit_of_missing_file_fails_job() {
    let (tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);
    let missing = tmp.path().join("missing.pdf");

    let (stdout, _, success) = run_lens(
        &config_path,
        &["submit", "--local", "file", missing.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("status: failed"), "stdout={}", stdout);
    assert!(stdout.contains("error: "));
}

#[test]
fn test_compare_requires_two_ids_and_a_backend() {
    let (_tmp, config_path) = setup_test_env();
    run_lens(&config_path, &["init"]);
    let first = submit_demo_bank(&config_path);
    let second = submit_demo_bank(&config_path);

    let (_, _, success) = run_lens(&config_path, &["compare", &first]);
    assert!(!success);

    let (_, stderr, success) = run_lens(&config_path, &["compare", &first, &second]);
    assert!(!success);
    assert!(stderr.contains("comparisons need a primary or secondary backend"), "stderr={}", stderr);
}
