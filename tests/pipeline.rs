//! End-to-end tests driving the compiled `alcove` binary.
//!
//! Each test gets a fresh temp data root and a config using the hashing
//! embedder and the disabled LLM client, so the full pipeline (ingestion,
//! extraction, indexing, retrieval, grounded answering, persistence across
//! process restarts) runs without any network.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn alcove_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("alcove");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
data_root = "{}/data"

[index]
dims = 128

[embedding]
provider = "hashing"

[llm]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("alcove.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_alcove(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = alcove_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run alcove binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Create a space and return its id (first token of the create output).
fn create_space(config_path: &Path, name: &str) -> String {
    let (stdout, stderr, success) = run_alcove(config_path, &["space", "create", name]);
    assert!(success, "space create failed: {} {}", stdout, stderr);
    stdout.split_whitespace().next().unwrap().to_string()
}

#[test]
fn test_init_creates_layout() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_alcove(&config_path, &["init"]);
    assert!(success, "init failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Initialized"));
    assert!(tmp.path().join("data/default/kb.sqlite").exists());

    // Idempotent.
    let (_, _, success2) = run_alcove(&config_path, &["init"]);
    assert!(success2);
}

#[test]
fn test_space_lifecycle() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);

    let space_id = create_space(&config_path, "Goa trip");

    let (stdout, _, _) = run_alcove(&config_path, &["space", "list"]);
    assert!(stdout.contains("Goa trip"));
    assert!(stdout.contains("(0 items)"));

    let (stdout, _, success) = run_alcove(
        &config_path,
        &["space", "update", &space_id, "--name", "Goa December"],
    );
    assert!(success, "update failed: {}", stdout);
    assert!(stdout.contains("Goa December"));

    let (_, _, success) = run_alcove(&config_path, &["space", "delete", &space_id]);
    assert!(success);

    let (stdout, _, _) = run_alcove(&config_path, &["space", "list"]);
    assert!(stdout.contains("No spaces."));
}

#[test]
fn test_ask_returns_the_relevant_source() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Trip");

    let (m1_out, _, success) = run_alcove(
        &config_path,
        &[
            "save",
            "message",
            &space_id,
            "The Airbnb in Goa cost 18500 for Dec 20-27",
        ],
    );
    assert!(success, "save failed: {}", m1_out);
    let m1_id = m1_out.split_whitespace().next().unwrap().to_string();

    run_alcove(&config_path, &["save", "message", &space_id, "Flight arrives 2pm"]);
    run_alcove(
        &config_path,
        &["save", "message", &space_id, "Raj drives from airport"],
    );

    let (stdout, stderr, success) = run_alcove(
        &config_path,
        &["ask", &space_id, "how much was the airbnb"],
    );
    assert!(success, "ask failed: {} {}", stdout, stderr);

    // The top source is the Airbnb message and the answer carries the price.
    assert!(stdout.contains("source 1:"), "no sources: {}", stdout);
    let source_line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("source 1:"))
        .unwrap();
    assert!(source_line.contains(&m1_id), "wrong top source: {}", stdout);
    assert!(stdout.contains("18500"), "answer missing the price: {}", stdout);

    // The query landed in history.
    let (history, _, _) = run_alcove(&config_path, &["history", &space_id]);
    assert!(history.contains("how much was the airbnb"));
}

#[test]
fn test_large_text_file_truncates_cleanly() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Files");

    // Exactly 10,001 characters of "a".
    let file_path = tmp.path().join("big.txt");
    fs::write(&file_path, "a".repeat(10_001)).unwrap();

    let (stdout, stderr, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, file_path.to_str().unwrap()],
    );
    assert!(success, "save file failed: {} {}", stdout, stderr);
    assert!(stdout.contains("[ready]"));

    let (stdout, stderr, success) = run_alcove(
        &config_path,
        &["ask", &space_id, "what is in the file"],
    );
    assert!(success, "ask failed: {} {}", stdout, stderr);
    // Persisted source snippets are display-truncated; no crash on the cut.
    assert!(stdout.contains("source 1:"));
}

#[test]
fn test_oversized_file_rejected_without_trace() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Files");

    let file_path = tmp.path().join("huge.pdf");
    fs::write(&file_path, vec![b'x'; 15 * 1024 * 1024]).unwrap();

    let (stdout, stderr, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, file_path.to_str().unwrap()],
    );
    assert!(!success, "oversized save should fail: {}", stdout);
    assert!(stderr.contains("too-large"), "unexpected error: {}", stderr);

    // No item inserted, no bytes on disk.
    let (items, _, _) = run_alcove(&config_path, &["items", &space_id]);
    assert!(items.contains("No items."));
    assert!(!tmp
        .path()
        .join("data/default/files")
        .join(&space_id)
        .exists());
}

#[test]
fn test_corrupt_file_marked_failed() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Files");

    let file_path = tmp.path().join("broken.pdf");
    fs::write(&file_path, b"this is not a pdf at all").unwrap();

    let (stdout, _, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, file_path.to_str().unwrap()],
    );
    assert!(success, "save should succeed with a failed item: {}", stdout);
    assert!(stdout.contains("[failed]"));
    assert!(stdout.contains("corrupt"));
}

#[test]
fn test_deleted_item_leaves_search_results() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Trip");

    let (m1_out, _, _) = run_alcove(
        &config_path,
        &["save", "message", &space_id, "unique pelican sighting"],
    );
    let m1_id = m1_out.split_whitespace().next().unwrap().to_string();
    run_alcove(&config_path, &["save", "message", &space_id, "other note"]);

    let (before, _, _) = run_alcove(
        &config_path,
        &["search", &space_id, "unique pelican sighting"],
    );
    assert!(before.contains(&m1_id));

    let (_, _, success) = run_alcove(&config_path, &["delete", &space_id, &m1_id]);
    assert!(success);

    let (after, stderr, success) = run_alcove(
        &config_path,
        &["search", &space_id, "unique pelican sighting"],
    );
    assert!(success, "search after delete failed: {}", stderr);
    assert!(!after.contains(&m1_id), "tombstone leaked: {}", after);
}

#[test]
fn test_search_results_survive_restart() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Trip");

    for text in [
        "The Airbnb in Goa cost 18500",
        "Flight arrives 2pm",
        "Raj drives from airport",
    ] {
        run_alcove(&config_path, &["save", "message", &space_id, text]);
    }

    // Every CLI invocation is its own process; identical results across
    // runs mean the snapshot round-trips exactly.
    let (first, _, _) = run_alcove(&config_path, &["search", &space_id, "airbnb cost"]);
    let (second, _, _) = run_alcove(&config_path, &["search", &space_id, "airbnb cost"]);
    assert_eq!(first, second);
    assert!(first.contains("Airbnb"));
}

#[test]
fn test_global_search_spans_spaces() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let trip = create_space(&config_path, "Trip");
    let recipes = create_space(&config_path, "Recipes");

    run_alcove(&config_path, &["save", "message", &trip, "hotel booking paid"]);
    run_alcove(
        &config_path,
        &["save", "message", &recipes, "hotel style pancakes"],
    );

    let (scoped, _, _) = run_alcove(&config_path, &["search", &trip, "hotel"]);
    assert!(scoped.contains(&trip));
    assert!(!scoped.contains(&recipes));

    let (global, _, _) = run_alcove(&config_path, &["search-all", "hotel"]);
    assert!(global.contains(&trip));
    assert!(global.contains(&recipes));
}

#[test]
fn test_ask_empty_space_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Blank");

    let (stdout, stderr, success) = run_alcove(&config_path, &["ask", &space_id, "anything?"]);
    assert!(!success, "ask on empty space should fail: {}", stdout);
    assert!(stderr.contains("no ready items"), "unexpected error: {}", stderr);
}

#[test]
fn test_admin_reindex_keeps_answers_working() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Trip");

    run_alcove(
        &config_path,
        &["save", "message", &space_id, "The Airbnb in Goa cost 18500"],
    );

    let (stdout, stderr, success) = run_alcove(&config_path, &["admin", "reindex"]);
    assert!(success, "reindex failed: {} {}", stdout, stderr);
    assert!(stdout.contains("items re-embedded: 1"));

    let (stdout, _, success) = run_alcove(&config_path, &["search", &space_id, "airbnb"]);
    assert!(success);
    assert!(stdout.contains("Airbnb"));
}

#[test]
fn test_users_are_isolated() {
    let (tmp, config_path) = setup_test_env();

    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Mine");
    run_alcove(&config_path, &["save", "message", &space_id, "private note"]);

    // A different user sees nothing and gets their own directory.
    let (stdout, _, success) = run_alcove(&config_path, &["--user", "bob", "space", "list"]);
    assert!(success);
    assert!(stdout.contains("No spaces."));
    assert!(tmp.path().join("data/bob/kb.sqlite").exists());
}
