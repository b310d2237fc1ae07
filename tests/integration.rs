use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[index]
path = "{root}/data/ragchat.sqlite"

[loader]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]

[chunking]
chunk_size = 500
chunk_overlap = 50

[embedding]
provider = "hash"
dims = 256

[generation]
provider = "disabled"

[retrieval]
mode = "vector"
top_k = 3

[memory]
persist = true
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ragchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn built_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragchat(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragchat(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ragchat.sqlite").is_file());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ragchat(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ragchat(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_build_indexes_all_documents() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragchat(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents indexed: 3"), "stdout={}", stdout);
    assert!(stdout.contains("ok"));
    assert!(!tmp.path().join("data/ragchat.sqlite.building").exists());
}

#[test]
fn test_build_after_init_still_builds() {
    let (_tmp, config_path) = setup_test_env();

    run_ragchat(&config_path, &["init"]);
    let (stdout, _, success) = run_ragchat(&config_path, &["build"]);
    assert!(success);
    assert!(stdout.contains("documents indexed: 3"), "stdout={}", stdout);
}

#[test]
fn test_build_skips_existing_index_unless_forced() {
    let (_tmp, config_path) = built_env();

    let (stdout, _, success) = run_ragchat(&config_path, &["build"]);
    assert!(success);
    assert!(stdout.contains("already exists"), "stdout={}", stdout);

    let (stdout, stderr, success) = run_ragchat(&config_path, &["build", "--force"]);
    assert!(success, "forced build failed: {}", stderr);
    assert!(stdout.contains("documents indexed: 3"));
}

#[test]
fn test_build_without_documents_fails() {
    let (tmp, config_path) = setup_test_env();
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        fs::remove_file(tmp.path().join("files").join(name)).unwrap();
    }

    let (_, stderr, success) = run_ragchat(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("no documents found"), "stderr={}", stderr);
    assert!(!tmp.path().join("data/ragchat.sqlite").exists());
}

#[test]
fn test_vector_search_finds_unique_terms() {
    let (_tmp, config_path) = built_env();

    let (stdout, stderr, success) =
        run_ragchat(&config_path, &["search", "kubernetes docker", "--mode", "vector"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. "), "stdout={}", stdout);
    assert!(first.contains("gamma.txt"), "stdout={}", stdout);
}

#[test]
fn test_hybrid_search_marks_provenance() {
    let (_tmp, config_path) = built_env();

    let (stdout, stderr, success) = run_ragchat(
        &config_path,
        &["search", "kubernetes docker", "--mode", "hybrid", "--limit", "2"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.contains("gamma.txt"), "stdout={}", stdout);
    assert!(stdout.contains("match: both"), "stdout={}", stdout);
    assert!(!stdout.contains("3. "), "limit not applied: {}", stdout);
}

#[test]
fn test_search_handles_punctuation() {
    let (_tmp, config_path) = built_env();

    let (stdout, stderr, success) = run_ragchat(
        &config_path,
        &["search", "\"rust\" AND (cargo) OR -crates*", "--mode", "hybrid"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("alpha.md"));
}

#[test]
fn test_invalid_mode_is_rejected() {
    let (_tmp, config_path) = built_env();

    let (_, stderr, success) =
        run_ragchat(&config_path, &["search", "anything", "--mode", "semantic"]);
    assert!(!success);
    assert!(stderr.contains("unknown retrieval mode"), "stderr={}", stderr);
}

#[test]
fn test_ask_before_build_reports_missing_index() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ragchat(&config_path, &["ask", "what is gamma?"]);
    assert!(!success);
    assert!(stderr.contains("No knowledge available"), "stderr={}", stderr);
}

#[test]
fn test_ask_with_disabled_generation_leaves_history_empty() {
    let (_tmp, config_path) = built_env();

    let (_, stderr, success) = run_ragchat(&config_path, &["ask", "what is kubernetes?"]);
    assert!(!success);
    assert!(stderr.contains("generation"), "stderr={}", stderr);

    let (stdout, stderr, success) = run_ragchat(&config_path, &["history"]);
    assert!(success, "history failed: {}", stderr);
    assert!(stdout.contains("No turns in session 'cli'"), "stdout={}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ragchat(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}
