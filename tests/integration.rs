use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn soc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("soc");
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
        files_dir.join("photosynthesis.md"),
        "# Photosynthesis\n\nPlants convert light energy into chemical energy.\n\nChlorophyll absorbs red and blue light.",
    )
    .unwrap();

    // The model stays disabled so no test touches the network.
    let config_content = format!(
        r#"[db]
path = "{}/data/soc.sqlite"

[chunking]
min_tokens = 50
max_tokens = 300

[model]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("soc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_soc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = soc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run soc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Add the fixture file as a document. Indexing fails with the model
/// disabled, but the document itself is created; returns its id.
fn add_document(config_path: &Path) -> (String, String) {
    let file = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files/photosynthesis.md");
    let (_, stderr, success) = run_soc(
        config_path,
        &[
            "document",
            "add",
            "--title",
            "Photosynthesis",
            file.to_str().unwrap(),
        ],
    );
    assert!(!success, "indexing should fail without a model");
    let id = stderr
        .lines()
        .find_map(|l| l.strip_prefix("Created document "))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_else(|| panic!("no document id in stderr: {}", stderr))
        .to_string();
    (id, stderr)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_soc(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/soc.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_soc(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_soc(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_soc(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_unknown_provider_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("\"disabled\"", "\"ollama\"");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_soc(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown model provider"));
}

#[test]
fn test_document_add_lists_every_reason() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);

    let (id, stderr) = add_document(&config_path);
    assert!(stderr.contains("language model is disabled"));
    assert!(stderr.contains("no chunks were embedded"));

    // The document exists but was never processed.
    let (stdout, stderr, success) = run_soc(&config_path, &["document", "show", &id]);
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("Photosynthesis"));
    assert!(stdout.contains("uploaded"));
    assert!(stdout.contains("chunks:         0"));
}

#[test]
fn test_unprocessed_document_cannot_be_summarized() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);
    let (id, _) = add_document(&config_path);

    let (_, stderr, success) = run_soc(&config_path, &["summarize", &id]);
    assert!(!success);
    assert!(stderr.contains("has not been processed"));

    let (stdout, _, success) = run_soc(&config_path, &["rubrics", "list", &id]);
    assert!(success);
    assert!(stdout.contains("No rubrics defined."));
}

#[test]
fn test_misconception_add_and_show() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);
    let (id, _) = add_document(&config_path);

    let (stdout, stderr, success) = run_soc(
        &config_path,
        &[
            "misconception",
            "add",
            &id,
            "--concept",
            "Energy",
            "--name",
            "Plants eat light",
            "--signal",
            "eat sunlight",
            "--followup",
            "Where does the mass of a tree come from?",
        ],
    );
    assert!(success, "misconception add failed: {}", stderr);
    assert!(stdout.contains("Added misconception pattern"));

    let (stdout, _, _) = run_soc(&config_path, &["--json", "document", "show", &id]);
    let overview: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(overview["misconceptions"][0]["name"], "Plants eat light");
    assert_eq!(
        overview["misconceptions"][0]["signal_phrases"][0],
        "eat sunlight"
    );
}

#[test]
fn test_say_without_model_returns_error_turn() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);
    let (id, _) = add_document(&config_path);

    let (stdout, stderr, success) = run_soc(&config_path, &["conversation", "start", &id]);
    assert!(success, "conversation start failed: {}", stderr);
    let conversation = stdout.trim().to_string();

    let (stdout, stderr, success) = run_soc(
        &config_path,
        &["say", &conversation, "Plants eat sunlight, right?"],
    );
    assert!(success, "say failed: {}", stderr);
    assert!(stdout.starts_with("I apologize, but I encountered an error"));
    assert!(stderr.contains("has not been processed"));

    let (_, stderr, success) = run_soc(&config_path, &["say", &conversation, "   "]);
    assert!(!success);
    assert!(stderr.contains("must not be blank"));
}

#[test]
fn test_evaluate_requires_rubrics() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);
    let (id, _) = add_document(&config_path);
    let (stdout, _, _) = run_soc(&config_path, &["conversation", "start", &id]);
    let conversation = stdout.trim().to_string();
    run_soc(&config_path, &["say", &conversation, "Light becomes sugar."]);

    let (_, stderr, success) = run_soc(&config_path, &["evaluate", &conversation]);
    assert!(!success);
    assert!(stderr.contains("no rubrics defined"));
}

#[test]
fn test_unknown_conversation_is_invalid_input() {
    let (_tmp, config_path) = setup_test_env();
    run_soc(&config_path, &["init"]);

    let (_, stderr, success) = run_soc(&config_path, &["evaluate", "does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("invalid input"));
    assert!(stderr.contains("does-not-exist"));

    let (_, stderr, success) =
        run_soc(&config_path, &["evaluate", "--force", "does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("invalid input"));
}
