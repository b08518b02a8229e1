//! End-to-end tests that drive the compiled binary against a temporary
//! memory layout. The embedding provider is pinned to `mock`, so the
//! whole suite runs offline.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn memstack_binary() -> PathBuf {
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps/
    path.pop(); // debug/
    path.push("memstack");
    path
}

struct TestEnv {
    dir: TempDir,
    config: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("memory/sessions")).expect("sessions dir");
        std::fs::create_dir_all(root.join("memory/plans")).expect("plans dir");

        let config = root.join("memstack.toml");
        std::fs::write(
            &config,
            format!(
                r#"
[memory]
root = "{root}/memory"

[db]
path = "{root}/db/memstack.sqlite"

[vector]
backend = "sqlite"
path = "{root}/vectors"

[embedding]
provider = "mock"
"#,
                root = root.display()
            ),
        )
        .expect("write config");

        Self { dir, config }
    }

    fn write_session(&self, name: &str, content: &str) {
        std::fs::write(
            self.dir.path().join("memory/sessions").join(name),
            content,
        )
        .expect("write session file");
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("db/memstack.sqlite")
    }
}

fn run(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(memstack_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run memstack");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn run_json(config: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, ok) = run(config, args);
    assert!(ok, "command {:?} failed: {} {}", args, stdout, stderr);
    serde_json::from_str(&stdout).expect("JSON output")
}

#[test]
fn test_init_creates_db_and_is_idempotent() {
    let env = TestEnv::new();
    let payload = run_json(&env.config, &["init"]);
    assert_eq!(payload["ok"], true);
    assert!(env.db_path().exists());

    let payload = run_json(&env.config, &["init"]);
    assert_eq!(payload["ok"], true);
}

#[test]
fn test_session_add_and_list() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    let payload = run_json(
        &env.config,
        &[
            "session",
            "add",
            r#"{"project": "demo", "date": "2026-03-01", "accomplished": "Shipped the parser"}"#,
        ],
    );
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["id"], 1);

    let payload = run_json(&env.config, &["session", "list", "--project", "demo"]);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["sessions"][0]["accomplished"], "Shipped the parser");
}

#[test]
fn test_session_add_requires_project() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    let (_, stderr, ok) = run(&env.config, &["session", "add", r#"{"date": "2026-03-01"}"#]);
    assert!(!ok);
    assert!(stderr.contains("project"));
}

#[test]
fn test_insight_add_and_list() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    run_json(
        &env.config,
        &[
            "insight",
            "add",
            r#"{"project": "demo", "content": "Keep migrations idempotent"}"#,
        ],
    );

    let payload = run_json(&env.config, &["insight", "list"]);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["insights"][0]["type"], "decision");
}

#[test]
fn test_find_matches_sessions() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);
    run_json(
        &env.config,
        &[
            "session",
            "add",
            r#"{"project": "demo", "date": "2026-03-01", "accomplished": "Rewrote the chunker"}"#,
        ],
    );

    let payload = run_json(&env.config, &["find", "chunker"]);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["results"][0]["type"], "session");
}

#[test]
fn test_context_set_is_a_merge_patch() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    run_json(
        &env.config,
        &[
            "context",
            "set",
            r#"{"project": "demo", "status": "active", "current_branch": "main"}"#,
        ],
    );
    run_json(
        &env.config,
        &[
            "context",
            "set",
            r#"{"project": "demo", "known_issues": "flaky test"}"#,
        ],
    );

    let payload = run_json(&env.config, &["context", "get", "demo"]);
    assert_eq!(payload["status"], "active");
    assert_eq!(payload["current_branch"], "main");
    assert_eq!(payload["known_issues"], "flaky test");
}

#[test]
fn test_context_get_without_row() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);
    let payload = run_json(&env.config, &["context", "get", "ghost"]);
    assert_eq!(payload["status"], "no context saved");
}

#[test]
fn test_plan_add_show_update() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    run_json(
        &env.config,
        &[
            "plan",
            "add",
            r#"{"project": "demo", "task_number": 1, "description": "Write the schema"}"#,
        ],
    );
    run_json(
        &env.config,
        &[
            "plan",
            "add",
            r#"{"project": "demo", "task_number": 2, "description": "Wire the CLI"}"#,
        ],
    );

    run_json(
        &env.config,
        &["plan", "update", "demo", "1", r#"{"status": "done"}"#],
    );

    let payload = run_json(&env.config, &["plan", "show", "demo"]);
    assert_eq!(payload["total"], 2);
    assert_eq!(payload["done"], 1);
    assert_eq!(payload["tasks"][0]["status"], "done");
}

#[test]
fn test_plan_update_missing_task_fails() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);

    let (_, stderr, ok) = run(
        &env.config,
        &["plan", "update", "demo", "9", r#"{"status": "done"}"#],
    );
    assert!(!ok);
    assert!(stderr.contains("Task not found"));
}

#[test]
fn test_export_renders_markdown() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);
    run_json(
        &env.config,
        &[
            "session",
            "add",
            r#"{"project": "demo", "date": "2026-03-01", "accomplished": "Shipped it"}"#,
        ],
    );

    let (stdout, _, ok) = run(&env.config, &["export", "demo"]);
    assert!(ok);
    assert!(stdout.starts_with("# Memory Export: demo"));
    assert!(stdout.contains("### 2026-03-01"));
}

#[test]
fn test_stats() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);
    run_json(
        &env.config,
        &[
            "session",
            "add",
            r#"{"project": "demo", "date": "2026-03-01", "accomplished": "x"}"#,
        ],
    );

    let payload = run_json(&env.config, &["stats"]);
    assert_eq!(payload["sessions"], 1);
    assert_eq!(payload["sessions_by_project"]["demo"], 1);
}

#[test]
fn test_migrate_imports_and_skips_on_rerun() {
    let env = TestEnv::new();
    run_json(&env.config, &["init"]);
    env.write_session(
        "2026-03-01-demo.md",
        "## Accomplished\nWrote the migration tooling.\n\n## Decisions\n- Keep the importer idempotent\n",
    );
    env.write_session("session-format.md", "## Accomplished\ntemplate text here\n");

    let payload = run_json(&env.config, &["migrate"]);
    assert_eq!(payload["sessions_imported"], 1);
    assert_eq!(payload["insights_extracted"], 1);

    let payload = run_json(&env.config, &["migrate"]);
    assert_eq!(payload["sessions_imported"], 0);
    assert_eq!(payload["skipped"], 1);
}

#[test]
fn test_migrate_without_init_fails() {
    let env = TestEnv::new();
    let (_, stderr, ok) = run(&env.config, &["migrate"]);
    assert!(!ok);
    assert!(stderr.contains("memstack init"));
}

#[test]
fn test_index_then_search_end_to_end() {
    let env = TestEnv::new();
    env.write_session(
        "2026-02-19-docstack.md",
        "## Accomplished\nBuilt the ingestion pipeline.\n",
    );

    let payload = run_json(&env.config, &["index"]);
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["chunks_indexed"], 1);
    assert_eq!(payload["embedding"], "mock");

    // Unchanged corpus: nothing new to embed.
    let payload = run_json(&env.config, &["index"]);
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["chunks_indexed"], 0);
    assert_eq!(payload["message"], "All chunks already indexed");

    // Force rebuild re-embeds everything.
    let payload = run_json(&env.config, &["index", "--force"]);
    assert_eq!(payload["chunks_indexed"], 1);

    // --json emits the raw result array.
    let results = run_json(&env.config, &["search", "pipeline", "--json"]);
    let results = results.as_array().expect("result array");
    assert_eq!(results.len(), 1);
    let top = &results[0];
    assert_eq!(top["project"], "docstack");
    assert_eq!(top["date"], "2026-02-19");
    assert_eq!(top["type"], "session");
    assert_eq!(top["section_title"], "Accomplished");
    assert!(top["score"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_search_before_index_fails() {
    let env = TestEnv::new();
    let (_, stderr, ok) = run(&env.config, &["search", "anything"]);
    assert!(!ok);
    assert!(stderr.contains("memstack index"));
}

#[test]
fn test_index_empty_corpus() {
    let env = TestEnv::new();
    let payload = run_json(&env.config, &["index"]);
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["chunks_indexed"], 0);
    assert_eq!(payload["message"], "No memory files found");
}
