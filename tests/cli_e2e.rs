#![cfg(feature = "cli")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::tempdir;

fn run_cli(args: &[&str]) -> Output {
    Command::new(PathBuf::from(env!("CARGO_BIN_EXE_mutant-sieve")))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("mutant-sieve should launch")
}

fn stdout_of(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).expect("fixture should be written");
    path.to_string_lossy().into_owned()
}

fn result_json(id: &str, status: &str) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "file_name": "src/a.ts",
            "location": {{"start": {{"line": 3, "column": 4}}, "end": {{"line": 3, "column": 9}}}},
            "mutator_name": "ArithmeticOperator",
            "replacement": "a - b",
            "status": "{status}"
        }}"#
    )
}

#[test]
fn groups_follow_the_manifest() {
    let tmp = tempdir().expect("tempdir should be created");
    let mutants = write(
        tmp.path(),
        "mutants.json",
        r#"[
            {"id": "1", "file_name": "src/a.ts"},
            {"id": "2", "file_name": "src/b.ts"},
            {"id": "3", "file_name": "src/c.ts"}
        ]"#,
    );
    let manifest = write(
        tmp.path(),
        "deps.json",
        r#"{"src/a.ts": ["src/b.ts"], "src/b.ts": [], "src/c.ts": []}"#,
    );

    let stdout = stdout_of(&run_cli(&["groups", "--mutants", &mutants, "--manifest", &manifest]));
    let groups: Vec<Vec<String>> = serde_json::from_str(&stdout).expect("groups should be JSON");
    assert_eq!(groups, vec![vec!["1", "3"], vec!["2"]]);
}

#[test]
fn groups_read_imports_from_disk_without_a_manifest() {
    let tmp = tempdir().expect("tempdir should be created");
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).expect("src dir should be created");
    write(&src, "a.ts", "import { b } from './b';\nexport const a = b + 1;\n");
    write(&src, "b.ts", "export const b = 1;\n");

    let a = src.join("a.ts").to_string_lossy().into_owned();
    let b = src.join("b.ts").to_string_lossy().into_owned();
    let mutants = write(
        tmp.path(),
        "mutants.json",
        &serde_json::json!([
            {"id": "1", "file_name": a},
            {"id": "2", "file_name": b},
        ])
        .to_string(),
    );

    let stdout = stdout_of(&run_cli(&["groups", "--mutants", &mutants]));
    let groups: Vec<Vec<String>> = serde_json::from_str(&stdout).expect("groups should be JSON");
    assert_eq!(groups, vec![vec!["1"], vec!["2"]]);
}

#[test]
fn summary_renders_markdown_and_json() {
    let tmp = tempdir().expect("tempdir should be created");
    let results = write(
        tmp.path(),
        "results.json",
        &format!(
            "[{}, {}, {}]",
            result_json("1", "killed"),
            result_json("2", "survived"),
            result_json("3", "compile_error")
        ),
    );

    let markdown = stdout_of(&run_cli(&["summary", "--results", &results, "--format", "md"]));
    assert!(markdown.contains("| killed | 1 |"));
    assert!(markdown.contains("| compile error | 1 |"));
    assert!(markdown.contains("| mutation score | 50.00% |"));
    assert!(markdown.contains("## Undetected mutants"));
    assert!(markdown.contains("`2` src/a.ts:3:4 ArithmeticOperator (survived)"));

    let json = stdout_of(&run_cli(&["summary", "--results", &results, "--format", "json"]));
    let report: serde_json::Value = serde_json::from_str(&json).expect("report should be JSON");
    assert_eq!(report["summary"]["total"], 3);
    assert_eq!(report["summary"]["killed"], 1);
    assert_eq!(report["mutants"].as_array().map(Vec::len), Some(3));
}

#[test]
fn budget_splits_workers_between_pools() {
    let tmp = tempdir().expect("tempdir should be created");
    let config = write(tmp.path(), "config.json", r#"{"checkers": ["typescript"]}"#);

    let with_checkers = stdout_of(&run_cli(&["budget", "--config", &config, "--concurrency", "5"]));
    assert_eq!(with_checkers, "total: 5\ncheckers: 3\ntest runners: 2\n");

    let without_checkers = stdout_of(&run_cli(&["budget", "--concurrency", "5"]));
    assert_eq!(without_checkers, "total: 5\ncheckers: 0\ntest runners: 5\n");
}

#[test]
fn unreadable_input_fails_with_context() {
    let tmp = tempdir().expect("tempdir should be created");
    let missing = tmp.path().join("absent.json");
    let output = run_cli(&["summary", "--results", &missing.to_string_lossy()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.json"));
}
