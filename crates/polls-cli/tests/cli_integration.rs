use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const NOW: &str = "2026-03-01T12:00:00Z";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_polls<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_polls"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute polls binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_polls(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "polls command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, pointer: &str) -> i64 {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{pointer}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{pointer}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn listed_texts(value: &Value) -> Vec<&str> {
    value
        .get("latest_question_list")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing latest_question_list in payload: {value}"))
        .iter()
        .filter_map(|item| item.get("question_text").and_then(Value::as_str))
        .collect()
}

fn add_question(db: &str, text: &str, pub_date: &str, choices: &[&str]) -> Value {
    let mut args = vec!["--db", db, "question", "add", "--text", text, "--pub-date", pub_date];
    for choice in choices {
        args.push("--choice");
        args.push(choice);
    }
    run_json(args)
}

#[test]
fn migrate_reports_schema_and_contract_version() {
    let dir = unique_temp_dir("polls-cli-migrate");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let dry_run = run_json(["--db", db, "db", "migrate", "--dry-run"]);
    assert_eq!(as_str(&dry_run, "/contract_version"), "cli.v1");
    assert_eq!(dry_run.get("dry_run").and_then(Value::as_bool), Some(true));

    run_json(["--db", db, "db", "migrate"]);
    let status = run_json(["--db", db, "db", "schema-version"]);
    assert_eq!(as_i64(&status, "/current_version"), as_i64(&status, "/target_version"));
    assert_eq!(status.get("up_to_date").and_then(Value::as_bool), Some(true));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn list_shows_only_past_questions_newest_first() {
    let dir = unique_temp_dir("polls-cli-list");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    add_question(db, "Past question 1.", "2026-01-30T12:00:00Z", &[]);
    add_question(db, "Past question 2.", "2026-02-24T12:00:00Z", &[]);
    add_question(db, "Future question.", "2026-03-31T12:00:00Z", &[]);

    let listing = run_json(["--db", db, "question", "list", "--now", NOW]);
    assert_eq!(listed_texts(&listing), vec!["Past question 2.", "Past question 1."]);

    let limited = run_json(["--db", db, "question", "list", "--now", NOW, "--limit", "1"]);
    assert_eq!(listed_texts(&limited), vec!["Past question 2."]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn show_future_question_fails_with_not_found() {
    let dir = unique_temp_dir("polls-cli-show");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let future = add_question(db, "Future question.", "2026-03-06T12:00:00Z", &["Yes"]);
    let id = as_i64(&future, "/question/id").to_string();

    let hidden = run_polls(["--db", db, "question", "show", "--id", &id, "--now", NOW]);
    assert!(!hidden.status.success());
    let stderr = String::from_utf8_lossy(&hidden.stderr);
    assert!(stderr.contains(&format!("question not found: {id}")), "stderr was: {stderr}");

    let later = run_json(["--db", db, "question", "show", "--id", &id, "--now", "2026-03-07T00:00:00Z"]);
    assert_eq!(as_str(&later, "/question/question_text"), "Future question.");
    assert_eq!(as_str(&later, "/choices/0/choice_text"), "Yes");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn choice_add_and_vote_update_results() {
    let dir = unique_temp_dir("polls-cli-vote");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let created = add_question(db, "What's up?", "2026-02-28T12:00:00Z", &["Not much"]);
    let question_id = as_i64(&created, "/question/id").to_string();

    let choice = run_json(["--db", db, "choice", "add", "--question-id", &question_id, "--text", "The sky"]);
    let choice_id = as_i64(&choice, "/id").to_string();

    for _ in 0..2 {
        run_json([
            "--db",
            db,
            "vote",
            "--question-id",
            &question_id,
            "--choice-id",
            &choice_id,
            "--now",
            NOW,
        ]);
    }

    let results = run_json(["--db", db, "question", "results", "--id", &question_id, "--now", NOW]);
    assert_eq!(as_i64(&results, "/total_votes"), 2);
    assert_eq!(as_i64(&results, "/choices/0/votes"), 0);
    assert_eq!(as_i64(&results, "/choices/1/votes"), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn vote_for_foreign_choice_is_rejected() {
    let dir = unique_temp_dir("polls-cli-foreign");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let first = add_question(db, "First?", "2026-02-28T12:00:00Z", &["A"]);
    let second = add_question(db, "Second?", "2026-02-28T12:00:00Z", &["B"]);
    let first_id = as_i64(&first, "/question/id").to_string();
    let foreign_choice = as_i64(&second, "/choices/0/id").to_string();

    let output = run_polls([
        "--db",
        db,
        "vote",
        "--question-id",
        &first_id,
        "--choice-id",
        &foreign_choice,
        "--now",
        NOW,
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("You didn't select a choice."));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn delete_removes_question_and_reports_missing() {
    let dir = unique_temp_dir("polls-cli-delete");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let created = add_question(db, "Temporary?", "2026-02-28T12:00:00Z", &["Yes"]);
    let id = as_i64(&created, "/question/id").to_string();

    let deleted = run_json(["--db", db, "question", "delete", "--id", &id]);
    assert_eq!(deleted.get("deleted").and_then(Value::as_bool), Some(true));

    let again = run_json(["--db", db, "question", "delete", "--id", &id]);
    assert_eq!(again.get("deleted").and_then(Value::as_bool), Some(false));

    let listing = run_json(["--db", db, "question", "list", "--now", NOW]);
    assert!(listed_texts(&listing).is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn blank_question_text_is_rejected() {
    let dir = unique_temp_dir("polls-cli-blank");
    let db = dir.join("polls.sqlite3");
    let db = path_str(&db);

    let output = run_polls(["--db", db, "question", "add", "--text", "   "]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("validation error"));

    let _ = fs::remove_dir_all(&dir);
}
