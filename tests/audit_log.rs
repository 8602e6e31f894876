//! JSON-lines audit trail written by a running gateway

use lobbyroute::audit::{AuditRecord, AuditSink, JsonlAuditLog};
use lobbyroute::cache::{InvalidationReason, InvalidationRecord, InvalidationScope};
use lobbyroute::config::Config;
use lobbyroute::envelope::InboundMessage;
use lobbyroute::handlers::AppState;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .expect("audit log should exist")
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is one JSON object"))
        .collect()
}

#[test]
fn test_records_are_appended_one_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logs").join("audit.jsonl");
    let log = JsonlAuditLog::open(&path).expect("open");

    for cleared in [3, 0] {
        log.append(&AuditRecord::Invalidation(InvalidationRecord {
            timestamp: 1_000,
            reason: InvalidationReason::Manual,
            scope: InvalidationScope::All,
            cleared,
            event: None,
        }))
        .expect("append");
    }

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["record"], "invalidation");
    assert_eq!(lines[0]["cleared"], 3);
    assert_eq!(lines[1]["cleared"], 0);
}

#[test]
fn test_reopening_keeps_existing_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.jsonl");
    let record = AuditRecord::Invalidation(InvalidationRecord {
        timestamp: 1,
        reason: InvalidationReason::TtlExpiry,
        scope: InvalidationScope::All,
        cleared: 1,
        event: None,
    });

    JsonlAuditLog::open(&path)
        .expect("open")
        .append(&record)
        .expect("append");
    JsonlAuditLog::open(&path)
        .expect("reopen")
        .append(&record)
        .expect("append");

    assert_eq!(read_lines(&path).len(), 2);
}

#[tokio::test]
async fn test_dispatched_request_archives_its_envelope() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.jsonl");
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
id = "only"
provider = "local"
model = "qwen3:32b"
base_url = "http://127.0.0.1:9/v1"

[[cascade]]
id = "only"
kind = "last_resort"
provider = "only"
timeout_seconds = 2

[audit]
path = "{}"
"#,
        path.display()
    );
    let config = Config::from_str(&toml).expect("config");
    let state = AppState::new(Arc::new(config)).expect("state");

    let outcome = state
        .dispatcher()
        .dispatch(InboundMessage::new("thanks", "sam", "http", 0))
        .await;
    assert!(outcome.is_completed());

    let envelopes: Vec<Value> = read_lines(&path)
        .into_iter()
        .filter(|line| line["record"] == "envelope")
        .collect();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(
        envelopes[0]["id"],
        Value::String(outcome.envelope().id().to_string())
    );
}
