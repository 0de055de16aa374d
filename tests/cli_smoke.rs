use std::path::Path;
use std::process::Command;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::tempdir;
use verdict_harness::assess::{
    Assessment, BatchMetrics, CallStatus, Feedback, FieldFeedback, ItemVerdict, VerdictOutcome,
};
use verdict_harness::gateway::TokenUsage;
use verdict_harness::ItemId;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HAIKU: &str = "anthropic/claude-3-5-haiku";

fn write_fixtures(dir: &Path, batch_size: usize) {
    std::fs::write(
        dir.join("prompt.txt"),
        "You review multiple-choice questions. For each item return questionid, \
         change_required (0 or 1) and feedback with issue and rewrite per field.",
    )
    .unwrap();
    std::fs::write(
        dir.join("config.json"),
        json!({
            "models": [{ "model": HAIKU }],
            "batch_size": batch_size,
            "system_prompt_file": "prompt.txt"
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("items.json"),
        json!([
            { "questionid": 1, "question": "What is 2 + 2?", "answer1": "4", "answer2": "5" },
            { "questionid": 2, "question": "Capital of France?", "answer1": "Paris",
              "questionImage": "map.png" },
            { "questionid": 3, "question": "Largest planet?", "answer1": "Jupiter" }
        ])
        .to_string(),
    )
    .unwrap();
}

#[test]
fn payload_command_prints_first_batch() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), 2);

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .arg("payload")
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--items")
        .arg(dir.path().join("items.json"))
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = payload.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["questionid"], 1);
    assert_eq!(entries[0]["answer2"], "5");
    assert!(entries[0].get("answer3").is_none());
    assert!(entries[1]["question"]
        .as_str()
        .unwrap()
        .ends_with("[Image present - visual content not assessed]"));
}

#[test]
fn assess_command_requires_api_key() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), 5);

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .env_remove("OPENROUTER_API_KEY")
        .arg("assess")
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--items")
        .arg(dir.path().join("items.json"))
        .arg("--out")
        .arg(dir.path().join("out"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENROUTER_API_KEY"));
}

#[test]
fn short_system_prompt_is_rejected() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), 5);
    std::fs::write(dir.path().join("prompt.txt"), "too short").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .arg("payload")
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--items")
        .arg(dir.path().join("items.json"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("too short"));
}

#[tokio::test(flavor = "multi_thread")]
async fn assess_command_writes_run_outputs() {
    let server = MockServer::start().await;
    let content = json!([
        { "questionid": 1, "change_required": 0,
          "feedback": { "question": { "issue": "", "rewrite": "" } } },
        { "questionid": 2, "change_required": 1,
          "feedback": { "question": { "issue": "Vague", "rewrite": "What is the capital of France?" },
                        "answer1": { "issue": "", "rewrite": "" } } }
    ])
    .to_string();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 400, "completion_tokens": 120, "total_tokens": 520 }
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), 5);
    let out = dir.path().join("out");

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .env("OPENROUTER_API_KEY", "sk-or-test-key-0000")
        .env("OPENROUTER_BASE_URL", server.uri())
        .arg("assess")
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--items")
        .arg(dir.path().join("items.json"))
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let verdicts = std::fs::read_to_string(out.join("verdicts.jsonl")).unwrap();
    let verdicts: Vec<ItemVerdict> = verdicts
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(verdicts.len(), 3);
    assert!(!verdicts[0].change_required());
    assert!(verdicts[1].change_required());
    assert!(!verdicts[2].is_success());

    let results = std::fs::read_to_string(out.join("results.jsonl")).unwrap();
    assert_eq!(results.lines().count(), 9);

    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["summary"]["total"]["total_items"], 3);
    assert_eq!(summary["summary"]["total"]["successful_items"], 2);
    assert_eq!(summary["summary"]["total"]["changes_recommended"], 1);
    assert!(out.join("summary.md").exists());
    assert!(out.join("judge_input.json").exists());
}

fn metrics_row(batch_index: usize) -> BatchMetrics {
    BatchMetrics {
        timestamp: Utc::now(),
        batch_index,
        batch_label: format!("Batch_{batch_index}"),
        slot: 0,
        model: HAIKU.to_string(),
        status: CallStatus::Success,
        item_count: 2,
        usage: TokenUsage {
            input_tokens: 1_000,
            output_tokens: 500,
            reasoning_tokens: 0,
            reported_total: 1_500,
        },
        latency_ms: 2_000,
        finish_reason: Some("stop".to_string()),
        raw_response: None,
        error: None,
    }
}

fn assessed(id: i64, change_required: bool) -> ItemVerdict {
    ItemVerdict {
        item_id: ItemId::from(id),
        slot: 0,
        model: HAIKU.to_string(),
        batch_index: 1,
        outcome: VerdictOutcome::Assessed(Assessment {
            change_required,
            feedback: Feedback {
                question: FieldFeedback::no_changes(),
                answers: Default::default(),
            },
        }),
    }
}

fn write_jsonl<T: serde::Serialize>(path: &Path, rows: &[T]) {
    let text: Vec<String> = rows
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    std::fs::write(path, text.join("\n")).unwrap();
}

#[test]
fn report_command_rebuilds_summary_from_archive() {
    let dir = tempdir().unwrap();
    write_fixtures(dir.path(), 2);
    let metrics_path = dir.path().join("api_metrics.jsonl");
    let verdicts_path = dir.path().join("verdicts.jsonl");
    write_jsonl(&metrics_path, &[metrics_row(1), metrics_row(2)]);
    write_jsonl(
        &verdicts_path,
        &[
            assessed(1, true),
            assessed(2, false),
            assessed(3, false),
            assessed(4, true),
        ],
    );
    let out = dir.path().join("report");

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .arg("report")
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--metrics")
        .arg(&metrics_path)
        .arg("--verdicts")
        .arg(&verdicts_path)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let markdown = String::from_utf8_lossy(&output.stdout);
    assert!(markdown.contains("# Assessment Summary"));
    assert!(markdown.contains("claude-3-5-haiku"));

    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    let model = &summary["summary"]["models"][0];
    assert_eq!(model["total_calls"], 2);
    assert_eq!(model["successful_items"], 4);
    assert_eq!(model["changes_recommended"], 2);
    assert_eq!(model["input_tokens"], 2_000);
    assert_eq!(model["change_rate"], 0.5);
}
