//! Result tables and the sinks that persist them.
//!
//! A run produces per-item result rows, per-call metrics, and the pivoted
//! summary. `JsonDirSink` also archives raw verdicts and a payload for a
//! downstream judge model.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assess::{BatchMetrics, ItemVerdict, RunOutput, VerdictOutcome};
use crate::items::{Item, ItemId, MAX_ANSWERS};
use crate::report::{render_summary_markdown, short_model_name, RunSummary, SummaryRow};

pub const VERDICTS_FILE: &str = "verdicts.jsonl";
pub const RESULTS_FILE: &str = "results.jsonl";
pub const METRICS_FILE: &str = "api_metrics.jsonl";
pub const SUMMARY_JSON_FILE: &str = "summary.json";
pub const SUMMARY_MD_FILE: &str = "summary.md";
pub const JUDGE_FILE: &str = "judge_input.json";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}:{line}: {source}")]
    Line {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// RESULT ROWS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    Original,
    Rewrite,
    Issues,
}

/// One row of the per-item, per-model results table. Each verdict yields
/// three rows: the original text, the rewrites, and the issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub model: String,
    pub questionid: ItemId,
    pub item: RowKind,
    /// 1 or 0 for assessed items, None for failed ones.
    pub change_required: Option<u8>,
    pub question: String,
    pub answers: [String; MAX_ANSWERS],
}

fn answers_of<F>(f: F) -> [String; MAX_ANSWERS]
where
    F: Fn(usize) -> String,
{
    std::array::from_fn(|i| f(i + 1))
}

/// Results table rows in item order, then slot order.
pub fn result_rows(items: &[Item], verdicts: &[ItemVerdict]) -> Vec<ResultRow> {
    let mut by_item: HashMap<String, Vec<&ItemVerdict>> = HashMap::new();
    for v in verdicts {
        by_item.entry(v.item_id.key()).or_default().push(v);
    }

    let mut rows = Vec::with_capacity(verdicts.len() * 3);
    for item in items {
        let Some(list) = by_item.get_mut(&item.id.key()) else {
            continue;
        };
        list.sort_by_key(|v| v.slot);

        for v in list.iter() {
            let model = short_model_name(&v.model).to_string();
            let change_required = v.assessment().map(|a| u8::from(a.change_required));
            let row = |kind: RowKind, question: String, answers: [String; MAX_ANSWERS]| ResultRow {
                model: model.clone(),
                questionid: item.id.clone(),
                item: kind,
                change_required,
                question,
                answers,
            };

            rows.push(row(
                RowKind::Original,
                item.question.text.clone(),
                answers_of(|n| item.answer_at(n).map(|f| f.text.clone()).unwrap_or_default()),
            ));

            match &v.outcome {
                VerdictOutcome::Assessed(a) => {
                    let fb = &a.feedback;
                    rows.push(row(
                        RowKind::Rewrite,
                        fb.question.rewrite.clone(),
                        answers_of(|n| fb.answer(n).map(|f| f.rewrite.clone()).unwrap_or_default()),
                    ));
                    rows.push(row(
                        RowKind::Issues,
                        fb.question.issue.clone(),
                        answers_of(|n| fb.answer(n).map(|f| f.issue.clone()).unwrap_or_default()),
                    ));
                }
                VerdictOutcome::Failed(e) => {
                    rows.push(row(RowKind::Rewrite, String::new(), Default::default()));
                    rows.push(row(RowKind::Issues, e.message.clone(), Default::default()));
                }
            }
        }
    }
    rows
}

// =============================================================================
// JUDGE PAYLOAD
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeAnswer {
    pub answer_id: String,
    pub original_answer: String,
    pub rewrite: String,
    pub reason: String,
}

/// One model's assessment of one item, shaped for a judge model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeEntry {
    pub question_id: ItemId,
    pub assessing_model: String,
    pub original_question: String,
    pub question_rewrite: String,
    pub question_reason: String,
    pub answers: Vec<JudgeAnswer>,
}

/// Judge entries for every successful verdict. Answers are listed only when
/// the original answer text is non-empty.
pub fn judge_payload(items: &[Item], verdicts: &[ItemVerdict]) -> Vec<JudgeEntry> {
    let originals: HashMap<String, &Item> = items.iter().map(|i| (i.id.key(), i)).collect();

    verdicts
        .iter()
        .filter_map(|v| {
            let assessment = v.assessment()?;
            let item = originals.get(&v.item_id.key())?;
            let fb = &assessment.feedback;

            let answers = item
                .answers
                .iter()
                .enumerate()
                .filter(|(_, f)| !f.text.is_empty())
                .map(|(i, f)| {
                    let n = i + 1;
                    let entry = fb.answer(n);
                    JudgeAnswer {
                        answer_id: format!("answer{n}"),
                        original_answer: f.text.clone(),
                        rewrite: entry.map(|e| e.rewrite.clone()).unwrap_or_default(),
                        reason: entry.map(|e| e.issue.clone()).unwrap_or_default(),
                    }
                })
                .collect();

            Some(JudgeEntry {
                question_id: item.id.clone(),
                assessing_model: v.model.clone(),
                original_question: item.question.text.clone(),
                question_rewrite: fb.question.rewrite.clone(),
                question_reason: fb.question.issue.clone(),
                answers,
            })
        })
        .collect()
}

// =============================================================================
// SINKS
// =============================================================================

/// Destination for the tables a run produces.
pub trait ResultSink {
    fn write_results(&mut self, rows: &[ResultRow]) -> Result<(), SinkError>;

    fn write_metrics(&mut self, metrics: &[BatchMetrics]) -> Result<(), SinkError>;

    fn write_summary(&mut self, summary: &RunSummary) -> Result<(), SinkError>;

    /// Raw verdict archive, used to rebuild the summary later.
    fn write_verdicts(&mut self, _verdicts: &[ItemVerdict]) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_judge_payload(&mut self, _entries: &[JudgeEntry]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Write every table of a finished run.
pub fn write_run(
    sink: &mut dyn ResultSink,
    items: &[Item],
    output: &RunOutput,
    summary: &RunSummary,
) -> Result<(), SinkError> {
    sink.write_verdicts(&output.verdicts)?;
    sink.write_results(&result_rows(items, &output.verdicts))?;
    sink.write_metrics(&output.metrics)?;
    sink.write_summary(summary)?;
    sink.write_judge_payload(&judge_payload(items, &output.verdicts))?;
    Ok(())
}

/// Writes each table as a file in one directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    summary: &'a RunSummary,
    headers: Vec<String>,
    table: Vec<SummaryRow>,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_jsonl<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<(), SinkError> {
        let path = self.dir.join(name);
        let mut writer = BufWriter::new(File::create(&path)?);
        for row in rows {
            let line = serde_json::to_string(row)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = rows.len(), "wrote table");
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), SinkError> {
        let path = self.dir.join(name);
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, text)?;
        info!(path = %path.display(), "wrote file");
        Ok(())
    }
}

impl ResultSink for JsonDirSink {
    fn write_results(&mut self, rows: &[ResultRow]) -> Result<(), SinkError> {
        self.write_jsonl(RESULTS_FILE, rows)
    }

    fn write_metrics(&mut self, metrics: &[BatchMetrics]) -> Result<(), SinkError> {
        self.write_jsonl(METRICS_FILE, metrics)
    }

    fn write_summary(&mut self, summary: &RunSummary) -> Result<(), SinkError> {
        let doc = SummaryDocument {
            summary,
            headers: summary.headers(),
            table: summary.table(),
        };
        self.write_json(SUMMARY_JSON_FILE, &doc)?;
        let md_path = self.dir.join(SUMMARY_MD_FILE);
        std::fs::write(&md_path, render_summary_markdown(summary))?;
        info!(path = %md_path.display(), "wrote file");
        Ok(())
    }

    fn write_verdicts(&mut self, verdicts: &[ItemVerdict]) -> Result<(), SinkError> {
        self.write_jsonl(VERDICTS_FILE, verdicts)
    }

    fn write_judge_payload(&mut self, entries: &[JudgeEntry]) -> Result<(), SinkError> {
        self.write_json(JUDGE_FILE, entries)
    }
}

/// Read a JSONL file written by a sink. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, SinkError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|source| SinkError::Line {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::{Assessment, ErrorKind, Feedback, FieldFeedback, VerdictError};

    fn item() -> Item {
        Item::new(10i64, "Capital of France?")
            .answer("Paris")
            .answer("")
            .answer("Lyon")
    }

    fn assessed() -> ItemVerdict {
        let mut feedback = Feedback {
            question: FieldFeedback::new("Vague", "What is the capital of France?"),
            ..Default::default()
        };
        feedback.answers[0] = Some(FieldFeedback::no_changes());
        feedback.answers[2] = Some(FieldFeedback::new("Distractor too weak", "Marseille"));
        ItemVerdict {
            item_id: ItemId::Int(10),
            slot: 1,
            model: "openai/gpt-4o-mini".into(),
            batch_index: 1,
            outcome: VerdictOutcome::Assessed(Assessment {
                change_required: true,
                feedback,
            }),
        }
    }

    fn failed() -> ItemVerdict {
        ItemVerdict {
            item_id: ItemId::Text("10".into()),
            slot: 0,
            model: "google/gemini-2.0-flash-lite".into(),
            batch_index: 1,
            outcome: VerdictOutcome::Failed(VerdictError::new(ErrorKind::Transport, "timeout after 30s")),
        }
    }

    #[test]
    fn result_rows_follow_slot_order() {
        let rows = result_rows(&[item()], &[assessed(), failed()]);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].model, "gemini-2.0-flash-lite");
        assert_eq!(rows[0].change_required, None);
        assert_eq!(rows[2].item, RowKind::Issues);
        assert_eq!(rows[2].question, "timeout after 30s");

        assert_eq!(rows[3].item, RowKind::Original);
        assert_eq!(rows[3].answers[0], "Paris");
        assert_eq!(rows[4].question, "What is the capital of France?");
        assert_eq!(rows[4].answers[2], "Marseille");
        assert_eq!(rows[5].change_required, Some(1));
        assert_eq!(rows[5].answers[1], "");
    }

    #[test]
    fn judge_payload_skips_failures_and_empty_answers() {
        let entries = judge_payload(&[item()], &[assessed(), failed()]);
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.assessing_model, "openai/gpt-4o-mini");
        assert_eq!(e.question_reason, "Vague");
        let ids: Vec<&str> = e.answers.iter().map(|a| a.answer_id.as_str()).collect();
        assert_eq!(ids, vec!["answer1", "answer3"]);
        assert_eq!(e.answers[1].rewrite, "Marseille");
    }

    #[test]
    fn jsonl_round_trip_through_dir_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonDirSink::new(dir.path().join("out")).unwrap();
        let verdicts = vec![assessed(), failed()];
        sink.write_verdicts(&verdicts).unwrap();

        let back: Vec<ItemVerdict> = read_jsonl(sink.dir().join(VERDICTS_FILE)).unwrap();
        assert_eq!(back, verdicts);
    }
}
