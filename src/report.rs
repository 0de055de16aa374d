//! Run summary: per-model usage, cost, and throughput, pivoted into a table
//! with one column per model plus a total.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::assess::{BatchMetrics, ItemVerdict, ResolvedSlot};
use crate::config::RunConfig;
use crate::gateway::{PricingTable, TokenUsage};

/// Rough characters-per-token ratio for the system prompt estimate.
const CHARS_PER_TOKEN: f64 = 4.0;

/// Last path segment of a model id: "openai/gpt-4o-mini" -> "gpt-4o-mini".
pub fn short_model_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// Seconds as "HHh MMm SSs".
pub fn format_time_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}h {minutes:02}m {secs:02}s")
}

/// Estimated token count of a system prompt (chars / 4, rounded).
pub fn estimate_prompt_tokens(prompt: &str) -> u64 {
    (prompt.chars().count() as f64 / CHARS_PER_TOKEN).round() as u64
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

// =============================================================================
// SUMMARY TYPES
// =============================================================================

/// Aggregated metrics for one model slot (or the total column).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub slot: Option<usize>,
    pub model: String,
    pub thinking: String,

    pub total_calls: usize,
    pub successful_calls: usize,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub changes_recommended: usize,
    pub change_rate: f64,

    pub total_time_secs: f64,
    pub time_per_item_secs: f64,
    pub time_per_call_secs: f64,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,

    pub system_prompt_tokens: u64,
    pub total_system_prompt_tokens: u64,
    pub prompt_share_of_input: f64,

    pub input_cost: f64,
    pub output_cost: f64,
    pub reasoning_cost: f64,
    pub total_cost: f64,

    pub cost_per_1k_items: f64,
    pub cost_per_100k_items: f64,
    pub time_per_100k_items_secs: f64,
}

impl ModelSummary {
    /// Column header: short model name, or "Total".
    pub fn header(&self) -> String {
        match self.slot {
            Some(_) => short_model_name(&self.model).to_string(),
            None => "Total".to_string(),
        }
    }

    /// Fill the derived ratios and projections from the summed fields.
    fn derive(&mut self) {
        self.failed_items = self.total_items.saturating_sub(self.successful_items);
        self.change_rate = ratio(self.changes_recommended as f64, self.successful_items as f64);
        self.total_tokens = self.input_tokens + self.output_tokens + self.reasoning_tokens;
        self.prompt_share_of_input = ratio(
            self.total_system_prompt_tokens as f64,
            self.input_tokens as f64,
        );
        self.total_cost = self.input_cost + self.output_cost + self.reasoning_cost;

        let per_item_time = ratio(self.total_time_secs, self.successful_items as f64);
        let per_item_cost = ratio(self.total_cost, self.successful_items as f64);
        self.time_per_item_secs = per_item_time;
        self.time_per_call_secs = ratio(self.total_time_secs, self.successful_calls as f64);
        self.cost_per_1k_items = per_item_cost * 1_000.0;
        self.cost_per_100k_items = per_item_cost * 100_000.0;
        self.time_per_100k_items_secs = per_item_time * 100_000.0;
    }
}

/// Sampling parameters recorded with the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub batch_size: usize,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// blake3 of the system prompt.
    pub system_prompt_hash: String,
    pub parameters: RunParameters,
    pub models: Vec<ModelSummary>,
    pub total: ModelSummary,
}

// =============================================================================
// AGGREGATION
// =============================================================================

/// Fold per-call metrics and verdicts into per-model summaries.
///
/// Columns follow the slots that appear in `metrics`, in slot order.
/// `slots` supplies the reasoning description; slots missing from it show
/// "N/A". Unknown models are costed at zero.
pub fn build_summary(
    config: &RunConfig,
    slots: &[ResolvedSlot],
    metrics: &[BatchMetrics],
    verdicts: &[ItemVerdict],
    pricing: &PricingTable,
) -> RunSummary {
    let prompt_tokens = estimate_prompt_tokens(config.system_prompt());

    let mut per_slot: BTreeMap<usize, ModelSummary> = BTreeMap::new();
    let mut usage_per_slot: BTreeMap<usize, TokenUsage> = BTreeMap::new();

    for m in metrics {
        let s = per_slot.entry(m.slot).or_insert_with(|| ModelSummary {
            slot: Some(m.slot),
            model: m.model.clone(),
            thinking: slots
                .iter()
                .find(|r| r.index == m.slot)
                .map(|r| r.thinking.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            system_prompt_tokens: prompt_tokens,
            ..Default::default()
        });
        s.total_calls += 1;
        if m.is_success() {
            s.successful_calls += 1;
        }
        s.total_time_secs += m.latency_ms as f64 / 1000.0;

        let u = usage_per_slot.entry(m.slot).or_default();
        u.input_tokens += m.usage.input_tokens;
        u.output_tokens += m.usage.output_tokens;
        u.reasoning_tokens += m.usage.reasoning_tokens;
        u.reported_total += m.usage.reported_total;
    }

    for v in verdicts {
        if let Some(s) = per_slot.get_mut(&v.slot) {
            s.total_items += 1;
            if v.is_success() {
                s.successful_items += 1;
            }
            if v.change_required() {
                s.changes_recommended += 1;
            }
        }
    }

    let mut models: Vec<ModelSummary> = Vec::with_capacity(per_slot.len());
    for (slot, mut s) in per_slot {
        let usage = usage_per_slot.remove(&slot).unwrap_or_default();
        if pricing.get(&s.model).is_none() {
            warn!(model = %s.model, "no pricing entry; costs reported as zero");
        }
        let cost = pricing.cost(&s.model, &usage);
        s.input_tokens = usage.input_tokens;
        s.output_tokens = usage.output_tokens;
        s.reasoning_tokens = usage.reasoning_tokens;
        s.total_system_prompt_tokens = prompt_tokens * s.total_calls as u64;
        s.input_cost = cost.input;
        s.output_cost = cost.output;
        s.reasoning_cost = cost.reasoning;
        s.derive();
        models.push(s);
    }

    let total = total_column(&models, prompt_tokens);

    RunSummary {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        system_prompt_hash: blake3::hash(config.system_prompt().as_bytes())
            .to_hex()
            .to_string(),
        parameters: RunParameters {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            batch_size: config.batch_size,
        },
        models,
        total,
    }
}

/// Additive fields are summed and ratios recomputed from the sums. Duration
/// projections copy the first model that assessed any item, or the first
/// model when none did.
fn total_column(models: &[ModelSummary], prompt_tokens: u64) -> ModelSummary {
    let mut t = ModelSummary {
        slot: None,
        model: "Total".to_string(),
        system_prompt_tokens: prompt_tokens,
        ..Default::default()
    };
    for m in models {
        t.total_calls += m.total_calls;
        t.successful_calls += m.successful_calls;
        t.total_items += m.total_items;
        t.successful_items += m.successful_items;
        t.changes_recommended += m.changes_recommended;
        t.total_time_secs += m.total_time_secs;
        t.input_tokens += m.input_tokens;
        t.output_tokens += m.output_tokens;
        t.reasoning_tokens += m.reasoning_tokens;
        t.total_system_prompt_tokens += m.total_system_prompt_tokens;
        t.input_cost += m.input_cost;
        t.output_cost += m.output_cost;
        t.reasoning_cost += m.reasoning_cost;
    }
    t.derive();
    let timed = models
        .iter()
        .find(|m| m.successful_items > 0)
        .or(models.first());
    if let Some(first) = timed {
        t.total_time_secs = first.total_time_secs;
        t.time_per_item_secs = first.time_per_item_secs;
        t.time_per_call_secs = first.time_per_call_secs;
        t.time_per_100k_items_secs = first.time_per_100k_items_secs;
    }
    t
}

// =============================================================================
// PIVOT TABLE
// =============================================================================

/// One metric row of the pivoted summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub metric: String,
    /// One value per model column, then the total.
    pub values: Vec<String>,
    pub description: String,
}

type Cell = fn(&ModelSummary) -> String;

fn count(n: usize) -> String {
    n.to_string()
}

fn percent(r: f64) -> String {
    format!("{:.2}%", r * 100.0)
}

fn usd(v: f64) -> String {
    format!("{v:.4}")
}

const METRIC_ROWS: &[(&str, &str, Cell)] = &[
    (
        "Total API Calls",
        "Total number of API requests made to the model.",
        |m| count(m.total_calls),
    ),
    (
        "Successful API Calls",
        "Number of API requests that returned a usable response.",
        |m| count(m.successful_calls),
    ),
    (
        "Total Items",
        "Total number of items sent to the model.",
        |m| count(m.total_items),
    ),
    (
        "Successful Items",
        "Number of items with a valid, parsed verdict from the model.",
        |m| count(m.successful_items),
    ),
    (
        "Failed Items",
        "Number of items for which the API call, response parsing, or matching failed.",
        |m| count(m.failed_items),
    ),
    (
        "Changes Recommended",
        "Count of items where the model set change_required to 1.",
        |m| count(m.changes_recommended),
    ),
    (
        "Change Rate (%)",
        "Share of successful items with changes recommended. (Changes Recommended / Successful Items)",
        |m| percent(m.change_rate),
    ),
    (
        "Total Time",
        "Total latency of all API calls for the model.",
        |m| format_time_hms(m.total_time_secs),
    ),
    (
        "Time per Item",
        "Average time per successfully assessed item. (Total Time / Successful Items)",
        |m| format_time_hms(m.time_per_item_secs),
    ),
    (
        "Time per API Call",
        "Average latency per successful API call. (Total Time / Successful API Calls)",
        |m| format_time_hms(m.time_per_call_secs),
    ),
    (
        "Total Input Tokens",
        "Sum of input tokens reported by the provider.",
        |m| m.input_tokens.to_string(),
    ),
    (
        "Total Output Tokens",
        "Sum of output tokens reported by the provider.",
        |m| m.output_tokens.to_string(),
    ),
    (
        "Total Reasoning Tokens",
        "Sum of reasoning/thinking tokens reported by the provider. Billed at the output rate.",
        |m| m.reasoning_tokens.to_string(),
    ),
    (
        "Total Tokens",
        "Sum of input, output, and reasoning tokens.",
        |m| m.total_tokens.to_string(),
    ),
    (
        "System Prompt Tokens (Est.)",
        "Estimated tokens in the system prompt. (characters / 4)",
        |m| m.system_prompt_tokens.to_string(),
    ),
    (
        "Total System Prompt Tokens (Est.)",
        "Estimated system prompt tokens across all calls. (System Prompt Tokens * Total API Calls)",
        |m| m.total_system_prompt_tokens.to_string(),
    ),
    (
        "Prompt Share of Input (%)",
        "Share of input tokens spent on the system prompt.",
        |m| percent(m.prompt_share_of_input),
    ),
    (
        "Input Cost",
        "Input cost in USD. (Total Input Tokens / 1,000,000) * input rate",
        |m| usd(m.input_cost),
    ),
    (
        "Output Cost",
        "Output cost in USD. (Total Output Tokens / 1,000,000) * output rate",
        |m| usd(m.output_cost),
    ),
    (
        "Reasoning Cost",
        "Reasoning cost in USD, billed at the output rate. (Total Reasoning Tokens / 1,000,000) * output rate",
        |m| usd(m.reasoning_cost),
    ),
    (
        "Total Cost",
        "Sum of input, output, and reasoning costs.",
        |m| usd(m.total_cost),
    ),
    (
        "Cost per 1K Items (USD)",
        "Projected cost for 1,000 items from this run's average cost per successful item.",
        |m| usd(m.cost_per_1k_items),
    ),
    (
        "Cost per 100K Items (USD)",
        "Projected cost for 100,000 items from this run's average cost per successful item.",
        |m| usd(m.cost_per_100k_items),
    ),
    (
        "Total Time per 100K Items",
        "Projected time for 100,000 items from this run's average time per successful item.",
        |m| format_time_hms(m.time_per_100k_items_secs),
    ),
];

impl RunSummary {
    /// Column headers: one per model, then "Total".
    pub fn headers(&self) -> Vec<String> {
        self.models
            .iter()
            .map(ModelSummary::header)
            .chain(std::iter::once(self.total.header()))
            .collect()
    }

    /// Pivoted table: parameter rows first, then metric rows.
    pub fn table(&self) -> Vec<SummaryRow> {
        if self.models.is_empty() {
            return Vec::new();
        }

        let param_row = |metric: &str, description: &str, value: String| SummaryRow {
            metric: metric.to_string(),
            values: self
                .models
                .iter()
                .map(|_| value.clone())
                .chain(std::iter::once(String::new()))
                .collect(),
            description: description.to_string(),
        };

        let mut rows = vec![
            SummaryRow {
                metric: "Thinking".to_string(),
                values: self
                    .models
                    .iter()
                    .map(|m| m.thinking.clone())
                    .chain(std::iter::once(String::new()))
                    .collect(),
                description: "Reasoning setting per model: budget for budget-style models, effort for effort-style models.".to_string(),
            },
            param_row(
                "Max Tokens",
                "Maximum number of tokens the model may generate per response.",
                self.parameters.max_tokens.to_string(),
            ),
            param_row(
                "Temperature",
                "Sampling randomness. Higher values mean more random output.",
                self.parameters.temperature.to_string(),
            ),
            param_row(
                "Top P",
                "Nucleus sampling threshold on cumulative token probability.",
                self.parameters.top_p.to_string(),
            ),
        ];

        for (metric, description, cell) in METRIC_ROWS {
            rows.push(SummaryRow {
                metric: metric.to_string(),
                values: self
                    .models
                    .iter()
                    .chain(std::iter::once(&self.total))
                    .map(cell)
                    .collect(),
                description: description.to_string(),
            });
        }
        rows
    }
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|")
}

pub fn render_summary_markdown(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("# Assessment Summary\n\n");
    out.push_str(&format!("- Run id: `{}`\n", summary.run_id));
    out.push_str(&format!(
        "- Generated: {}\n",
        summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "- System prompt hash: `{}`\n",
        summary.system_prompt_hash
    ));
    out.push_str(&format!(
        "- Batch size: {}\n",
        summary.parameters.batch_size
    ));

    let rows = summary.table();
    if rows.is_empty() {
        out.push_str("\nNo model calls were made.\n");
        return out;
    }

    let headers = summary.headers();
    out.push_str("\n| Metric | ");
    out.push_str(&headers.iter().map(|h| md_cell(h)).collect::<Vec<_>>().join(" | "));
    out.push_str(" | Description |\n");
    out.push_str("|---|");
    out.push_str(&"---|".repeat(headers.len()));
    out.push_str("---|\n");
    for row in rows {
        out.push_str(&format!("| {} | ", md_cell(&row.metric)));
        out.push_str(
            &row.values
                .iter()
                .map(|v| md_cell(v))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push_str(&format!(" | {} |\n", md_cell(&row.description)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::{
        batch_label, Assessment, CallStatus, Feedback, VerdictError, VerdictOutcome,
    };
    use crate::gateway::ModelPricing;
    use crate::items::ItemId;

    fn metric(slot: usize, model: &str, ok: bool, input: u64, output: u64, ms: u64) -> BatchMetrics {
        BatchMetrics {
            timestamp: Utc::now(),
            batch_index: 1,
            batch_label: batch_label(1),
            slot,
            model: model.into(),
            status: if ok { CallStatus::Success } else { CallStatus::Error },
            item_count: 2,
            usage: TokenUsage {
                input_tokens: input,
                output_tokens: output,
                reasoning_tokens: 0,
                reported_total: input + output,
            },
            latency_ms: ms,
            finish_reason: ok.then(|| "stop".to_string()),
            raw_response: None,
            error: None,
        }
    }

    fn verdict(slot: usize, id: i64, outcome: VerdictOutcome) -> ItemVerdict {
        ItemVerdict {
            item_id: ItemId::Int(id),
            slot,
            model: String::new(),
            batch_index: 1,
            outcome,
        }
    }

    fn assessed(change: bool) -> VerdictOutcome {
        VerdictOutcome::Assessed(Assessment {
            change_required: change,
            feedback: Feedback::default(),
        })
    }

    fn config() -> RunConfig {
        RunConfig {
            system_prompt: Some("x".repeat(400)),
            ..Default::default()
        }
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_time_hms(0.0), "00h 00m 00s");
        assert_eq!(format_time_hms(8130.4), "02h 15m 30s");
        assert_eq!(format_time_hms(45.9), "00h 00m 45s");
    }

    #[test]
    fn short_names_drop_provider() {
        assert_eq!(short_model_name("openai/gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(short_model_name("local"), "local");
    }

    #[test]
    fn summarizes_per_model_and_total() {
        let mut pricing = PricingTable::empty();
        pricing.insert("a/one", ModelPricing::per_million(2.0, 8.0));

        let metrics = vec![
            metric(0, "a/one", true, 1_000_000, 500_000, 4_000),
            metric(1, "b/two", false, 0, 0, 30_000),
        ];
        let verdicts = vec![
            verdict(0, 1, assessed(true)),
            verdict(0, 2, assessed(false)),
            verdict(
                1,
                1,
                VerdictOutcome::Failed(VerdictError::new(
                    crate::assess::ErrorKind::Transport,
                    "timeout",
                )),
            ),
            verdict(
                1,
                2,
                VerdictOutcome::Failed(VerdictError::new(
                    crate::assess::ErrorKind::Transport,
                    "timeout",
                )),
            ),
        ];

        let summary = build_summary(&config(), &[], &metrics, &verdicts, &pricing);
        assert_eq!(summary.models.len(), 2);

        let one = &summary.models[0];
        assert_eq!(one.total_calls, 1);
        assert_eq!(one.successful_items, 2);
        assert_eq!(one.changes_recommended, 1);
        assert!((one.change_rate - 0.5).abs() < 1e-9);
        assert!((one.total_cost - 6.0).abs() < 1e-9);
        assert!((one.cost_per_1k_items - 3000.0).abs() < 1e-6);
        assert!((one.time_per_item_secs - 2.0).abs() < 1e-9);
        assert_eq!(one.system_prompt_tokens, 100);
        assert_eq!(one.thinking, "N/A");

        let two = &summary.models[1];
        assert_eq!(two.successful_calls, 0);
        assert_eq!(two.failed_items, 2);
        assert_eq!(two.total_cost, 0.0);
        assert_eq!(two.time_per_item_secs, 0.0);
        assert_eq!(two.change_rate, 0.0);

        let total = &summary.total;
        assert_eq!(total.total_calls, 2);
        assert_eq!(total.total_items, 4);
        assert_eq!(total.successful_items, 2);
        assert!((total.total_cost - 6.0).abs() < 1e-9);
        assert!((total.change_rate - 0.5).abs() < 1e-9);
        assert_eq!(total.system_prompt_tokens, 100);
        assert_eq!(total.total_system_prompt_tokens, 200);
        assert_eq!(total.total_time_secs, one.total_time_secs);
    }

    #[test]
    fn total_timing_skips_models_with_no_successful_items() {
        let metrics = vec![
            metric(0, "a/one", false, 0, 0, 30_000),
            metric(1, "b/two", true, 1_000, 500, 6_000),
        ];
        let failed = || {
            VerdictOutcome::Failed(VerdictError::new(
                crate::assess::ErrorKind::Protocol,
                "HTTP 500",
            ))
        };
        let verdicts = vec![
            verdict(0, 1, failed()),
            verdict(0, 2, failed()),
            verdict(1, 1, assessed(true)),
            verdict(1, 2, assessed(false)),
        ];

        let summary = build_summary(&config(), &[], &metrics, &verdicts, &PricingTable::empty());
        let two = &summary.models[1];
        let total = &summary.total;
        assert!((two.time_per_item_secs - 3.0).abs() < 1e-9);
        assert_eq!(total.total_time_secs, two.total_time_secs);
        assert_eq!(total.time_per_item_secs, two.time_per_item_secs);
        assert_eq!(total.time_per_call_secs, two.time_per_call_secs);
        assert_eq!(total.time_per_100k_items_secs, two.time_per_100k_items_secs);
    }

    #[test]
    fn table_has_parameter_rows_and_descriptions() {
        let metrics = vec![metric(0, "a/one", true, 10, 10, 1000)];
        let verdicts = vec![verdict(0, 1, assessed(false))];
        let summary =
            build_summary(&config(), &[], &metrics, &verdicts, &PricingTable::empty());

        assert_eq!(summary.headers(), vec!["one".to_string(), "Total".to_string()]);
        let table = summary.table();
        let metrics: Vec<&str> = table.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(&metrics[..4], &["Thinking", "Max Tokens", "Temperature", "Top P"]);
        assert!(table.iter().all(|r| r.values.len() == 2));
        assert!(table.iter().all(|r| !r.description.is_empty()));
        assert_eq!(table[1].values, vec!["2000".to_string(), String::new()]);

        let md = render_summary_markdown(&summary);
        assert!(md.contains("| Metric | one | Total | Description |"));
        assert!(md.contains("| Total API Calls | 1 | 1 |"));
    }

    #[test]
    fn empty_run_has_empty_table() {
        let summary = build_summary(&config(), &[], &[], &[], &PricingTable::empty());
        assert!(summary.models.is_empty());
        assert!(summary.table().is_empty());
        assert!(render_summary_markdown(&summary).contains("No model calls were made."));
    }
}
