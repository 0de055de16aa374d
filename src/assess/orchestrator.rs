//! Batch orchestration: partition the selected rows and drive every enabled
//! model over every batch, strictly in order.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::gateway::{ChatGateway, ChatRequest, FinishReason, PricingTable};
use crate::items::{Item, ItemSource};

use super::parse::parse_verdict_array;
use super::reconcile::reconcile;
use super::request::{build_request, build_user_payload, resolve_enabled_slots, ResolvedSlot};
use super::types::{
    batch_label, BatchMetrics, CallStatus, ErrorKind, ItemVerdict, RunOutput, VerdictError,
    VerdictOutcome,
};
use super::RunError;

const SYSTEM_PREVIEW_CHARS: usize = 500;
const PAYLOAD_PREVIEW_CHARS: usize = 1000;

/// Consecutive batches of at most `batch_size` items, in order.
pub fn partition(items: &[Item], batch_size: usize) -> Vec<&[Item]> {
    items.chunks(batch_size.max(1)).collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Assess the configured row range with every enabled slot.
///
/// Reasoning settings for all enabled slots are validated before the first
/// call; an invalid one fails the run with no network traffic. After that,
/// any failure inside one (batch, model) call becomes error verdicts for that
/// batch and the run continues.
pub async fn run_assessment(
    gateway: &dyn ChatGateway,
    config: &RunConfig,
    pricing: &PricingTable,
    source: &dyn ItemSource,
) -> Result<RunOutput, RunError> {
    let slots = resolve_enabled_slots(config, pricing)?;
    let items = source.select(config.start_row, config.end_row);
    let batches = partition(items, config.batch_size);

    if slots.is_empty() {
        info!("no model slots enabled; nothing to assess");
        return Ok(RunOutput::default());
    }

    info!(
        start_row = config.start_row,
        end_row = config.start_row + items.len().saturating_sub(1),
        items = items.len(),
        batches = batches.len(),
        batch_size = config.batch_size,
        models = ?slots.iter().map(|s| s.model.as_str()).collect::<Vec<_>>(),
        "starting assessment run"
    );

    let started = Instant::now();
    let delay = config.request_delay();
    let mut output = RunOutput {
        batch_count: batches.len(),
        ..Default::default()
    };

    for (i, batch) in batches.iter().enumerate() {
        let batch_index = i + 1;
        let first_row = config.start_row + i * config.batch_size;
        info!(
            batch = batch_index,
            of = batches.len(),
            rows = %format!("{}-{}", first_row, first_row + batch.len() - 1),
            "processing batch"
        );

        let payload = build_user_payload(batch)?;

        for slot in &slots {
            let (verdicts, metrics) =
                assess_batch(gateway, config, slot, batch, batch_index, &payload).await;
            output.verdicts.extend(verdicts);
            output.metrics.push(metrics);
        }

        if batch_index < batches.len() && !delay.is_zero() {
            info!(seconds = delay.as_secs_f64(), "pausing between batches");
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        verdicts = output.verdicts.len(),
        calls = output.metrics.len(),
        "assessment run complete"
    );

    Ok(output)
}

fn log_first_batch_request(config: &RunConfig, req: &ChatRequest) {
    let system = req.system_content().unwrap_or_default();
    let user = req.user_content().unwrap_or_default();
    debug!(
        model = req.model.model_id(),
        temperature = config.temperature,
        top_p = config.top_p,
        max_tokens = config.max_tokens,
        reasoning = ?req.reasoning,
        "first batch request parameters"
    );
    debug!(
        chars = system.chars().count(),
        preview = %preview(system, SYSTEM_PREVIEW_CHARS),
        "first batch system prompt"
    );
    debug!(
        chars = user.chars().count(),
        preview = %preview(user, PAYLOAD_PREVIEW_CHARS),
        "first batch user payload"
    );
}

/// One model over one batch. Never fails: errors become verdicts.
async fn assess_batch(
    gateway: &dyn ChatGateway,
    config: &RunConfig,
    slot: &ResolvedSlot,
    batch: &[Item],
    batch_index: usize,
    payload: &str,
) -> (Vec<ItemVerdict>, BatchMetrics) {
    let req = build_request(config, slot, payload);
    if batch_index == 1 {
        log_first_batch_request(config, &req);
    }

    info!(
        slot = %slot.label(),
        model = %slot.model,
        items = batch.len(),
        "assessing batch"
    );

    let start = Instant::now();
    let result = gateway.chat(&req).await;
    let latency = start.elapsed();

    let mut metrics = BatchMetrics {
        timestamp: Utc::now(),
        batch_index,
        batch_label: batch_label(batch_index),
        slot: slot.index,
        model: slot.model.clone(),
        status: CallStatus::Error,
        item_count: batch.len(),
        usage: Default::default(),
        latency_ms: latency.as_millis() as u64,
        finish_reason: None,
        raw_response: None,
        error: None,
    };

    let verdict = |item: &Item, outcome: VerdictOutcome| ItemVerdict {
        item_id: item.id.clone(),
        slot: slot.index,
        model: slot.model.clone(),
        batch_index,
        outcome,
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            let message = err.to_string();
            warn!(
                model = %slot.model,
                batch = batch_index,
                code = err.code(),
                request_id = err.request_id().unwrap_or("-"),
                error = %message,
                "batch call failed"
            );
            let error = VerdictError::new(ErrorKind::from(&err), message.clone());
            metrics.error = Some(message);
            let verdicts = batch
                .iter()
                .map(|item| verdict(item, VerdictOutcome::Failed(error.clone())))
                .collect();
            return (verdicts, metrics);
        }
    };

    if batch_index == 1 {
        debug!(model = %slot.model, usage = ?response.usage, "first batch usage");
    }
    if response.usage.reasoning_tokens > 0 {
        info!(
            model = %slot.model,
            reasoning_tokens = response.usage.reasoning_tokens,
            "reasoning tokens used"
        );
    }

    if response.finish_reason == FinishReason::Length {
        warn!(
            model = %slot.model,
            batch = batch_index,
            max_tokens = config.max_tokens,
            output_tokens = response.usage.output_tokens,
            "response hit the token limit; output is likely truncated"
        );
    }

    metrics.usage = response.usage;
    metrics.finish_reason = Some(response.finish_reason.as_str().to_string());
    metrics.raw_response = Some(response.raw_body);

    match parse_verdict_array(&response.content).and_then(|parsed| reconcile(batch, &parsed)) {
        Ok(reconciled) => {
            info!(
                model = %slot.model,
                batch = batch_index,
                parsed = reconciled.parsed_count(),
                missing = reconciled.missing.len(),
                input_tokens = metrics.usage.input_tokens,
                output_tokens = metrics.usage.output_tokens,
                total_tokens = metrics.usage.billable_total(),
                "batch assessed"
            );
            metrics.status = CallStatus::Success;
            let verdicts = batch
                .iter()
                .zip(reconciled.outcomes)
                .map(|(item, (_, outcome))| verdict(item, outcome))
                .collect();
            (verdicts, metrics)
        }
        Err(err) => {
            let message = if err.is_unreadable() {
                format!("Model response is not a JSON verdict array: {err}")
            } else {
                format!("Failed to parse model batch response: {err}")
            };
            warn!(
                model = %slot.model,
                batch = batch_index,
                content = %preview(&response.content, SYSTEM_PREVIEW_CHARS),
                error = %err,
                "batch response failed validation"
            );
            let error = VerdictError::new(ErrorKind::Schema, message.clone());
            metrics.error = Some(message);
            let verdicts = batch
                .iter()
                .map(|item| verdict(item, VerdictOutcome::Failed(error.clone())))
                .collect();
            (verdicts, metrics)
        }
    }
}

/// User payload of the first batch of the configured range, for pasting
/// into a playground.
pub fn manual_test_payload(
    config: &RunConfig,
    source: &dyn ItemSource,
) -> Result<String, serde_json::Error> {
    let items = source.select(config.start_row, config.end_row);
    let batches = partition(items, config.batch_size);
    if batches.len() > 1 {
        warn!(
            items = items.len(),
            batch_size = config.batch_size,
            "range spans {} batches; only the first batch is included",
            batches.len()
        );
    }
    build_user_payload(batches.first().copied().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: i64) -> Vec<Item> {
        (1..=n).map(|i| Item::new(i, format!("Q{i}"))).collect()
    }

    #[test]
    fn batches_partition_the_range() {
        for n in [0i64, 1, 4, 5, 6, 23] {
            for size in [1usize, 2, 5, 7] {
                let all = items(n);
                let batches = partition(&all, size);
                let total: usize = batches.iter().map(|b| b.len()).sum();
                assert_eq!(total, n as usize);
                assert_eq!(batches.len(), (n as usize).div_ceil(size));
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
                let flat: Vec<&Item> = batches.iter().flat_map(|b| b.iter()).collect();
                assert!(flat.iter().zip(all.iter()).all(|(a, b)| a.id == b.id));
            }
        }
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("hi", 10), "hi");
    }

    #[test]
    fn manual_payload_uses_first_batch_only() {
        let config = RunConfig {
            batch_size: 2,
            start_row: 2,
            ..Default::default()
        };
        let payload = manual_test_payload(&config, &items(5)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let ids: Vec<i64> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["questionid"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
