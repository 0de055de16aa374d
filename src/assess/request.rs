//! Outbound request construction: user payload and per-model parameters.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{slot_label, ModelSlot, RunConfig};
use crate::gateway::{
    ChatModel, ChatRequest, Message, PricingTable, ReasoningCapability, ReasoningParam,
};
use crate::items::{Item, ItemId};

#[derive(Debug, thiserror::Error)]
pub enum ReasoningConfigError {
    #[error(
        "{label} ({model}): reasoning effort '{value}' is not supported; allowed values: {}",
        .allowed.join(", ")
    )]
    InvalidEffort {
        label: String,
        model: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("{label} ({model}) does not accept a reasoning effort, but '{value}' was configured; clear the value")]
    EffortNotSupported {
        label: String,
        model: String,
        value: String,
    },
    #[error("{label} ({model}): thinking budget '{value}' is not a number")]
    InvalidBudget {
        label: String,
        model: String,
        value: String,
    },
}

// =============================================================================
// REASONING RESOLUTION
// =============================================================================

/// An enabled slot with its reasoning parameter resolved against the
/// capability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSlot {
    /// 0-based slot index.
    pub index: usize,
    pub model: String,
    pub reasoning: Option<ReasoningParam>,
    /// Human-readable reasoning setting for the summary.
    pub thinking: String,
}

impl ResolvedSlot {
    pub fn label(&self) -> String {
        slot_label(self.index)
    }
}

fn parse_budget(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Reasoning parameter for one slot.
///
/// Budget values are clamped into the model's range; zero or below omits the
/// parameter. Effort values must be in the model's declared set.
pub fn resolve_reasoning(
    index: usize,
    slot: &ModelSlot,
    pricing: &PricingTable,
) -> Result<ResolvedSlot, ReasoningConfigError> {
    let label = slot_label(index);
    let value = slot.reasoning_value();

    let (reasoning, thinking) = match pricing.reasoning_capability(&slot.model) {
        ReasoningCapability::None => (None, "N/A".to_string()),

        ReasoningCapability::Budget(range) => match value {
            None => (None, "Off (Blank)".to_string()),
            Some(raw) => {
                let budget = parse_budget(raw).ok_or_else(|| ReasoningConfigError::InvalidBudget {
                    label: label.clone(),
                    model: slot.model.clone(),
                    value: raw.to_string(),
                })?;
                if budget <= 0 {
                    (None, "Off (Blank)".to_string())
                } else {
                    let clamped = budget.clamp(range.min as i64, range.max as i64) as u32;
                    if clamped as i64 != budget {
                        warn!(
                            model = %slot.model,
                            requested = budget,
                            applied = clamped,
                            min = range.min,
                            max = range.max,
                            "thinking budget clamped"
                        );
                    }
                    info!(model = %slot.model, thinking_budget = clamped, "applying thinking budget");
                    let param = ReasoningParam::ThinkingBudget(clamped);
                    let thinking = param.describe();
                    (Some(param), thinking)
                }
            }
        },

        ReasoningCapability::Effort { allowed } => match value {
            None => (None, "Effort: default".to_string()),
            Some(effort) => {
                if allowed.is_empty() {
                    return Err(ReasoningConfigError::EffortNotSupported {
                        label,
                        model: slot.model.clone(),
                        value: effort.to_string(),
                    });
                }
                if !allowed.iter().any(|a| a == effort) {
                    return Err(ReasoningConfigError::InvalidEffort {
                        label,
                        model: slot.model.clone(),
                        value: effort.to_string(),
                        allowed,
                    });
                }
                info!(model = %slot.model, reasoning_effort = effort, "applying reasoning effort");
                let param = ReasoningParam::ReasoningEffort(effort.to_string());
                let thinking = param.describe();
                (Some(param), thinking)
            }
        },
    };

    Ok(ResolvedSlot {
        index,
        model: slot.model.clone(),
        reasoning,
        thinking,
    })
}

/// Resolve every enabled slot before any call is made.
pub fn resolve_enabled_slots(
    config: &RunConfig,
    pricing: &PricingTable,
) -> Result<Vec<ResolvedSlot>, ReasoningConfigError> {
    config
        .enabled_slots()
        .map(|(i, slot)| resolve_reasoning(i, slot, pricing))
        .collect()
}

// =============================================================================
// PAYLOAD
// =============================================================================

#[derive(Serialize)]
struct PayloadItem<'a> {
    questionid: &'a ItemId,
    question: String,
    #[serde(flatten)]
    answers: BTreeMap<String, String>,
}

impl<'a> From<&'a Item> for PayloadItem<'a> {
    fn from(item: &'a Item) -> Self {
        let answers = item
            .answers
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_empty())
            .map(|(i, f)| (format!("answer{}", i + 1), f.payload_text()))
            .collect();
        Self {
            questionid: &item.id,
            question: item.question.payload_text(),
            answers,
        }
    }
}

/// JSON array of the batch's items, as sent in the user message.
pub fn build_user_payload(items: &[Item]) -> Result<String, serde_json::Error> {
    let payload: Vec<PayloadItem<'_>> = items.iter().map(PayloadItem::from).collect();
    serde_json::to_string_pretty(&payload)
}

/// Full request for one model and one batch payload.
pub fn build_request(config: &RunConfig, slot: &ResolvedSlot, user_payload: &str) -> ChatRequest {
    ChatRequest::new(
        ChatModel::openrouter(&slot.model),
        vec![
            Message::system(config.system_prompt()),
            Message::user(user_payload),
        ],
    )
    .temperature(config.temperature)
    .top_p(config.top_p)
    .max_tokens(config.max_tokens)
    .reasoning(slot.reasoning.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ModelPricing;
    use crate::items::Field;

    fn table() -> PricingTable {
        let mut t = PricingTable::empty();
        t.insert(
            "google/gemini-2.5-flash",
            ModelPricing::per_million(0.3, 2.5).with_thinking(&[]),
        );
        t.insert(
            "google/gemini-2.5-pro",
            ModelPricing::per_million(1.25, 10.0).with_thinking(&[]),
        );
        t.insert(
            "openai/gpt-5-mini",
            ModelPricing::per_million(0.25, 2.0).with_thinking(&["low", "medium", "high"]),
        );
        t.insert(
            "openai/o-none",
            ModelPricing::per_million(1.0, 1.0).with_thinking(&[]),
        );
        t.insert("openai/gpt-4o-mini", ModelPricing::per_million(0.15, 0.6));
        t
    }

    fn resolve(model: &str, value: Option<&str>) -> Result<ResolvedSlot, ReasoningConfigError> {
        let mut slot = ModelSlot::new(model);
        slot.reasoning = value.map(str::to_string);
        resolve_reasoning(0, &slot, &table())
    }

    #[test]
    fn budget_is_clamped_into_range() {
        let low = resolve("google/gemini-2.5-flash", Some("100")).unwrap();
        assert_eq!(low.reasoning, Some(ReasoningParam::ThinkingBudget(512)));

        let high = resolve("google/gemini-2.5-flash", Some("99999")).unwrap();
        assert_eq!(high.reasoning, Some(ReasoningParam::ThinkingBudget(24_576)));

        let pro_low = resolve("google/gemini-2.5-pro", Some("100")).unwrap();
        assert_eq!(pro_low.reasoning, Some(ReasoningParam::ThinkingBudget(128)));

        let ok = resolve("google/gemini-2.5-flash", Some("8192")).unwrap();
        assert_eq!(ok.reasoning, Some(ReasoningParam::ThinkingBudget(8192)));
        assert_eq!(ok.thinking, "Budget: 8192");
    }

    #[test]
    fn blank_or_non_positive_budget_omits_parameter() {
        for value in [None, Some(""), Some("   "), Some("0"), Some("-5")] {
            let slot = resolve("google/gemini-2.5-flash", value).unwrap();
            assert_eq!(slot.reasoning, None, "value {value:?}");
            assert_eq!(slot.thinking, "Off (Blank)");
        }
    }

    #[test]
    fn unparseable_budget_is_an_error() {
        assert!(matches!(
            resolve("google/gemini-2.5-flash", Some("lots")),
            Err(ReasoningConfigError::InvalidBudget { .. })
        ));
    }

    #[test]
    fn effort_must_be_in_declared_set() {
        let ok = resolve("openai/gpt-5-mini", Some("low")).unwrap();
        assert_eq!(
            ok.reasoning,
            Some(ReasoningParam::ReasoningEffort("low".into()))
        );

        let err = resolve("openai/gpt-5-mini", Some("extreme")).unwrap_err();
        assert!(matches!(err, ReasoningConfigError::InvalidEffort { .. }));
        assert!(err.to_string().contains("low, medium, high"));

        assert!(matches!(
            resolve("openai/o-none", Some("low")),
            Err(ReasoningConfigError::EffortNotSupported { .. })
        ));

        let default = resolve("openai/gpt-5-mini", None).unwrap();
        assert_eq!(default.reasoning, None);
        assert_eq!(default.thinking, "Effort: default");
    }

    #[test]
    fn non_reasoning_model_ignores_value() {
        let slot = resolve("openai/gpt-4o-mini", Some("nonsense")).unwrap();
        assert_eq!(slot.reasoning, None);
        assert_eq!(slot.thinking, "N/A");
    }

    #[test]
    fn payload_keeps_ids_and_non_empty_fields() {
        let mut item = Item::new(3401i64, "What is 2+2?")
            .answer("3")
            .answer("")
            .answer("4");
        item.question = Field::text("Look at the chart").with_media();
        let payload = build_user_payload(&[item, Item::new("q-2", "Second")]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed[0]["questionid"], 3401);
        assert_eq!(
            parsed[0]["question"],
            "Look at the chart [Image present - visual content not assessed]"
        );
        assert_eq!(parsed[0]["answer1"], "3");
        assert!(parsed[0].get("answer2").is_none());
        assert_eq!(parsed[0]["answer3"], "4");
        assert_eq!(parsed[1]["questionid"], "q-2");
    }

    #[test]
    fn request_carries_sampling_and_reasoning() {
        let config = RunConfig {
            system_prompt: Some("system".into()),
            ..Default::default()
        };
        let slot = resolve("google/gemini-2.5-flash", Some("1024")).unwrap();
        let req = build_request(&config, &slot, "[]");
        assert_eq!(req.system_content(), Some("system"));
        assert_eq!(req.user_content(), Some("[]"));
        assert_eq!(req.top_p, Some(0.9));
        assert_eq!(req.max_tokens, Some(2000));
        assert_eq!(req.reasoning, Some(ReasoningParam::ThinkingBudget(1024)));
    }
}
