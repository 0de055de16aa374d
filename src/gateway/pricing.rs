//! Model pricing and capability registry.
//!
//! Rates are USD per million tokens. Each entry also records whether the model
//! supports extended reasoning and, for effort-style models, which effort
//! values it accepts.
//!
//! A small built-in registry covers the default model slots; a JSON file can
//! add or override entries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

use super::types::TokenUsage;

/// Pricing and reasoning capability for a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens (also applied to reasoning tokens).
    pub output_per_million: f64,
    /// Whether the model supports an extended-reasoning mode.
    pub thinking: bool,
    /// Legal effort values, for effort-style models.
    pub thinking_values: Vec<String>,
}

/// Cost split by token class, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub reasoning: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.input + self.output + self.reasoning
    }
}

impl ModelPricing {
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            thinking: false,
            thinking_values: Vec::new(),
        }
    }

    /// Mark as reasoning-capable with the given legal effort values.
    pub fn with_thinking(mut self, values: &[&str]) -> Self {
        self.thinking = true;
        self.thinking_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Cost of the given token counts. Reasoning is billed at the output rate.
    pub fn cost(&self, usage: &TokenUsage) -> CostBreakdown {
        CostBreakdown {
            input: usage.input_tokens as f64 / 1_000_000.0 * self.input_per_million,
            output: usage.output_tokens as f64 / 1_000_000.0 * self.output_per_million,
            reasoning: usage.reasoning_tokens as f64 / 1_000_000.0 * self.output_per_million,
        }
    }
}

// =============================================================================
// REASONING CAPABILITY
// =============================================================================

/// Model family, which decides the shape of the reasoning parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningFamily {
    /// Numeric thinking budget (Gemini).
    Budget,
    /// Enumerated reasoning effort (OpenAI).
    Effort,
}

impl ReasoningFamily {
    pub fn for_model(model_id: &str) -> Option<Self> {
        if model_id.starts_with("google/") {
            Some(Self::Budget)
        } else if model_id.starts_with("openai/") {
            Some(Self::Effort)
        } else {
            None
        }
    }
}

/// Inclusive range accepted for a thinking budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetRange {
    pub min: u32,
    pub max: u32,
}

impl BudgetRange {
    /// Pro variants accept a wider range.
    pub fn for_model(model_id: &str) -> Self {
        if model_id.to_lowercase().contains("pro") {
            Self { min: 128, max: 32_768 }
        } else {
            Self { min: 512, max: 24_576 }
        }
    }
}

/// What reasoning parameter, if any, a model accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningCapability {
    /// No extended reasoning; configured values are ignored.
    None,
    /// Numeric budget clamped into the range.
    Budget(BudgetRange),
    /// Effort value from a closed set (may be empty).
    Effort { allowed: Vec<String> },
}

// =============================================================================
// BUILT-IN REGISTRY
// =============================================================================

const GPT5_EFFORTS: &[&str] = &["minimal", "low", "medium", "high"];

static BUILTIN: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_builtin() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    // Anthropic
    map.insert("anthropic/claude-3-5-haiku", ModelPricing::per_million(0.80, 4.00));
    map.insert("anthropic/claude-3-5-haiku-20241022", ModelPricing::per_million(0.80, 4.00));
    map.insert("anthropic/claude-sonnet-4.5", ModelPricing::per_million(3.00, 15.00));

    // OpenAI
    map.insert("openai/gpt-4o-mini", ModelPricing::per_million(0.15, 0.60));
    map.insert(
        "openai/gpt-5",
        ModelPricing::per_million(1.25, 10.00).with_thinking(GPT5_EFFORTS),
    );
    map.insert(
        "openai/gpt-5-mini",
        ModelPricing::per_million(0.25, 2.00).with_thinking(GPT5_EFFORTS),
    );
    map.insert(
        "openai/gpt-5-nano",
        ModelPricing::per_million(0.05, 0.40).with_thinking(GPT5_EFFORTS),
    );

    // Google
    map.insert("google/gemini-2.0-flash-lite", ModelPricing::per_million(0.075, 0.30));
    map.insert(
        "google/gemini-2.5-flash",
        ModelPricing::per_million(0.30, 2.50).with_thinking(&[]),
    );
    map.insert(
        "google/gemini-2.5-flash-lite",
        ModelPricing::per_million(0.10, 0.40).with_thinking(&[]),
    );
    map.insert(
        "google/gemini-2.5-pro",
        ModelPricing::per_million(1.25, 10.00).with_thinking(&[]),
    );

    map
}

// =============================================================================
// TABLE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pricing JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid pricing row for '{model}': {reason}")]
    InvalidRow { model: String, reason: String },
}

/// One row of a pricing file.
#[derive(Debug, Deserialize)]
struct PricingRow {
    model: String,
    input: f64,
    output: f64,
    #[serde(default)]
    thinking: Option<Flag>,
    #[serde(default)]
    thinking_values: Option<ThinkingValues>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Number(f64),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Number(n) => *n == 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThinkingValues {
    List(Vec<String>),
    Csv(String),
}

impl ThinkingValues {
    fn into_vec(self) -> Vec<String> {
        let raw = match self {
            ThinkingValues::List(v) => v,
            ThinkingValues::Csv(s) => s.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// Lookup table keyed by model identifier.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Empty table: every model costs zero and has no reasoning capability.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in registry.
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .get_or_init(init_builtin)
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Self { entries }
    }

    /// Parse a JSON array of pricing rows. Duplicate models keep the first row.
    pub fn from_json_str(raw: &str) -> Result<Self, PricingError> {
        let rows: Vec<PricingRow> = serde_json::from_str(raw)?;
        let mut entries = HashMap::new();
        for row in rows {
            let model = row.model.trim().to_string();
            if model.is_empty() {
                return Err(PricingError::InvalidRow {
                    model: row.model,
                    reason: "empty model id".into(),
                });
            }
            if row.input < 0.0 || row.output < 0.0 || !row.input.is_finite() || !row.output.is_finite()
            {
                return Err(PricingError::InvalidRow {
                    model,
                    reason: "rates must be finite and non-negative".into(),
                });
            }
            if entries.contains_key(&model) {
                warn!(model = %model, "duplicate pricing row; keeping first occurrence");
                continue;
            }
            let pricing = ModelPricing {
                input_per_million: row.input,
                output_per_million: row.output,
                thinking: row.thinking.map(|f| f.is_set()).unwrap_or(false),
                thinking_values: row
                    .thinking_values
                    .map(ThinkingValues::into_vec)
                    .unwrap_or_default(),
            };
            entries.insert(model, pricing);
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Built-in registry overlaid with the rows of an optional pricing file.
    pub fn load(path: Option<&Path>) -> Result<Self, PricingError> {
        let mut table = Self::builtin();
        if let Some(path) = path {
            table.extend(Self::from_path(path)?);
        }
        Ok(table)
    }

    /// Add entries from `other`, replacing any with the same model id.
    pub fn extend(&mut self, other: PricingTable) {
        self.entries.extend(other.entries);
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.entries.insert(model.into(), pricing);
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelPricing> {
        self.entries.get(model_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cost of a call. Unknown models cost zero.
    pub fn cost(&self, model_id: &str, usage: &TokenUsage) -> CostBreakdown {
        match self.get(model_id) {
            Some(p) => p.cost(usage),
            None => CostBreakdown::default(),
        }
    }

    /// Reasoning parameter shape accepted by a model.
    pub fn reasoning_capability(&self, model_id: &str) -> ReasoningCapability {
        let Some(pricing) = self.get(model_id) else {
            return ReasoningCapability::None;
        };
        if !pricing.thinking {
            return ReasoningCapability::None;
        }
        match ReasoningFamily::for_model(model_id) {
            Some(ReasoningFamily::Budget) => {
                ReasoningCapability::Budget(BudgetRange::for_model(model_id))
            }
            Some(ReasoningFamily::Effort) => ReasoningCapability::Effort {
                allowed: pricing.thinking_values.clone(),
            },
            None => ReasoningCapability::None,
        }
    }
}
