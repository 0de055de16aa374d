//! Verdicts, per-call metrics, and run output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{ErrorClass, ProviderError, TokenUsage};
use crate::items::{ItemId, MAX_ANSWERS};

/// Issue text for a field the model left untouched.
pub const NO_CHANGES_NEEDED: &str = "No changes needed.";
/// Issue text for a feedback entry that is not an object.
pub const INVALID_FEEDBACK: &str = "Invalid feedback format.";
/// Error message for an item absent from an otherwise good response.
pub const MISSING_RESPONSE: &str = "Response missing for this item";

// =============================================================================
// FEEDBACK
// =============================================================================

/// Issue and suggested rewrite for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFeedback {
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub rewrite: String,
}

impl FieldFeedback {
    pub fn new(issue: impl Into<String>, rewrite: impl Into<String>) -> Self {
        Self {
            issue: issue.into(),
            rewrite: rewrite.into(),
        }
    }

    pub fn no_changes() -> Self {
        Self::new(NO_CHANGES_NEEDED, "")
    }

    pub fn invalid() -> Self {
        Self::new(INVALID_FEEDBACK, "")
    }
}

/// Feedback per field: the question plus up to five answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub question: FieldFeedback,
    /// Index 0 is `answer1`. None when the model gave no entry.
    pub answers: [Option<FieldFeedback>; MAX_ANSWERS],
}

impl Feedback {
    /// Answer feedback by 1-based position.
    pub fn answer(&self, n: usize) -> Option<&FieldFeedback> {
        n.checked_sub(1)
            .and_then(|i| self.answers.get(i))
            .and_then(Option::as_ref)
    }
}

/// A successful assessment of one item by one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub change_required: bool,
    pub feedback: Feedback,
}

// =============================================================================
// VERDICTS
// =============================================================================

/// Which layer a failed verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout or connection failure.
    Transport,
    /// Bad status, empty or malformed body.
    Protocol,
    /// Body parsed but failed structural validation.
    Schema,
    /// Call succeeded but the item had no entry in the response.
    MissingResponse,
}

impl From<&ProviderError> for ErrorKind {
    fn from(err: &ProviderError) -> Self {
        match err.class() {
            ErrorClass::Transport => ErrorKind::Transport,
            ErrorClass::Protocol | ErrorClass::Configuration => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VerdictError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing() -> Self {
        Self::new(ErrorKind::MissingResponse, MISSING_RESPONSE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerdictOutcome {
    Assessed(Assessment),
    Failed(VerdictError),
}

/// Outcome for one (item, model slot) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub item_id: ItemId,
    /// 0-based slot index.
    pub slot: usize,
    pub model: String,
    /// 1-based batch number.
    pub batch_index: usize,
    pub outcome: VerdictOutcome,
}

impl ItemVerdict {
    pub fn assessment(&self) -> Option<&Assessment> {
        match &self.outcome {
            VerdictOutcome::Assessed(a) => Some(a),
            VerdictOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&VerdictError> {
        match &self.outcome {
            VerdictOutcome::Failed(e) => Some(e),
            VerdictOutcome::Assessed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.assessment().is_some()
    }

    pub fn change_required(&self) -> bool {
        self.assessment().is_some_and(|a| a.change_required)
    }
}

// =============================================================================
// METRICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    Success,
    Error,
}

/// Usage and outcome of one (batch, model) call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub timestamp: DateTime<Utc>,
    /// 1-based batch number.
    pub batch_index: usize,
    /// "Batch_N".
    pub batch_label: String,
    pub slot: usize,
    pub model: String,
    pub status: CallStatus,
    pub item_count: usize,
    #[serde(flatten)]
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// Provider stop reason, when a response was received.
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Raw provider body, when one was received.
    #[serde(default)]
    pub raw_response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchMetrics {
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}

pub fn batch_label(batch_index: usize) -> String {
    format!("Batch_{batch_index}")
}

// =============================================================================
// RUN OUTPUT
// =============================================================================

/// Everything a run produces.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// In batch order, then slot order, then item order.
    pub verdicts: Vec<ItemVerdict>,
    /// One per (batch, enabled slot).
    pub metrics: Vec<BatchMetrics>,
    pub batch_count: usize,
}

impl RunOutput {
    /// Verdicts grouped by item id key.
    pub fn by_item(&self) -> HashMap<String, Vec<&ItemVerdict>> {
        let mut map: HashMap<String, Vec<&ItemVerdict>> = HashMap::new();
        for v in &self.verdicts {
            map.entry(v.item_id.key()).or_default().push(v);
        }
        map
    }

    pub fn verdicts_for_slot(&self, slot: usize) -> impl Iterator<Item = &ItemVerdict> {
        self.verdicts.iter().filter(move |v| v.slot == slot)
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty() && self.metrics.is_empty()
    }
}
