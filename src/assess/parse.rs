//! Extraction and validation of the verdict array in model output.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::items::{ItemId, MAX_ANSWERS};

use super::types::{Assessment, Feedback, FieldFeedback};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("response is not a JSON array")]
    NotArray,
    #[error("item {item}: {reason}")]
    Schema { item: String, reason: String },
}

impl ParseError {
    /// The content never reached per-item validation.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, ParseError::NotJson(_) | ParseError::NotArray)
    }
}

impl ParseError {
    fn schema(item: &str, reason: impl Into<String>) -> Self {
        Self::Schema {
            item: item.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Locate the JSON array in raw model output.
///
/// Trims, strips one leading ```` ```json ```` or ```` ``` ```` fence and one
/// trailing ```` ``` ````. If the rest does not start with `[`, returns the
/// span from the first `[` to the last `]`.
///
/// Never fails: with no `[`, or no `]` after it, the fence-stripped text is
/// returned unchanged and the JSON decode that follows reports the error.
pub fn extract_json_array(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```json") {
        text = rest.trim();
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim();
    }

    if text.starts_with('[') {
        return text;
    }

    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Decode the verdict array and index its objects by item id key.
///
/// Entries that are not objects or carry no usable `questionid` are skipped
/// with a warning.
pub fn parse_verdict_array(content: &str) -> Result<HashMap<String, Map<String, Value>>, ParseError> {
    let json = extract_json_array(content);
    let value: Value = serde_json::from_str(json).map_err(ParseError::NotJson)?;
    let Value::Array(entries) = value else {
        return Err(ParseError::NotArray);
    };

    let mut by_id = HashMap::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        let Value::Object(obj) = entry else {
            warn!(index = i, "verdict entry is not an object; ignored");
            continue;
        };
        match obj.get("questionid").and_then(ItemId::from_json) {
            Some(id) => {
                by_id.insert(id.key(), obj);
            }
            None => warn!(index = i, "verdict entry has no questionid; ignored"),
        }
    }
    Ok(by_id)
}

// =============================================================================
// VALIDATION
// =============================================================================

fn text_of(entry: &Map<String, Value>, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

fn field_feedback(value: &Value) -> FieldFeedback {
    match value {
        Value::Object(entry) => {
            let issue = text_of(entry, "issue");
            let rewrite = text_of(entry, "rewrite");
            if issue.trim().is_empty() && rewrite.trim().is_empty() {
                FieldFeedback::no_changes()
            } else {
                FieldFeedback { issue, rewrite }
            }
        }
        _ => FieldFeedback::invalid(),
    }
}

/// Check one verdict object and convert it.
///
/// `change_required` must be 0 or 1 and `feedback` must be an object with a
/// `question` entry. Only `question` and `answer1`..`answer5` are read.
pub fn validate_verdict(item: &str, obj: &Map<String, Value>) -> Result<Assessment, ParseError> {
    let change_required = match obj.get("change_required").and_then(Value::as_f64) {
        Some(v) if v == 0.0 => false,
        Some(v) if v == 1.0 => true,
        Some(v) => {
            return Err(ParseError::schema(
                item,
                format!("change_required must be 0 or 1, got {v}"),
            ))
        }
        None => return Err(ParseError::schema(item, "change_required missing or not a number")),
    };

    let feedback = obj
        .get("feedback")
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::schema(item, "feedback missing or not an object"))?;

    let question = feedback
        .get("question")
        .ok_or_else(|| ParseError::schema(item, "feedback has no question entry"))?;

    let mut answers: [Option<FieldFeedback>; MAX_ANSWERS] = Default::default();
    for (i, slot) in answers.iter_mut().enumerate() {
        match feedback.get(&format!("answer{}", i + 1)) {
            None | Some(Value::Null) => {}
            Some(v) => *slot = Some(field_feedback(v)),
        }
    }

    Ok(Assessment {
        change_required,
        feedback: Feedback {
            question: field_feedback(question),
            answers,
        },
    })
}
