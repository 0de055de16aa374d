//! Items under assessment and the sources that supply them.
//!
//! An item is a question with up to five answer options. Items are read once
//! and never modified by the pipeline.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest answer index an item can carry.
pub const MAX_ANSWERS: usize = 5;

/// Appended to a field whose media content is not assessed.
pub const MEDIA_NOTE: &str = " [Image present - visual content not assessed]";

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Item identifier as it appears in the source: an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Int(i64),
    Text(String),
}

impl ItemId {
    /// Identifier from a JSON value. Integral floats become integers.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Self::Int(f as i64))
                }
            }
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| Self::Text(s.to_string()))
            }
            _ => None,
        }
    }

    /// Comparison key: `1` and `"1"` refer to the same item.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// =============================================================================
// ITEM
// =============================================================================

/// One text field of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub text: String,
    /// The source row carries non-text media for this field.
    #[serde(default)]
    pub has_media: bool,
}

impl Field {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            has_media: false,
        }
    }

    pub fn with_media(mut self) -> Self {
        self.has_media = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && !self.has_media
    }

    /// Text sent to the model, with the media note when applicable.
    pub fn payload_text(&self) -> String {
        if self.has_media {
            format!("{}{MEDIA_NOTE}", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// A question with its answer options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub question: Field,
    /// Answer options in order; index 0 is `answer1`.
    #[serde(default)]
    pub answers: Vec<Field>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: Field::text(question),
            answers: Vec::new(),
        }
    }

    pub fn answer(mut self, text: impl Into<String>) -> Self {
        self.answers.push(Field::text(text));
        self
    }

    /// Answer by 1-based position.
    pub fn answer_at(&self, n: usize) -> Option<&Field> {
        n.checked_sub(1).and_then(|i| self.answers.get(i))
    }
}

/// Decode the HTML entities common in exported question banks and trim.
pub fn clean_text(raw: &str) -> String {
    raw.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

// =============================================================================
// SOURCES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ItemSourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON at record {record}: {source}")]
    Json {
        record: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("record {record}: {reason}")]
    InvalidRecord { record: usize, reason: String },
    #[error("duplicate item id {0}")]
    DuplicateId(String),
}

/// Ordered, indexable collection of items addressed by 1-based row.
pub trait ItemSource {
    fn items(&self) -> &[Item];

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Item at a 1-based row.
    fn row(&self, row: usize) -> Option<&Item> {
        row.checked_sub(1).and_then(|i| self.items().get(i))
    }

    /// Items in the inclusive 1-based range, clamped to what exists.
    fn select(&self, start_row: usize, end_row: Option<usize>) -> &[Item] {
        let items = self.items();
        let start = start_row.max(1) - 1;
        let end = end_row.unwrap_or(items.len()).min(items.len());
        if start >= end {
            return &[];
        }
        &items[start..end]
    }
}

impl ItemSource for Vec<Item> {
    fn items(&self) -> &[Item] {
        self
    }
}

impl ItemSource for [Item] {
    fn items(&self) -> &[Item] {
        self
    }
}

/// Items read from a JSON array or JSONL file of question records.
///
/// Record shape: `{questionid, question, questionImage?, answer1..answer5,
/// answerNImage?, totalanswers?}`.
#[derive(Debug, Clone, Default)]
pub struct JsonItemSource {
    items: Vec<Item>,
}

impl JsonItemSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ItemSourceError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Accepts a JSON array or one JSON object per line.
    pub fn from_json_str(raw: &str) -> Result<Self, ItemSourceError> {
        let records: Vec<Value> = if raw.trim_start().starts_with('[') {
            serde_json::from_str(raw).map_err(|source| ItemSourceError::Json { record: 1, source })?
        } else {
            raw.lines()
                .enumerate()
                .filter(|(_, l)| !l.trim().is_empty())
                .map(|(i, l)| {
                    serde_json::from_str(l)
                        .map_err(|source| ItemSourceError::Json { record: i + 1, source })
                })
                .collect::<Result<_, _>>()?
        };

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let item = item_from_record(i + 1, record)?;
            if !seen.insert(item.id.key()) {
                return Err(ItemSourceError::DuplicateId(item.id.key()));
            }
            items.push(item);
        }
        Ok(Self { items })
    }
}

impl ItemSource for JsonItemSource {
    fn items(&self) -> &[Item] {
        &self.items
    }
}

fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => clean_text(s),
        Some(other) => clean_text(&other.to_string()),
    }
}

fn has_media(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn item_from_record(record: usize, value: &Value) -> Result<Item, ItemSourceError> {
    let obj = value.as_object().ok_or_else(|| ItemSourceError::InvalidRecord {
        record,
        reason: "not a JSON object".into(),
    })?;

    let id = obj
        .get("questionid")
        .and_then(ItemId::from_json)
        .ok_or_else(|| ItemSourceError::InvalidRecord {
            record,
            reason: "missing or invalid questionid".into(),
        })?;

    let question = Field {
        text: value_text(obj.get("question")),
        has_media: has_media(obj.get("questionImage")),
    };

    let declared = obj
        .get("totalanswers")
        .and_then(Value::as_f64)
        .map(|n| (n.max(0.0) as usize).min(MAX_ANSWERS));

    let mut answers: Vec<Field> = (1..=MAX_ANSWERS)
        .map(|n| Field {
            text: value_text(obj.get(&format!("answer{n}"))),
            has_media: has_media(obj.get(&format!("answer{n}Image"))),
        })
        .collect();

    match declared {
        Some(count) => answers.truncate(count),
        None => {
            while answers.last().is_some_and(Field::is_empty) {
                answers.pop();
            }
        }
    }

    Ok(Item {
        id,
        question,
        answers,
    })
}
