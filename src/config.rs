//! Run configuration: model slots, sampling parameters, batching, row range.
//!
//! Loaded once from a JSON file and never mutated during a run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Number of logical model slots.
pub const MAX_SLOTS: usize = 3;

/// Shortest system prompt accepted.
pub const MIN_SYSTEM_PROMPT_CHARS: usize = 100;

/// Longest pause allowed between batches, in seconds.
pub const MAX_REQUEST_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("system prompt {0}")]
    SystemPrompt(String),
}

impl ConfigError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

// =============================================================================
// MODEL SLOTS
// =============================================================================

/// One logical slot bound to a concrete model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelSlot {
    /// OpenRouter model id, e.g. "openai/gpt-4o-mini".
    pub model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Raw reasoning value: a budget for budget-family models, an effort
    /// name for effort-family models. Blank means provider default.
    #[serde(default, deserialize_with = "de_reasoning")]
    pub reasoning: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ModelSlot {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            enabled: true,
            reasoning: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_reasoning(mut self, value: impl Into<String>) -> Self {
        self.reasoning = Some(value.into());
        self
    }

    /// Configured reasoning value, or None when unset or blank.
    pub fn reasoning_value(&self) -> Option<&str> {
        self.reasoning
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Reasoning values may be written as JSON numbers or strings.
fn de_reasoning<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        None => None,
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Int(n)) => Some(n.to_string()),
        Some(Raw::Float(f)) => Some(f.to_string()),
    })
}

/// Default model line-up.
pub fn default_models() -> Vec<ModelSlot> {
    vec![
        ModelSlot::new("anthropic/claude-3-5-haiku-20241022"),
        ModelSlot::new("openai/gpt-4o-mini"),
        ModelSlot::new("google/gemini-2.0-flash-lite"),
    ]
}

/// Display label for a 0-based slot index.
pub fn slot_label(index: usize) -> String {
    format!("Model {}", index + 1)
}

// =============================================================================
// RUN CONFIG
// =============================================================================

/// Immutable configuration for one run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_models")]
    pub models: Vec<ModelSlot>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 1-based, inclusive.
    #[serde(default = "default_start_row")]
    pub start_row: usize,
    /// 1-based, inclusive. None runs to the last item.
    #[serde(default)]
    pub end_row: Option<usize>,
    /// Pause between batches, in seconds.
    #[serde(default)]
    pub request_delay_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Read into `system_prompt` at load time; relative to the config file.
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    /// Extra pricing rows layered over the built-in registry.
    #[serde(default)]
    pub pricing_file: Option<PathBuf>,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_batch_size() -> usize {
    5
}

fn default_start_row() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            batch_size: default_batch_size(),
            start_row: default_start_row(),
            end_row: None,
            request_delay_secs: 0.0,
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
            system_prompt_file: None,
            pricing_file: None,
        }
    }
}

impl RunConfig {
    /// Read, resolve file references, and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RunConfig = serde_json::from_str(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(file) = config.system_prompt_file.as_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        if let Some(file) = config.pricing_file.as_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }

        config.resolve_system_prompt()?.validate()
    }

    /// Load `system_prompt_file` into `system_prompt` when no inline prompt is set.
    pub fn resolve_system_prompt(mut self) -> Result<Self, ConfigError> {
        let inline = self
            .system_prompt
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if !inline {
            if let Some(path) = &self.system_prompt_file {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.system_prompt = Some(text);
            }
        }
        Ok(self)
    }

    /// Check ranges and normalize the row range.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.models.len() > MAX_SLOTS {
            return Err(ConfigError::invalid(format!(
                "at most {MAX_SLOTS} model slots, got {}",
                self.models.len()
            )));
        }
        for (i, slot) in self.models.iter().enumerate() {
            if slot.enabled && slot.model.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "{} is enabled but has no model id",
                    slot_label(i)
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be at least 1"));
        }
        if self.start_row < 1 {
            warn!(start_row = self.start_row, "start_row below 1; using 1");
            self.start_row = 1;
        }
        if let Some(end) = self.end_row {
            if end < self.start_row {
                return Err(ConfigError::invalid(format!(
                    "end_row {end} is before start_row {}",
                    self.start_row
                )));
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::invalid(format!(
                "top_p {} outside [0, 1]",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("max_tokens must be positive"));
        }
        if !(0.0..=MAX_REQUEST_DELAY_SECS).contains(&self.request_delay_secs) {
            return Err(ConfigError::invalid(format!(
                "request_delay_secs {} outside [0, {MAX_REQUEST_DELAY_SECS}]",
                self.request_delay_secs
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout_secs must be positive"));
        }

        let prompt = self.system_prompt.as_deref().map(str::trim).unwrap_or("");
        if prompt.is_empty() {
            return Err(ConfigError::SystemPrompt(
                "is missing (set system_prompt or system_prompt_file)".into(),
            ));
        }
        let chars = prompt.chars().count();
        if chars < MIN_SYSTEM_PROMPT_CHARS {
            return Err(ConfigError::SystemPrompt(format!(
                "is too short ({chars} chars, need {MIN_SYSTEM_PROMPT_CHARS})"
            )));
        }

        Ok(self)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or_default()
    }

    /// Enabled slots in slot order, with their 0-based index.
    pub fn enabled_slots(&self) -> impl Iterator<Item = (usize, &ModelSlot)> {
        self.models.iter().enumerate().filter(|(_, s)| s.enabled)
    }

    /// Pause between batches. Out-of-range values on an unvalidated config
    /// become zero.
    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_delay_secs.clamp(0.0, MAX_REQUEST_DELAY_SECS))
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Mask an API key for logging: first 8 and last 4 characters.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
