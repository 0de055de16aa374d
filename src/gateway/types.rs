//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// MESSAGES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Chat model specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatModel {
    /// OpenRouter model, e.g. "google/gemini-2.5-flash"
    OpenRouter(String),
}

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        ChatModel::OpenRouter(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ChatModel::OpenRouter(id) => id,
        }
    }
}

/// Optional extended-reasoning parameter, one per model family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningParam {
    /// Numeric thinking-token budget (Gemini-style models).
    ThinkingBudget(u32),
    /// Enumerated effort level (OpenAI-style models).
    ReasoningEffort(String),
}

impl ReasoningParam {
    /// Short human-readable form, e.g. "Budget: 8192".
    pub fn describe(&self) -> String {
        match self {
            ReasoningParam::ThinkingBudget(b) => format!("Budget: {b}"),
            ReasoningParam::ReasoningEffort(e) => format!("Effort: {e}"),
        }
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use.
    pub model: ChatModel,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Extended-reasoning parameter, if the model family takes one.
    pub reasoning: Option<ReasoningParam>,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
            reasoning: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn reasoning(mut self, param: Option<ReasoningParam>) -> Self {
        self.reasoning = param;
        self
    }

    /// Content of the first system message, if any.
    pub fn system_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the first user message, if any.
    pub fn user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Unknown(other) => other,
        }
    }
}

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Hidden reasoning/thinking tokens; billed at the output rate.
    pub reasoning_tokens: u64,
    /// Total as reported by the provider (may differ from the sum).
    pub reported_total: u64,
}

impl TokenUsage {
    /// Input + output + reasoning.
    pub fn billable_total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.reasoning_tokens
    }
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Token usage.
    pub usage: TokenUsage,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
    /// Raw response body, kept for archival.
    pub raw_body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_sampling_parameters() {
        let req = ChatRequest::new(
            ChatModel::openrouter("openai/gpt-5-mini"),
            vec![Message::system("sys"), Message::user("payload")],
        )
        .temperature(0.3)
        .top_p(0.9)
        .max_tokens(2000)
        .reasoning(Some(ReasoningParam::ReasoningEffort("low".into())));

        assert_eq!(req.temperature, 0.3);
        assert_eq!(req.top_p, Some(0.9));
        assert_eq!(req.max_tokens, Some(2000));
        assert_eq!(req.system_content(), Some("sys"));
        assert_eq!(req.user_content(), Some("payload"));
        assert_eq!(
            req.reasoning.as_ref().map(ReasoningParam::describe).as_deref(),
            Some("Effort: low")
        );
    }

    #[test]
    fn billable_total_includes_reasoning() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
            reasoning_tokens: 60,
            reported_total: 140,
        };
        assert_eq!(usage.billable_total(), 200);
    }
}
