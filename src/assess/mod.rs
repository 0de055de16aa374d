//! Batch multi-model assessment pipeline.
//!
//! Items are split into fixed-size batches. Each batch is sent once to every
//! enabled model slot; the model's JSON verdict array is parsed, validated,
//! and matched back to the batch items. Failures are contained to the
//! (batch, model) pair that produced them.

pub mod orchestrator;
pub mod parse;
pub mod reconcile;
pub mod request;
pub mod types;

pub use orchestrator::{manual_test_payload, partition, run_assessment};
pub use parse::{extract_json_array, ParseError};
pub use request::{build_request, build_user_payload, ReasoningConfigError, ResolvedSlot};
pub use types::*;

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Reasoning(#[from] ReasoningConfigError),
    #[error("failed to serialize batch payload: {0}")]
    Payload(#[from] serde_json::Error),
}
