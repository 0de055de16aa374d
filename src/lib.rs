#![forbid(unsafe_code)]

//! # verdict-harness
//!
//! Batch quality assessment of question banks with several LLMs side by side.
//!
//! Questions are sent in fixed-size batches to up to three configured models
//! through OpenRouter. Each model returns a JSON array of per-question
//! verdicts (change required, plus an issue and rewrite per field). Verdicts
//! are validated and matched back to their questions, failures are contained
//! to the batch and model that produced them, and usage is folded into a
//! per-model cost and throughput summary.

pub mod assess;
pub mod config;
pub mod gateway;
pub mod items;
pub mod report;
pub mod sink;

pub use assess::{run_assessment, ItemVerdict, RunError, RunOutput, VerdictOutcome};
pub use config::{ConfigError, ModelSlot, RunConfig};
pub use gateway::{ChatGateway, OpenRouterAdapter, PricingTable, ProviderError};
pub use items::{Item, ItemId, ItemSource, JsonItemSource};
pub use report::{build_summary, render_summary_markdown, RunSummary};
pub use sink::{JsonDirSink, ResultSink, SinkError};
