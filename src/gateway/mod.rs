//! Provider gateway for OpenRouter chat completions.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;

use std::sync::Arc;

pub use error::{ErrorClass, ErrorContext, ProviderError, AUTH_HINT};
pub use openrouter::OpenRouterAdapter;
pub use pricing::*;
pub use types::*;

/// One chat-completion call per invocation, no retries.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait::async_trait]
impl<G: ChatGateway + ?Sized> ChatGateway for Arc<G> {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}
