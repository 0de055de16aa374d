//! Error types for the provider gateway.

use std::time::Duration;
use thiserror::Error;

/// Remediation hint attached to authentication failures.
pub const AUTH_HINT: &str = "AUTHENTICATION FAILED - check OPENROUTER_API_KEY";

/// Coarse classification used when an error is turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request never produced an HTTP response (timeout, connection failure).
    Transport,
    /// A response arrived but was unusable (bad status, empty or malformed body).
    Protocol,
    /// The gateway itself was misconfigured.
    Configuration,
}

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "invalid_api_key").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling providers.
///
/// None of these are retried: a failure is terminal for the (batch, model)
/// pair that produced it.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Connection failure or any other transport-level exception.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}{}", status_suffix(.detail, .status))]
    Status {
        status: u16,
        detail: Option<String>,
        context: ErrorContext,
    },

    /// Success status with an empty body.
    #[error("empty response from provider")]
    EmptyBody { context: ErrorContext },

    /// Success status with a body that is not a usable completion.
    #[error("invalid JSON response: {message}")]
    MalformedBody {
        message: String,
        context: ErrorContext,
    },

    /// Configuration error (missing API key, bad header value, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(detail: &Option<String>, status: &u16) -> String {
    let mut out = String::new();
    if let Some(detail) = detail.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str(" - ");
        out.push_str(detail.trim());
    }
    if *status == 401 {
        out.push_str(" (");
        out.push_str(AUTH_HINT);
        out.push(')');
    }
    out
}

impl ProviderError {
    /// Create a status error.
    pub fn status(status: u16, detail: Option<String>, context: ErrorContext) -> Self {
        Self::Status {
            status,
            detail,
            context,
        }
    }

    /// Create a malformed-body error.
    pub fn malformed(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::MalformedBody {
            message: message.into(),
            context,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Which layer failed.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Transport(_) => ErrorClass::Transport,
            Self::Status { .. } | Self::EmptyBody { .. } | Self::MalformedBody { .. } => {
                ErrorClass::Protocol
            }
            Self::Config(_) => ErrorClass::Configuration,
        }
    }

    /// Whether this is an authentication failure (HTTP 401).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport_error",
            Self::Status { status: 401, .. } => "auth_failed",
            Self::Status { .. } => "http_status",
            Self::EmptyBody { .. } => "empty_body",
            Self::MalformedBody { .. } => "malformed_body",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Status { context, .. } => Some(context),
            Self::EmptyBody { context } => Some(context),
            Self::MalformedBody { context, .. } => Some(context),
            Self::Timeout(_) | Self::Transport(_) | Self::Config(_) => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_carries_remediation_hint() {
        let err = ProviderError::status(
            401,
            Some("No auth credentials found".into()),
            ErrorContext::new().with_status(401),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("HTTP 401 - No auth credentials found"));
        assert!(msg.contains(AUTH_HINT));
        assert!(err.is_auth_failure());
        assert_eq!(err.class(), ErrorClass::Protocol);
    }

    #[test]
    fn plain_status_has_no_hint() {
        let err = ProviderError::status(503, None, ErrorContext::new());
        assert_eq!(err.to_string(), "HTTP 503");
        assert_eq!(err.code(), "http_status");
    }

    #[test]
    fn timeout_is_transport_class() {
        let err = ProviderError::Timeout(Duration::from_secs(30));
        assert_eq!(err.class(), ErrorClass::Transport);
        assert!(err.context().is_none());
    }
}
