//! Completion service boundary
//!
//! The remote text-completion service is reached through [`CompletionService`]:
//! it takes a system instruction, an ordered list of `{role, content}` pairs and
//! urgency-sensitive parameters, and yields a stream of text chunks terminated
//! by [`StreamItem::Done`] or an error.

pub mod circuit_breaker;
pub mod client;
pub mod prompt;
pub mod scripted;
pub mod sse;

use crate::conversation::OutgoingMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use client::ChatCompletionsClient;
pub use prompt::{PromptProfile, EMERGENCY_PERSONA, SYSTEM_PROMPT};
pub use scripted::{ScriptedCompletionService, ScriptedRequest, ScriptedStream};

/// One item of an answer stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Opaque text fragment, appended as-is
    Delta(String),
    /// Explicit end-of-stream signal
    Done,
}

/// Stream of answer items
pub type ChunkStream = BoxStream<'static, Result<StreamItem, CompletionError>>;

/// Sampling parameters for one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub urgent: bool,
}

/// Completion service errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    #[error("Completion service is not configured: {0}")]
    NotConfigured(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream error: status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upstream stream error: {0}")]
    StreamError(String),

    #[error("Circuit breaker is open for model {0}")]
    CircuitOpen(String),
}

impl CompletionError {
    /// Whether another model may succeed where this one was throttled
    pub fn is_rate_limited(&self) -> bool {
        match self {
            CompletionError::RateLimited(_) => true,
            CompletionError::Upstream { status, body } => {
                *status == 429 || body.to_lowercase().contains("rate_limit")
            }
            CompletionError::StreamError(message) => message.to_lowercase().contains("rate_limit"),
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout(e.to_string())
        } else {
            CompletionError::RequestFailed(e.to_string())
        }
    }
}

/// A remote text-completion service that streams its answer
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Open an answer stream for `messages`
    ///
    /// Returning `Ok` is the open acknowledgment; failures surfaced before the
    /// first chunk are reported here rather than inside the stream.
    async fn open_stream(
        &self,
        system_prompt: &str,
        messages: &[OutgoingMessage],
        params: &CompletionParams,
    ) -> Result<ChunkStream, CompletionError>;
}
