//! LLM Provider trait
//!
//! Abstracts the chat completion interface so the agent layer can run against
//! the HTTP client, a scripted provider in tests, or any other backend.

use anyhow::Result;
use futures::stream::Stream;
use std::pin::Pin;

use super::types::{CompletionRequest, CompletionResponse, StreamEvent};

/// Boxed stream of completion events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Trait for chat completion backends.
///
/// Both methods perform exactly one API round trip. Errors (transport,
/// non-success status, unparsable body) are returned to the caller; no
/// retries happen at this layer.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Send a request with `stream: true` and return the event stream.
    async fn stream(&self, request: CompletionRequest) -> Result<EventStream>;

    /// Get the provider name (e.g., "openai", "scripted").
    fn provider_name(&self) -> &str;
}
