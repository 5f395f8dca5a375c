//! OpenAI chat completions client
//!
//! Direct HTTP client for any OpenAI-compatible `/chat/completions` endpoint,
//! with a plain JSON call and an SSE streaming call.
//!
//! ```ignore
//! let config = SdkConfig::from_env();
//! let llm = OpenAiProvider::new(&config)?;
//! ```

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use super::auth::{credentials_provider, AuthSource, Credentials, CredentialsProvider};
use super::provider::{EventStream, LlmProvider};
use super::types::{CompletionChunk, CompletionRequest, CompletionResponse};
use crate::core::{SdkConfig, SdkError, SdkResult};

/// A parsed server-sent-events line
#[derive(Debug, PartialEq)]
enum SseLine<'a> {
    /// `data: {...}` payload
    Data(&'a str),
    /// `data: [DONE]` terminator
    Done,
}

fn parse_sse_line(line: &str) -> Option<SseLine<'_>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    Some(SseLine::Data(data))
}

/// OpenAI-compatible chat completions provider
///
/// The HTTP client is built on first use and then reused for the lifetime of
/// the provider.
pub struct OpenAiProvider {
    client: OnceLock<Client>,
    auth: AuthSource,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider from an explicit configuration
    ///
    /// Fails with `SdkError::MissingApiKey` if the configuration has no key.
    pub fn new(config: &SdkConfig) -> SdkResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SdkError::MissingApiKey("openai".to_string()))?;

        tracing::info!("[OpenAI] Provider created for {}", config.base_url);

        Ok(Self {
            client: OnceLock::new(),
            auth: AuthSource::Static(Credentials::new(api_key)),
            base_url: config.base_url.clone(),
        })
    }

    /// Create a provider from environment variables (see `SdkConfig::from_env`)
    pub fn from_env() -> Result<Self> {
        let config = SdkConfig::from_env();
        Self::new(&config).context("OPENAI_API_KEY environment variable not set")
    }

    /// Create a provider that asks a callback for credentials before each request
    pub fn with_auth_provider<F, Fut>(config: &SdkConfig, provider: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Credentials>> + Send + 'static,
    {
        Self {
            client: OnceLock::new(),
            auth: AuthSource::Dynamic(Arc::new(credentials_provider(provider))),
            base_url: config.base_url.clone(),
        }
    }

    /// Create a provider from a trait object credentials source
    pub fn with_credentials_provider(
        config: &SdkConfig,
        provider: Arc<dyn CredentialsProvider>,
    ) -> Self {
        Self {
            client: OnceLock::new(),
            auth: AuthSource::Dynamic(provider),
            base_url: config.base_url.clone(),
        }
    }

    fn client(&self) -> &Client {
        self.client.get_or_init(|| {
            tracing::debug!("[OpenAI] Building HTTP client");
            Client::new()
        })
    }

    fn completions_url(base: &str) -> String {
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    /// Send the request and return the raw response after the status check
    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response> {
        let credentials = self
            .auth
            .resolve()
            .await
            .context("Failed to get API credentials")?;
        let base = credentials.base_url.as_deref().unwrap_or(&self.base_url);
        let url = Self::completions_url(base);

        let body = serde_json::to_string(request).context("Failed to serialize request")?;
        tracing::debug!("[OpenAI] Request JSON: {}", body);

        let mut builder = self
            .client()
            .post(&url)
            .bearer_auth(&credentials.api_key)
            .header("Content-Type", "application/json");

        if let Some(org) = &credentials.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .context("Failed to send request to chat completions API")?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            tracing::error!("[OpenAI] API error: {} - {}", status, message);
            return Err(SdkError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse> {
        request.stream = None;
        tracing::info!(
            "[OpenAI] Sending request (model={}, messages={}, tools={})",
            request.model,
            request.messages.len(),
            request.tool_names().len()
        );

        let response = self.post(&request).await?;
        let text = response
            .text()
            .await
            .context("Failed to read chat completions response body")?;
        tracing::debug!("[OpenAI] Response body: {}", text);

        let parsed: CompletionResponse =
            serde_json::from_str(&text).context("Failed to parse chat completions response")?;

        if parsed.choices.is_empty() {
            anyhow::bail!("Chat completions response contained no choices");
        }

        Ok(parsed)
    }

    async fn stream(&self, mut request: CompletionRequest) -> Result<EventStream> {
        request.stream = Some(true);
        tracing::info!(
            "[OpenAI] Streaming request (model={}, messages={})",
            request.model,
            request.messages.len()
        );

        let response = self.post(&request).await?;
        tracing::debug!("[OpenAI] Streaming response started");

        let byte_stream = response.bytes_stream();
        let reader = StreamReader::new(
            byte_stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string()))),
        );
        let buf_reader = tokio::io::BufReader::new(reader);

        let stream = async_stream::try_stream! {
            let mut lines = buf_reader.lines();
            let mut chunks = 0usize;

            while let Some(line) = lines.next_line().await? {
                match parse_sse_line(&line) {
                    None => continue,
                    Some(SseLine::Done) => {
                        tracing::debug!("[OpenAI] Stream: [DONE] after {} chunks", chunks);
                        break;
                    }
                    Some(SseLine::Data(data)) => {
                        let chunk: CompletionChunk = match serde_json::from_str(data) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                tracing::warn!("[OpenAI] Failed to parse streaming chunk: {}", e);
                                continue;
                            }
                        };
                        chunks += 1;
                        for event in chunk.into_events() {
                            yield event;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let result = OpenAiProvider::new(&SdkConfig::new());
        assert!(matches!(result, Err(SdkError::MissingApiKey(_))));

        let provider = OpenAiProvider::new(&SdkConfig::new().with_api_key("sk-test")).unwrap();
        assert_eq!(provider.provider_name(), "openai");
    }

    #[test]
    fn test_client_is_built_lazily_and_cached() {
        let provider = OpenAiProvider::new(&SdkConfig::new().with_api_key("sk-test")).unwrap();
        assert!(provider.client.get().is_none());

        let first = provider.client() as *const Client;
        let second = provider.client() as *const Client;
        assert_eq!(first, second);
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            OpenAiProvider::completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), Some(SseLine::Data("{\"a\":1}")));
        assert_eq!(parse_sse_line("data:{\"a\":1}"), Some(SseLine::Data("{\"a\":1}")));
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseLine::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: "), None);
        assert_eq!(parse_sse_line(""), None);
    }
}
