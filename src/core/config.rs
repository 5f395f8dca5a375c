//! SDK configuration
//!
//! All process-level settings (API key, tracing switches, retention) live in
//! one `SdkConfig` value that is handed to the provider, the trace store and
//! the runner when they are constructed. Nothing here is global: two
//! configurations can coexist in one process.

use std::env;
use std::time::Duration;

/// Default base URL for the chat completions API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model used when an agent does not name one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default time a trace stays in the in-memory store
pub const DEFAULT_TRACE_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Configuration shared by the provider, trace store and runner
///
/// ```ignore
/// let config = SdkConfig::from_env()
///     .with_tracing_disabled(false)
///     .with_trace_retention(Duration::from_secs(600));
/// ```
#[derive(Clone, PartialEq)]
pub struct SdkConfig {
    /// API key for the completion API
    pub api_key: Option<String>,

    /// Base URL of the completion API (without `/chat/completions`)
    pub base_url: String,

    /// Model used by agents that leave their model empty
    pub default_model: String,

    /// Key for an external trace exporter
    ///
    /// Nothing in this crate exports traces; the key is carried for a
    /// [`TraceProcessor`](crate::traces::TraceProcessor) that ships them to a
    /// remote backend.
    pub tracing_export_api_key: Option<String>,

    /// Disable trace recording for every runner built from this config
    pub tracing_disabled: bool,

    /// How long a trace stays in the in-memory store after creation
    pub trace_retention: Duration,
}

impl SdkConfig {
    /// Create a configuration with defaults and no API key
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            tracing_export_api_key: None,
            tracing_disabled: false,
            trace_retention: DEFAULT_TRACE_RETENTION,
        }
    }

    /// Build a configuration from environment variables
    ///
    /// Reads:
    /// - `OPENAI_API_KEY` (optional here, required by `OpenAiProvider`)
    /// - `OPENAI_BASE_URL` (optional)
    /// - `OPENAI_MODEL` (optional, defaults to `gpt-4o-mini`)
    /// - `OPENAI_AGENTS_TRACING_EXPORT_API_KEY` (optional)
    /// - `OPENAI_AGENTS_DISABLE_TRACING` (`1`/`true` disables tracing)
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim_end_matches('/').to_string();
            }
        }
        if let Ok(model) = env::var("OPENAI_MODEL") {
            if !model.trim().is_empty() {
                config.default_model = model;
            }
        }
        config.tracing_export_api_key = env::var("OPENAI_AGENTS_TRACING_EXPORT_API_KEY").ok();
        config.tracing_disabled = env::var("OPENAI_AGENTS_DISABLE_TRACING")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        tracing::debug!(
            "[SdkConfig] Loaded from environment (base_url={}, model={}, tracing_disabled={})",
            config.base_url,
            config.default_model,
            config.tracing_disabled
        );

        config
    }

    /// Set the API key for the completion API
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL of the completion API
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the key used for exporting traces
    pub fn with_tracing_export_api_key(mut self, key: impl Into<String>) -> Self {
        self.tracing_export_api_key = Some(key.into());
        self
    }

    /// Enable or disable trace recording
    pub fn with_tracing_disabled(mut self, disabled: bool) -> Self {
        self.tracing_disabled = disabled;
        self
    }

    /// Set the in-memory trace retention window
    pub fn with_trace_retention(mut self, retention: Duration) -> Self {
        self.trace_retention = retention;
        self
    }

    /// Key an external trace exporter should use (falls back to the API key)
    pub fn export_api_key(&self) -> Option<&str> {
        self.tracing_export_api_key
            .as_deref()
            .or(self.api_key.as_deref())
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Keys never end up in logs.
impl std::fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field(
                "tracing_export_api_key",
                &self.tracing_export_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("tracing_disabled", &self.tracing_disabled)
            .field("trace_retention", &self.trace_retention)
            .finish()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
