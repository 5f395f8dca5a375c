//! Credentials for the chat completions API
//!
//! A provider either holds a fixed key (taken from `SdkConfig`) or asks a
//! callback for credentials before each request, which covers rotating keys
//! and per-request proxy tokens.
//!
//! ```ignore
//! let llm = OpenAiProvider::with_auth_provider(config, || async {
//!     let key = vault.current_openai_key().await?;
//!     Ok(Credentials::new(key))
//! });
//! ```

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Credentials attached to a single request
#[derive(Clone)]
pub struct Credentials {
    /// Bearer token
    pub api_key: String,
    /// Base URL override for this request
    pub base_url: Option<String>,
    /// Value for the `OpenAI-Organization` header
    pub organization: Option<String>,
}

impl Credentials {
    /// Credentials with just a key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            organization: None,
        }
    }

    /// Route requests made with these credentials to another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the organization header
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .finish()
    }
}

/// Boxed future returned by credential callbacks
pub type CredentialsFuture<'a> = Pin<Box<dyn Future<Output = Result<Credentials>> + Send + 'a>>;

/// Source of fresh credentials, consulted before every request
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> CredentialsFuture<'_>;
}

/// Adapter turning an async closure into a `CredentialsProvider`
pub struct FnCredentialsProvider<F> {
    func: F,
}

impl<F, Fut> CredentialsProvider for FnCredentialsProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Credentials>> + Send + 'static,
{
    fn credentials(&self) -> CredentialsFuture<'_> {
        Box::pin((self.func)())
    }
}

/// Wrap an async closure as a credentials provider
pub fn credentials_provider<F, Fut>(func: F) -> FnCredentialsProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Credentials>> + Send + 'static,
{
    FnCredentialsProvider { func }
}

/// Where a provider gets its credentials from
#[derive(Clone)]
pub(crate) enum AuthSource {
    /// Fixed credentials
    Static(Credentials),
    /// Callback consulted per request
    Dynamic(Arc<dyn CredentialsProvider>),
}

impl AuthSource {
    pub(crate) async fn resolve(&self) -> Result<Credentials> {
        match self {
            AuthSource::Static(credentials) => Ok(credentials.clone()),
            AuthSource::Dynamic(provider) => provider.credentials().await,
        }
    }
}
