pub mod auth;
pub mod openai;
pub mod provider;
pub mod scripted;
pub mod types;

pub use auth::{credentials_provider, Credentials, CredentialsProvider};
pub use openai::OpenAiProvider;
pub use provider::{EventStream, LlmProvider};
pub use scripted::{ScriptedProvider, ScriptedReply};
pub use types::{
    Choice, CompletionChunk, CompletionRequest, CompletionResponse, FinishReason,
    FunctionCall, FunctionDefinition, Message, Role, StreamEvent, ToolCall, ToolDefinition,
    Usage,
};
