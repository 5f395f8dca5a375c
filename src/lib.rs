pub mod core;

// Chat completion providers
pub mod llm;

// Agents and handoff edges
pub mod agent;

// Run records, the trace store and persistence
pub mod traces;

// The bounded handoff loop
pub mod runner;

// Optional components
pub mod cli;
pub mod logging;

pub use agent::{Agent, AgentOverrides, Handoff, ModelSettings};
pub use crate::core::{SdkConfig, SdkError, SdkResult};
pub use llm::{LlmProvider, OpenAiProvider, ScriptedProvider, ScriptedReply};
pub use runner::{RunConfig, RunResult, Runner};
pub use traces::{DatabaseTraceProcessor, TraceStore};
