//! Runner: the bounded handoff loop and its result envelope

pub mod config;
pub mod result;
pub mod runner;

pub use config::{RunConfig, DEFAULT_MAX_TURNS, DEFAULT_WORKFLOW_NAME};
pub use result::{AgentDescriptor, RunMetadata, RunResult};
pub use runner::{Runner, TokenSink};
