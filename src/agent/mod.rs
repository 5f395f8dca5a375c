pub mod agent;
pub mod config;
pub mod handoff;

pub use agent::{Agent, AgentResponse};
pub use config::{AgentOverrides, ModelSettings};
pub use handoff::{default_tool_name, Handoff, HandoffRequest, HANDOFF_TOOL_PREFIX};
