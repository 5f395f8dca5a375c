//! Handoff edges between agents
//!
//! Each handoff is exposed to the model as one function tool. The tool names
//! sent in a request are registered in a per-request [`HandoffTable`]; a tool
//! call is resolved by exact lookup in that table, so two targets whose names
//! normalize to the same string still get distinct tools and cannot be
//! confused.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::agent::Agent;
use crate::llm::{ToolCall, ToolDefinition};

/// Prefix of generated handoff tool names
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

fn non_identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9_]+").expect("static pattern"))
}

/// Default tool name for a handoff to an agent with this display name
///
/// Lower-cases the name and collapses every run of characters outside
/// `[a-z0-9_]` into a single underscore: `"Refund Agent"` becomes
/// `transfer_to_refund_agent`.
pub fn default_tool_name(agent_name: &str) -> String {
    let lowered = agent_name.to_lowercase();
    let normalized = non_identifier().replace_all(&lowered, "_");
    let normalized = normalized.trim_matches('_');
    if normalized.is_empty() {
        format!("{}agent", HANDOFF_TOOL_PREFIX)
    } else {
        format!("{}{}", HANDOFF_TOOL_PREFIX, normalized)
    }
}

/// One delegation edge from an agent to a target agent
#[derive(Clone)]
pub struct Handoff {
    id: String,
    target: Arc<Agent>,
    tool_name: String,
    tool_description: String,
}

impl Handoff {
    /// Create a handoff to `target` with a generated tool name and description
    pub fn new(target: Arc<Agent>) -> Self {
        let tool_name = default_tool_name(&target.name);
        let tool_description = match &target.handoff_description {
            Some(desc) => format!("Handoff to the {} agent. {}", target.name, desc),
            None => format!(
                "Handoff to the {} agent to handle the request.",
                target.name
            ),
        };

        Self {
            id: format!("handoff_{}", uuid::Uuid::new_v4().simple()),
            target,
            tool_name,
            tool_description,
        }
    }

    /// Override the tool name shown to the model
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Override the tool description shown to the model
    pub fn with_tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description = description.into();
        self
    }

    /// Stable id of this edge
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &Arc<Agent> {
        &self.target
    }

    /// Preferred tool name (may be suffixed in a request if it collides)
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_description(&self) -> &str {
        &self.tool_description
    }

    fn tool_definition(&self, name: &str) -> ToolDefinition {
        ToolDefinition::function(
            name,
            self.tool_description.clone(),
            json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why the conversation is being handed off"
                    }
                },
                "additionalProperties": false
            }),
        )
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("id", &self.id)
            .field("target", &self.target.name)
            .field("tool_name", &self.tool_name)
            .finish()
    }
}

/// A handoff selected by the model
#[derive(Debug, Clone)]
pub struct HandoffRequest {
    /// Id of the edge that was selected
    pub handoff_id: String,
    /// Tool name the model called
    pub tool_name: String,
    /// Agent that takes over
    pub target: Arc<Agent>,
    /// Free-text reason from the tool arguments
    pub reason: Option<String>,
}

/// Tool name to handoff index mapping for one request
#[derive(Debug, Default)]
pub(crate) struct HandoffTable {
    by_tool: HashMap<String, usize>,
}

impl HandoffTable {
    /// Register every handoff under a unique tool name and return the tools to send.
    ///
    /// `reserved` holds names already used by the agent's own tools.
    pub(crate) fn build(handoffs: &[Handoff], reserved: &[&str]) -> (Self, Vec<ToolDefinition>) {
        let mut table = HandoffTable::default();
        let mut tools = Vec::with_capacity(handoffs.len());

        for (index, handoff) in handoffs.iter().enumerate() {
            let base = handoff.tool_name().to_string();
            let mut name = base.clone();
            let mut suffix = 2;
            while table.by_tool.contains_key(&name) || reserved.contains(&name.as_str()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }

            if name != base {
                tracing::warn!(
                    "[Handoff] Tool name {} already taken, using {} for target {}",
                    base,
                    name,
                    handoff.target().name
                );
            }

            tools.push(handoff.tool_definition(&name));
            table.by_tool.insert(name, index);
        }

        (table, tools)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_tool.is_empty()
    }

    /// Resolve a tool call against the table
    pub(crate) fn resolve(&self, handoffs: &[Handoff], call: &ToolCall) -> Option<HandoffRequest> {
        let index = *self.by_tool.get(&call.function.name)?;
        let handoff = handoffs.get(index)?;

        let reason = call
            .parsed_arguments()
            .as_ref()
            .and_then(|args| args.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(HandoffRequest {
            handoff_id: handoff.id().to_string(),
            tool_name: call.function.name.clone(),
            target: handoff.target().clone(),
            reason,
        })
    }
}
