//! Agent persona and its single request/response cycle

use anyhow::Result;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::{AgentOverrides, ModelSettings};
use super::handoff::{Handoff, HandoffRequest, HandoffTable};
use crate::core::config::DEFAULT_MODEL;
use crate::llm::{
    CompletionRequest, LlmProvider, Message, StreamEvent, ToolCall, ToolDefinition, Usage,
};

/// Outcome of one `process` call
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Assistant text (empty if the model only called a tool)
    pub content: String,
    /// Handoff selected by the model, if any
    pub handoff: Option<HandoffRequest>,
    /// Token usage, when the backend reports it
    pub usage: Option<Usage>,
}

/// A configured LLM persona
///
/// Agents are immutable once built and shared as `Arc<Agent>`. Use
/// [`Agent::clone_with`] to derive a variant.
///
/// ```ignore
/// let refund = Arc::new(Agent::new("Refund", "You process refunds."));
/// let triage = Arc::new(
///     Agent::new("Triage", "Route the customer to the right team.")
///         .with_handoff_to(refund.clone()),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Agent {
    /// Display name, unique within a workflow by convention
    pub name: String,

    /// System prompt
    pub instructions: String,

    /// Description used in the handoff tool that targets this agent
    pub handoff_description: Option<String>,

    /// Model identifier; empty means the runner's default model
    pub model: String,

    /// Sampling overrides
    pub model_settings: ModelSettings,

    /// Tool declarations forwarded to the completion call
    pub tools: Vec<ToolDefinition>,

    /// Agents this agent may delegate to, in order
    pub handoffs: Vec<Handoff>,
}

impl Agent {
    /// Create an agent that inherits the default model and has no tools or handoffs
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            model: String::new(),
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    /// Add a tool declaration
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a handoff edge
    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Add a handoff to `target` with the generated tool name
    pub fn with_handoff_to(self, target: Arc<Agent>) -> Self {
        self.with_handoff(Handoff::new(target))
    }

    /// Derive a new agent with the given overrides applied
    ///
    /// Model settings are merged field by field; every other override
    /// replaces the field wholesale. The receiver is left untouched.
    pub fn clone_with(&self, overrides: AgentOverrides) -> Agent {
        let mut agent = self.clone();

        if let Some(name) = overrides.name {
            agent.name = name;
        }
        if let Some(instructions) = overrides.instructions {
            agent.instructions = instructions;
        }
        if let Some(description) = overrides.handoff_description {
            agent.handoff_description = Some(description);
        }
        if let Some(model) = overrides.model {
            agent.model = model;
        }
        if let Some(settings) = overrides.model_settings {
            agent.model_settings = agent.model_settings.merge(&settings);
        }
        if let Some(tools) = overrides.tools {
            agent.tools = tools;
        }
        if let Some(handoffs) = overrides.handoffs {
            agent.handoffs = handoffs;
        }

        agent
    }

    /// Model sent to the completion API, falling back to `default_model`
    pub fn resolved_model<'a>(&'a self, default_model: &'a str) -> &'a str {
        if self.model.is_empty() {
            default_model
        } else {
            &self.model
        }
    }

    /// Build the request for one turn plus the handoff lookup table
    fn build_request(
        &self,
        default_model: &str,
        message: &str,
        history: &[Message],
    ) -> (CompletionRequest, HandoffTable) {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.instructions));
        messages.extend_from_slice(history);
        messages.push(Message::user(message));

        let reserved: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        let (table, handoff_tools) = HandoffTable::build(&self.handoffs, &reserved);

        let mut tools = self.tools.clone();
        tools.extend(handoff_tools);

        let mut request = CompletionRequest::new(self.resolved_model(default_model), messages).with_tools(tools);
        self.model_settings.apply(&mut request);

        (request, table)
    }

    /// Pick the first tool call that names a handoff; other calls are ignored
    fn find_handoff(&self, table: &HandoffTable, calls: &[ToolCall]) -> Option<HandoffRequest> {
        if table.is_empty() {
            return None;
        }

        for call in calls {
            match table.resolve(&self.handoffs, call) {
                Some(request) => return Some(request),
                None => tracing::debug!(
                    "[Agent] {} ignoring non-handoff tool call: {}",
                    self.name,
                    call.function.name
                ),
            }
        }

        None
    }

    /// Run one request/response cycle against the completion API
    ///
    /// The request is `[system instructions, ..history, user message]` plus
    /// the agent's tools and one synthesized tool per handoff. Provider
    /// errors propagate unchanged. An empty model falls back to
    /// [`DEFAULT_MODEL`].
    pub async fn process(
        &self,
        provider: &dyn LlmProvider,
        message: &str,
        history: &[Message],
    ) -> Result<AgentResponse> {
        self.process_with_model(provider, DEFAULT_MODEL, message, history)
            .await
    }

    pub(crate) async fn process_with_model(
        &self,
        provider: &dyn LlmProvider,
        default_model: &str,
        message: &str,
        history: &[Message],
    ) -> Result<AgentResponse> {
        let (request, table) = self.build_request(default_model, message, history);

        tracing::info!(
            "[Agent] {} calling {} (model={}, history={}, tools={})",
            self.name,
            provider.provider_name(),
            request.model,
            history.len(),
            request.tool_names().len()
        );

        let response = provider.complete(request).await?;
        let handoff = self.find_handoff(&table, response.tool_calls());

        if let Some(ref h) = handoff {
            tracing::info!(
                "[Agent] {} requested handoff to {} ({:?})",
                self.name,
                h.target.name,
                h.reason
            );
        }

        Ok(AgentResponse {
            content: response.text(),
            handoff,
            usage: response.usage.clone(),
        })
    }

    /// Same as [`process`](Self::process), streaming text deltas to `on_token`
    ///
    /// Tool-call fragments are accumulated and resolved with the same table,
    /// so a streamed turn can still request a handoff.
    pub async fn process_streamed(
        &self,
        provider: &dyn LlmProvider,
        message: &str,
        history: &[Message],
        on_token: &mut (dyn FnMut(&str) + Send + '_),
    ) -> Result<AgentResponse> {
        self.process_streamed_with_model(provider, DEFAULT_MODEL, message, history, on_token)
            .await
    }

    pub(crate) async fn process_streamed_with_model(
        &self,
        provider: &dyn LlmProvider,
        default_model: &str,
        message: &str,
        history: &[Message],
        on_token: &mut (dyn FnMut(&str) + Send + '_),
    ) -> Result<AgentResponse> {
        let (request, table) = self.build_request(default_model, message, history);

        tracing::info!(
            "[Agent] {} streaming from {} (model={}, history={})",
            self.name,
            provider.provider_name(),
            request.model,
            history.len()
        );

        let mut stream = provider.stream(request).await?;

        let mut content = String::new();
        let mut usage = None;
        // Tool calls by stream index: (id, name, arguments)
        let mut partial_calls: BTreeMap<usize, (String, String, String)> = BTreeMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(text) => {
                    content.push_str(&text);
                    on_token(&text);
                }
                StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let entry = partial_calls.entry(index).or_default();
                    if let Some(id) = id {
                        entry.0 = id;
                    }
                    if let Some(name) = name {
                        entry.1.push_str(&name);
                    }
                    entry.2.push_str(&arguments);
                }
                StreamEvent::Usage(u) => usage = Some(u),
                StreamEvent::Finished(reason) => {
                    tracing::debug!("[Agent] {} stream finished: {:?}", self.name, reason);
                }
            }
        }

        let calls: Vec<ToolCall> = partial_calls
            .into_values()
            .map(|(id, name, arguments)| ToolCall::new(id, name, arguments))
            .collect();

        let handoff = self.find_handoff(&table, &calls);

        Ok(AgentResponse {
            content,
            handoff,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, ScriptedProvider, ScriptedReply};
    use serde_json::json;

    fn refund() -> Arc<Agent> {
        Arc::new(Agent::new("Refund", "You process refunds."))
    }

    #[tokio::test]
    async fn test_process_without_handoffs_sends_no_tools() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::text("Hello!")]);
        let agent = Agent::new("Greeter", "Be nice.");

        let history = vec![Message::user("earlier"), Message::assistant("reply")];
        let response = agent.process(&llm, "hi", &history).await.unwrap();

        assert_eq!(response.content, "Hello!");
        assert!(response.handoff.is_none());

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        let sent = &requests[0];
        assert!(sent.tools.is_none());
        assert_eq!(sent.messages.len(), 4);
        assert_eq!(sent.messages[0].role, Role::System);
        assert_eq!(sent.messages[0].text(), "Be nice.");
        assert_eq!(sent.messages[3].text(), "hi");
    }

    #[tokio::test]
    async fn test_process_detects_handoff() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::handoff(
            "transfer_to_refund",
            "damaged item",
        )]);
        let triage = Agent::new("Triage", "Route requests.").with_handoff_to(refund());

        let response = triage.process(&llm, "My mug arrived broken", &[]).await.unwrap();
        let handoff = response.handoff.unwrap();
        assert_eq!(handoff.target.name, "Refund");
        assert_eq!(handoff.reason.as_deref(), Some("damaged item"));
        assert_eq!(handoff.handoff_id, triage.handoffs[0].id());

        let sent = &llm.requests()[0];
        assert_eq!(sent.tool_names(), vec!["transfer_to_refund"]);
    }

    #[tokio::test]
    async fn test_process_ignores_unknown_tool_calls() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::ToolCall {
            name: "lookup_order".into(),
            arguments: "{}".into(),
            content: Some("Checking".into()),
        }]);
        let agent = Agent::new("Triage", "Route.")
            .with_tool(ToolDefinition::function("lookup_order", "", json!({"type": "object"})))
            .with_handoff_to(refund());

        let response = agent.process(&llm, "where is my order", &[]).await.unwrap();
        assert!(response.handoff.is_none());
        assert_eq!(response.content, "Checking");
        assert_eq!(
            llm.requests()[0].tool_names(),
            vec!["lookup_order", "transfer_to_refund"]
        );
    }

    #[tokio::test]
    async fn test_process_propagates_provider_error() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::error("network down")]);
        let agent = Agent::new("Triage", "Route.");
        let err = agent.process(&llm, "hi", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "network down");
    }

    #[tokio::test]
    async fn test_process_streamed_forwards_tokens_and_handoff() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::ToolCall {
            name: "transfer_to_refund".into(),
            arguments: r#"{"reason":"late delivery"}"#.into(),
            content: Some("Let me transfer you".into()),
        }]);
        let triage = Agent::new("Triage", "Route.").with_handoff_to(refund());

        let mut tokens = Vec::new();
        let mut on_token = |t: &str| tokens.push(t.to_string());
        let response = triage
            .process_streamed(&llm, "late", &[], &mut on_token)
            .await
            .unwrap();

        assert_eq!(tokens.concat(), "Let me transfer you");
        assert_eq!(response.content, "Let me transfer you");
        assert_eq!(
            response.handoff.unwrap().reason.as_deref(),
            Some("late delivery")
        );
    }

    #[test]
    fn test_model_settings_applied_to_request() {
        let agent = Agent::new("Precise", "Be exact.").with_model_settings(ModelSettings {
            temperature: Some(0.1),
            top_p: None,
            max_tokens: Some(256),
        });
        let (request, _) = agent.build_request(DEFAULT_MODEL, "q", &[]);
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.top_p, None);
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn test_empty_model_uses_default() {
        let inherits = Agent::new("A", "x");
        let pinned = Agent::new("B", "x").with_model("gpt-4o");

        assert_eq!(inherits.resolved_model("gpt-custom"), "gpt-custom");
        assert_eq!(pinned.resolved_model("gpt-custom"), "gpt-4o");

        let (request, _) = inherits.build_request("gpt-custom", "q", &[]);
        assert_eq!(request.model, "gpt-custom");
    }

    #[tokio::test]
    async fn test_process_falls_back_to_builtin_model() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::text("ok")]);
        Agent::new("A", "x").process(&llm, "q", &[]).await.unwrap();
        assert_eq!(llm.requests()[0].model, DEFAULT_MODEL);
    }

    #[test]
    fn test_clone_with_does_not_mutate_original() {
        let base = Agent::new("Support", "Help.")
            .with_model("gpt-4o")
            .with_model_settings(ModelSettings {
                temperature: Some(0.7),
                top_p: Some(0.9),
                max_tokens: None,
            });

        let derived = base.clone_with(AgentOverrides {
            name: Some("Support (terse)".into()),
            model_settings: Some(ModelSettings {
                temperature: Some(0.0),
                top_p: None,
                max_tokens: Some(64),
            }),
            ..Default::default()
        });

        assert_eq!(base.name, "Support");
        assert_eq!(base.model_settings.temperature, Some(0.7));

        assert_eq!(derived.name, "Support (terse)");
        assert_eq!(derived.model, "gpt-4o");
        assert_eq!(derived.model_settings.temperature, Some(0.0));
        assert_eq!(derived.model_settings.top_p, Some(0.9));
        assert_eq!(derived.model_settings.max_tokens, Some(64));
    }
}
