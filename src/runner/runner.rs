//! Runner
//!
//! Drives a bounded multi-turn conversation across agents, following
//! handoffs, and records the run as a trace. The blocking and the streaming
//! entry points share one turn loop; streaming only changes how a turn's
//! response is fetched.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::config::RunConfig;
use super::result::{AgentDescriptor, RunMetadata, RunResult};
use crate::agent::{Agent, AgentResponse};
use crate::core::config::DEFAULT_MODEL;
use crate::core::{RunState, SdkConfig};
use crate::llm::{LlmProvider, Message};
use crate::traces::{NewTrace, RunTrace, TraceStore};

/// Receives streamed text deltas
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send + 'a);

/// Runs agents against a completion provider
///
/// # Example
///
/// ```ignore
/// let runner = Runner::from_config(Arc::new(OpenAiProvider::new(&config)?), &config);
/// let result = runner.run(triage, "My mug arrived broken").await;
/// println!("{:?}", result.metadata.handoff_path);
/// ```
pub struct Runner {
    provider: Arc<dyn LlmProvider>,
    config: RunConfig,
    default_model: String,
    traces: Option<TraceStore>,
    tracing_disabled: bool,
}

impl Runner {
    /// Create a runner with default settings and its own trace store
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            config: RunConfig::default(),
            default_model: DEFAULT_MODEL.to_string(),
            traces: Some(TraceStore::new()),
            tracing_disabled: false,
        }
    }

    /// Create a runner honoring the default model, tracing switches and
    /// retention of `sdk`
    pub fn from_config(provider: Arc<dyn LlmProvider>, sdk: &SdkConfig) -> Self {
        Self {
            provider,
            config: RunConfig::default(),
            default_model: sdk.default_model.clone(),
            traces: Some(TraceStore::from_config(sdk)),
            tracing_disabled: sdk.tracing_disabled,
        }
    }

    /// Set the default per-run configuration
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Model used by agents whose own model is empty
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Record into a shared trace store
    pub fn with_trace_store(mut self, store: TraceStore) -> Self {
        self.traces = Some(store);
        self
    }

    /// Never record traces
    pub fn without_tracing(mut self) -> Self {
        self.traces = None;
        self
    }

    pub fn trace_store(&self) -> Option<&TraceStore> {
        self.traces.as_ref()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Run `agent` on `query`
    pub async fn run(&self, agent: Arc<Agent>, query: &str) -> RunResult {
        self.execute(agent, query, Vec::new(), &self.config, None)
            .await
    }

    /// Run `agent` on `query` with prior conversation turns
    pub async fn run_with_history(
        &self,
        agent: Arc<Agent>,
        query: &str,
        history: Vec<Message>,
    ) -> RunResult {
        self.execute(agent, query, history, &self.config, None)
            .await
    }

    /// Run `agent` on `query`, forwarding text deltas to `on_token`
    ///
    /// Handoffs are followed exactly as in [`run`](Self::run); tokens from
    /// every agent in the chain reach the callback in order.
    pub async fn run_streamed<F>(&self, agent: Arc<Agent>, query: &str, mut on_token: F) -> RunResult
    where
        F: FnMut(&str) + Send,
    {
        let sink: TokenSink<'_> = &mut on_token;
        self.execute(agent, query, Vec::new(), &self.config, Some(sink))
            .await
    }

    /// Run with a one-off configuration and an optional token sink
    pub async fn run_with_config(
        &self,
        agent: Arc<Agent>,
        query: &str,
        history: Vec<Message>,
        config: &RunConfig,
        on_token: Option<TokenSink<'_>>,
    ) -> RunResult {
        self.execute(agent, query, history, config, on_token).await
    }

    // =========================================================================
    // Turn loop
    // =========================================================================

    async fn open_trace(&self, config: &RunConfig, agent: &Agent, query: &str) -> RunTrace {
        let store = match &self.traces {
            Some(store) if !self.tracing_disabled && !config.tracing_disabled => store,
            _ => return RunTrace::disabled(),
        };

        let mut metadata = config.trace_metadata.clone();
        metadata.insert("entry_agent".into(), Value::String(agent.name.clone()));
        metadata.insert("query".into(), Value::String(query.to_string()));

        let mut new_trace = NewTrace::new(&config.workflow_name).with_metadata(metadata);
        if let Some(id) = &config.trace_id {
            new_trace = new_trace.with_id(id);
        }
        if let Some(group) = &config.group_id {
            new_trace = new_trace.with_group_id(group);
        }
        if let Some(session) = &config.session_id {
            new_trace = new_trace.with_session_id(session);
        }

        RunTrace::start(store, new_trace).await
    }

    fn advance(state: &mut RunState, next: RunState) {
        if !state.can_transition_to(&next) {
            tracing::warn!("[Runner] Unexpected transition: {} -> {}", state, next);
        }
        tracing::debug!("[Runner] {}", next);
        *state = next;
    }

    async fn fetch_turn(
        &self,
        agent: &Agent,
        query: &str,
        history: &[Message],
        on_token: Option<&mut (dyn FnMut(&str) + Send + '_)>,
    ) -> Result<AgentResponse> {
        let provider = self.provider.as_ref();
        match on_token {
            Some(sink) => {
                agent
                    .process_streamed_with_model(provider, &self.default_model, query, history, sink)
                    .await
            }
            None => {
                agent
                    .process_with_model(provider, &self.default_model, query, history)
                    .await
            }
        }
    }

    async fn execute(
        &self,
        agent: Arc<Agent>,
        query: &str,
        mut history: Vec<Message>,
        config: &RunConfig,
        mut on_token: Option<TokenSink<'_>>,
    ) -> RunResult {
        let started = Instant::now();
        let mut state = RunState::Starting;

        tracing::info!(
            "[Runner] Starting run with {} (max_turns={}, streaming={})",
            agent.name,
            config.max_turns,
            on_token.is_some()
        );

        let recorder = self.open_trace(config, &agent, query).await;
        let mut current = agent;
        let mut handoff_path = vec![current.name.clone()];
        let mut turns = 0usize;

        let outcome: Result<(String, bool)> = loop {
            turns += 1;
            Self::advance(&mut state, RunState::awaiting(&current.name, turns));

            let agent_span = recorder
                .start_agent_span(&current, &self.default_model, turns, query)
                .await;

            let sink = on_token.as_mut().map(|sink| &mut **sink);
            let response = match self.fetch_turn(&current, query, &history, sink).await {
                Ok(response) => response,
                // The agent span stays open
                Err(e) => break Err(e),
            };

            recorder
                .end_agent_span(agent_span.as_deref(), &response.content)
                .await;

            let Some(handoff) = response.handoff else {
                break Ok((response.content, false));
            };

            if turns >= config.max_turns {
                tracing::warn!(
                    "[Runner] Turn budget of {} exhausted, ignoring handoff {} -> {}",
                    config.max_turns,
                    current.name,
                    handoff.target.name
                );
                break Ok((response.content, true));
            }

            Self::advance(
                &mut state,
                RunState::handoff(&current.name, &handoff.target.name),
            );
            tracing::info!(
                "[Runner] Handoff {} -> {} (reason: {})",
                current.name,
                handoff.target.name,
                handoff.reason.as_deref().unwrap_or("none")
            );

            let handoff_span = recorder
                .start_handoff_span(agent_span.as_deref(), &current, &handoff)
                .await;
            if !response.content.is_empty() {
                history.push(Message::assistant(response.content));
            }
            current = handoff.target.clone();
            handoff_path.push(current.name.clone());
            recorder.end_handoff_span(handoff_span.as_deref()).await;
        };

        let metadata = RunMetadata {
            handoff_path,
            execution_time_ms: started.elapsed().as_millis() as u64,
            turns,
            last_agent: Some(AgentDescriptor::new(&current, &self.default_model)),
            trace_id: recorder.trace_id().map(str::to_string),
            truncated: matches!(outcome, Ok((_, true))),
        };

        match outcome {
            Ok((output, truncated)) => {
                Self::advance(&mut state, RunState::Completed { truncated });
                recorder.finish(true, None).await;
                tracing::info!(
                    "[Runner] Completed after {} turn(s) in {}ms, path: {}",
                    metadata.turns,
                    metadata.execution_time_ms,
                    metadata.handoff_path.join(" -> ")
                );
                RunResult::completed(output, metadata)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                Self::advance(&mut state, RunState::failed(&message));
                recorder.finish(false, Some(&message)).await;
                tracing::error!(
                    "[Runner] Run failed on turn {} ({}): {}",
                    metadata.turns,
                    current.name,
                    message
                );
                RunResult::failed(message, metadata)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, ScriptedProvider, ScriptedReply,
        ToolCall,
    };
    use crate::traces::{SpanKind, TraceStatus};

    fn runner(llm: &Arc<ScriptedProvider>) -> Runner {
        Runner::new(llm.clone())
    }

    /// Build `Agent 0 -> Agent 1 -> ... -> Agent n-1`, returning the head
    fn chain(n: usize) -> Arc<Agent> {
        let mut next: Option<Arc<Agent>> = None;
        for i in (0..n).rev() {
            let mut agent = Agent::new(format!("Agent {}", i), format!("You are agent {}", i));
            if let Some(target) = next.take() {
                agent = agent.with_handoff_to(target);
            }
            next = Some(Arc::new(agent));
        }
        next.expect("chain needs at least one agent")
    }

    /// Every agent hands off to its first handoff target if it has one
    fn always_hand_off() -> ScriptedProvider {
        ScriptedProvider::from_fn(|request: &CompletionRequest| {
            let system = request.messages[0].text().to_string();
            let text = format!("{} answering", system);
            let message = match request.tool_names().first() {
                Some(tool) => Message::assistant_with_tool_calls(
                    Some(text),
                    vec![ToolCall::new("c", *tool, r#"{"reason":"next"}"#)],
                ),
                None => Message::assistant(text),
            };
            Ok(CompletionResponse::from_message(
                "r",
                &request.model,
                message,
                Some(FinishReason::Stop),
            ))
        })
    }

    #[tokio::test]
    async fn test_single_agent_one_call() {
        let llm = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("Hi there")]));
        let agent = Arc::new(Agent::new("Greeter", "Say hi"));

        let result = runner(&llm).run(agent, "hello").await;

        assert!(result.success);
        assert_eq!(result.final_output.as_deref(), Some("Hi there"));
        assert_eq!(result.metadata.handoff_path, vec!["Greeter"]);
        assert_eq!(result.metadata.turns, 1);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(result.metadata.last_agent.unwrap().name, "Greeter");
    }

    #[tokio::test]
    async fn test_chain_within_budget_visits_every_agent() {
        let llm = Arc::new(always_hand_off());
        let result = runner(&llm).run(chain(5), "question").await;

        assert!(result.success);
        assert!(!result.metadata.truncated);
        assert_eq!(
            result.metadata.handoff_path,
            (0..5).map(|i| format!("Agent {}", i)).collect::<Vec<_>>()
        );
        assert_eq!(result.final_output.as_deref(), Some("You are agent 4 answering"));
        assert_eq!(llm.call_count(), 5);
    }

    #[tokio::test]
    async fn test_long_chain_stops_at_turn_budget() {
        let llm = Arc::new(always_hand_off());
        let result = runner(&llm).run(chain(12), "question").await;

        assert!(result.success);
        assert!(result.metadata.truncated);
        assert_eq!(llm.call_count(), 10);
        assert_eq!(result.metadata.turns, 10);
        assert_eq!(result.metadata.handoff_path.len(), 10);
        assert_eq!(result.final_output.as_deref(), Some("You are agent 9 answering"));
    }

    #[tokio::test]
    async fn test_same_query_resent_with_accumulated_history() {
        let llm = Arc::new(always_hand_off());
        runner(&llm).run(chain(3), "original question").await;

        let requests = llm.requests();
        let last = &requests[2];
        assert_eq!(last.messages.last().unwrap().text(), "original question");
        let assistant_turns: Vec<&str> = last
            .messages
            .iter()
            .filter(|m| m.role == crate::llm::Role::Assistant)
            .map(|m| m.text())
            .collect();
        assert_eq!(
            assistant_turns,
            vec!["You are agent 0 answering", "You are agent 1 answering"]
        );
    }

    #[tokio::test]
    async fn test_triage_to_refund() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::handoff("transfer_to_refund", "damaged item"),
            ScriptedReply::text("I've issued a full refund."),
        ]));
        let refund = Arc::new(Agent::new("Refund", "You process refunds."));
        let triage = Arc::new(Agent::new("Triage", "Route the customer.").with_handoff_to(refund));

        let runner = runner(&llm);
        let result = runner.run(triage, "My mug arrived broken").await;

        assert!(result.success);
        assert_eq!(result.metadata.handoff_path, vec!["Triage", "Refund"]);

        let trace_id = result.metadata.trace_id.unwrap();
        let trace = runner.trace_store().unwrap().get_trace(&trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);

        let handoffs: Vec<_> = trace.spans_of(SpanKind::Handoff).collect();
        assert_eq!(handoffs.len(), 1);
        assert_eq!(handoffs[0].data["reason"], "damaged item");
        assert_eq!(trace.spans_of(SpanKind::Agent).count(), 2);
        assert!(trace.spans.iter().all(|s| s.ended_at.is_some()));
    }

    #[tokio::test]
    async fn test_network_error_leaves_agent_span_open() {
        let llm = Arc::new(ScriptedProvider::new(vec![ScriptedReply::error(
            "connection refused",
        )]));
        let runner = runner(&llm);
        let result = runner
            .run(Arc::new(Agent::new("Triage", "Route.")), "hi")
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert!(result.final_output.is_none());
        assert_eq!(result.metadata.handoff_path, vec!["Triage"]);

        let trace_id = result.metadata.trace_id.unwrap();
        let trace = runner.trace_store().unwrap().get_trace(&trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Error);
        assert_eq!(trace.spans.len(), 1);
        assert!(trace.spans[0].ended_at.is_none());
    }

    #[tokio::test]
    async fn test_streamed_run_follows_handoffs() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::ToolCall {
                name: "transfer_to_refund".into(),
                arguments: r#"{"reason":"damaged item"}"#.into(),
                content: Some("Transferring you".into()),
            },
            ScriptedReply::text("Refund issued today"),
        ]));
        let refund = Arc::new(Agent::new("Refund", "You process refunds."));
        let triage = Arc::new(Agent::new("Triage", "Route.").with_handoff_to(refund));

        let mut streamed = String::new();
        let result = runner(&llm)
            .run_streamed(triage, "broken mug", |token| streamed.push_str(token))
            .await;

        assert!(result.success);
        assert_eq!(result.metadata.handoff_path, vec!["Triage", "Refund"]);
        assert_eq!(result.final_output.as_deref(), Some("Refund issued today"));
        assert_eq!(streamed, "Transferring youRefund issued today");
    }

    #[tokio::test]
    async fn test_colliding_names_route_to_selected_edge() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::handoff("transfer_to_billing_team_2", "eu invoice"),
            ScriptedReply::text("EU billing here"),
        ]));
        let us = Arc::new(Agent::new("Billing Team", "US billing"));
        let eu = Arc::new(Agent::new("billing-team", "EU billing"));
        let triage = Arc::new(
            Agent::new("Triage", "Route.")
                .with_handoff_to(us)
                .with_handoff_to(eu),
        );

        let result = runner(&llm).run(triage, "invoice question").await;
        assert_eq!(result.metadata.handoff_path, vec!["Triage", "billing-team"]);
        assert_eq!(llm.requests()[1].messages[0].text(), "EU billing");
    }

    #[tokio::test]
    async fn test_tracing_disabled_per_call_and_globally() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::text("a"),
            ScriptedReply::text("b"),
        ]));
        let agent = Arc::new(Agent::new("A", "test"));

        let runner = runner(&llm);
        let config = RunConfig::new().with_tracing_disabled(true);
        let result = runner
            .run_with_config(agent.clone(), "q", Vec::new(), &config, None)
            .await;
        assert!(result.success);
        assert!(result.metadata.trace_id.is_none());
        assert!(runner.trace_store().unwrap().is_empty().await);

        let sdk = SdkConfig::new().with_tracing_disabled(true);
        let result = Runner::from_config(llm.clone(), &sdk).run(agent, "q").await;
        assert!(result.success);
        assert!(result.metadata.trace_id.is_none());
    }

    #[tokio::test]
    async fn test_run_config_shapes_trace() {
        let llm = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("ok")]));
        let store = TraceStore::new();
        let runner = Runner::new(llm.clone())
            .with_trace_store(store.clone())
            .with_config(
                RunConfig::new()
                    .with_workflow_name("Support")
                    .with_trace_id("trace_fixed")
                    .with_group_id("conv-7")
                    .with_trace_metadata("channel", "email"),
            );

        let mut sub = store.subscribe("trace_fixed").await;
        let result = runner.run(Arc::new(Agent::new("A", "test")), "q").await;
        assert_eq!(result.metadata.trace_id.as_deref(), Some("trace_fixed"));

        let trace = store.get_trace("trace_fixed").await.unwrap();
        assert_eq!(trace.workflow_name, "Support");
        assert_eq!(trace.group_id.as_deref(), Some("conv-7"));
        assert_eq!(trace.metadata["channel"], "email");
        assert_eq!(trace.metadata["entry_agent"], "A");

        let mut changes = 0;
        while sub.try_recv().is_some() {
            changes += 1;
        }
        // created, agent span added, content updated, span ended, status changed
        assert_eq!(changes, 5);
    }

    #[tokio::test]
    async fn test_config_default_model_fills_empty_agent_models() {
        let llm = Arc::new(always_hand_off());
        let second = Arc::new(Agent::new("B", "x"));
        let first = Arc::new(Agent::new("A", "x").with_model("").with_handoff_to(second));

        let sdk = SdkConfig::new().with_default_model("gpt-custom");
        let runner = Runner::from_config(llm.clone(), &sdk);
        let result = runner.run(first, "q").await;

        let models: Vec<String> = llm.requests().into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec!["gpt-custom", "gpt-custom"]);
        assert_eq!(result.metadata.last_agent.unwrap().model, "gpt-custom");

        let trace_id = result.metadata.trace_id.unwrap();
        let trace = runner.trace_store().unwrap().get_trace(&trace_id).await.unwrap();
        assert!(trace
            .spans_of(SpanKind::Agent)
            .all(|span| span.data["model"] == "gpt-custom"));
    }

    #[tokio::test]
    async fn test_agent_model_wins_over_default() {
        let llm = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("ok")]));
        let agent = Arc::new(Agent::new("A", "x").with_model("gpt-4o"));

        Runner::new(llm.clone())
            .with_default_model("gpt-custom")
            .run(agent, "q")
            .await;

        assert_eq!(llm.requests()[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_history_is_forwarded() {
        let llm = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("sure")]));
        let history = vec![Message::user("earlier"), Message::assistant("noted")];
        let result = runner(&llm)
            .run_with_history(Arc::new(Agent::new("A", "test")), "again", history)
            .await;

        assert!(result.success);
        assert_eq!(llm.requests()[0].messages.len(), 4);
    }
}
