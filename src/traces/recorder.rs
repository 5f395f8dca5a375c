//! Per-run trace recorder
//!
//! Thin layer the runner uses to write agent and handoff spans. When tracing
//! is off every method is a no-op, so the turn loop never branches on it.
//! Bookkeeping failures are logged and swallowed.

use serde_json::Value;

use super::store::TraceStore;
use super::types::{NewTrace, Span, SpanKind, SpanStatus};
use crate::agent::{Agent, HandoffRequest};

/// Recorder bound to one trace, or to nothing
#[derive(Debug, Clone, Default)]
pub struct RunTrace {
    target: Option<(TraceStore, String)>,
}

impl RunTrace {
    /// A recorder that records nothing
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Open a trace in `store` and record into it
    pub async fn start(store: &TraceStore, new_trace: NewTrace) -> Self {
        let trace = store.start_trace(new_trace).await;
        tracing::debug!("[RunTrace] Recording into {}", trace.id);
        Self {
            target: Some((store.clone(), trace.id)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.target.as_ref().map(|(_, id)| id.as_str())
    }

    async fn open(&self, span: impl FnOnce(&str) -> Span) -> Option<String> {
        let (store, trace_id) = self.target.as_ref()?;
        match store.add_span(span(trace_id)).await {
            Ok(span) => Some(span.id),
            Err(e) => {
                tracing::warn!("[RunTrace] Failed to open span: {}", e);
                None
            }
        }
    }

    async fn close(&self, span_id: Option<&str>, status: SpanStatus, content: Option<&str>) {
        let (Some((store, trace_id)), Some(span_id)) = (self.target.as_ref(), span_id) else {
            return;
        };

        if let Some(content) = content {
            let content = content.to_string();
            if let Err(e) = store
                .update_span(trace_id, span_id, |span| span.content = content)
                .await
            {
                tracing::warn!("[RunTrace] Failed to update span {}: {}", span_id, e);
            }
        }

        if let Err(e) = store.end_span(trace_id, span_id, status).await {
            tracing::warn!("[RunTrace] Failed to close span {}: {}", span_id, e);
        }
    }

    /// Open the span for one agent turn
    pub async fn start_agent_span(
        &self,
        agent: &Agent,
        default_model: &str,
        turn: usize,
        input: &str,
    ) -> Option<String> {
        self.open(|trace_id| {
            Span::new(trace_id, SpanKind::Agent, &agent.name)
                .with_field("agent", agent.name.as_str())
                .with_field("model", agent.resolved_model(default_model))
                .with_field("turn", turn)
                .with_field("input", input)
        })
        .await
    }

    /// Close an agent span with the agent's output
    pub async fn end_agent_span(&self, span_id: Option<&str>, output: &str) {
        self.close(span_id, SpanStatus::Completed, Some(output)).await
    }

    /// Open the span for a handoff, nested under the agent span that asked for it
    pub async fn start_handoff_span(
        &self,
        parent_id: Option<&str>,
        from: &Agent,
        request: &HandoffRequest,
    ) -> Option<String> {
        self.open(|trace_id| {
            let span = Span::new(
                trace_id,
                SpanKind::Handoff,
                format!("{} -> {}", from.name, request.target.name),
            )
            .with_field("from_agent", from.name.as_str())
            .with_field("to_agent", request.target.name.as_str())
            .with_field(
                "reason",
                request.reason.clone().map(Value::String).unwrap_or(Value::Null),
            )
            .with_field("handoff_id", request.handoff_id.as_str())
            .with_field("tool_name", request.tool_name.as_str());

            match parent_id {
                Some(parent) => span.with_parent(parent),
                None => span,
            }
        })
        .await
    }

    pub async fn end_handoff_span(&self, span_id: Option<&str>) {
        self.close(span_id, SpanStatus::Completed, None).await
    }

    /// Mark the trace completed or failed
    pub async fn finish(&self, success: bool, error: Option<&str>) {
        let Some((store, trace_id)) = self.target.as_ref() else {
            return;
        };
        if let Err(e) = store.complete_agent_trace(trace_id, success, error).await {
            tracing::warn!("[RunTrace] Failed to complete trace {}: {}", trace_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::TraceStatus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_disabled_recorder_is_noop() {
        let recorder = RunTrace::disabled();
        let agent = Agent::new("A", "test");

        assert!(!recorder.is_enabled());
        assert!(recorder.start_agent_span(&agent, "m", 1, "q").await.is_none());
        recorder.end_agent_span(None, "out").await;
        recorder.finish(true, None).await;
        assert!(recorder.trace_id().is_none());
    }

    #[tokio::test]
    async fn test_agent_and_handoff_spans() {
        let store = TraceStore::new();
        let recorder = RunTrace::start(&store, NewTrace::new("wf")).await;

        let refund = Arc::new(Agent::new("Refund", "test"));
        let triage = Agent::new("Triage", "test").with_handoff_to(refund.clone());
        let request = HandoffRequest {
            handoff_id: triage.handoffs[0].id().to_string(),
            tool_name: "transfer_to_refund".into(),
            target: refund,
            reason: Some("damaged item".into()),
        };

        let agent_span = recorder.start_agent_span(&triage, "m", 1, "broken mug").await;
        recorder.end_agent_span(agent_span.as_deref(), "routing").await;
        let handoff_span = recorder
            .start_handoff_span(agent_span.as_deref(), &triage, &request)
            .await;
        recorder.end_handoff_span(handoff_span.as_deref()).await;
        recorder.finish(true, None).await;

        let trace = store.get_trace(recorder.trace_id().unwrap()).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.spans.len(), 2);

        let agent = &trace.spans[0];
        assert_eq!(agent.content, "routing");
        assert_eq!(agent.data["turn"], 1);

        let handoff = trace.spans_of(SpanKind::Handoff).next().unwrap();
        assert_eq!(handoff.data["reason"], "damaged item");
        assert_eq!(handoff.data["from_agent"], "Triage");
        assert_eq!(handoff.data["to_agent"], "Refund");
        assert_eq!(handoff.parent_id, agent_span);
        assert!(handoff.ended_at.is_some());
    }
}
