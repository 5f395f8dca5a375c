//! Trace processors
//!
//! A processor observes every mutation the [`TraceStore`](super::TraceStore)
//! applies. Processors run after the store lock is released and must not
//! block; anything slow belongs on a background worker.

use super::types::{Span, Trace};

/// A single trace mutation, carrying the state after the change
#[derive(Debug, Clone)]
pub enum TraceEvent {
    TraceStarted(Trace),
    SpanStarted(Span),
    SpanUpdated(Span),
    SpanEnded(Span),
    /// Status change to completed or error (may fire more than once)
    TraceEnded(Trace),
}

impl TraceEvent {
    pub fn trace_id(&self) -> &str {
        match self {
            TraceEvent::TraceStarted(t) | TraceEvent::TraceEnded(t) => &t.id,
            TraceEvent::SpanStarted(s) | TraceEvent::SpanUpdated(s) | TraceEvent::SpanEnded(s) => {
                &s.trace_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::TraceStarted(_) => "trace_started",
            TraceEvent::SpanStarted(_) => "span_started",
            TraceEvent::SpanUpdated(_) => "span_updated",
            TraceEvent::SpanEnded(_) => "span_ended",
            TraceEvent::TraceEnded(_) => "trace_ended",
        }
    }
}

/// Observer of trace mutations
///
/// Failures inside a processor are its own business: log them, never
/// propagate them back into the run.
pub trait TraceProcessor: Send + Sync {
    fn on_event(&self, event: &TraceEvent);

    /// Called when the owner is shutting down
    fn shutdown(&self) {}
}

/// Processor that writes every event to the `tracing` log
#[derive(Debug, Default)]
pub struct LogTraceProcessor;

impl TraceProcessor for LogTraceProcessor {
    fn on_event(&self, event: &TraceEvent) {
        match event {
            TraceEvent::SpanStarted(span) | TraceEvent::SpanEnded(span) => tracing::debug!(
                "[TraceLog] {} {} {} ({})",
                event.name(),
                span.kind,
                span.name,
                span.trace_id
            ),
            _ => tracing::debug!("[TraceLog] {} {}", event.name(), event.trace_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::types::{NewTrace, SpanKind};

    #[test]
    fn test_event_trace_id() {
        let trace = NewTrace::new("wf").with_id("t-1").into_trace();
        let span = Span::new("t-1", SpanKind::Agent, "A");

        assert_eq!(TraceEvent::TraceStarted(trace).trace_id(), "t-1");
        assert_eq!(TraceEvent::SpanEnded(span.clone()).trace_id(), "t-1");
        assert_eq!(TraceEvent::SpanUpdated(span).name(), "span_updated");
    }
}
