//! Trace Renderer - Subscribes to a trace and renders progress to the terminal
//!
//! The `TraceRenderer` is an opt-in component that follows one trace id
//! through the store's broadcast layer and prints agent and handoff steps as
//! they happen. It is decoupled from the runner and can be replaced by any
//! other subscriber (web UI, log shipper).

use std::collections::HashSet;

use crate::traces::{SpanKind, TraceChange, TraceStatus, TraceSubscription};

use super::console::Console;

/// Renders live trace updates
///
/// # Example
///
/// ```ignore
/// let sub = store.subscribe("trace_123").await;
/// let render = tokio::spawn(TraceRenderer::new(sub).run());
/// runner.run_with_config(agent, query, vec![], &config.with_trace_id("trace_123"), None).await;
/// render.await?;
/// ```
pub struct TraceRenderer {
    subscription: TraceSubscription,
    console: Console,
}

impl TraceRenderer {
    pub fn new(subscription: TraceSubscription) -> Self {
        Self {
            subscription,
            console: Console::new(),
        }
    }

    pub fn with_console(subscription: TraceSubscription, console: Console) -> Self {
        Self {
            subscription,
            console,
        }
    }

    /// Print updates until the trace finishes or the subscription closes
    ///
    /// Returns the final status if one was observed.
    pub async fn run(mut self) -> Option<TraceStatus> {
        let mut shown: HashSet<String> = HashSet::new();

        while let Some(update) = self.subscription.recv().await {
            match update.change {
                TraceChange::Snapshot | TraceChange::Created => {
                    self.console
                        .print_system(&format!("Tracing {}", update.trace.workflow_name));
                }
                TraceChange::StepAdded { span_id } | TraceChange::StepEnded { span_id } => {
                    let Some(span) = update.trace.span(&span_id) else {
                        continue;
                    };

                    match span.kind {
                        SpanKind::Agent if shown.insert(span.id.clone()) => {
                            self.console.print_system(&format!("{} is working", span.name));
                        }
                        SpanKind::Handoff if span.ended_at.is_some() => {
                            let data = &span.data;
                            self.console.print_handoff(
                                data.get("from_agent").and_then(|v| v.as_str()).unwrap_or("?"),
                                data.get("to_agent").and_then(|v| v.as_str()).unwrap_or("?"),
                                data.get("reason").and_then(|v| v.as_str()),
                            );
                        }
                        _ => {}
                    }
                }
                TraceChange::StepUpdated { .. } => {}
                TraceChange::StatusChanged(status) => {
                    tracing::debug!("[TraceRenderer] {} -> {}", update.trace.id, status.as_str());
                    return Some(status);
                }
            }
        }

        None
    }
}
