//! Trace store
//!
//! The canonical in-memory record of active traces, independent of any
//! runner. Every mutation is:
//! - applied under the store's write lock
//! - broadcast to subscribers of that trace id (one channel per trace)
//! - forwarded to registered [`TraceProcessor`]s after the lock is released
//!
//! Traces are evicted a fixed retention window after creation, whether or
//! not they have completed.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::RwLock;

use super::processor::{TraceEvent, TraceProcessor};
use super::types::{NewTrace, Span, SpanKind, SpanStatus, Trace, TraceStatus};
use crate::core::config::DEFAULT_TRACE_RETENTION;
use crate::core::{SdkConfig, SdkError, SdkResult};

/// Buffer size of each per-trace update channel
pub const UPDATE_CHANNEL_SIZE: usize = 256;

// ============================================================================
// Updates
// ============================================================================

/// What changed in a trace
#[derive(Debug, Clone, PartialEq)]
pub enum TraceChange {
    /// Current state at subscription time
    Snapshot,
    Created,
    StepAdded { span_id: String },
    StepUpdated { span_id: String },
    StepEnded { span_id: String },
    StatusChanged(TraceStatus),
}

/// One notification delivered to a subscriber
#[derive(Debug, Clone)]
pub struct TraceUpdate {
    pub change: TraceChange,
    /// Trace state after the change
    pub trace: Trace,
}

/// Live view of one trace id
///
/// Dropping the subscription unsubscribes, and dropping the last one for an
/// id releases its channel. Removal or eviction of the trace closes it:
/// `recv` returns `None` once the buffered updates are drained.
pub struct TraceSubscription {
    trace_id: String,
    snapshot: Option<Trace>,
    rx: broadcast::Receiver<TraceUpdate>,
    state: Weak<RwLock<StoreState>>,
}

impl Drop for TraceSubscription {
    fn drop(&mut self) {
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        // Contended: the next subscribe or publish sweeps the channel
        let Ok(mut state) = shared.try_write() else {
            return;
        };

        // Our own receiver is still counted here
        let last = state
            .channels
            .get(&self.trace_id)
            .is_some_and(|tx| tx.receiver_count() <= 1);
        if last {
            state.channels.remove(&self.trace_id);
            tracing::trace!("[TraceStore] Released channel for {}", self.trace_id);
        }
    }
}

impl TraceSubscription {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Next update; the first call yields the snapshot if the trace existed
    pub async fn recv(&mut self) -> Option<TraceUpdate> {
        if let Some(trace) = self.snapshot.take() {
            return Some(TraceUpdate {
                change: TraceChange::Snapshot,
                trace,
            });
        }

        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "[TraceStore] Subscriber for {} lagged, skipped {} updates",
                        self.trace_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<TraceUpdate> {
        if let Some(trace) = self.snapshot.take() {
            return Some(TraceUpdate {
                change: TraceChange::Snapshot,
                trace,
            });
        }

        loop {
            match self.rx.try_recv() {
                Ok(update) => return Some(update),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "[TraceStore] Subscriber for {} lagged, skipped {} updates",
                        self.trace_id,
                        skipped
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Store state
// ============================================================================

struct StoredTrace {
    trace: Trace,
    /// Distinguishes a re-created id from the one an eviction was scheduled for
    generation: u64,
}

#[derive(Default)]
struct StoreState {
    traces: HashMap<String, StoredTrace>,
    channels: HashMap<String, broadcast::Sender<TraceUpdate>>,
    next_generation: u64,
}

impl StoreState {
    fn trace_mut(&mut self, trace_id: &str) -> SdkResult<&mut Trace> {
        self.traces
            .get_mut(trace_id)
            .map(|stored| &mut stored.trace)
            .ok_or_else(|| SdkError::TraceNotFound(trace_id.to_string()))
    }

    /// Send the current state of `trace_id` to its subscribers
    fn publish(&mut self, trace_id: &str, change: TraceChange) {
        let receivers = match self.channels.get(trace_id) {
            Some(tx) => tx.receiver_count(),
            None => return,
        };

        if receivers == 0 {
            self.channels.remove(trace_id);
            return;
        }

        let Some(stored) = self.traces.get(trace_id) else {
            return;
        };
        let update = TraceUpdate {
            change,
            trace: stored.trace.clone(),
        };

        if let Some(tx) = self.channels.get(trace_id) {
            let _ = tx.send(update);
        }
    }
}

// ============================================================================
// TraceStore
// ============================================================================

/// Shared handle to the trace store
///
/// Cheap to clone; all clones see the same traces.
#[derive(Clone)]
pub struct TraceStore {
    state: Arc<RwLock<StoreState>>,
    processors: Arc<Vec<Arc<dyn TraceProcessor>>>,
    retention: Duration,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStore")
            .field("processors", &self.processors.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl TraceStore {
    /// Create an empty store with the default retention window
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            processors: Arc::new(Vec::new()),
            retention: DEFAULT_TRACE_RETENTION,
        }
    }

    /// Create an empty store using the configured retention window
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new().with_retention(config.trace_retention)
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a processor for every subsequent mutation
    pub fn with_processor(mut self, processor: Arc<dyn TraceProcessor>) -> Self {
        Arc::make_mut(&mut self.processors).push(processor);
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn emit(&self, event: impl FnOnce() -> TraceEvent) {
        if self.processors.is_empty() {
            return;
        }
        let event = event();
        for processor in self.processors.iter() {
            processor.on_event(&event);
        }
    }

    /// Shut down every registered processor
    pub fn shutdown(&self) {
        for processor in self.processors.iter() {
            processor.shutdown();
        }
    }

    // =========================================================================
    // Traces
    // =========================================================================

    /// Open a trace
    ///
    /// If a trace with the requested id is already held, it is returned
    /// unchanged and later spans for that id interleave.
    pub async fn start_trace(&self, new_trace: NewTrace) -> Trace {
        let trace = new_trace.into_trace();

        let mut state = self.state.write().await;
        if let Some(existing) = state.traces.get(&trace.id) {
            tracing::warn!("[TraceStore] Trace {} already exists, reusing it", trace.id);
            return existing.trace.clone();
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.traces.insert(
            trace.id.clone(),
            StoredTrace {
                trace: trace.clone(),
                generation,
            },
        );
        state.publish(&trace.id, TraceChange::Created);
        drop(state);

        tracing::debug!(
            "[TraceStore] Started trace {} ({})",
            trace.id,
            trace.workflow_name
        );
        self.schedule_eviction(trace.id.clone(), generation);
        self.emit(|| TraceEvent::TraceStarted(trace.clone()));

        trace
    }

    /// Open a trace for one agent invocation
    ///
    /// The four inputs are kept in the trace metadata.
    pub async fn create_agent_trace(
        &self,
        agent_id: &str,
        agent_name: &str,
        agent_icon: &str,
        query: &str,
    ) -> Trace {
        let mut metadata = Map::new();
        metadata.insert("agent_id".into(), agent_id.into());
        metadata.insert("agent_name".into(), agent_name.into());
        metadata.insert("agent_icon".into(), agent_icon.into());
        metadata.insert("query".into(), query.into());

        self.start_trace(NewTrace::new(agent_name).with_metadata(metadata))
            .await
    }

    /// Mark a trace completed or failed
    ///
    /// Repeat calls overwrite the status and reasoning; the first end
    /// timestamp is kept.
    pub async fn complete_agent_trace(
        &self,
        trace_id: &str,
        success: bool,
        reasoning: Option<&str>,
    ) -> SdkResult<Trace> {
        let status = if success {
            TraceStatus::Completed
        } else {
            TraceStatus::Error
        };

        let mut state = self.state.write().await;
        let trace = state.trace_mut(trace_id)?;
        trace.status = status;
        if trace.ended_at.is_none() {
            trace.ended_at = Some(chrono::Utc::now());
        }
        if let Some(reasoning) = reasoning {
            trace
                .metadata
                .insert("reasoning".into(), Value::String(reasoning.to_string()));
        }
        let trace = trace.clone();
        state.publish(trace_id, TraceChange::StatusChanged(status));
        drop(state);

        tracing::debug!("[TraceStore] Trace {} -> {}", trace_id, status.as_str());
        self.emit(|| TraceEvent::TraceEnded(trace.clone()));

        Ok(trace)
    }

    pub async fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.state
            .read()
            .await
            .traces
            .get(trace_id)
            .map(|stored| stored.trace.clone())
    }

    /// All held traces, oldest first
    pub async fn list_traces(&self) -> Vec<Trace> {
        let state = self.state.read().await;
        let mut traces: Vec<Trace> = state.traces.values().map(|s| s.trace.clone()).collect();
        traces.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        traces
    }

    /// Drop a trace and close its subscriptions
    pub async fn remove_trace(&self, trace_id: &str) -> Option<Trace> {
        let mut state = self.state.write().await;
        state.channels.remove(trace_id);
        state.traces.remove(trace_id).map(|stored| stored.trace)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.traces.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn schedule_eviction(&self, trace_id: String, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "[TraceStore] No runtime, trace {} will not be evicted",
                trace_id
            );
            return;
        };

        let state = Arc::downgrade(&self.state);
        let retention = self.retention;

        handle.spawn(async move {
            tokio::time::sleep(retention).await;

            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.write().await;

            let current = state
                .traces
                .get(&trace_id)
                .is_some_and(|stored| stored.generation == generation);
            if current {
                state.traces.remove(&trace_id);
                state.channels.remove(&trace_id);
                tracing::debug!("[TraceStore] Evicted trace {}", trace_id);
            }
        });
    }

    // =========================================================================
    // Spans
    // =========================================================================

    /// Append a span to its trace
    pub async fn add_span(&self, span: Span) -> SdkResult<Span> {
        let mut state = self.state.write().await;
        state.trace_mut(&span.trace_id)?.spans.push(span.clone());
        state.publish(
            &span.trace_id,
            TraceChange::StepAdded {
                span_id: span.id.clone(),
            },
        );
        drop(state);

        self.emit(|| TraceEvent::SpanStarted(span.clone()));
        Ok(span)
    }

    /// Append a step to a trace
    ///
    /// The step is named after `metadata["name"]` when present, otherwise
    /// after its kind. A finished `status` closes the step immediately.
    pub async fn add_trace_step(
        &self,
        trace_id: &str,
        kind: SpanKind,
        content: impl Into<String>,
        metadata: Map<String, Value>,
        status: SpanStatus,
    ) -> SdkResult<Span> {
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(kind.as_str())
            .to_string();

        let span = Span::new(trace_id, kind, name)
            .with_content(content)
            .with_data(metadata)
            .with_status(status);

        self.add_span(span).await
    }

    /// Append an in-progress step whose content arrives incrementally
    pub async fn add_streaming_trace_step(
        &self,
        trace_id: &str,
        kind: SpanKind,
        metadata: Map<String, Value>,
    ) -> SdkResult<StreamingStep> {
        let span = self
            .add_trace_step(trace_id, kind, String::new(), metadata, SpanStatus::InProgress)
            .await?;

        Ok(StreamingStep {
            store: self.clone(),
            trace_id: span.trace_id,
            span_id: span.id,
        })
    }

    /// Mutate a span in place
    ///
    /// The span's identity and kind cannot be changed, and an end timestamp,
    /// once set, survives the mutation.
    pub async fn update_span(
        &self,
        trace_id: &str,
        span_id: &str,
        update: impl FnOnce(&mut Span),
    ) -> SdkResult<Span> {
        let mut state = self.state.write().await;
        let span = state
            .trace_mut(trace_id)?
            .span_mut(span_id)
            .ok_or_else(|| SdkError::span_not_found(trace_id, span_id))?;

        let (id, trace, kind, ended_at) = (
            span.id.clone(),
            span.trace_id.clone(),
            span.kind,
            span.ended_at,
        );
        update(span);
        span.id = id;
        span.trace_id = trace;
        span.kind = kind;
        if ended_at.is_some() {
            span.ended_at = ended_at;
        }

        let span = span.clone();
        state.publish(
            trace_id,
            TraceChange::StepUpdated {
                span_id: span_id.to_string(),
            },
        );
        drop(state);

        self.emit(|| TraceEvent::SpanUpdated(span.clone()));
        Ok(span)
    }

    /// Close a span with the given status
    pub async fn end_span(
        &self,
        trace_id: &str,
        span_id: &str,
        status: SpanStatus,
    ) -> SdkResult<Span> {
        self.finish_span(trace_id, span_id, status, |_| {}).await
    }

    async fn finish_span(
        &self,
        trace_id: &str,
        span_id: &str,
        status: SpanStatus,
        update: impl FnOnce(&mut Span),
    ) -> SdkResult<Span> {
        let mut state = self.state.write().await;
        let span = state
            .trace_mut(trace_id)?
            .span_mut(span_id)
            .ok_or_else(|| SdkError::span_not_found(trace_id, span_id))?;

        update(span);
        span.finish(status);

        let span = span.clone();
        state.publish(
            trace_id,
            TraceChange::StepEnded {
                span_id: span_id.to_string(),
            },
        );
        drop(state);

        self.emit(|| TraceEvent::SpanEnded(span.clone()));
        Ok(span)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to updates for a trace id
    ///
    /// The trace need not exist yet. If it does, the first `recv` yields its
    /// current state; every later mutation yields exactly one update.
    pub async fn subscribe(&self, trace_id: &str) -> TraceSubscription {
        let mut state = self.state.write().await;
        state
            .channels
            .retain(|id, tx| id == trace_id || tx.receiver_count() > 0);

        let rx = state
            .channels
            .entry(trace_id.to_string())
            .or_insert_with(|| broadcast::channel(UPDATE_CHANNEL_SIZE).0)
            .subscribe();
        let snapshot = state.traces.get(trace_id).map(|s| s.trace.clone());

        TraceSubscription {
            trace_id: trace_id.to_string(),
            snapshot,
            rx,
            state: Arc::downgrade(&self.state),
        }
    }
}

// ============================================================================
// StreamingStep
// ============================================================================

/// Handle to a step created by [`TraceStore::add_streaming_trace_step`]
#[derive(Debug, Clone)]
pub struct StreamingStep {
    store: TraceStore,
    trace_id: String,
    span_id: String,
}

impl StreamingStep {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Replace the step content
    pub async fn update(&self, content: impl Into<String>) -> SdkResult<Span> {
        let content = content.into();
        self.store
            .update_span(&self.trace_id, &self.span_id, |span| span.content = content)
            .await
    }

    /// Append a delta to the step content
    pub async fn append(&self, delta: &str) -> SdkResult<Span> {
        self.store
            .update_span(&self.trace_id, &self.span_id, |span| {
                span.content.push_str(delta)
            })
            .await
    }

    pub async fn complete(&self) -> SdkResult<Span> {
        self.store
            .end_span(&self.trace_id, &self.span_id, SpanStatus::Completed)
            .await
    }

    /// Close the step as failed, recording `message` under `data.error`
    pub async fn fail(&self, message: impl Into<String>) -> SdkResult<Span> {
        let message = message.into();
        self.store
            .finish_span(&self.trace_id, &self.span_id, SpanStatus::Error, |span| {
                span.data.insert("error".into(), Value::String(message));
            })
            .await
    }
}
