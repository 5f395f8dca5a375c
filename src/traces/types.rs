//! Trace and span records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Generate a trace id
pub fn gen_trace_id() -> String {
    format!("trace_{}", uuid::Uuid::new_v4().simple())
}

/// Generate a span id
pub fn gen_span_id() -> String {
    format!("span_{}", uuid::Uuid::new_v4().simple())
}

/// Lifecycle status of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(TraceStatus::Running),
            "completed" => Some(TraceStatus::Completed),
            "error" => Some(TraceStatus::Error),
            _ => None,
        }
    }
}

/// What a span records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Agent,
    Handoff,
    Function,
    Generation,
    Guardrail,
    Custom,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Agent => "agent",
            SpanKind::Handoff => "handoff",
            SpanKind::Function => "function",
            SpanKind::Generation => "generation",
            SpanKind::Guardrail => "guardrail",
            SpanKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(SpanKind::Agent),
            "handoff" => Some(SpanKind::Handoff),
            "function" => Some(SpanKind::Function),
            "generation" => Some(SpanKind::Generation),
            "guardrail" => Some(SpanKind::Guardrail),
            "custom" => Some(SpanKind::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    InProgress,
    Completed,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::InProgress => "in_progress",
            SpanStatus::Completed => "completed",
            SpanStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SpanStatus::InProgress),
            "completed" => Some(SpanStatus::Completed),
            "error" => Some(SpanStatus::Error),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, SpanStatus::InProgress)
    }
}

/// One sub-step of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,

    pub trace_id: String,

    /// Enclosing span, for nesting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    pub kind: SpanKind,

    pub name: String,

    /// Text payload (agent output, streamed content)
    #[serde(default)]
    pub content: String,

    /// Free-form structured payload
    #[serde(default)]
    pub data: Map<String, Value>,

    pub status: SpanStatus,

    pub started_at: DateTime<Utc>,

    /// Absent while in progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Span {
    /// Create an in-progress span starting now
    pub fn new(trace_id: impl Into<String>, kind: SpanKind, name: impl Into<String>) -> Self {
        Self {
            id: gen_span_id(),
            trace_id: trace_id.into(),
            parent_id: None,
            kind,
            name: name.into(),
            content: String::new(),
            data: Map::new(),
            status: SpanStatus::InProgress,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set one data entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the initial status; a finished status also stamps `ended_at`
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        if status.is_finished() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Close the span; the first end timestamp is kept
    pub fn finish(&mut self, status: SpanStatus) {
        self.status = status;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// One end-to-end run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,

    /// Human label for the workflow
    pub workflow_name: String,

    /// Correlates multiple traces (e.g. a conversation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Absent while running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    pub status: TraceStatus,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Spans in the order they were appended
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.id == span_id)
    }

    pub(crate) fn span_mut(&mut self, span_id: &str) -> Option<&mut Span> {
        self.spans.iter_mut().find(|s| s.id == span_id)
    }

    /// Spans of one kind, in order
    pub fn spans_of(&self, kind: SpanKind) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(move |s| s.kind == kind)
    }

    pub fn is_running(&self) -> bool {
        self.status == TraceStatus::Running
    }

    /// Wall-clock duration, if the trace has ended
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Parameters for opening a trace
#[derive(Debug, Clone)]
pub struct NewTrace {
    /// Caller-supplied id; generated when absent
    pub id: Option<String>,
    pub workflow_name: String,
    pub group_id: Option<String>,
    pub session_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewTrace {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            id: None,
            workflow_name: workflow_name.into(),
            group_id: None,
            session_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn into_trace(self) -> Trace {
        Trace {
            id: self.id.unwrap_or_else(gen_trace_id),
            workflow_name: self.workflow_name,
            group_id: self.group_id,
            session_id: self.session_id,
            started_at: Utc::now(),
            ended_at: None,
            status: TraceStatus::Running,
            metadata: self.metadata,
            spans: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_match_serde() {
        for kind in [
            SpanKind::Agent,
            SpanKind::Handoff,
            SpanKind::Function,
            SpanKind::Generation,
            SpanKind::Guardrail,
            SpanKind::Custom,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(SpanKind::parse(kind.as_str()), Some(kind));
        }

        let json = serde_json::to_value(SpanStatus::InProgress).unwrap();
        assert_eq!(json, "in_progress");
        assert_eq!(TraceStatus::parse("error"), Some(TraceStatus::Error));
        assert_eq!(TraceStatus::parse("bogus"), None);
    }

    #[test]
    fn test_span_finish_keeps_first_end() {
        let mut span = Span::new("t1", SpanKind::Agent, "Triage");
        assert!(span.is_open());

        span.finish(SpanStatus::Completed);
        let first = span.ended_at;
        assert!(first.is_some());

        span.finish(SpanStatus::Error);
        assert_eq!(span.ended_at, first);
        assert_eq!(span.status, SpanStatus::Error);
    }

    #[test]
    fn test_span_with_finished_status_is_closed() {
        let span = Span::new("t1", SpanKind::Custom, "note").with_status(SpanStatus::Completed);
        assert!(!span.is_open());
    }

    #[test]
    fn test_new_trace_generates_id() {
        let a = NewTrace::new("wf").into_trace();
        let b = NewTrace::new("wf").with_id("fixed").into_trace();
        assert!(a.id.starts_with("trace_"));
        assert_eq!(b.id, "fixed");
        assert!(a.is_running());
        assert!(a.duration_ms().is_none());
    }
}
