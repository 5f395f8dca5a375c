//! Per-run configuration

use serde_json::{Map, Value};

/// Default turn budget
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Workflow name used when none is configured
pub const DEFAULT_WORKFLOW_NAME: &str = "Agent workflow";

/// Options for a runner invocation
///
/// A `Runner` holds one as its default; `Runner::run_with_config` takes
/// another for a single call.
///
/// ```ignore
/// let config = RunConfig::new()
///     .with_workflow_name("Customer support")
///     .with_group_id(conversation_id)
///     .with_max_turns(4);
/// ```
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Completion calls allowed per run; the first turn always runs
    pub max_turns: usize,

    pub workflow_name: String,

    /// Trace id to record under; generated when absent
    pub trace_id: Option<String>,

    pub group_id: Option<String>,

    pub session_id: Option<String>,

    /// Extra entries copied into the trace metadata
    pub trace_metadata: Map<String, Value>,

    /// Skip trace recording for this run
    pub tracing_disabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            workflow_name: DEFAULT_WORKFLOW_NAME.to_string(),
            trace_id: None,
            group_id: None,
            session_id: None,
            trace_metadata: Map::new(),
            tracing_disabled: false,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
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

    pub fn with_trace_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.trace_metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tracing_disabled(mut self, disabled: bool) -> Self {
        self.tracing_disabled = disabled;
        self
    }
}
