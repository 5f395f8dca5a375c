//! Run result envelope

use serde::{Deserialize, Serialize};

use crate::agent::Agent;

/// Name and model of an agent that took part in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub model: String,
}

impl AgentDescriptor {
    /// Describe `agent` with the model it actually runs on
    pub fn new(agent: &Agent, default_model: &str) -> Self {
        Self {
            name: agent.name.clone(),
            model: agent.resolved_model(default_model).to_string(),
        }
    }
}

/// Bookkeeping gathered during a run, present on success and failure alike
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Names of the agents visited, in order, starting with the entry agent
    pub handoff_path: Vec<String>,

    /// Wall-clock time of the run
    pub execution_time_ms: u64,

    /// Number of completion calls made
    pub turns: usize,

    /// Agent that produced the final output, or was active when the run failed
    pub last_agent: Option<AgentDescriptor>,

    /// Trace recorded for the run, if tracing was on
    pub trace_id: Option<String>,

    /// Whether the turn budget cut a handoff chain short
    #[serde(default)]
    pub truncated: bool,
}

/// Value returned by every `Runner` entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub final_output: Option<String>,
    pub error: Option<String>,
    pub metadata: RunMetadata,
}

impl RunResult {
    pub(crate) fn completed(output: String, metadata: RunMetadata) -> Self {
        Self {
            success: true,
            final_output: Some(output),
            error: None,
            metadata,
        }
    }

    pub(crate) fn failed(error: String, metadata: RunMetadata) -> Self {
        Self {
            success: false,
            final_output: None,
            error: Some(error),
            metadata,
        }
    }

    /// Final output, or an empty string if the run failed
    pub fn output(&self) -> &str {
        self.final_output.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_snake_case() {
        let result = RunResult::completed(
            "done".into(),
            RunMetadata {
                handoff_path: vec!["Triage".into()],
                turns: 1,
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["metadata"]["handoff_path"][0], "Triage");
        assert!(json["error"].is_null());
        assert_eq!(result.output(), "done");
    }
}
