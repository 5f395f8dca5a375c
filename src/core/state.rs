//! Run state types

use serde::{Deserialize, Serialize};

/// Current state of a single runner invocation
///
/// ```text
/// Starting -> AwaitingAgentResponse -> (HandoffRequested -> AwaitingAgentResponse)* -> Completed | Failed
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    /// Run has been entered, trace not yet opened
    Starting,

    /// Waiting on the completion API for the active agent
    AwaitingAgentResponse {
        /// Name of the active agent
        agent: String,
        /// 1-based turn number
        turn: usize,
    },

    /// The active agent asked to delegate
    HandoffRequested {
        /// Agent that requested the handoff
        from: String,
        /// Agent that will take over
        to: String,
    },

    /// Run finished with a final output
    Completed {
        /// Whether the turn budget cut the handoff chain short
        truncated: bool,
    },

    /// Run aborted with an error
    Failed {
        /// Error message
        message: String,
    },
}

impl RunState {
    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed { .. } | RunState::Failed { .. })
    }

    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Starting, AwaitingAgentResponse { .. }) => true,
            (AwaitingAgentResponse { .. }, HandoffRequested { .. }) => true,
            (AwaitingAgentResponse { .. }, Completed { .. }) => true,
            (HandoffRequested { .. }, AwaitingAgentResponse { .. }) => true,
            (state, Failed { .. }) => !state.is_terminal(),
            _ => false,
        }
    }

    /// Create an awaiting-response state
    pub fn awaiting(agent: impl Into<String>, turn: usize) -> Self {
        RunState::AwaitingAgentResponse {
            agent: agent.into(),
            turn,
        }
    }

    /// Create a handoff state
    pub fn handoff(from: impl Into<String>, to: impl Into<String>) -> Self {
        RunState::HandoffRequested {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a failed state
    pub fn failed(msg: impl Into<String>) -> Self {
        RunState::Failed {
            message: msg.into(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Starting
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Starting => write!(f, "Starting"),
            RunState::AwaitingAgentResponse { agent, turn } => {
                write!(f, "Awaiting response from {} (turn {})", agent, turn)
            }
            RunState::HandoffRequested { from, to } => write!(f, "Handoff: {} -> {}", from, to),
            RunState::Completed { truncated: false } => write!(f, "Completed"),
            RunState::Completed { truncated: true } => {
                write!(f, "Completed (turn budget exhausted)")
            }
            RunState::Failed { message } => write!(f, "Failed: {}", message),
        }
    }
}
