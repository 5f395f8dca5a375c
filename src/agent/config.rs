//! Agent Configuration
//!
//! Sampling settings and the override set used by `Agent::clone_with`.

use serde::{Deserialize, Serialize};

use super::handoff::Handoff;
use crate::llm::{CompletionRequest, ToolDefinition};

/// Sampling parameters forwarded to the completion call
///
/// Unset fields are omitted from the request so the backend applies its own
/// defaults.
///
/// ```ignore
/// let settings = ModelSettings::default()
///     .with_temperature(0.2)
///     .with_max_tokens(512);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Overlay `other` on top of `self`; fields set in `other` win
    pub fn merge(&self, other: &ModelSettings) -> ModelSettings {
        ModelSettings {
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            max_tokens: other.max_tokens.or(self.max_tokens),
        }
    }

    pub(crate) fn apply(&self, request: &mut CompletionRequest) {
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.max_tokens = self.max_tokens;
    }
}

/// Field overrides for deriving a new agent from an existing one
///
/// Every `None` keeps the source agent's value.
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub handoff_description: Option<String>,
    pub model: Option<String>,
    /// Merged into the source settings rather than replacing them
    pub model_settings: Option<ModelSettings>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub handoffs: Option<Vec<Handoff>>,
}

impl AgentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    pub fn with_handoffs(mut self, handoffs: Vec<Handoff>) -> Self {
        self.handoffs = Some(handoffs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[test]
    fn test_merge_prefers_override() {
        let base = ModelSettings::default().with_temperature(0.7).with_top_p(0.9);
        let over = ModelSettings::default().with_temperature(0.1).with_max_tokens(100);

        let merged = base.merge(&over);
        assert_eq!(merged.temperature, Some(0.1));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.max_tokens, Some(100));
    }

    #[test]
    fn test_unset_fields_not_serialized() {
        let mut request = CompletionRequest::new("m", vec![Message::user("hi")]);
        ModelSettings::default().with_max_tokens(10).apply(&mut request);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 10);
        assert!(json.get("temperature").is_none());
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn test_overrides_builder() {
        let overrides = AgentOverrides::new().with_name("B").with_model("gpt-4o");
        assert_eq!(overrides.name.as_deref(), Some("B"));
        assert_eq!(overrides.model.as_deref(), Some("gpt-4o"));
        assert!(overrides.instructions.is_none());
    }
}
