//! Chat completion API types
//!
//! These types serialize/deserialize against the OpenAI-compatible
//! `/chat/completions` endpoint, both the plain JSON response and the
//! `stream: true` SSE chunk format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Messages
// ============================================================================

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Text content (absent on assistant messages that only call tools)
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call this message answers (role `tool` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    /// Create an assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    /// Text content, empty string if none
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Tool declaration sent with a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Function declaration
    pub function: FunctionDefinition,
}

/// Function part of a tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// JSON schema of the arguments
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a function tool
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Tool call selected by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,

    #[serde(rename = "type", default = "default_tool_type")]
    pub call_type: String,

    pub function: FunctionCall,
}

fn default_tool_type() -> String {
    "function".to_string()
}

/// Function name and raw JSON arguments of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,

    /// Arguments as a JSON-encoded string (as the API sends them)
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// Create a function tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: default_tool_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the arguments as JSON, `None` if they are not valid JSON
    pub fn parsed_arguments(&self) -> Option<Value> {
        if self.function.arguments.trim().is_empty() {
            return Some(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.function.arguments).ok()
    }
}

// ============================================================================
// Request
// ============================================================================

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CompletionRequest {
    /// Create a request with just a model and messages
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: None,
            stream: None,
        }
    }

    /// Attach tools (an empty list sends no `tools` field)
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    /// Names of the tools attached to this request
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .as_ref()
            .map(|tools| tools.iter().map(|t| t.name()).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Response
// ============================================================================

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    #[serde(other)]
    Unknown,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Response from `/chat/completions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Build a single-choice response (used by providers that assemble responses)
    pub fn from_message(
        id: impl Into<String>,
        model: impl Into<String>,
        message: Message,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// First choice's message, if any
    pub fn message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }

    /// Text content of the first choice
    pub fn text(&self) -> String {
        self.message()
            .and_then(|m| m.content.clone())
            .unwrap_or_default()
    }

    /// Tool calls of the first choice
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message()
            .and_then(|m| m.tool_calls.as_deref())
            .unwrap_or(&[])
    }

    /// Finish reason of the first choice
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason.as_ref())
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// One `data:` chunk of a streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionCallChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Provider-neutral streaming event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text
    TextDelta(String),
    /// Fragment of a tool call; `id`/`name` arrive on the first fragment only
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Token usage (sent at the end by some backends)
    Usage(Usage),
    /// Model finished the choice
    Finished(Option<FinishReason>),
}

impl CompletionChunk {
    /// Convert a raw chunk into stream events
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for choice in self.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(StreamEvent::TextDelta(text));
                }
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                events.push(StreamEvent::ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name: function.name,
                    arguments: function.arguments.unwrap_or_default(),
                });
            }
            if choice.finish_reason.is_some() {
                events.push(StreamEvent::Finished(choice.finish_reason));
            }
        }

        if let Some(usage) = self.usage {
            events.push(StreamEvent::Usage(usage));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"Hello\""));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_tool_definition_serialization() {
        let tool = ToolDefinition::function("lookup_order", "Find an order", json!({"type": "object"}));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "lookup_order");
    }

    #[test]
    fn test_request_skips_empty_fields() {
        let request = CompletionRequest::new("gpt-4o-mini", vec![Message::user("hi")])
            .with_tools(Vec::new());
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("temperature").is_none());
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn test_response_with_tool_call_deserialization() {
        let json = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "transfer_to_refund", "arguments": "{\"reason\":\"damaged item\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "");
        assert_eq!(response.tool_calls().len(), 1);
        assert_eq!(response.finish_reason(), Some(&FinishReason::ToolCalls));

        let args = response.tool_calls()[0].parsed_arguments().unwrap();
        assert_eq!(args["reason"], "damaged item");
    }

    #[test]
    fn test_unknown_finish_reason() {
        let reason: FinishReason = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(reason, FinishReason::Unknown);
    }

    #[test]
    fn test_chunk_into_events() {
        let json = r#"{
            "id": "c1",
            "choices": [{
                "index": 0,
                "delta": {
                    "content": "Hel",
                    "tool_calls": [{"index": 0, "id": "call_9", "function": {"name": "transfer_to_x", "arguments": "{\"rea"}}]
                },
                "finish_reason": null
            }]
        }"#;
        let chunk: CompletionChunk = serde_json::from_str(json).unwrap();
        let events = chunk.into_events();
        assert_eq!(events[0], StreamEvent::TextDelta("Hel".into()));
        assert_eq!(
            events[1],
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_9".into()),
                name: Some("transfer_to_x".into()),
                arguments: "{\"rea".into(),
            }
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_invalid_arguments_parse_to_none() {
        let call = ToolCall::new("call_1", "transfer_to_x", "{not json");
        assert!(call.parsed_arguments().is_none());

        let call = ToolCall::new("call_2", "transfer_to_x", "");
        assert_eq!(call.parsed_arguments(), Some(json!({})));
    }
}
