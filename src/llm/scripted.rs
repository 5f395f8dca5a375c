//! Scripted LLM provider
//!
//! Answers requests from a queue of canned replies or a closure instead of
//! the network. Used by the test suites and by the CLI's `--scripted` mode.
//!
//! ```ignore
//! let llm = ScriptedProvider::new(vec![
//!     ScriptedReply::handoff("transfer_to_refund", "damaged item"),
//!     ScriptedReply::text("Your refund is on its way."),
//! ]);
//! ```

use anyhow::Result;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::provider::{EventStream, LlmProvider};
use super::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, StreamEvent, ToolCall,
};

/// One canned reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Plain assistant text
    Text(String),
    /// Assistant selects a tool, optionally with text alongside
    ToolCall {
        name: String,
        arguments: String,
        content: Option<String>,
    },
    /// The call fails as if the transport broke
    Error(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    /// Select a handoff tool with a `reason` argument
    pub fn handoff(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        ScriptedReply::ToolCall {
            name: tool_name.into(),
            arguments: serde_json::json!({ "reason": reason.into() }).to_string(),
            content: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ScriptedReply::Error(message.into())
    }

    /// Turn the reply into a response, or the scripted error
    pub fn into_response(self, model: &str, call_number: usize) -> Result<CompletionResponse> {
        let id = format!("scripted-{}", call_number);
        match self {
            ScriptedReply::Text(text) => Ok(CompletionResponse::from_message(
                id,
                model,
                Message::assistant(text),
                Some(FinishReason::Stop),
            )),
            ScriptedReply::ToolCall {
                name,
                arguments,
                content,
            } => {
                let call = ToolCall::new(format!("call_{}", call_number), name, arguments);
                Ok(CompletionResponse::from_message(
                    id,
                    model,
                    Message::assistant_with_tool_calls(content, vec![call]),
                    Some(FinishReason::ToolCalls),
                ))
            }
            ScriptedReply::Error(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

type Responder = dyn Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync;

/// Provider that replays scripted replies and records every request
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Box<Responder>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Replay `replies` in order; fails once they run out
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with a closure
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of requests received so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn respond(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let call_number = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| anyhow::anyhow!("scripted provider lock poisoned"))?;
            requests.push(request.clone());
            requests.len()
        };

        if let Some(responder) = &self.responder {
            return responder(request);
        }

        let next = self
            .script
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted provider lock poisoned"))?
            .pop_front();

        match next {
            Some(reply) => reply.into_response(&request.model, call_number),
            None => anyhow::bail!("Scripted provider has no reply left (call {})", call_number),
        }
    }
}

/// Split a response into the events a streaming backend would send
fn response_to_events(response: CompletionResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let finish = response.finish_reason().cloned();

    let text = response.text();
    for word in text.split_inclusive(' ') {
        events.push(StreamEvent::TextDelta(word.to_string()));
    }

    for (index, call) in response.tool_calls().iter().enumerate() {
        let args = &call.function.arguments;
        let mid = args
            .char_indices()
            .nth(args.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        events.push(StreamEvent::ToolCallDelta {
            index,
            id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
            arguments: args[..mid].to_string(),
        });
        events.push(StreamEvent::ToolCallDelta {
            index,
            id: None,
            name: None,
            arguments: args[mid..].to_string(),
        });
    }

    events.push(StreamEvent::Finished(finish));
    events
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.respond(&request)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let response = self.respond(&request)?;
        let events = response_to_events(response).into_iter().map(Ok);
        Ok(Box::pin(stream::iter(events)))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> CompletionRequest {
        CompletionRequest::new("test-model", vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let llm = ScriptedProvider::new(vec![
            ScriptedReply::text("first"),
            ScriptedReply::text("second"),
        ]);

        assert_eq!(llm.complete(request()).await.unwrap().text(), "first");
        assert_eq!(llm.complete(request()).await.unwrap().text(), "second");
        assert!(llm.complete(request()).await.is_err());
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::error("connection reset")]);
        let err = llm.complete(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_stream_splits_text_and_tool_arguments() {
        let llm = ScriptedProvider::new(vec![ScriptedReply::ToolCall {
            name: "transfer_to_refund".into(),
            arguments: "{\"reason\":\"x\"}".into(),
            content: Some("one two".into()),
        }]);

        let events: Vec<StreamEvent> = llm
            .stream(request())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events[0], StreamEvent::TextDelta("one ".into()));
        assert_eq!(events[1], StreamEvent::TextDelta("two".into()));

        let args: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallDelta { arguments, .. } => Some(arguments.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(args, "{\"reason\":\"x\"}");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Finished(Some(FinishReason::ToolCalls)))
        );
    }
}
