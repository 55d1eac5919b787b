//! Shared test doubles for the engine's collaborators.

use async_trait::async_trait;
use parley_core::channel::{Channel, ChatTarget};
use parley_core::error::{ChannelError, ProviderError, ToolError};
use parley_core::message::{Message, MessageToolCall};
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use parley_core::tool::Tool;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A provider that replays scripted replies and records every request.
///
/// Once the script runs out, every call fails with a network error.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
    }
}

pub fn tool_call_response(id: &str, name: &str, arguments: serde_json::Value) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant("").with_tool_calls(vec![MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }]),
        usage: None,
        model: "scripted-model".into(),
    }
}

/// A tool that records its arguments and answers with a fixed text.
pub struct EchoTool {
    pub name: &'static str,
    pub answer: &'static str,
    pub seen: Mutex<Vec<serde_json::Value>>,
}

impl EchoTool {
    pub fn new(name: &'static str, answer: &'static str) -> Self {
        Self {
            name,
            answer,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echo test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        self.seen.lock().unwrap().push(arguments);
        Ok(self.answer.to_string())
    }
}

/// A channel that keeps every delivery in memory.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(ChatTarget, String)>>,
    pub typing: Mutex<usize>,
    pub fail: bool,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, target: &ChatTarget, text: &str) -> Result<usize, ChannelError> {
        if self.fail {
            return Err(ChannelError::DeliveryFailed {
                channel: "recording".into(),
                reason: "down".into(),
            });
        }
        self.sent.lock().unwrap().push((target.clone(), text.to_string()));
        Ok(1)
    }

    async fn send_typing(&self, _target: &ChatTarget) -> Result<(), ChannelError> {
        *self.typing.lock().unwrap() += 1;
        Ok(())
    }
}
