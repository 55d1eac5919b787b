//! The inference collaborator: one reply per call, with a bounded tool loop.
//!
//! The loop follows the usual cycle:
//!
//! 1. Send the preamble and turns to the provider
//! 2. **If tool calls**: execute them through the caller's registry, append
//!    the results, and go back to step 1
//! 3. **If text**: return it
//!
//! Provider failures and timeouts never escape [`ModelClient::respond`]; they
//! turn into [`MODEL_FAILURE`] so the caller can substitute its own notice.

use crate::context::assembler::ContextTurn;
use crate::context::eviction::Summarizer;
use async_trait::async_trait;
use parley_config::AnthropicConfig;
use parley_core::error::ProviderError;
use parley_core::message::Message;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse};
use parley_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Returned by [`ModelClient::respond`] when no usable answer came back.
pub const MODEL_FAILURE: &str = "⚠️ Could not get a response from the model";

const SUMMARY_PROMPT: &str = "Write a detailed summary of the dialog.

Keep the personal context:
- Participants' names and how they communicate (formal or casual, expressive or reserved)
- Key topics, questions and decisions
- The emotional tone of the conversation
- Open questions or unfinished tasks
- Users' interests and preferences

Format: 2-4 paragraphs, focused on meaning and on the people rather than small details.";

const PROFILE_PROMPT: &str = "Analyze the conversation history with the user and write a short profile.

Identify and describe:
1. Main interests and recurring topics
2. Communication style (formal or casual, technical or conversational, expressive or reserved)
3. Key projects or tasks the user is working on
4. Communication preferences

Format: 1-2 paragraphs, a concise profile of the person.";

const SUMMARY_INPUT_CAP: usize = 30;
const PROFILE_INPUT_CAP: usize = 60;

/// Replies that carry no answer: empty text, a bare role word, or the
/// failure sentinel.
pub fn is_unusable(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed == MODEL_FAILURE
        || matches!(
            trimmed.to_lowercase().as_str(),
            "" | "assistant" | "system" | "user"
        )
}

/// Talks to the language model on behalf of the engine.
pub struct ModelClient {
    provider: Arc<dyn Provider>,

    model: String,

    temperature: f32,

    max_tokens: u32,

    /// Maximum tool round-trips per reply
    max_tool_iterations: usize,

    /// Bound on each provider call
    timeout: Duration,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.5,
            max_tokens: 800,
            max_tool_iterations: 5,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AnthropicConfig) -> Self {
        Self::new(provider, &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_output_tokens)
            .with_max_tool_iterations(config.max_tool_iterations)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
        }
    }

    /// Produce a reply to `turns` under `preamble`, letting the model call
    /// tools from `tools`. Never fails; see [`MODEL_FAILURE`].
    pub async fn respond(&self, preamble: &str, turns: &[Message], tools: &ToolRegistry) -> String {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !preamble.is_empty() {
            messages.push(Message::system(preamble));
        }
        messages.extend(turns.iter().cloned());

        let definitions = tools.definitions();
        let mut rounds = 0;

        loop {
            let request = ProviderRequest::new(&self.model, messages.clone())
                .with_temperature(self.temperature)
                .with_max_tokens(self.max_tokens)
                .with_tools(definitions.clone());

            let response = match self.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(provider = self.provider.name(), error = %e, "Inference failed");
                    return MODEL_FAILURE.into();
                }
            };

            if let Some(usage) = &response.usage {
                debug!(
                    model = %response.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }

            if response.message.tool_calls.is_empty() || tools.is_empty() {
                return response.message.content.trim().to_string();
            }

            if rounds >= self.max_tool_iterations {
                warn!(rounds, "Max tool iterations reached, returning partial answer");
                let partial = response.message.content.trim();
                return if partial.is_empty() {
                    MODEL_FAILURE.into()
                } else {
                    partial.to_string()
                };
            }
            rounds += 1;

            let tool_calls = response.message.tool_calls.clone();
            messages.push(response.message);

            for tc in &tool_calls {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
                };
                let result = tools.execute(&call).await;
                let preview: String = result.output.chars().take(100).collect();
                info!(tool = %tc.name, success = result.success, output = %preview, "Tool call");
                messages.push(Message::tool_result(&tc.id, &result.output));
            }
        }
    }

    /// A single tool-free completion. Empty text is an error.
    async fn complete_text(
        &self,
        system: String,
        turns: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(Message::system(system));
        messages.extend(turns.iter().cloned());

        let request = ProviderRequest::new(&self.model, messages)
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);
        let text = self.complete(request).await?.message.content.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse("empty completion".into()));
        }
        Ok(text)
    }

    /// Summarize the dialog from its most recent turns.
    pub async fn summarize(&self, turns: &[Message]) -> Result<String, ProviderError> {
        let recent = tail(turns, SUMMARY_INPUT_CAP);
        self.complete_text(SUMMARY_PROMPT.into(), recent, 0.3, 600).await
    }

    /// A long-term profile of one user, written from their history.
    pub async fn long_term_summary(
        &self,
        turns: &[Message],
        display_name: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut system = PROFILE_PROMPT.to_string();
        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            system.push_str(&format!("\n\nUser's name: {name}"));
        }
        self.complete_text(system, tail(turns, PROFILE_INPUT_CAP), 0.3, 400)
            .await
    }

    /// Up to `max_topics` short topic labels for `turns`.
    pub async fn extract_topics(
        &self,
        turns: &[Message],
        max_topics: usize,
    ) -> Result<Vec<String>, ProviderError> {
        let system = format!(
            "Analyze the latest messages and pick out {max_topics} main topics or keywords.\n\n\
             Reply with ONLY a comma-separated list of topics, no numbering or explanations.\n\
             Example: Python, AWS Lambda, DynamoDB, Claude API, Telegram bots"
        );
        let text = self.complete_text(system, turns, 0.2, 100).await?;
        Ok(text
            .split(',')
            .map(|t| t.trim().trim_end_matches('.').trim())
            .filter(|t| !t.is_empty())
            .take(max_topics)
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl Summarizer for ModelClient {
    async fn summarize_evicted(&self, turns: &[ContextTurn]) -> Option<String> {
        let messages: Vec<Message> = turns.iter().map(ContextTurn::to_message).collect();
        match self.summarize(&messages).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, evicted = turns.len(), "Summary of evicted turns failed");
                None
            }
        }
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, ScriptedProvider, text_response, tool_call_response};
    use parley_core::message::Role;
    use parley_core::tool::Tool;

    fn client(provider: Arc<ScriptedProvider>) -> ModelClient {
        ModelClient::new(provider, "test-model")
    }

    fn weather_registry() -> (ToolRegistry, Arc<EchoTool>) {
        struct Shared(Arc<EchoTool>);

        #[async_trait]
        impl Tool for Shared {
            fn name(&self) -> &str {
                self.0.name
            }
            fn description(&self) -> &str {
                self.0.description()
            }
            fn parameters_schema(&self) -> serde_json::Value {
                self.0.parameters_schema()
            }
            async fn execute(
                &self,
                arguments: serde_json::Value,
            ) -> Result<String, parley_core::error::ToolError> {
                self.0.execute(arguments).await
            }
        }

        let tool = Arc::new(EchoTool::new("get_weather", "Weather in Paris: clear sky, 18°C"));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shared(tool.clone())));
        (registry, tool)
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Arc::new(ScriptedProvider::texts(&["  Hello! How can I help?  "]));
        let reply = client(provider.clone())
            .respond("Be kind.", &[Message::user("Hello!")], &ToolRegistry::new())
            .await;

        assert_eq!(reply, "Hello! How can I help?");
        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.max_tokens, Some(800));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_call_response("call_1", "get_weather", serde_json::json!({"city": "Paris"}))),
            Ok(text_response("It is 18°C and clear in Paris.")),
        ]));
        let (registry, tool) = weather_registry();

        let reply = client(provider.clone())
            .respond("", &[Message::user("weather in Paris?")], &registry)
            .await;

        assert_eq!(reply, "It is 18°C and clear in Paris.");
        assert_eq!(tool.seen.lock().unwrap()[0]["city"], "Paris");

        let second = &provider.requests()[1];
        assert_eq!(second.tools.len(), 1);
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
        assert!(last.content.contains("clear sky"));
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let calls = (0..10)
            .map(|i| Ok(tool_call_response(&format!("c{i}"), "get_weather", serde_json::json!({}))))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(calls));
        let (registry, _tool) = weather_registry();

        let reply = client(provider.clone())
            .with_max_tool_iterations(2)
            .respond("", &[Message::user("loop")], &registry)
            .await;

        assert_eq!(reply, MODEL_FAILURE);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn provider_error_becomes_sentinel() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::ApiError {
            status_code: 529,
            message: "overloaded".into(),
        })]));
        let reply = client(provider)
            .respond("", &[Message::user("hi")], &ToolRegistry::new())
            .await;
        assert_eq!(reply, MODEL_FAILURE);
        assert!(is_unusable(&reply));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        struct Stalled;

        #[async_trait]
        impl Provider for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }
            async fn complete(&self, _r: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(text_response("late"))
            }
        }

        let client = ModelClient::new(Arc::new(Stalled), "m").with_timeout(Duration::from_secs(1));
        let reply = client.respond("", &[Message::user("hi")], &ToolRegistry::new()).await;
        assert_eq!(reply, MODEL_FAILURE);

        let err = client.summarize(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(1)));
    }

    #[tokio::test]
    async fn summarize_caps_input_and_uses_low_temperature() {
        let provider = Arc::new(ScriptedProvider::texts(&["They chatted."]));
        let turns: Vec<Message> = (0..45).map(|i| Message::user(format!("m{i}"))).collect();

        let summary = client(provider.clone()).summarize(&turns).await.unwrap();
        assert_eq!(summary, "They chatted.");

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 1 + 30);
        assert_eq!(request.messages[1].content, "m15");
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_tokens, Some(600));
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let provider = Arc::new(ScriptedProvider::texts(&["   "]));
        let err = client(provider).summarize(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn long_term_summary_mentions_name() {
        let provider = Arc::new(ScriptedProvider::texts(&["Enjoys Rust."]));
        client(provider.clone())
            .long_term_summary(&[Message::user("I like Rust")], Some("Ann"))
            .await
            .unwrap();
        let system = &provider.requests()[0].messages[0].content;
        assert!(system.ends_with("User's name: Ann"));
        assert_eq!(provider.requests()[0].max_tokens, Some(400));
    }

    #[tokio::test]
    async fn topics_are_split_and_capped() {
        let provider = Arc::new(ScriptedProvider::texts(&["Rust, tokio , , SQLite, axum, serde, sqlx."]));
        let topics = client(provider)
            .extract_topics(&[Message::user("stuff")], 5)
            .await
            .unwrap();
        assert_eq!(topics, vec!["Rust", "tokio", "SQLite", "axum", "serde"]);
    }

    #[tokio::test]
    async fn summarizer_swallows_failures() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let turns = vec![ContextTurn::user("[Ann, ID:1] hi", Some("1"))];
        assert!(client(provider).summarize_evicted(&turns).await.is_none());
    }

    #[test]
    fn unusable_replies() {
        assert!(is_unusable(""));
        assert!(is_unusable("  Assistant "));
        assert!(is_unusable("user"));
        assert!(!is_unusable("Sure, here you go."));
    }
}
