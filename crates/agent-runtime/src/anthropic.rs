//! Anthropic LLM Provider
//!
//! Implementation of `LlmProvider` for the Messages API. Tool calls and their
//! results travel as typed content blocks: `tool_use` blocks inside the
//! assistant turn, `tool_result` blocks inside the following user turn.

use agent_core::{
    ChatRequest, ChatResponse, LlmProvider, Message, ProviderResult, Role, StopReason, TokenUsage, ToolCall,
    ToolFormat,
    tool::to_provider_definitions,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::AnthropicConfig;
use crate::http::{build_client, send_json};

const PROVIDER: &str = "anthropic";

/// Anthropic Messages provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(PROVIDER, config.timeout_secs)?,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    pub const fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Request body for one round-trip
    pub fn build_body(&self, request: &ChatRequest) -> ProviderResult<Value> {
        let options = self.config.defaults.resolve(&request.overrides, PROVIDER)?;

        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": convert_messages(&request.messages),
        });
        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_provider_definitions(&request.tools, self.tool_format()));
        }
        Ok(body)
    }
}

/// Convert agent messages to Messages API turns
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::User => json!({"role": "user", "content": m.content}),
            Role::Assistant if m.tool_calls.is_empty() => json!({"role": "assistant", "content": m.content}),
            Role::Assistant => {
                let text = (!m.content.is_empty()).then(|| json!({"type": "text", "text": m.content}));
                let blocks: Vec<Value> = text
                    .into_iter()
                    .chain(m.tool_calls.iter().map(|call| {
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": object_or_empty(&call.arguments),
                        })
                    }))
                    .collect();
                json!({"role": "assistant", "content": blocks})
            }
            // Results answer the preceding assistant turn from the user side.
            Role::Tool => {
                let blocks: Vec<Value> = m
                    .tool_results
                    .iter()
                    .map(|result| {
                        let mut block = json!({
                            "type": "tool_result",
                            "tool_use_id": result.id,
                            "content": result.content(),
                        });
                        if result.is_error() {
                            block["is_error"] = Value::Bool(true);
                        }
                        block
                    })
                    .collect();
                json!({"role": "user", "content": blocks})
            }
        })
        .collect()
}

fn object_or_empty(arguments: &Value) -> Value {
    if arguments.is_object() { arguments.clone() } else { json!({}) }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<MessagesResponse> for ChatResponse {
    fn from(response: MessagesResponse) -> Self {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, object_or_empty(&input)));
                }
                ContentBlock::Other => {}
            }
        }

        Self {
            content,
            tool_calls,
            usage: TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
            stop_reason: response
                .stop_reason
                .as_deref()
                .map_or(StopReason::EndTurn, StopReason::from_vendor),
            model: response.model,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn tool_format(&self) -> ToolFormat {
        ToolFormat::Anthropic
    }

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatResponse> {
        let body = self.build_body(request)?;
        tracing::debug!(
            model = %body["model"],
            messages = request.messages.len(),
            tools = request.tools.len(),
            "anthropic chat request"
        );

        let request = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .json(&body);
        let response: MessagesResponse = send_json(PROVIDER, request).await?;

        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use agent_core::{ToolOutput, ToolResult, ToolSchema};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new(AnthropicConfig::new("test-key").with_base_url(server.uri())).unwrap()
    }

    fn tool_use_body() -> Value {
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "a", "name": "lookup", "input": {"key": "x"}},
                {"type": "tool_use", "id": "b", "name": "lookup", "input": {"key": "y"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 8}
        })
    }

    /// Every tool_use block must be answered by a tool_result in the very next
    /// user turn, and every tool_result must refer to such a block.
    fn assert_valid_history(messages: &[Value]) {
        for (i, turn) in messages.iter().enumerate() {
            let uses: Vec<&str> = turn["content"]
                .as_array()
                .into_iter()
                .flatten()
                .filter(|b| b["type"] == "tool_use")
                .filter_map(|b| b["id"].as_str())
                .collect();
            if uses.is_empty() {
                continue;
            }
            assert_eq!(turn["role"], "assistant");
            let next = &messages[i + 1];
            assert_eq!(next["role"], "user");
            let answered: Vec<&str> = next["content"]
                .as_array()
                .unwrap()
                .iter()
                .map(|b| {
                    assert_eq!(b["type"], "tool_result");
                    b["tool_use_id"].as_str().unwrap()
                })
                .collect();
            assert_eq!(answered, uses);
        }
    }

    #[tokio::test]
    async fn test_chat_parses_tool_use_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_use_body()))
            .expect(1)
            .mount(&server)
            .await;

        let request = ChatRequest::new("be brief", vec![Message::user("look up x and y")])
            .with_tools(vec![ToolSchema::new("lookup", "Look a key up")]);
        let response = provider(&server).chat(&request).await.unwrap();

        assert_eq!(response.content, "Let me check.");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[1].arguments, json!({"key": "y"}));
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage, TokenUsage::new(12, 8));

        let sent: Value = server.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(sent["system"], "be brief");
        assert_eq!(sent["tools"][0]["name"], "lookup");
        assert_eq!(sent["tools"][0]["input_schema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_continuation_embeds_typed_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_use_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": "x=1, y failed"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 30, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let request = ChatRequest::new("", vec![Message::user("look up x and y")]);
        let first = provider.chat(&request).await.unwrap();

        // Completed out of order; must still be replayed as a, b.
        let results = vec![
            ToolResult::failure("b", "lookup", "not found"),
            ToolResult::success("a", "lookup", ToolOutput::Data(json!(1))),
        ];
        let second = provider.continue_with_tool_results(&request, &first, &results).await.unwrap();
        assert_eq!(second.content, "x=1, y failed");
        assert_eq!(second.stop_reason, StopReason::EndTurn);

        let sent: Value = server.received_requests().await.unwrap()[1].body_json().unwrap();
        assert!(sent.get("system").is_none());
        let messages = sent["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_valid_history(messages);

        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results[0]["content"], "1");
        assert!(results[0].get("is_error").is_none());
        assert_eq!(results[1]["content"], "not found");
        assert_eq!(results[1]["is_error"], true);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let request = ChatRequest::new("", vec![Message::user("hi")]);

        let err = provider.chat(&request).await.unwrap_err();
        assert_eq!(err.status, Some(529));
        assert!(err.retryable);
        assert_eq!(err.message, "Overloaded");

        let err = provider.chat(&request).await.unwrap_err();
        assert_eq!(err.status, Some(401));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable() {
        let provider =
            AnthropicProvider::new(AnthropicConfig::new("k").with_base_url("http://127.0.0.1:1")).unwrap();
        let err = provider
            .chat(&ChatRequest::new("", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.retryable);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("k")).unwrap();
        let request = ChatRequest::new("", vec![Message::user("hi")]).with_overrides(agent_core::GenerationOverrides {
            model: Some("claude-haiku-4-5".into()),
            temperature: None,
            max_tokens: Some(256),
        });

        let body = provider.build_body(&request).unwrap();
        assert_eq!(body["model"], "claude-haiku-4-5");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_zero_max_tokens_never_sent() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("k")).unwrap();
        let request = ChatRequest::new("", vec![]).with_overrides(agent_core::GenerationOverrides {
            max_tokens: Some(0),
            ..Default::default()
        });
        assert!(provider.build_body(&request).is_err());
    }
}
