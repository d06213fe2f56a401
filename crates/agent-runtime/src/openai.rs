//! OpenAI LLM Provider
//!
//! Implementation of `LlmProvider` for Chat Completions. Tool calls ride on the
//! assistant message with JSON-encoded argument strings; each result is its
//! own `tool` message keyed by `tool_call_id`.

use agent_core::{
    ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, ProviderResult, Role, StopReason, TokenUsage,
    ToolCall, ToolFormat,
    tool::to_provider_definitions,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::OpenAiConfig;
use crate::http::{build_client, send_json};

const PROVIDER: &str = "openai";

/// OpenAI Chat Completions provider
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(PROVIDER, config.timeout_secs)?,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub const fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Request body for one round-trip
    pub fn build_body(&self, request: &ChatRequest) -> ProviderResult<Value> {
        let options = self.config.defaults.resolve(&request.overrides, PROVIDER)?;

        let system = (!request.system.is_empty()).then(|| json!({"role": "system", "content": request.system}));
        let messages: Vec<Value> = system.into_iter().chain(convert_messages(&request.messages)).collect();

        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_provider_definitions(&request.tools, self.tool_format()));
        }
        Ok(body)
    }
}

/// Convert agent messages; a tool turn fans out into one message per result.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .flat_map(|m| match m.role {
            Role::User => vec![json!({"role": "user", "content": m.content})],
            Role::Assistant if m.tool_calls.is_empty() => {
                vec![json!({"role": "assistant", "content": m.content})]
            }
            Role::Assistant => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() { Value::Null } else { json!(m.content) };
                vec![json!({"role": "assistant", "content": content, "tool_calls": calls})]
            }
            Role::Tool => m
                .tool_results
                .iter()
                .map(|result| {
                    let content = match result.error() {
                        Some(err) => format!("Error: {err}"),
                        None => result.content(),
                    };
                    json!({"role": "tool", "tool_call_id": result.id, "content": content})
                })
                .collect(),
        })
        .collect()
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Arguments arrive as JSON text; anything that is not an object becomes `{}`.
fn parse_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            tracing::warn!(tool, arguments = raw, "tool call arguments are not a JSON object, using {{}}");
            json!({})
        }
    }
}

impl TryFrom<CompletionResponse> for ChatResponse {
    type Error = ProviderError;

    fn try_from(response: CompletionResponse) -> ProviderResult<Self> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::parse(PROVIDER, "response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = parse_arguments(&call.function.name, &call.function.arguments);
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect();

        Ok(Self {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: TokenUsage::new(response.usage.prompt_tokens, response.usage.completion_tokens),
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map_or(StopReason::EndTurn, StopReason::from_vendor),
            model: response.model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn tool_format(&self) -> ToolFormat {
        ToolFormat::OpenAi
    }

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatResponse> {
        let body = self.build_body(request)?;
        tracing::debug!(
            model = %body["model"],
            messages = request.messages.len(),
            tools = request.tools.len(),
            "openai chat request"
        );

        let request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        let response: CompletionResponse = send_json(PROVIDER, request).await?;

        response.try_into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use agent_core::{ToolOutput, ToolResult, ToolSchema};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig::new("sk-test").with_base_url(server.uri())).unwrap()
    }

    fn tool_calls_body() -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "lookup", "arguments": "{\"key\":\"x\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "lookup", "arguments": "{\"key\":\"y\"}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 15, "completion_tokens": 9, "total_tokens": 24}
        })
    }

    /// Each assistant `tool_calls` entry must be answered by exactly one
    /// following `tool` message before the next non-tool message.
    fn assert_valid_history(messages: &[Value]) {
        for (i, turn) in messages.iter().enumerate() {
            let Some(calls) = turn.get("tool_calls").and_then(Value::as_array) else {
                continue;
            };
            let expected: HashSet<&str> = calls.iter().map(|c| c["id"].as_str().unwrap()).collect();
            for call in calls {
                let args = call["function"]["arguments"].as_str().unwrap();
                assert!(serde_json::from_str::<Value>(args).unwrap().is_object());
            }
            let answered: HashSet<&str> = messages[i + 1..]
                .iter()
                .take_while(|m| m["role"] == "tool")
                .map(|m| m["tool_call_id"].as_str().unwrap())
                .collect();
            assert_eq!(answered, expected);
        }
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_calls_body()))
            .expect(1)
            .mount(&server)
            .await;

        let request = ChatRequest::new("be brief", vec![Message::user("look up x and y")])
            .with_tools(vec![ToolSchema::new("lookup", "Look a key up")]);
        let response = provider(&server).chat(&request).await.unwrap();

        assert!(response.content.is_empty());
        assert_eq!(response.tool_calls[0].arguments, json!({"key": "x"}));
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.total_tokens, 24);

        let sent: Value = server.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(sent["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(sent["tools"][0]["type"], "function");
        assert_eq!(sent["tools"][0]["function"]["name"], "lookup");
    }

    #[tokio::test]
    async fn test_continuation_sends_one_message_per_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_calls_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": "x=1"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 40, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let request = ChatRequest::new("sys", vec![Message::user("look up x and y")]);
        let first = provider.chat(&request).await.unwrap();
        let results = vec![
            ToolResult::failure("b", "lookup", "not found"),
            ToolResult::success("a", "lookup", ToolOutput::Data(json!({"value": 1}))),
        ];

        let second = provider.continue_with_tool_results(&request, &first, &results).await.unwrap();
        assert_eq!(second.content, "x=1");
        assert_eq!(second.stop_reason, StopReason::EndTurn);

        let sent: Value = server.received_requests().await.unwrap()[1].body_json().unwrap();
        let messages = sent["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        assert_valid_history(messages);
        assert_eq!(messages[2]["content"], Value::Null);
        assert_eq!(messages[3], json!({"role": "tool", "tool_call_id": "a", "content": "{\"value\":1}"}));
        assert_eq!(messages[4]["content"], "Error: not found");
    }

    #[tokio::test]
    async fn test_malformed_arguments_become_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o",
                "choices": [{
                    "message": {"content": "", "tool_calls": [
                        {"id": "c1", "type": "function", "function": {"name": "lookup", "arguments": "{\"key\":"}},
                        {"id": "c2", "type": "function", "function": {"name": "lookup", "arguments": "[1,2]"}}
                    ]},
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let response = provider(&server)
            .chat(&ChatRequest::new("", vec![Message::user("go")]))
            .await
            .unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!({}));
        assert_eq!(response.tool_calls[1].arguments, json!({}));
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat(&ChatRequest::new("", vec![Message::user("go")]))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(429));
        assert!(err.retryable);
        assert_eq!(err.message, "Rate limit reached");
    }

    #[tokio::test]
    async fn test_empty_choices_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model": "gpt-4o", "choices": []})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat(&ChatRequest::new("", vec![Message::user("go")]))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_tool_definitions_are_stable() {
        let provider = OpenAiProvider::new(OpenAiConfig::new("k")).unwrap();
        let request = ChatRequest::new("", vec![]).with_tools(vec![ToolSchema::new("lookup", "Look a key up")]);
        assert_eq!(
            provider.build_body(&request).unwrap()["tools"],
            provider.build_body(&request).unwrap()["tools"]
        );
    }
}
