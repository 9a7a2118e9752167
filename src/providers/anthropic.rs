use crate::errors::CoreError;
use crate::providers::base::{
    ChatRequest, ContentDelta, LLMProvider, LLMResponse, Message, ProviderMetrics, StreamEvent,
    StreamUsage, ToolCallRequest, ToolDefinition,
};
use crate::providers::sse::parse_sse_chunk;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const STREAM_CHUNK_TIMEOUT_SECS: u64 = 120;

pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
    metrics: std::sync::Arc<std::sync::Mutex<ProviderMetrics>>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self {
            api_key,
            default_model: default_model
                .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            base_url: API_URL.to_string(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            metrics: std::sync::Arc::new(std::sync::Mutex::new(ProviderMetrics::default())),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, default_model: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            default_model: default_model
                .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            base_url,
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            metrics: std::sync::Arc::new(std::sync::Mutex::new(ProviderMetrics::default())),
        }
    }

    fn build_payload(&self, req: &ChatRequest<'_>, stream: bool) -> Value {
        let (system, messages) = convert_messages(&req.messages);

        let mut payload = json!({
            "model": req.model.unwrap_or(&self.default_model),
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        if stream {
            payload["stream"] = json!(true);
        }
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if let Some(tools) = &req.tools {
            payload["tools"] = json!(convert_tools(tools));
            let choice = req.tool_choice.as_deref().unwrap_or("auto");
            payload["tool_choice"] = json!({"type": choice});
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<Response> {
        self.client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .await
            .context("Failed to send request to Anthropic API")
    }
}

/// Translate our provider-agnostic messages into Anthropic's wire format,
/// pulling any `system` message out separately since Anthropic takes it as
/// a top-level field rather than a message with role "system".
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = None;
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role.as_str() {
            "system" => system = Some(msg.content.clone()),
            "tool" => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content,
                        "is_error": msg.is_error,
                    }]
                }));
            }
            "assistant" if msg.tool_calls.is_some() => {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                for tc in msg.tool_calls.as_ref().unwrap() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                out.push(json!({"role": "assistant", "content": blocks}));
            }
            role => {
                out.push(json!({"role": role, "content": msg.content}));
            }
        }
    }

    (system, out)
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

fn parse_response(body: &Value) -> LLMResponse {
    let mut content_text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        content_text.push_str(text);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCallRequest {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }
    }

    let usage = body.get("usage");
    LLMResponse {
        content: if content_text.is_empty() {
            None
        } else {
            Some(content_text)
        },
        tool_calls,
        reasoning_content: None,
        input_tokens: usage.and_then(|u| u["input_tokens"].as_u64()),
        output_tokens: usage.and_then(|u| u["output_tokens"].as_u64()),
        cache_creation_input_tokens: usage.and_then(|u| u["cache_creation_input_tokens"].as_u64()),
        cache_read_input_tokens: usage.and_then(|u| u["cache_read_input_tokens"].as_u64()),
    }
}

/// Turn an error HTTP status into a typed `CoreError`, matching the shape
/// `chat_with_retry` inspects to decide whether to retry.
async fn check_response(resp: Response) -> Result<Value> {
    let status = resp.status();
    if status.is_success() {
        let json: Value = resp.json().await.context("Failed to parse Anthropic response body")?;
        return Ok(json);
    }

    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();

    let err = match status.as_u16() {
        401 | 403 => CoreError::Auth(message),
        429 => CoreError::RateLimit { retry_after },
        400 | 404 | 422 => CoreError::Provider {
            message,
            retryable: false,
        },
        _ => CoreError::Provider {
            message,
            retryable: true,
        },
    };
    Err(err.into())
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> Result<LLMResponse> {
        let payload = self.build_payload(&req, false);
        let resp = self.send(&payload).await?;
        let json = check_response(resp).await?;

        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.request_count += 1;
            if let Some(usage) = json.get("usage").and_then(|u| u.as_object()) {
                for key in ["input_tokens", "output_tokens"] {
                    if let Some(tokens) = usage.get(key).and_then(|t| t.as_u64()) {
                        metrics.token_count += tokens;
                    }
                }
            }
        }

        Ok(parse_response(&json))
    }

    async fn chat_stream(
        &self,
        req: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let payload = self.build_payload(&req, true);
        let resp = self.send(&payload).await?;
        let resp = if resp.status().is_success() {
            resp
        } else {
            return Err(check_response(resp).await.unwrap_err());
        };

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();
            // Block index -> (tool id, tool name), populated on content_block_start
            // for tool_use blocks so content_block_stop can be matched up by the
            // caller's assembler without re-threading state through this task.
            let mut tool_blocks: HashMap<usize, (String, String)> = HashMap::new();

            loop {
                let chunk = match tokio::time::timeout(
                    Duration::from_secs(STREAM_CHUNK_TIMEOUT_SECS),
                    byte_stream.next(),
                )
                .await
                {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        let _ = tx
                            .send(Err(anyhow::anyhow!("Anthropic stream timed out")))
                            .await;
                        return;
                    }
                };

                let Some(chunk) = chunk else { break };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow::anyhow!(e))).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                let events = parse_sse_chunk(&buf);
                if let Some(last_double_newline) = buf.rfind("\n\n") {
                    buf = buf[last_double_newline + 2..].to_string();
                }

                for event in events {
                    let Some(data) = event.data else { continue };
                    let event_type = data["type"].as_str().unwrap_or("");
                    let index = data["index"].as_u64().unwrap_or(0) as usize;

                    let translated = match event_type {
                        "message_start" => {
                            let id = data["message"]["id"].as_str().unwrap_or_default().to_string();
                            let model = data["message"]["model"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string();
                            if let Some(tokens) = data["message"]["usage"]["input_tokens"].as_u64()
                            {
                                if let Ok(mut m) = metrics.lock() {
                                    m.token_count += tokens;
                                }
                            }
                            Some(StreamEvent::MessageStart { id, model })
                        }
                        "content_block_start" => {
                            let block = &data["content_block"];
                            if block["type"].as_str() == Some("tool_use") {
                                let id = block["id"].as_str().unwrap_or_default().to_string();
                                let name = block["name"].as_str().unwrap_or_default().to_string();
                                tool_blocks.insert(index, (id.clone(), name.clone()));
                                Some(StreamEvent::ContentBlockStart {
                                    index,
                                    block_type: "tool_use".to_string(),
                                    tool_id: Some(id),
                                    tool_name: Some(name),
                                })
                            } else {
                                Some(StreamEvent::ContentBlockStart {
                                    index,
                                    block_type: block["type"]
                                        .as_str()
                                        .unwrap_or("text")
                                        .to_string(),
                                    tool_id: None,
                                    tool_name: None,
                                })
                            }
                        }
                        "content_block_delta" => {
                            let delta = &data["delta"];
                            match delta["type"].as_str() {
                                Some("text_delta") => delta["text"].as_str().map(|text| {
                                    StreamEvent::ContentBlockDelta {
                                        index,
                                        delta: ContentDelta::TextDelta(text.to_string()),
                                    }
                                }),
                                Some("input_json_delta") => {
                                    delta["partial_json"].as_str().map(|json_str| {
                                        StreamEvent::ContentBlockDelta {
                                            index,
                                            delta: ContentDelta::InputJsonDelta(
                                                json_str.to_string(),
                                            ),
                                        }
                                    })
                                }
                                _ => None,
                            }
                        }
                        "content_block_stop" => {
                            tool_blocks.remove(&index);
                            Some(StreamEvent::ContentBlockStop { index })
                        }
                        "message_delta" => {
                            let stop_reason =
                                data["delta"]["stop_reason"].as_str().map(String::from);
                            let usage = data.get("usage").map(|u| StreamUsage {
                                input_tokens: u["input_tokens"].as_u64(),
                                output_tokens: u["output_tokens"].as_u64(),
                            });
                            if let Some(ref usage) = usage {
                                if let Some(tokens) = usage.output_tokens {
                                    if let Ok(mut m) = metrics.lock() {
                                        m.token_count += tokens;
                                    }
                                }
                            }
                            Some(StreamEvent::MessageDelta { stop_reason, usage })
                        }
                        "message_stop" => Some(StreamEvent::MessageStop),
                        _ => None,
                    };

                    if let Some(event) = translated {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Ok(mut m) = metrics.lock() {
                m.request_count += 1;
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn metrics(&self) -> ProviderMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::Message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn simple_chat_request(content: &str) -> ChatRequest<'_> {
        ChatRequest {
            messages: vec![Message::user(content)],
            tools: None,
            model: None,
            max_tokens: 1024,
            temperature: 0.7,
            tool_choice: None,
            response_format: None,
        }
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-api-key", "test_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Hello! How can I help?"}],
                "model": "claude-sonnet-4-5-20250929",
                "role": "assistant",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 8}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let result = provider.chat(simple_chat_request("Hi")).await.unwrap();

        assert_eq!(result.content.unwrap(), "Hello! How can I help?");
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_chat_with_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "tool_use", "id": "tc_1", "name": "weather", "input": {"city": "NYC"}}
                ],
                "model": "claude-sonnet-4-5-20250929",
                "role": "assistant",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 20, "output_tokens": 15}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let result = provider
            .chat(simple_chat_request("What's the weather in NYC?"))
            .await
            .unwrap();

        assert!(result.has_tool_calls());
        assert_eq!(result.tool_calls[0].name, "weather");
        assert_eq!(result.tool_calls[0].id, "tc_1");
    }

    #[tokio::test]
    async fn test_chat_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"type": "authentication_error", "message": "Invalid API key"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("bad_key".to_string(), None, server.uri());
        let result = provider.chat(simple_chat_request("Hi")).await;

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());
    }

    #[tokio::test]
    async fn test_chat_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "30")
                    .set_body_json(json!({
                        "error": {"type": "rate_limit_error", "message": "Rate limit exceeded"}
                    })),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let result = provider.chat(simple_chat_request("Hi")).await;

        assert!(result.is_err());
        match result.unwrap_err().downcast::<CoreError>().unwrap() {
            CoreError::RateLimit { retry_after } => assert_eq!(retry_after, Some(30)),
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"type": "api_error", "message": "Internal server error"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let result = provider.chat(simple_chat_request("Hi")).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_chat_with_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "I am a helpful assistant."}],
                "model": "claude-sonnet-4-5-20250929",
                "role": "assistant",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 25, "output_tokens": 10}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let req = ChatRequest {
            messages: vec![
                Message::system("You are a helpful assistant."),
                Message::user("Hello"),
            ],
            tools: None,
            model: None,
            max_tokens: 1024,
            temperature: 0.7,
            tool_choice: None,
            response_format: None,
        };
        let result = provider.chat(req).await.unwrap();

        assert_eq!(result.content.unwrap(), "I am a helpful assistant.");
    }

    #[tokio::test]
    async fn test_chat_metrics_updated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Hi"}],
                "model": "claude-sonnet-4-5-20250929",
                "role": "assistant",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 5, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        provider.chat(simple_chat_request("Hi")).await.unwrap();

        let metrics = provider.metrics();
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.token_count, 8); // 5 input + 3 output
    }

    #[tokio::test]
    async fn test_chat_stream_emits_text_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4-5\",\"usage\":{\"input_tokens\":5}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("test_key".to_string(), None, server.uri());
        let mut stream = provider.chat_stream(simple_chat_request("Hi")).await.unwrap();

        let mut saw_text = false;
        let mut saw_stop = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta(text),
                    ..
                } => {
                    assert_eq!(text, "hi");
                    saw_text = true;
                }
                StreamEvent::MessageStop => saw_stop = true,
                _ => {}
            }
        }
        assert!(saw_text, "expected a text delta event");
        assert!(saw_stop, "expected a message_stop event");
    }
}
