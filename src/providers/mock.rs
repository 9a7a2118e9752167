use crate::providers::base::{ChatRequest, LLMProvider, LLMResponse, ProviderMetrics, StreamEvent};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Mutex;

/// A scripted, deterministic provider for exercising the orchestrator and
/// tool pipeline without a network dependency. Each call to `chat` or
/// `chat_stream` consumes the next scripted item in order; calling past
/// the end of the script is a test bug and panics loudly rather than
/// silently looping.
pub struct MockProvider {
    model: String,
    responses: Mutex<Vec<LLMResponse>>,
    streams: Mutex<Vec<Vec<StreamEvent>>>,
    metrics: Mutex<ProviderMetrics>,
}

impl MockProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            metrics: Mutex::new(ProviderMetrics::default()),
        }
    }

    /// Queue a non-streaming response to return on the next `chat` call.
    pub fn push_response(&self, response: LLMResponse) {
        self.responses.lock().unwrap().push(response);
    }

    /// Queue an event sequence to return on the next `chat_stream` call.
    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().unwrap().push(events);
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn chat(&self, _req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        let mut queued = self.responses.lock().unwrap();
        if queued.is_empty() {
            anyhow::bail!("MockProvider({}): no scripted response left to return", self.model);
        }
        self.metrics.lock().unwrap().request_count += 1;
        Ok(queued.remove(0))
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<StreamEvent>>> {
        let mut queued = self.streams.lock().unwrap();
        if queued.is_empty() {
            anyhow::bail!("MockProvider({}): no scripted stream left to return", self.model);
        }
        let events = queued.remove(0);
        self.metrics.lock().unwrap().request_count += 1;
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn metrics(&self) -> ProviderMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{ContentDelta, Message};
    use futures_util::StreamExt;

    fn request() -> ChatRequest<'static> {
        ChatRequest {
            messages: vec![Message::user("hi")],
            tools: None,
            model: None,
            max_tokens: 256,
            temperature: 0.0,
            tool_choice: None,
            response_format: None,
        }
    }

    fn text_response(text: &str) -> LLMResponse {
        LLMResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            reasoning_content: None,
            input_tokens: None,
            output_tokens: None,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }
    }

    #[tokio::test]
    async fn returns_scripted_responses_in_order() {
        let provider = MockProvider::new("mock-1");
        provider.push_response(text_response("first"));
        provider.push_response(text_response("second"));

        assert_eq!(
            provider.chat(request()).await.unwrap().content.unwrap(),
            "first"
        );
        assert_eq!(
            provider.chat(request()).await.unwrap().content.unwrap(),
            "second"
        );
        assert_eq!(provider.metrics().request_count, 2);
    }

    #[tokio::test]
    async fn errors_when_script_exhausted() {
        let provider = MockProvider::new("mock-1");
        assert!(provider.chat(request()).await.is_err());
    }

    #[tokio::test]
    async fn streams_scripted_events() {
        let provider = MockProvider::new("mock-1");
        provider.push_stream(vec![
            StreamEvent::MessageStart {
                id: "msg_1".into(),
                model: "mock-1".into(),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta("hello".into()),
            },
            StreamEvent::MessageStop,
        ]);

        let mut stream = provider.chat_stream(request()).await.unwrap();
        let mut collected = vec![];
        while let Some(event) = stream.next().await {
            collected.push(event.unwrap());
        }
        assert_eq!(collected.len(), 3);
    }
}
