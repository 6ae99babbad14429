//! Chat completions client with tool calling support

use async_trait::async_trait;
use tracing::debug;

use super::types::{ChatMessage, ChatResponse, Tool};

/// Error type for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty response from provider")]
    EmptyResponse,
}

/// A chat model that may answer with text or with tool calls
///
/// One call returns one assistant message. Implementations must be usable
/// from several conversations at once.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        tools: &[Tool],
    ) -> Result<ChatMessage, ChatError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    /// Send the conversation and return the model's reply
    ///
    /// # Arguments
    /// * `messages` - The rendered conversation, system prompt first
    /// * `model` - The model name (e.g., "gpt-4o")
    /// * `tools` - Tools the model may call; omitted from the request when empty
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        tools: &[Tool],
    ) -> Result<ChatMessage, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let mut request = self.client.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        if let Some(usage) = chat_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion usage"
            );
        }

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(ChatError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ChatClient::new("http://localhost:8000/v1/");
        assert_eq!(client.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_response_parsing_takes_first_choice() {
        let text = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "first"}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "second"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.choices[0].message.content, "first");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 10);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_request_error() {
        let client = ChatClient::new("http://127.0.0.1:9");
        let result = client
            .chat(vec![ChatMessage::user("hi")], "gpt-4o", &[])
            .await;
        assert!(matches!(result, Err(ChatError::Request(_))));
    }
}
