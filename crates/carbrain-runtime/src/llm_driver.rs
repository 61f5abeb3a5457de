//! [`LlmDriver`] – OpenAI-compatible chat-completions client.
//!
//! Works against any provider exposing `POST {base_url}/chat/completions`
//! with bearer authentication: OpenRouter
//! (`https://openrouter.ai/api/v1`), OpenAI (`https://api.openai.com/v1`), or
//! a local server such as Ollama (`http://localhost:11434/v1`).
//!
//! The adapter talks to providers through the [`CompletionProvider`] trait so
//! that tests can script replies, failures and stalls without a network.
//!
//! # Example
//!
//! ```rust,no_run
//! use carbrain_runtime::llm_driver::{CompletionProvider, CompletionRequest, LlmDriver};
//!
//! # async fn demo() -> Result<(), carbrain_runtime::llm_driver::LlmError> {
//! let driver = LlmDriver::new("https://openrouter.ai/api/v1", "sk-or-...");
//! let request = CompletionRequest {
//!     model: "google/gemini-2.0-flash-exp:free".to_string(),
//!     system_prompt: "You drive a car.".to_string(),
//!     user_prompt: "Distance to obstacle: 12.0 cm".to_string(),
//!     image_data_url: None,
//!     max_tokens: 100,
//!     temperature: 0.3,
//! };
//! let completion = driver.complete(&request).await?;
//! println!("{:?}", completion.content);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use carbrain_types::TokenCounts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from a completion call.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be understood.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// No answer arrived within the allotted time.
    #[error("Provider call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Reference to an image by URL (here always a `data:` URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multi-part (vision) message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content: plain text, or text and image parts for vision models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message carrying `text` followed by an image.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider seam
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one completion call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// `data:image/...;base64,...` URL, present only for vision requests.
    pub image_data_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// The chat transcript: one system message, one user message.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let user = match &self.image_data_url {
            Some(url) => ChatMessage::user_with_image(&self.user_prompt, url),
            None => ChatMessage::user(&self.user_prompt),
        };
        vec![ChatMessage::system(&self.system_prompt), user]
    }
}

/// What the provider answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Text of the first choice; `None` when the provider returned no choice
    /// or a choice without content.
    pub content: Option<String>,
    pub usage: Option<TokenCounts>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            usage: None,
        }
    }
}

/// A remote (or scripted) chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl From<Usage> for TokenCounts {
    fn from(u: Usage) -> Self {
        TokenCounts {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

impl ChatResponse {
    /// Decode a 2xx response body.
    fn decode(body: &str) -> Result<Completion, LlmError> {
        serde_json::from_str::<ChatResponse>(body)
            .map(ChatResponse::into_completion)
            .map_err(|e| LlmError::BadResponse(e.to_string()))
    }

    fn into_completion(self) -> Completion {
        Completion {
            content: self.choices.into_iter().next().and_then(|c| c.message.content),
            usage: self.usage.map(TokenCounts::from),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share (it is cheap to clone the inner client).
pub struct LlmDriver {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a driver for `base_url` (e.g. `"https://openrouter.ai/api/v1"`)
    /// authenticating with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for LlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmDriver")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

#[async_trait]
impl CompletionProvider for LlmDriver {
    /// Send one request and return the first choice.
    ///
    /// # Errors
    ///
    /// [`LlmError::Http`] when the request fails in transit,
    /// [`LlmError::Status`] on a non-2xx answer, [`LlmError::BadResponse`]
    /// when the body is not a chat-completions response.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: &request.model,
            messages: request.messages(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        ChatResponse::decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(image: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "what next?".to_string(),
            image_data_url: image.map(str::to_string),
            max_tokens: 100,
            temperature: 0.3,
        }
    }

    #[test]
    fn text_request_serializes_plain_content() {
        let messages = request(None).messages();
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "sys");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"], "what next?");
    }

    #[test]
    fn vision_request_serializes_content_parts() {
        let messages = request(Some("data:image/png;base64,AAAA")).messages();
        let json = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "what next?");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn request_body_carries_sampling_parameters() {
        let req = request(None);
        let body = ChatRequest {
            model: &req.model,
            messages: req.messages(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["stream"], false);
        assert!((json["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn response_with_usage_is_decoded() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"command\":\"STOP\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 9, "total_tokens": 129}
        }"#;
        let completion = serde_json::from_str::<ChatResponse>(raw)
            .unwrap()
            .into_completion();
        assert_eq!(completion.content.as_deref(), Some("{\"command\":\"STOP\"}"));
        let usage = completion.usage.unwrap();
        assert_eq!(usage.total_tokens, Some(129));
    }

    #[test]
    fn empty_choices_yield_no_content() {
        let completion = serde_json::from_str::<ChatResponse>(r#"{"choices": []}"#)
            .unwrap()
            .into_completion();
        assert_eq!(completion, Completion::default());

        let completion = serde_json::from_str::<ChatResponse>(r#"{"id": "x"}"#)
            .unwrap()
            .into_completion();
        assert!(completion.content.is_none());
    }

    #[test]
    fn null_content_yields_no_content() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let completion = serde_json::from_str::<ChatResponse>(raw)
            .unwrap()
            .into_completion();
        assert!(completion.content.is_none());
    }

    #[test]
    fn non_json_body_is_a_bad_response() {
        let err = ChatResponse::decode("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, LlmError::BadResponse(_)));

        let err = ChatResponse::decode(r#"{"choices": "none"}"#).unwrap_err();
        assert!(matches!(err, LlmError::BadResponse(_)));

        let completion = ChatResponse::decode(r#"{"choices": [{"message": {"content": "ok"}}]}"#)
            .unwrap();
        assert_eq!(completion.content.as_deref(), Some("ok"));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let driver = LlmDriver::new("https://openrouter.ai/api/v1/", "key");
        assert_eq!(driver.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn debug_redacts_api_key() {
        let driver = LlmDriver::new("http://localhost", "sk-secret");
        let dbg = format!("{driver:?}");
        assert!(!dbg.contains("sk-secret"));
    }

    #[test]
    fn timeout_error_reports_milliseconds() {
        let err = LlmError::Timeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "Provider call timed out after 5000ms");
    }
}
