//! OpenAI-compatible chat-completion client (blocking, via `ureq`).

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::CallError;
use crate::io::config::ChatAgentConfig;

/// Bytes of an error response body kept in [`CallError::Status`].
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking chat-completion client bound to one endpoint and model.
pub struct ChatClient {
    agent: ureq::Agent,
    api_url: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(config: &ChatAgentConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout()).build();
        Self {
            agent,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one completion request and return the first choice's content.
    ///
    /// An in-flight request is bounded by the configured timeout; when `cancel`
    /// fires meanwhile the response is discarded.
    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    pub fn complete(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        sampling: Sampling,
    ) -> Result<String, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        };
        let result = self
            .agent
            .post(&self.api_url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request);
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(CallError::Status {
                    status,
                    body: clip(&body, ERROR_BODY_LIMIT),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(CallError::Transport(transport.to_string()));
            }
        };
        let body = response
            .into_string()
            .map_err(|err| CallError::Transport(format!("read response body: {err}")))?;
        debug!(body_len = body.len(), "chat response received");
        parse_chat_response(&body)
    }
}

/// Extract the first choice's content from a chat-completion response body.
pub fn parse_chat_response(body: &str) -> Result<String, CallError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|err| CallError::Decode(err.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or(CallError::EmptyResponse)
}

fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
