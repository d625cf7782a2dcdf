//! Planning collaborator: a chat model that turns a task into a step-by-step plan.

use tokio_util::sync::CancellationToken;

use super::chat::{ChatClient, ChatMessage, Sampling};
use super::retry::{RetryPolicy, call_with_retry};
use super::{Agent, CallError};
use crate::io::config::ChatAgentConfig;

const SYSTEM_PROMPT: &str = "You are an expert full-stack engineer. Generate clean, \
production-ready code and concrete implementation plans. Output only code and necessary \
explanations. No markdown fences unless showing file contents.";

const SAMPLING: Sampling = Sampling {
    temperature: 0.1,
    max_tokens: 4096,
};

pub struct Planner {
    client: ChatClient,
    retry: RetryPolicy,
}

impl Planner {
    pub fn new(config: &ChatAgentConfig) -> Self {
        Self {
            client: ChatClient::new(config),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Agent for Planner {
    fn name(&self) -> &str {
        "planner"
    }

    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        call_with_retry(cancel, &self.retry, || {
            self.client.complete(cancel, &messages, SAMPLING)
        })
    }
}
