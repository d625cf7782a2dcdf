//! Diagnosing collaborator: a chat model that answers with a JSON fix proposal.
//!
//! The reply is parsed by [`crate::core::fix::DebugFix::parse`]; this agent only
//! returns the raw text. No retry: a failed diagnosis just advances the attempt.

use tokio_util::sync::CancellationToken;

use super::chat::{ChatClient, ChatMessage, Sampling};
use super::{Agent, CallError};
use crate::io::config::ChatAgentConfig;

const SYSTEM_PROMPT: &str = r#"You are an expert debugger. Analyze the error log and source code provided.
Output a JSON object with exactly these fields:
{
  "analysis": "Brief description of the root cause",
  "fix_type": "code_patch" | "command" | "config_change",
  "fix_content": "The exact fix to apply (code diff, command to run, or config to change)"
}
Only output valid JSON. No additional text."#;

const SAMPLING: Sampling = Sampling {
    temperature: 0.0,
    max_tokens: 2048,
};

pub struct Debugger {
    client: ChatClient,
}

impl Debugger {
    pub fn new(config: &ChatAgentConfig) -> Self {
        Self {
            client: ChatClient::new(config),
        }
    }
}

impl Agent for Debugger {
    fn name(&self) -> &str {
        "debugger"
    }

    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        self.client.complete(cancel, &messages, SAMPLING)
    }
}
