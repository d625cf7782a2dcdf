//! Structured fix returned by the debugger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of fix the debugger proposes. Advisory: the pipeline applies every
/// kind the same way, through the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    CodePatch,
    Command,
    ConfigChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugFix {
    pub analysis: String,
    pub fix_type: FixType,
    pub fix_content: String,
}

/// The debugger answered, but not with a usable fix object.
#[derive(Debug, Error)]
#[error("parse debug fix: {source}; raw output: {raw}")]
pub struct FixParseError {
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

impl DebugFix {
    /// Parse the debugger's raw text. A single surrounding markdown code
    /// fence (```` ```json ... ``` ````) is tolerated.
    pub fn parse(raw: &str) -> Result<Self, FixParseError> {
        serde_json::from_str(strip_code_fence(raw)).map_err(|source| FixParseError {
            raw: raw.to_string(),
            source,
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening fence line.
    match body.split_once('\n') {
        Some((_info, inner)) => inner.trim(),
        None => body.trim(),
    }
}
