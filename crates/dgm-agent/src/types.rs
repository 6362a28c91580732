//! Type definitions for oracle and runner interactions

use dgm_core::{AgentCode, AgentId, Observation};
use serde::{Deserialize, Serialize};

/// Everything the mutation oracle is given for one proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Parent being rewritten
    pub parent_id: AgentId,
    /// Parent code, verbatim
    pub parent_code: AgentCode,
    /// Examples the parent got wrong (or crashed on)
    pub failures: Vec<Observation>,
    /// Examples the parent got right, for reference
    pub successes: Vec<Observation>,
    /// Model the rewritten agent must keep calling
    pub task_model: String,
    /// 1-based proposal attempt for this parent
    pub attempt: usize,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Usage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Messages API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleMessage {
    pub role: String,
    pub content: String,
}

/// Messages API request format
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub model: String,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<OracleMessage>,
}

/// Messages API response format
#[derive(Debug, Clone, Deserialize)]
pub struct OracleResponse {
    #[allow(dead_code)]
    pub id: String,
    pub content: Vec<OracleContent>,
    pub usage: Option<Usage>,
}

/// Content block in a messages API response
#[derive(Debug, Clone, Deserialize)]
pub struct OracleContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl OracleResponse {
    /// Concatenated text blocks, ignoring tool or thinking blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}
