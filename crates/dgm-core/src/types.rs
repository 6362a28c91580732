//! Core type definitions for dgm

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Archive-assigned agent identifier
///
/// Ids are dense and assigned in insertion order, so `v0` is always the
/// generation-0 seed of a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl AgentId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['v', 'V']);
        digits
            .parse::<u64>()
            .map(AgentId)
            .map_err(|_| format!("Invalid agent id: {}", s))
    }
}

/// Agent program text, content-addressed by its SHA-256 digest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AgentCode {
    text: String,
    digest: String,
}

impl AgentCode {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        Self { text, digest }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex-encoded SHA-256 of the exact bytes
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// First 12 hex chars of the digest, for file names and logs
    pub fn short_digest(&self) -> &str {
        &self.digest[..12]
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Exact byte equality (digest first, bytes to rule out collisions)
    pub fn same_content(&self, other: &AgentCode) -> bool {
        self.digest == other.digest && self.text == other.text
    }
}

impl PartialEq for AgentCode {
    fn eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

impl Eq for AgentCode {}

impl From<String> for AgentCode {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for AgentCode {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<AgentCode> for String {
    fn from(code: AgentCode) -> Self {
        code.text
    }
}

/// A labeled dataset example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub expected: String,
}

impl Example {
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
        }
    }
}

/// An example together with what an agent actually produced for it
///
/// Used as failure/success evidence sent to the mutation oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub input: String,
    pub expected: String,
    pub actual: String,
}

impl Observation {
    pub fn new(example: &Example, actual: impl Into<String>) -> Self {
        Self {
            input: example.input.clone(),
            expected: example.expected.clone(),
            actual: actual.into(),
        }
    }
}
