//! Agent records held by the archive

use chrono::{DateTime, Utc};
use dgm_core::{AgentCode, AgentId};
use serde::{Deserialize, Serialize};

/// An archived agent variant
///
/// Fields are read-only outside this crate. `children_count` is advanced by
/// the archive when a child naming this record as parent is inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub(crate) id: AgentId,
    pub(crate) code: AgentCode,
    pub(crate) parent_id: Option<AgentId>,
    pub(crate) score: Option<f64>,
    pub(crate) children_count: u32,
    pub(crate) generation: u32,
    pub(crate) created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn code(&self) -> &AgentCode {
        &self.code
    }

    /// `None` for generation-0 roots
    pub fn parent_id(&self) -> Option<AgentId> {
        self.parent_id
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Validation fitness in [0, 1], `None` while unscored
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn children_count(&self) -> u32 {
        self.children_count
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Perfect validation score
    pub fn is_saturated(&self) -> bool {
        self.score.is_some_and(|s| s >= 1.0)
    }
}

/// A record waiting to be inserted; the archive assigns id and generation
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub code: AgentCode,
    pub parent_id: Option<AgentId>,
    pub score: Option<f64>,
}

impl NewAgent {
    pub fn root(code: AgentCode, score: f64) -> Self {
        Self {
            code,
            parent_id: None,
            score: Some(score),
        }
    }

    pub fn child(code: AgentCode, parent_id: AgentId, score: f64) -> Self {
        Self {
            code,
            parent_id: Some(parent_id),
            score: Some(score),
        }
    }

    pub fn unscored(mut self) -> Self {
        self.score = None;
        self
    }
}
