//! Append-only JSONL log of archive insertions
//!
//! One line per inserted record, in insertion order. Replaying the log
//! re-inserts every entry through [`Archive::restore`], so lineage and
//! `children_count` are rebuilt by the same rules as a live run.

use chrono::{DateTime, Utc};
use dgm_core::{AgentCode, AgentId, DgmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::archive::Archive;
use crate::record::AgentRecord;

/// One persisted insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: AgentId,
    pub parent_id: Option<AgentId>,
    pub generation: u32,
    pub score: Option<f64>,
    pub code: AgentCode,
    pub created_at: DateTime<Utc>,
}

impl From<&AgentRecord> for ArchiveEntry {
    fn from(record: &AgentRecord) -> Self {
        Self {
            id: record.id(),
            parent_id: record.parent_id(),
            generation: record.generation(),
            score: record.score(),
            code: record.code().clone(),
            created_at: record.created_at(),
        }
    }
}

/// File-backed archive log
#[derive(Debug, Clone)]
pub struct ArchiveLog {
    path: PathBuf,
}

impl ArchiveLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one record
    pub async fn append(&self, record: &AgentRecord) -> Result<()> {
        let line = serde_json::to_string(&ArchiveEntry::from(record))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        debug!("Logged {} to {:?}", record.id(), self.path);
        Ok(())
    }

    /// Rewrite the log from a whole archive
    pub async fn write_all(&self, archive: &Archive) -> Result<()> {
        let mut content = String::new();
        for record in archive.all() {
            content.push_str(&serde_json::to_string(&ArchiveEntry::from(record))?);
            content.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Parse every entry; a missing log is empty
    ///
    /// An unparsable final line is treated as an interrupted write and
    /// skipped. An unparsable line anywhere else is a `Persistence` error.
    pub async fn load_entries(&self) -> Result<Vec<ArchiveEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let lines: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();

        let mut entries = Vec::with_capacity(lines.len());
        for (pos, (line_no, line)) in lines.iter().enumerate() {
            match serde_json::from_str::<ArchiveEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if pos + 1 == lines.len() => {
                    warn!(
                        "Ignoring truncated last line {} of {:?}: {}",
                        line_no + 1,
                        self.path,
                        e
                    );
                }
                Err(e) => {
                    return Err(DgmError::Persistence(format!(
                        "{}:{}: {}",
                        self.path.display(),
                        line_no + 1,
                        e
                    )));
                }
            }
        }
        Ok(entries)
    }

    /// Rebuild an archive from the log
    pub async fn replay(&self) -> Result<Archive> {
        let mut archive = Archive::new();
        for entry in self.load_entries().await? {
            archive.restore(entry)?;
        }
        debug!("Replayed {} agents from {:?}", archive.len(), self.path);
        Ok(archive)
    }
}
