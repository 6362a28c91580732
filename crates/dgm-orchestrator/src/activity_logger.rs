//! Activity Logger - human-readable run journal under the run directory
//!
//! Writes:
//! - `activity.md`: run start, seeding, each iteration's per-parent outcome,
//!   the final archive table and the champion's test score
//! - `generations/<child>.json`: the evidence each accepted child was bred from
//! - `agents/agent_<id>.<ext>`: the code of every archived agent
//!
//! Every write is fail-open: a journal problem never stops a run.

use chrono::Utc;
use dgm_core::fail_open::fail_open;
use dgm_core::{AgentId, Observation, Result, RunConfig};
use dgm_evolution::{AgentRecord, Archive};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::driver::{IterationReport, ParentOutcome, RunReport};

/// What an accepted child was bred from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvidence {
    pub child: AgentId,
    pub parent: AgentId,
    pub iteration: usize,
    pub attempt: usize,
    pub score: f64,
    pub failures: Vec<Observation>,
    pub successes: Vec<Observation>,
    /// Gate rejections that preceded the accepted proposal
    pub rejections: Vec<String>,
}

/// Activity logger for a run directory
pub struct ActivityLogger {
    run_dir: PathBuf,
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        let run_dir = run_dir.into();
        Self {
            output_path: run_dir.join("activity.md"),
            run_dir,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Start a new journal, or continue an existing one when resuming
    pub async fn log_run_start(
        &self,
        run_id: &Uuid,
        config: &RunConfig,
        split_sizes: (usize, usize, usize),
        resumed_agents: usize,
    ) {
        fail_open("activity_logger::log_run_start", || async {
            fs::create_dir_all(&self.run_dir).await?;
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let (train, validation, test) = split_sizes;

            let mut content = String::new();
            if resumed_agents == 0 {
                content.push_str("# DGM Activity Log\n\n");
            }
            content.push_str(&format!(
                "## Run {}\n**Started**: {}\n**Iterations**: {}\n**Selection**: {}\n\
                 **Splits**: {} train / {} validation / {} test\n",
                run_id,
                timestamp,
                config.iterations,
                config.selection.strategy,
                train,
                validation,
                test
            ));
            if resumed_agents > 0 {
                content.push_str(&format!(
                    "**Resumed** with {} archived agents\n",
                    resumed_agents
                ));
            }
            content.push_str("\n---\n\n");

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(resumed_agents > 0)
                .truncate(resumed_agents == 0)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await;
    }

    pub async fn log_seed(&self, record: &AgentRecord) {
        fail_open("activity_logger::log_seed", || async {
            let content = format!(
                "### Seed\nArchived {} with validation score {}\n\n---\n\n",
                record.id(),
                format_score(record.score())
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_iteration(&self, report: &IterationReport, total: usize, archive_size: usize) {
        fail_open("activity_logger::log_iteration", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let mut content = format!(
                "### Iteration {}/{}\n**Time**: {}\n\n",
                report.iteration, total, timestamp
            );

            if report.parents.is_empty() {
                content.push_str("- No eligible parent\n");
            }
            for parent in &report.parents {
                let line = match &parent.outcome {
                    ParentOutcome::Accepted {
                        child,
                        score,
                        attempts,
                    } => format!(
                        "- {} -> {} accepted (score {:.4}, attempt {})",
                        parent.parent, child, score, attempts
                    ),
                    ParentOutcome::NoFailures { examined } => format!(
                        "- {} skipped: no failures in {} training examples",
                        parent.parent, examined
                    ),
                    ParentOutcome::OracleFailed { error } => {
                        format!("- {} skipped: oracle failed ({})", parent.parent, error)
                    }
                    ParentOutcome::Exhausted { rejections } => format!(
                        "- {} skipped after {} rejected proposals: {}",
                        parent.parent,
                        rejections.len(),
                        rejections.join("; ")
                    ),
                };
                content.push_str(&line);
                content.push('\n');
            }

            content.push_str(&format!("\n**Archive size**: {}\n\n---\n\n", archive_size));
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_run_complete(&self, archive: &Archive, report: &RunReport) {
        fail_open("activity_logger::log_run_complete", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let mut content = format!(
                "## Run Summary\n\n**Completed**: {}\n**Accepted children**: {}\n\n",
                timestamp,
                report.accepted_children()
            );

            content.push_str("| id | parent | generation | score | children |\n");
            content.push_str("|----|--------|------------|-------|----------|\n");
            for record in archive.all() {
                content.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    record.id(),
                    record
                        .parent_id()
                        .map_or_else(|| "-".to_string(), |p| p.to_string()),
                    record.generation(),
                    format_score(record.score()),
                    record.children_count()
                ));
            }

            content.push_str(&format!(
                "\n**Champion**: {} (validation {:.4}, test {:.4} on {} examples)\n\n",
                report.champion,
                report.champion_validation_score,
                report.test.score,
                report.test.total
            ));
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn write_generation(&self, evidence: &GenerationEvidence) {
        fail_open("activity_logger::write_generation", || async {
            let dir = self.run_dir.join("generations");
            fs::create_dir_all(&dir).await?;
            let json = serde_json::to_string_pretty(evidence)?;
            fs::write(dir.join(format!("{}.json", evidence.child)), json).await?;
            Ok(())
        })
        .await;
    }

    pub async fn export_agent(&self, record: &AgentRecord, extension: &str) {
        fail_open("activity_logger::export_agent", || async {
            let dir = self.run_dir.join("agents");
            fs::create_dir_all(&dir).await?;
            let path = dir.join(format!("agent_{}.{}", record.id(), extension));
            fs::write(path, record.code().text()).await?;
            Ok(())
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "unscored".to_string(), |s| format!("{:.4}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ParentReport;
    use dgm_core::{AgentCode, Example};
    use dgm_evolution::NewAgent;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_run_start_and_iteration() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path().join("run"));

        logger
            .log_run_start(&Uuid::new_v4(), &RunConfig::default(), (185, 15, 50), 0)
            .await;
        logger
            .log_iteration(
                &IterationReport {
                    iteration: 1,
                    parents: vec![ParentReport {
                        parent: AgentId(0),
                        outcome: ParentOutcome::NoFailures { examined: 185 },
                    }],
                },
                10,
                1,
            )
            .await;

        let content = fs::read_to_string(logger.output_path()).await.unwrap();
        assert!(content.starts_with("# DGM Activity Log"));
        assert!(content.contains("185 train / 15 validation / 50 test"));
        assert!(content.contains("### Iteration 1/10"));
        assert!(content.contains("v0 skipped: no failures in 185 training examples"));
    }

    #[tokio::test]
    async fn test_resume_appends() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path());
        let config = RunConfig::default();

        logger.log_run_start(&Uuid::new_v4(), &config, (1, 1, 1), 0).await;
        logger.log_run_start(&Uuid::new_v4(), &config, (1, 1, 1), 4).await;

        let content = fs::read_to_string(logger.output_path()).await.unwrap();
        assert_eq!(content.matches("## Run ").count(), 2);
        assert!(content.contains("**Resumed** with 4 archived agents"));
    }

    #[tokio::test]
    async fn test_generation_and_export_files() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path());

        let mut archive = Archive::new();
        archive
            .insert(NewAgent::root(AgentCode::new("def run_agent(q): pass"), 0.2))
            .unwrap();
        logger.export_agent(&archive.all()[0], "py").await;

        let evidence = GenerationEvidence {
            child: AgentId(1),
            parent: AgentId(0),
            iteration: 1,
            attempt: 1,
            score: 0.5,
            failures: vec![Observation::new(&Example::new("q", "4"), "Wrong Answer: 5")],
            successes: vec![],
            rejections: vec![],
        };
        logger.write_generation(&evidence).await;

        let code = fs::read_to_string(temp_dir.path().join("agents/agent_v0.py"))
            .await
            .unwrap();
        assert_eq!(code, "def run_agent(q): pass");

        let json = fs::read_to_string(temp_dir.path().join("generations/v1.json"))
            .await
            .unwrap();
        let parsed: GenerationEvidence = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, evidence);
    }

    #[tokio::test]
    async fn test_unwritable_location_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // A regular file where the run directory should be
        let logger = ActivityLogger::new(blocker.join("run"));
        logger
            .log_run_start(&Uuid::new_v4(), &RunConfig::default(), (1, 1, 1), 0)
            .await;
        assert!(!logger.output_path().exists());
    }
}
