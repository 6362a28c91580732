//! Agent runner capability and the subprocess implementation

use async_trait::async_trait;
use dgm_core::{AgentCode, DgmError, Result, RunnerConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

/// Longest stderr excerpt carried in a runner error
const STDERR_EXCERPT_CHARS: usize = 400;

/// Executes agent code against one example input
///
/// An `Err` means the agent crashed or could not be run; callers count it as
/// a wrong answer for that example.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, code: &AgentCode, input: &str) -> Result<String>;
}

/// Runs each agent as `program args... <agent file>`
///
/// The example input is written to stdin and the trimmed stdout is the
/// answer. Agent files are content-addressed inside `work_dir`, so each
/// distinct program is written once.
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    extension: String,
    work_dir: PathBuf,
    materialized: Mutex<HashMap<String, PathBuf>>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extension: "py".to_string(),
            work_dir: work_dir.into(),
            materialized: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RunnerConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self::new(config.program.clone(), work_dir)
            .with_args(config.args.clone())
            .with_extension(config.file_extension.clone())
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Write the code to its content-addressed path (once)
    pub async fn materialize(&self, code: &AgentCode) -> Result<PathBuf> {
        let mut materialized = self.materialized.lock().await;
        if let Some(path) = materialized.get(code.digest()) {
            return Ok(path.clone());
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self
            .work_dir
            .join(format!("agent_{}.{}", code.short_digest(), self.extension));
        tokio::fs::write(&path, code.text()).await?;
        debug!("Materialized agent {} at {:?}", code.short_digest(), path);

        materialized.insert(code.digest().to_string(), path.clone());
        Ok(path)
    }
}

#[async_trait]
impl AgentRunner for CommandRunner {
    async fn run(&self, code: &AgentCode, input: &str) -> Result<String> {
        let path = self.materialize(code).await?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DgmError::Runner(format!("Failed to spawn {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Agents that never read stdin may exit before we finish writing
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr
                .chars()
                .rev()
                .take(STDERR_EXCERPT_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(DgmError::Runner(format!(
                "agent {} exited with {}: {}",
                code.short_digest(),
                output.status,
                excerpt.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
