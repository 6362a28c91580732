//! Validation gate for candidate children
//!
//! Checks run in order and stop at the first failure:
//!
//! 1. Non-identity: the candidate differs from its parent and from every
//!    existing child of that parent
//! 2. Structural sanity: every configured [`CodeChecker`] passes
//! 3. Smoke test (optional): the candidate answers one trivial example
//!    without crashing

use async_trait::async_trait;
use dgm_agent::AgentRunner;
use dgm_core::{AgentCode, AgentId, RunConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::archive::Archive;

/// Why a candidate was discarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    Identical(String),
    Malformed(String),
    CrashesImmediately(String),
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identical(_) => "RejectedIdentical",
            Self::Malformed(_) => "RejectedMalformed",
            Self::CrashesImmediately(_) => "RejectedCrashesImmediately",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Identical(r) | Self::Malformed(r) | Self::CrashesImmediately(r) => r,
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Accepted,
    Rejected(Rejection),
}

impl GateVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// One structural check; `Err` carries the reason the code is malformed
#[async_trait]
pub trait CodeChecker: Send + Sync {
    async fn check(&self, code: &AgentCode) -> std::result::Result<(), String>;

    fn name(&self) -> &str;
}

/// Requires non-blank code containing every listed symbol
#[derive(Debug, Clone)]
pub struct EntrypointCheck {
    required: Vec<String>,
}

impl EntrypointCheck {
    pub fn new(required: Vec<String>) -> Self {
        Self { required }
    }
}

#[async_trait]
impl CodeChecker for EntrypointCheck {
    async fn check(&self, code: &AgentCode) -> std::result::Result<(), String> {
        if code.text().trim().is_empty() {
            return Err("candidate is empty".to_string());
        }
        match self.required.iter().find(|s| !code.text().contains(s.as_str())) {
            Some(missing) => Err(format!("missing required symbol '{}'", missing)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "entrypoint"
    }
}

fn model_literal() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)model\s*=\s*['"]((?:gpt|claude|gemini)-[\w.-]+)['"]"#).expect("valid regex")
    })
}

/// Rejects code that switches the task model
///
/// Every `model="gpt-..."`, `model="claude-..."` or `model="gemini-..."`
/// literal must name the configured task model.
#[derive(Debug, Clone)]
pub struct ModelPinCheck {
    task_model: String,
}

impl ModelPinCheck {
    pub fn new(task_model: impl Into<String>) -> Self {
        Self {
            task_model: task_model.into(),
        }
    }
}

#[async_trait]
impl CodeChecker for ModelPinCheck {
    async fn check(&self, code: &AgentCode) -> std::result::Result<(), String> {
        for caps in model_literal().captures_iter(code.text()) {
            let named = &caps[1];
            if named != self.task_model {
                return Err(format!(
                    "agent uses model '{}' instead of '{}'",
                    named, self.task_model
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "model_pin"
    }
}

/// Runs an external compiler or linter on the candidate
///
/// The candidate is written to `work_dir`; `{file}` in the argv is replaced
/// by its path (or the path is appended when there is no placeholder).
#[derive(Debug, Clone)]
pub struct CommandCheck {
    argv: Vec<String>,
    work_dir: PathBuf,
    extension: String,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(argv: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            work_dir: work_dir.into(),
            extension: "py".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self, file: &str) -> Vec<String> {
        let mut argv: Vec<String> = self.argv.iter().map(|a| a.replace("{file}", file)).collect();
        if !self.argv.iter().any(|a| a.contains("{file}")) {
            argv.push(file.to_string());
        }
        argv
    }
}

#[async_trait]
impl CodeChecker for CommandCheck {
    async fn check(&self, code: &AgentCode) -> std::result::Result<(), String> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| format!("cannot prepare check directory: {}", e))?;
        let path = self
            .work_dir
            .join(format!("candidate_{}.{}", code.short_digest(), self.extension));
        tokio::fs::write(&path, code.text())
            .await
            .map_err(|e| format!("cannot write candidate: {}", e))?;

        let argv = self.command_line(&path.to_string_lossy());
        let Some((program, args)) = argv.split_first() else {
            return Err("compile command is empty".to_string());
        };

        let run = Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to run {}: {}", program, e)),
            Err(_) => return Err(format!("{} timed out after {:?}", program, self.timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(400).collect();
            Err(format!("{} exited with {}: {}", program, output.status, excerpt))
        }
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Runs a candidate once on a trivial input
struct SmokeTest {
    runner: Arc<dyn AgentRunner>,
    input: String,
}

/// Accept/reject decision for candidate children
#[derive(Default)]
pub struct ValidationGate {
    checkers: Vec<Box<dyn CodeChecker>>,
    smoke: Option<SmokeTest>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checker(mut self, checker: impl CodeChecker + 'static) -> Self {
        self.checkers.push(Box::new(checker));
        self
    }

    pub fn with_smoke_test(mut self, runner: Arc<dyn AgentRunner>, input: impl Into<String>) -> Self {
        self.smoke = Some(SmokeTest {
            runner,
            input: input.into(),
        });
        self
    }

    /// Gate configured from `config.checks`
    ///
    /// `smoke_input` is used only when `config.smoke_test` is set.
    pub fn from_config(
        config: &RunConfig,
        runner: Arc<dyn AgentRunner>,
        smoke_input: Option<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut gate = Self::new().with_checker(EntrypointCheck::new(config.checks.required_symbols.clone()));
        if config.checks.pin_model {
            gate = gate.with_checker(ModelPinCheck::new(config.oracle.task_model.clone()));
        }
        if let Some(argv) = &config.checks.compile_command {
            gate = gate.with_checker(
                CommandCheck::new(argv.clone(), work_dir)
                    .with_extension(config.runner.file_extension.clone())
                    .with_timeout(config.retry.timeout()),
            );
        }
        if config.smoke_test {
            if let Some(input) = smoke_input {
                gate = gate.with_smoke_test(runner, input);
            }
        }
        gate
    }

    pub fn checker_names(&self) -> Vec<&str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }

    /// Full gate for a child proposed under `parent`
    pub async fn validate(&self, archive: &Archive, parent: AgentId, candidate: &AgentCode) -> GateVerdict {
        if let Some(rejection) = identity_rejection(archive, parent, candidate) {
            info!("Candidate for {} rejected: {}", parent, rejection);
            return GateVerdict::Rejected(rejection);
        }

        let verdict = self.check_structure(candidate).await;
        if !verdict.is_accepted() {
            return verdict;
        }

        if let Some(smoke) = &self.smoke {
            if let Err(e) = smoke.runner.run(candidate, &smoke.input).await {
                let rejection = Rejection::CrashesImmediately(e.to_string());
                info!("Candidate for {} rejected: {}", parent, rejection);
                return GateVerdict::Rejected(rejection);
            }
        }

        debug!("Candidate {} for {} passed the gate", candidate.short_digest(), parent);
        GateVerdict::Accepted
    }

    /// Structural checks only (used for seed agents, which have no parent)
    pub async fn check_structure(&self, candidate: &AgentCode) -> GateVerdict {
        for checker in &self.checkers {
            if let Err(reason) = checker.check(candidate).await {
                let rejection = Rejection::Malformed(format!("{}: {}", checker.name(), reason));
                info!("Candidate {} rejected: {}", candidate.short_digest(), rejection);
                return GateVerdict::Rejected(rejection);
            }
        }
        GateVerdict::Accepted
    }
}

fn identity_rejection(archive: &Archive, parent: AgentId, candidate: &AgentCode) -> Option<Rejection> {
    let record = archive.get(parent).ok()?;
    if record.code().same_content(candidate) {
        return Some(Rejection::Identical(format!("identical to parent {}", parent)));
    }
    archive
        .children_of(parent)
        .find(|child| child.code().same_content(candidate))
        .map(|child| Rejection::Identical(format!("identical to sibling {}", child.id())))
}
