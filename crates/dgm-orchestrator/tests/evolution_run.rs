//! End-to-end runs of the evolution driver with deterministic stubs
//!
//! Agents are plain text carrying an `accuracy=<x>` marker. The stub runner
//! answers inputs of the form `<split>:<index>:<size>` correctly for the
//! first `round(x * size)` indices, so every agent's validation score is
//! known in advance.

use async_trait::async_trait;
use dgm_agent::{AgentRunner, ExactMatch, MutationOracle, MutationRequest};
use dgm_core::{AgentCode, AgentId, DatasetSplits, DgmError, Example, Result, RunConfig};
use dgm_evolution::{ArchiveLog, CodeChecker, TournamentSelection, ValidationGate};
use dgm_orchestrator::{EvolutionDriver, ParentOutcome, RunPhase};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const VALIDATION_SIZE: usize = 20;

fn agent(accuracy: f64, tag: &str) -> AgentCode {
    AgentCode::new(format!(
        "def run_agent(question):\n    # accuracy={}\n    # {}\n    return solve(question)",
        accuracy, tag
    ))
}

fn accuracy_of(code: &AgentCode) -> Option<f64> {
    let marker = code.text().split("accuracy=").nth(1)?;
    marker.split_whitespace().next()?.parse().ok()
}

struct StubRunner {
    test_calls: AtomicUsize,
}

impl StubRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            test_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AgentRunner for StubRunner {
    async fn run(&self, code: &AgentCode, input: &str) -> Result<String> {
        let accuracy = accuracy_of(code)
            .ok_or_else(|| DgmError::Runner("NameError: accuracy marker missing".into()))?;

        let parts: Vec<&str> = input.split(':').collect();
        let (split, index, size) = match parts.as_slice() {
            [split, index, size] => (
                *split,
                index.parse::<usize>().unwrap_or(0),
                size.parse::<usize>().unwrap_or(1),
            ),
            _ => return Err(DgmError::Runner(format!("unexpected input {}", input))),
        };
        if split == "test" {
            self.test_calls.fetch_add(1, Ordering::SeqCst);
        }

        let solved = (accuracy * size as f64).round() as usize;
        Ok(if index < solved { "ok" } else { "wrong" }.to_string())
    }
}

#[derive(Clone, Copy)]
enum OracleMode {
    /// Children with the queued accuracies, in order
    Scripted,
    /// Returns the parent verbatim
    Echo,
    /// Always unreachable
    Down,
}

struct StubOracle {
    mode: OracleMode,
    accuracies: Mutex<VecDeque<f64>>,
    calls: AtomicUsize,
}

impl StubOracle {
    fn new(mode: OracleMode, accuracies: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            mode,
            accuracies: Mutex::new(accuracies.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationOracle for StubOracle {
    async fn propose(&self, request: &MutationRequest) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mode {
            OracleMode::Echo => Ok(request.parent_code.text().to_string()),
            OracleMode::Down => Err(DgmError::OracleUnavailable("connection refused".into())),
            OracleMode::Scripted => {
                assert!(!request.failures.is_empty(), "oracle called without evidence");
                let accuracy = self.accuracies.lock().unwrap().pop_front().unwrap_or(0.5);
                let code = agent(accuracy, &format!("proposal {}", call));
                Ok(format!("```python\n{}\n```", code.text()))
            }
        }
    }
}

fn split(name: &str, size: usize) -> Vec<Example> {
    (0..size)
        .map(|i| Example::new(format!("{}:{}:{}", name, i, size), "ok"))
        .collect()
}

fn splits() -> DatasetSplits {
    DatasetSplits::new(
        split("train", 10),
        split("val", VALIDATION_SIZE),
        split("test", 8),
    )
}

fn config(iterations: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.iterations = iterations;
    config.concurrency_cap = 4;
    config.retry.max_retries = 0;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 1;
    config
}

fn driver(config: RunConfig, runner: Arc<StubRunner>, oracle: Arc<StubOracle>) -> EvolutionDriver {
    EvolutionDriver::new(
        config,
        splits(),
        runner,
        Arc::new(ExactMatch),
        oracle,
        std::env::temp_dir().join("dgm-checks"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_three_iterations_grow_archive_and_pick_best() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.55, 0.30, 0.70]);
    let mut driver = driver(config(3), runner.clone(), oracle.clone());

    let report = driver.run(agent(0.40, "seed")).await.unwrap();
    let archive = driver.archive();

    assert_eq!(archive.len(), 4);
    let scores: Vec<_> = archive.all().iter().map(|r| r.score().unwrap()).collect();
    assert_eq!(scores, vec![0.40, 0.55, 0.30, 0.70]);

    let best = archive.best().unwrap();
    assert_eq!(best.id(), AgentId(3));
    assert_eq!(report.champion, AgentId(3));
    assert_eq!(report.champion_validation_score, 0.70);

    // v0 was the only candidate in iteration 1
    let root = archive.get(AgentId(0)).unwrap();
    assert!(root.children_count() >= 1);
    let total_children: u32 = archive.all().iter().map(|r| r.children_count()).sum();
    assert_eq!(total_children, 3);

    assert_eq!(report.accepted_children(), 3);
    assert_eq!(oracle.calls(), 3);
    assert!(matches!(driver.phase(), RunPhase::Done { .. }));
}

#[tokio::test]
async fn test_perfect_parent_skips_iteration() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Scripted, &[]);
    let mut driver = driver(config(1), runner, oracle.clone());

    let report = driver.run(agent(1.0, "perfect")).await.unwrap();

    assert_eq!(driver.archive().len(), 1);
    assert_eq!(report.skipped_iterations(), 1);
    assert!(matches!(
        report.iterations[0].parents[0].outcome,
        ParentOutcome::NoFailures { examined: 10 }
    ));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_identical_proposals_exhaust_retry_limit() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Echo, &[]);
    let mut config = config(1);
    config.validation_retry_limit = 3;
    let mut driver = driver(config, runner, oracle.clone());

    let report = driver.run(agent(0.5, "seed")).await.unwrap();

    assert_eq!(driver.archive().len(), 1);
    assert_eq!(oracle.calls(), 3);
    let ParentOutcome::Exhausted { rejections } = &report.iterations[0].parents[0].outcome else {
        panic!("expected exhausted parent");
    };
    assert_eq!(rejections.len(), 3);
    assert!(rejections.iter().all(|r| r.starts_with("RejectedIdentical")));
}

#[tokio::test]
async fn test_unavailable_oracle_does_not_abort_run() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Down, &[]);
    let mut driver = driver(config(2), runner.clone(), oracle.clone());

    let report = driver.run(agent(0.5, "seed")).await.unwrap();

    assert_eq!(driver.archive().len(), 1);
    assert_eq!(report.skipped_iterations(), 2);
    assert!(matches!(
        report.iterations[1].parents[0].outcome,
        ParentOutcome::OracleFailed { .. }
    ));
    assert_eq!(report.test.total, 8);
}

#[tokio::test]
async fn test_test_split_is_read_once_for_champion() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.6, 0.65]);
    let mut driver = driver(config(2), runner.clone(), oracle);

    let report = driver.run(agent(0.4, "seed")).await.unwrap();

    assert_eq!(runner.test_calls.load(Ordering::SeqCst), 8);
    assert_eq!(report.test.total, 8);
    // The champion's accuracy marker carries over to the test split
    assert_eq!(report.test.score, 5.0 / 8.0);
}

#[tokio::test]
async fn test_unusable_seed_is_fatal() {
    let runner = StubRunner::new();
    let oracle = StubOracle::new(OracleMode::Scripted, &[]);
    let mut driver = driver(config(1), runner, oracle);

    let err = driver
        .run(AgentCode::new("print('no entry point')"))
        .await
        .unwrap_err();
    assert!(matches!(err, DgmError::Config(_)));
    assert!(matches!(driver.phase(), RunPhase::Failed { .. }));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_up_front() {
    let mut bad = config(1);
    bad.concurrency_cap = 0;
    let result = EvolutionDriver::new(
        bad,
        splits(),
        StubRunner::new(),
        Arc::new(ExactMatch),
        StubOracle::new(OracleMode::Echo, &[]),
        std::env::temp_dir().join("dgm-checks"),
    );
    assert!(matches!(result, Err(DgmError::Config(_))));
}

#[tokio::test]
async fn test_same_seed_same_lineage() {
    async fn lineage(seed: u64) -> Vec<(Option<AgentId>, f64)> {
        let mut config = config(6);
        config.seed = seed;
        config.parents_per_iteration = 2;
        let oracle = StubOracle::new(
            OracleMode::Scripted,
            &[0.45, 0.5, 0.35, 0.6, 0.55, 0.65, 0.5, 0.6, 0.7, 0.45, 0.5, 0.55],
        );
        let mut driver = driver(config, StubRunner::new(), oracle);
        driver.run(agent(0.4, "seed")).await.unwrap();
        driver
            .archive()
            .all()
            .iter()
            .map(|r| (r.parent_id(), r.score().unwrap()))
            .collect()
    }

    assert_eq!(lineage(7).await, lineage(7).await);
}

#[tokio::test]
async fn test_archive_log_replays_run() {
    let dir = tempdir().unwrap();
    let log = ArchiveLog::new(dir.path().join("archive.jsonl"));
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.5, 0.6, 0.45, 0.7]);
    let mut driver = driver(config(4), StubRunner::new(), oracle).with_archive_log(log.clone());

    driver.run(agent(0.4, "seed")).await.unwrap();

    let replayed = log.replay().await.unwrap();
    assert_eq!(replayed.all(), driver.archive().all());
}

#[tokio::test]
async fn test_resume_skips_seeding() {
    let dir = tempdir().unwrap();
    let log = ArchiveLog::new(dir.path().join("archive.jsonl"));

    let first = StubOracle::new(OracleMode::Scripted, &[0.5]);
    let mut driver = driver(config(1), StubRunner::new(), first).with_archive_log(log.clone());
    driver.run(agent(0.4, "seed")).await.unwrap();
    assert_eq!(driver.archive().len(), 2);

    let replayed = log.replay().await.unwrap();
    let second = StubOracle::new(OracleMode::Scripted, &[0.6]);
    let mut resumed = driver_with(config(1), second)
        .with_archive(replayed)
        .with_archive_log(log.clone());

    // Would be a fatal seed error if seeding ran
    resumed.run(AgentCode::new("not an agent")).await.unwrap();
    assert_eq!(resumed.archive().len(), 3);
    assert_eq!(log.replay().await.unwrap().len(), 3);
}

fn driver_with(config: RunConfig, oracle: Arc<StubOracle>) -> EvolutionDriver {
    driver(config, StubRunner::new(), oracle)
}

#[tokio::test]
async fn test_activity_journal_is_written() {
    let dir = tempdir().unwrap();
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.55]);
    let mut driver = driver(config(1), StubRunner::new(), oracle).with_activity_logging(dir.path());

    driver.run(agent(0.4, "seed")).await.unwrap();

    let journal = std::fs::read_to_string(dir.path().join("activity.md")).unwrap();
    assert!(journal.contains("### Seed"));
    assert!(journal.contains("v0 -> v1 accepted"));
    assert!(journal.contains("**Champion**: v1"));
    assert!(dir.path().join("agents/agent_v0.py").exists());
    assert!(dir.path().join("agents/agent_v1.py").exists());
    assert!(dir.path().join("generations/v1.json").exists());
}

/// Replaces the archive log with a directory while the `break_tag` proposal
/// is scored on validation, and removes it again for the `repair_tag` one
struct FlakyDiskRunner {
    inner: Arc<StubRunner>,
    log_path: PathBuf,
    break_tag: &'static str,
    repair_tag: &'static str,
}

#[async_trait]
impl AgentRunner for FlakyDiskRunner {
    async fn run(&self, code: &AgentCode, input: &str) -> Result<String> {
        if input.starts_with("val:") {
            if code.text().contains(self.break_tag) {
                if self.log_path.is_file() {
                    let _ = std::fs::remove_file(&self.log_path);
                }
                let _ = std::fs::create_dir_all(&self.log_path);
            } else if code.text().contains(self.repair_tag) {
                let _ = std::fs::remove_dir_all(&self.log_path);
            }
        }
        self.inner.run(code, input).await
    }
}

#[tokio::test]
async fn test_missed_log_append_is_rewritten() {
    let dir = tempdir().unwrap();
    let log = ArchiveLog::new(dir.path().join("archive.jsonl"));
    let runner = Arc::new(FlakyDiskRunner {
        inner: StubRunner::new(),
        log_path: log.path().to_path_buf(),
        break_tag: "proposal 1\n",
        repair_tag: "proposal 2\n",
    });
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.5, 0.6]);
    let mut driver = EvolutionDriver::new(
        config(2),
        splits(),
        runner,
        Arc::new(ExactMatch),
        oracle,
        dir.path().join("checks"),
    )
    .unwrap()
    .with_archive_log(log.clone());

    driver.run(agent(0.4, "seed")).await.unwrap();
    assert_eq!(driver.archive().len(), 3);

    // v1 never reached the log directly; the v2 write restores it
    let replayed = log.replay().await.unwrap();
    assert_eq!(replayed.all(), driver.archive().all());
}

/// Rejects any candidate containing the marker
struct RejectMarker(&'static str);

#[async_trait]
impl CodeChecker for RejectMarker {
    async fn check(&self, code: &AgentCode) -> std::result::Result<(), String> {
        if code.text().contains(self.0) {
            Err(format!("contains {}", self.0))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "reject_marker"
    }
}

#[tokio::test]
async fn test_custom_gate_and_selection() {
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.5, 0.6]);
    let mut driver = driver(config(1), StubRunner::new(), oracle.clone())
        .with_selection(Box::new(TournamentSelection::new(2)))
        .with_gate(ValidationGate::new().with_checker(RejectMarker("proposal 1\n")));

    let report = driver.run(agent(0.4, "seed")).await.unwrap();

    assert_eq!(oracle.calls(), 2);
    let ParentOutcome::Accepted { attempts, score, .. } = &report.iterations[0].parents[0].outcome
    else {
        panic!("expected an accepted child");
    };
    assert_eq!(*attempts, 2);
    assert_eq!(*score, 0.6);
}

#[tokio::test]
async fn test_finished_driver_refuses_second_run() {
    let oracle = StubOracle::new(OracleMode::Scripted, &[0.5]);
    let mut driver = driver(config(1), StubRunner::new(), oracle);

    driver.run(agent(0.4, "seed")).await.unwrap();
    let err = driver.run(agent(0.4, "seed")).await.unwrap_err();

    assert!(matches!(err, DgmError::Other(_)));
    assert_eq!(driver.archive().len(), 2);
    assert!(matches!(driver.phase(), RunPhase::Done { .. }));
}
