//! Evolution Driver - the generational loop
//!
//! Seeding → Iterating (exactly `iterations` times) → Finalizing → Done.
//!
//! Each iteration selects parents from the archive state left by the previous
//! one, so iterations never overlap. All archive writes happen here, after the
//! evaluation workers for a candidate have finished. Per-example parallelism
//! lives inside the sampler and evaluator.

use dgm_agent::{AgentRunner, MutationOracle, RetryPolicy, Scorer};
use dgm_core::fail_open::fail_open_with_retries;
use dgm_core::{AgentCode, AgentId, DatasetSplits, DgmError, Result, RunConfig};
use dgm_evolution::{
    policy_from_config, training_order, AgentRecord, Archive, ArchiveLog, Evaluation,
    FailureSample, FailureSampler, FitnessEvaluator, GateVerdict, MutationRequester, NewAgent,
    SampleLimits, SampleOutcome, SelectionPolicy, ValidationGate,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity_logger::{ActivityLogger, GenerationEvidence};
use crate::phase::{advance, PhaseEvent, RunPhase};

const LOG_WRITE_ATTEMPTS: usize = 3;

/// What happened to one selected parent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParentOutcome {
    /// A child passed the gate, was scored and archived
    Accepted {
        child: AgentId,
        score: f64,
        attempts: usize,
    },
    /// The parent made no mistakes on the training split
    NoFailures { examined: usize },
    /// The oracle stayed unavailable after retries
    OracleFailed { error: String },
    /// Every proposal was rejected or malformed
    Exhausted { rejections: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentReport {
    pub parent: AgentId,
    pub outcome: ParentOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    /// 1-based
    pub iteration: usize,
    pub parents: Vec<ParentReport>,
}

impl IterationReport {
    pub fn accepted(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.parents.iter().filter_map(|p| match p.outcome {
            ParentOutcome::Accepted { child, .. } => Some(child),
            _ => None,
        })
    }

    /// Nothing was added to the archive
    pub fn is_noop(&self) -> bool {
        self.accepted().next().is_none()
    }
}

/// Final result of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub iterations: Vec<IterationReport>,
    pub archive_size: usize,
    pub champion: AgentId,
    pub champion_validation_score: f64,
    /// Champion on the held-out test split, evaluated exactly once
    pub test: Evaluation,
}

impl RunReport {
    pub fn accepted_children(&self) -> usize {
        self.iterations.iter().map(|i| i.accepted().count()).sum()
    }

    pub fn skipped_iterations(&self) -> usize {
        self.iterations.iter().filter(|i| i.is_noop()).count()
    }
}

/// Drives one evolutionary run
pub struct EvolutionDriver {
    config: RunConfig,
    splits: DatasetSplits,
    evaluator: FitnessEvaluator,
    sampler: FailureSampler,
    requester: MutationRequester,
    selection: Box<dyn SelectionPolicy>,
    gate: ValidationGate,
    archive: Archive,
    archive_log: Option<ArchiveLog>,
    /// The log missed an insertion and must be rewritten from the archive
    log_stale: bool,
    activity_logger: Option<ActivityLogger>,
    rng: StdRng,
    phase: RunPhase,
}

impl EvolutionDriver {
    /// Build a driver from explicit capabilities
    ///
    /// The validation gate is built from `config.checks`; `checks_dir` is
    /// where external check commands get their candidate files. Fails with
    /// `Config` or `Dataset` errors before any work is done.
    pub fn new(
        config: RunConfig,
        splits: DatasetSplits,
        runner: Arc<dyn AgentRunner>,
        scorer: Arc<dyn Scorer>,
        oracle: Arc<dyn MutationOracle>,
        checks_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        splits.validate()?;

        let cap = config.concurrency_cap;
        let smoke_input = splits.train().first().map(|e| e.input.clone());
        let gate = ValidationGate::from_config(
            &config,
            Arc::clone(&runner),
            smoke_input,
            checks_dir,
        );

        Ok(Self {
            evaluator: FitnessEvaluator::new(Arc::clone(&runner), Arc::clone(&scorer), cap),
            sampler: FailureSampler::new(runner, scorer, cap),
            requester: MutationRequester::new(
                oracle,
                RetryPolicy::from(&config.retry),
                config.oracle.task_model.clone(),
            ),
            selection: policy_from_config(&config),
            gate,
            archive: Archive::new(),
            archive_log: None,
            log_stale: false,
            activity_logger: None,
            rng: StdRng::seed_from_u64(config.seed),
            phase: RunPhase::Seeding,
            config,
            splits,
        })
    }

    pub fn with_selection(mut self, selection: Box<dyn SelectionPolicy>) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_gate(mut self, gate: ValidationGate) -> Self {
        self.gate = gate;
        self
    }

    /// Start from an existing archive (resume); seeding is skipped when it is
    /// non-empty
    pub fn with_archive(mut self, archive: Archive) -> Self {
        self.archive = archive;
        self
    }

    /// Append every insertion to a replayable log
    pub fn with_archive_log(mut self, log: ArchiveLog) -> Self {
        self.archive_log = Some(log);
        self
    }

    /// Enable the run journal under `run_dir`
    pub fn with_activity_logging(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.activity_logger = Some(ActivityLogger::new(run_dir));
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Run to completion
    ///
    /// `seed_code` is only used when the archive is empty. Fatal errors
    /// (configuration, lineage, credentials) abort the run; everything else
    /// is logged and the iteration moves on. A driver runs once; resume by
    /// building a new one over the replayed archive.
    pub async fn run(&mut self, seed_code: AgentCode) -> Result<RunReport> {
        if self.phase.is_terminal() {
            return Err(DgmError::Other(format!(
                "driver already finished ({} phase)",
                self.phase.name()
            )));
        }

        let run_id = Uuid::new_v4();
        let resumed = self.archive.len();
        info!(
            "Starting run {} ({} iterations, selection: {})",
            run_id,
            self.config.iterations,
            self.selection.name()
        );
        debug!("Validation gate checks: {:?}", self.gate.checker_names());

        if let Some(logger) = &self.activity_logger {
            let sizes = (
                self.splits.train().len(),
                self.splits.validation().len(),
                self.splits.test().len(),
            );
            logger
                .log_run_start(&run_id, &self.config, sizes, resumed)
                .await;
        }

        match self.run_phases(run_id, seed_code).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Run {} aborted in {} phase: {}", run_id, self.phase.name(), e);
                self.transition(PhaseEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, run_id: Uuid, seed_code: AgentCode) -> Result<RunReport> {
        if self.archive.is_empty() {
            self.seed(seed_code).await?;
        } else {
            info!("Resuming with {} archived agents, skipping seeding", self.archive.len());
        }
        self.transition(PhaseEvent::Seeded {
            iterations: self.config.iterations,
        });

        let mut iterations = Vec::with_capacity(self.config.iterations);
        while let RunPhase::Iterating { completed, total } = self.phase {
            let report = self.iterate(completed + 1).await?;
            if let Some(logger) = &self.activity_logger {
                logger
                    .log_iteration(&report, total, self.archive.len())
                    .await;
            }
            iterations.push(report);
            self.transition(PhaseEvent::IterationFinished);
        }

        if self.log_stale {
            self.rewrite_archive_log().await;
        }

        let champion = self
            .archive
            .best()
            .map(|r| (r.id(), r.score().unwrap_or(0.0)))
            .ok_or_else(|| DgmError::Other("archive holds no scored agent".into()))?;
        info!(
            "Champion is {} with validation score {:.4}",
            champion.0, champion.1
        );
        self.transition(PhaseEvent::ChampionChosen {
            champion: champion.0,
        });

        let test = self.evaluate_champion().await?;

        let report = RunReport {
            run_id,
            iterations,
            archive_size: self.archive.len(),
            champion: champion.0,
            champion_validation_score: champion.1,
            test,
        };
        info!(
            "Run {} done: {} agents archived, champion {} scored {:.4} on test",
            run_id, report.archive_size, report.champion, report.test.score
        );
        if let Some(logger) = &self.activity_logger {
            logger.log_run_complete(&self.archive, &report).await;
        }
        Ok(report)
    }

    fn transition(&mut self, event: PhaseEvent) {
        let previous = std::mem::replace(&mut self.phase, RunPhase::Seeding);
        self.phase = advance(previous, event);
        debug!("Run phase: {:?}", self.phase);
    }

    /// Evaluate and archive the generation-0 agent
    async fn seed(&mut self, seed_code: AgentCode) -> Result<()> {
        if let GateVerdict::Rejected(rejection) = self.gate.check_structure(&seed_code).await {
            return Err(DgmError::Config(format!("seed agent is unusable: {}", rejection)));
        }

        let evaluation = self
            .evaluator
            .evaluate(&seed_code, self.splits.validation())
            .await;
        let id = self
            .archive
            .insert(NewAgent::root(seed_code, evaluation.score))?;
        info!("Seeded archive with {} (score {:.4})", id, evaluation.score);

        let record = self.archive.get(id)?.clone();
        self.record_insertion(&record).await;
        if let Some(logger) = &self.activity_logger {
            logger.log_seed(&record).await;
        }
        Ok(())
    }

    async fn iterate(&mut self, iteration: usize) -> Result<IterationReport> {
        info!("=== Iteration {}/{} ===", iteration, self.config.iterations);

        let parents = self.selection.select(
            &self.archive,
            self.config.parents_per_iteration,
            &mut self.rng,
        );
        if parents.is_empty() {
            warn!("Iteration {}: no eligible parent in archive", iteration);
        }

        let mut reports = Vec::with_capacity(parents.len());
        for parent in parents {
            let outcome = self.evolve_parent(iteration, parent).await?;
            reports.push(ParentReport { parent, outcome });
        }

        Ok(IterationReport {
            iteration,
            parents: reports,
        })
    }

    /// Sample → mutate → validate (bounded retries) → evaluate → insert
    async fn evolve_parent(&mut self, iteration: usize, parent_id: AgentId) -> Result<ParentOutcome> {
        let parent = self.archive.get(parent_id)?.clone();
        info!(
            "Iteration {}: evolving {} (score {:?}, children {})",
            iteration,
            parent_id,
            parent.score(),
            parent.children_count()
        );

        let order = training_order(
            self.splits.train().len(),
            self.config.shuffle_training,
            self.config.seed.wrapping_add(iteration as u64),
        );
        let limits = SampleLimits::new(self.config.max_failures, self.config.max_successes);
        let evidence = match self
            .sampler
            .sample(parent.code(), self.splits.train(), &order, limits)
            .await
        {
            SampleOutcome::Evidence(evidence) => evidence,
            SampleOutcome::NoFailuresFound { examined } => {
                info!(
                    "Iteration {}: {} is saturated on training data, skipping",
                    iteration, parent_id
                );
                return Ok(ParentOutcome::NoFailures { examined });
            }
        };

        let attempts = self.config.mutation_attempts();
        let mut rejections = Vec::new();
        for attempt in 1..=attempts {
            let candidate = match self.requester.request(&parent, &evidence, attempt).await {
                Ok(code) => code,
                Err(e) if e.is_fatal() => return Err(e),
                Err(DgmError::OracleMalformedResponse(reason)) => {
                    warn!(
                        "Iteration {}: malformed oracle reply for {} (attempt {}/{}): {}",
                        iteration, parent_id, attempt, attempts, reason
                    );
                    rejections.push(format!("OracleMalformedResponse: {}", reason));
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Iteration {}: oracle unavailable for {}, skipping: {}",
                        iteration, parent_id, e
                    );
                    return Ok(ParentOutcome::OracleFailed {
                        error: e.to_string(),
                    });
                }
            };

            if let GateVerdict::Rejected(rejection) =
                self.gate.validate(&self.archive, parent_id, &candidate).await
            {
                warn!(
                    "Iteration {}: candidate for {} rejected (attempt {}/{}): {}",
                    iteration, parent_id, attempt, attempts, rejection
                );
                rejections.push(rejection.to_string());
                continue;
            }

            let evaluation = self
                .evaluator
                .evaluate(&candidate, self.splits.validation())
                .await;
            let child = self
                .archive
                .insert(NewAgent::child(candidate, parent_id, evaluation.score))?;
            info!(
                "Iteration {}: archived {} (parent {}, score {:.4}, {} errors)",
                iteration,
                child,
                parent_id,
                evaluation.score,
                evaluation.errors()
            );

            let record = self.archive.get(child)?.clone();
            self.record_insertion(&record).await;
            self.record_evidence(iteration, attempt, &record, &evidence, rejections)
                .await;

            return Ok(ParentOutcome::Accepted {
                child,
                score: evaluation.score,
                attempts: attempt,
            });
        }

        warn!(
            "Iteration {}: no acceptable child for {} after {} proposals",
            iteration, parent_id, attempts
        );
        Ok(ParentOutcome::Exhausted { rejections })
    }

    /// Persist and export a freshly archived record
    ///
    /// A failed append leaves the log stale; the next write rewrites it from
    /// the archive so a replay never sees a gap in the ids.
    async fn record_insertion(&mut self, record: &AgentRecord) {
        if self.log_stale {
            self.rewrite_archive_log().await;
        } else if let Some(log) = &self.archive_log {
            let appended = fail_open_with_retries(
                "archive_log::append",
                || log.append(record),
                LOG_WRITE_ATTEMPTS,
            )
            .await;
            if appended.is_none() {
                warn!(
                    "Archive log {} is missing {}; it will be rewritten on the next write",
                    log.path().display(),
                    record.id()
                );
                self.log_stale = true;
            }
        }
        if let Some(logger) = &self.activity_logger {
            logger
                .export_agent(record, &self.config.runner.file_extension)
                .await;
        }
    }

    async fn rewrite_archive_log(&mut self) {
        let Some(log) = &self.archive_log else {
            return;
        };
        let archive = &self.archive;
        let rewritten = fail_open_with_retries(
            "archive_log::write_all",
            || log.write_all(archive),
            LOG_WRITE_ATTEMPTS,
        )
        .await;
        match rewritten {
            Some(()) => {
                info!(
                    "Rewrote archive log {} with {} agents",
                    log.path().display(),
                    archive.len()
                );
                self.log_stale = false;
            }
            None => warn!(
                "Archive log {} is still stale; replay will stop short of {} agents",
                log.path().display(),
                archive.len()
            ),
        }
    }

    async fn record_evidence(
        &self,
        iteration: usize,
        attempt: usize,
        child: &AgentRecord,
        evidence: &FailureSample,
        rejections: Vec<String>,
    ) {
        let (Some(logger), Some(parent)) = (&self.activity_logger, child.parent_id()) else {
            return;
        };
        logger
            .write_generation(&GenerationEvidence {
                child: child.id(),
                parent,
                iteration,
                attempt,
                score: child.score().unwrap_or(0.0),
                failures: evidence.failures.clone(),
                successes: evidence.successes.clone(),
                rejections,
            })
            .await;
    }

    /// Score the champion on the test split, the only read of that split
    async fn evaluate_champion(&self) -> Result<Evaluation> {
        let Some(champion) = self.phase.test_split_champion() else {
            return Err(DgmError::Other(format!(
                "test split requested in {} phase",
                self.phase.name()
            )));
        };

        let record = self.archive.get(champion)?;
        info!(
            "Evaluating champion {} on {} test examples",
            champion,
            self.splits.test().len()
        );
        Ok(self
            .evaluator
            .evaluate(record.code(), self.splits.test())
            .await)
    }
}
