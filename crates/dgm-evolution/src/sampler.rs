//! Failure evidence collection on the training split

use dgm_agent::{AgentRunner, Scorer};
use dgm_core::{AgentCode, Example, Observation};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::evaluator::run_example;

/// Deterministic visiting order over a training split of `len` examples
///
/// A seeded shuffle when `shuffle` is set, plain index order otherwise.
pub fn training_order(len: usize, shuffle: bool, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    order
}

/// How much evidence to collect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLimits {
    /// Stop once this many failures are found (at least 1)
    pub max_failures: usize,
    /// Keep at most this many successes
    pub max_successes: usize,
}

impl SampleLimits {
    pub fn new(max_failures: usize, max_successes: usize) -> Self {
        Self {
            max_failures: max_failures.max(1),
            max_successes,
        }
    }
}

/// Evidence for one mutation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSample {
    pub failures: Vec<Observation>,
    pub successes: Vec<Observation>,
    /// Training examples whose outcome was consumed
    pub examined: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Evidence(FailureSample),
    /// The agent answered every training example correctly
    NoFailuresFound { examined: usize },
}

/// Runs an agent over the training split until enough failures are found
#[derive(Clone)]
pub struct FailureSampler {
    runner: Arc<dyn AgentRunner>,
    scorer: Arc<dyn Scorer>,
    concurrency_cap: usize,
}

impl FailureSampler {
    pub fn new(runner: Arc<dyn AgentRunner>, scorer: Arc<dyn Scorer>, concurrency_cap: usize) -> Self {
        Self {
            runner,
            scorer,
            concurrency_cap: concurrency_cap.max(1),
        }
    }

    /// Visit `train` in `order`, collecting failures and a few successes
    ///
    /// Up to `concurrency_cap` examples are in flight; outcomes are consumed
    /// in visiting order and anything still running when the failure limit
    /// is reached is dropped. Crashes count as failures.
    pub async fn sample(
        &self,
        code: &AgentCode,
        train: &[Example],
        order: &[usize],
        limits: SampleLimits,
    ) -> SampleOutcome {
        let runner = self.runner.as_ref();
        let scorer = self.scorer.as_ref();

        let mut outcomes = std::pin::pin!(stream::iter(
            order.iter().filter_map(|&i| train.get(i))
        )
        .map(|example| run_example(runner, scorer, code, example))
        .buffered(self.concurrency_cap));

        let mut sample = FailureSample::default();
        while let Some(outcome) = outcomes.next().await {
            sample.examined += 1;
            if outcome.correct {
                if sample.successes.len() < limits.max_successes {
                    sample.successes.push(outcome.to_observation());
                }
            } else {
                sample.failures.push(outcome.to_observation());
                if sample.failures.len() >= limits.max_failures {
                    debug!("Failure limit of {} reached", limits.max_failures);
                    break;
                }
            }
        }

        info!(
            "Sampled agent {}: {} failures, {} successes over {} examples",
            code.short_digest(),
            sample.failures.len(),
            sample.successes.len(),
            sample.examined
        );

        if sample.failures.is_empty() {
            SampleOutcome::NoFailuresFound {
                examined: sample.examined,
            }
        } else {
            SampleOutcome::Evidence(sample)
        }
    }
}
