//! Fitness evaluation over a dataset split

use dgm_agent::{AgentRunner, Scorer};
use dgm_core::{AgentCode, Example, Observation};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// What happened on one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleOutcome {
    pub input: String,
    pub expected: String,
    /// Agent answer, `None` if the run failed
    pub actual: Option<String>,
    /// Runner error text, if the run failed
    pub error: Option<String>,
    pub correct: bool,
}

impl ExampleOutcome {
    /// Failure or success evidence in the form shown to the oracle
    pub fn to_observation(&self) -> Observation {
        let actual = match (&self.actual, &self.error) {
            (_, Some(error)) => format!("Runtime Error: {}", error),
            (Some(answer), None) if !self.correct => format!("Wrong Answer: {}", answer),
            (Some(answer), None) => answer.clone(),
            (None, None) => "Runtime Error: no output".to_string(),
        };
        Observation {
            input: self.input.clone(),
            expected: self.expected.clone(),
            actual,
        }
    }
}

/// Score plus the per-example breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub correct: usize,
    pub total: usize,
    pub outcomes: Vec<ExampleOutcome>,
}

impl Evaluation {
    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Run one example; a runner error is an incorrect outcome, never a failure
pub(crate) async fn run_example(
    runner: &dyn AgentRunner,
    scorer: &dyn Scorer,
    code: &AgentCode,
    example: &Example,
) -> ExampleOutcome {
    match runner.run(code, &example.input).await {
        Ok(answer) => ExampleOutcome {
            input: example.input.clone(),
            expected: example.expected.clone(),
            correct: scorer.is_correct(&example.expected, &answer),
            actual: Some(answer),
            error: None,
        },
        Err(e) => {
            debug!("Agent {} crashed on example: {}", code.short_digest(), e);
            ExampleOutcome {
                input: example.input.clone(),
                expected: example.expected.clone(),
                actual: None,
                error: Some(e.to_string()),
                correct: false,
            }
        }
    }
}

/// Runs an agent over every example of a split with bounded parallelism
#[derive(Clone)]
pub struct FitnessEvaluator {
    runner: Arc<dyn AgentRunner>,
    scorer: Arc<dyn Scorer>,
    concurrency_cap: usize,
}

impl FitnessEvaluator {
    pub fn new(runner: Arc<dyn AgentRunner>, scorer: Arc<dyn Scorer>, concurrency_cap: usize) -> Self {
        Self {
            runner,
            scorer,
            concurrency_cap: concurrency_cap.max(1),
        }
    }

    /// `correct / total` over `split`; an empty split scores 0.0
    ///
    /// Outcomes are returned in split order regardless of completion order.
    pub async fn evaluate(&self, code: &AgentCode, split: &[Example]) -> Evaluation {
        let runner = self.runner.as_ref();
        let scorer = self.scorer.as_ref();

        let outcomes: Vec<ExampleOutcome> = stream::iter(split)
            .map(|example| run_example(runner, scorer, code, example))
            .buffered(self.concurrency_cap)
            .collect()
            .await;

        let total = outcomes.len();
        let correct = outcomes.iter().filter(|o| o.correct).count();
        let score = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };

        info!(
            "Evaluated agent {}: {:.4} ({}/{})",
            code.short_digest(),
            score,
            correct,
            total
        );

        Evaluation {
            score,
            correct,
            total,
            outcomes,
        }
    }
}
