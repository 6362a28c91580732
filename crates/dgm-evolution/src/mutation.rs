//! Mutation requests to the developer oracle

use dgm_agent::{extract_code, retry_with_backoff, MutationOracle, MutationRequest, RetryPolicy};
use dgm_core::{AgentCode, DgmError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::record::AgentRecord;
use crate::sampler::FailureSample;

/// Packages a parent and its evidence into an oracle call
///
/// Transient oracle failures are retried under the configured policy. The
/// returned code is only unwrapped from markdown, never checked; that is the
/// validation gate's job.
#[derive(Clone)]
pub struct MutationRequester {
    oracle: Arc<dyn MutationOracle>,
    policy: RetryPolicy,
    task_model: String,
}

impl MutationRequester {
    pub fn new(oracle: Arc<dyn MutationOracle>, policy: RetryPolicy, task_model: impl Into<String>) -> Self {
        Self {
            oracle,
            policy,
            task_model: task_model.into(),
        }
    }

    pub fn task_model(&self) -> &str {
        &self.task_model
    }

    pub fn build_request(&self, parent: &AgentRecord, evidence: &FailureSample, attempt: usize) -> MutationRequest {
        MutationRequest {
            parent_id: parent.id(),
            parent_code: parent.code().clone(),
            failures: evidence.failures.clone(),
            successes: evidence.successes.clone(),
            task_model: self.task_model.clone(),
            attempt,
        }
    }

    /// Ask for a child of `parent`
    ///
    /// Fails with `OracleUnavailable` (or `Timeout`/`ApiLimit`) once retries
    /// are exhausted and with `OracleMalformedResponse` when the reply holds
    /// no code.
    pub async fn request(
        &self,
        parent: &AgentRecord,
        evidence: &FailureSample,
        attempt: usize,
    ) -> Result<AgentCode> {
        let request = self.build_request(parent, evidence, attempt);
        let oracle = self.oracle.as_ref();
        let request_ref = &request;

        let reply = retry_with_backoff(&self.policy, "mutation oracle", move || {
            oracle.propose(request_ref)
        })
        .await
        .map_err(|e| {
            warn!("Oracle failed for parent {} (attempt {}): {}", parent.id(), attempt, e);
            e
        })?;

        let code = extract_code(&reply);
        if code.is_empty() {
            return Err(DgmError::OracleMalformedResponse(format!(
                "reply for parent {} contained no code",
                parent.id()
            )));
        }

        debug!(
            "Oracle proposed {} bytes for parent {} (attempt {})",
            code.len(),
            parent.id(),
            attempt
        );
        Ok(AgentCode::new(code))
    }
}
