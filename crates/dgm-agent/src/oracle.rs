//! Mutation oracle capability

use async_trait::async_trait;
use dgm_core::Result;

use crate::types::MutationRequest;

/// Code-rewriting oracle (the "Developer")
///
/// Given a parent's code and evidence of where it fails, returns a proposed
/// full replacement program as raw text. The reply is not trusted: it may be
/// wrapped in markdown, identical to the parent, or not a program at all.
///
/// Implementations fail with `DgmError::OracleUnavailable` when the oracle
/// cannot be reached and `DgmError::OracleMalformedResponse` when it answers
/// with something unusable.
#[async_trait]
pub trait MutationOracle: Send + Sync {
    async fn propose(&self, request: &MutationRequest) -> Result<String>;
}
