//! HTTP developer oracle (messages API)
//!
//! Each proposal is a fresh, stateless request: the parent code and its
//! evidence are the whole context. Retries and timeouts are applied by the
//! caller; this client performs one attempt per call and classifies the
//! outcome so the caller knows whether retrying makes sense.

use async_trait::async_trait;
use dgm_core::{DgmError, OracleConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::oracle::MutationOracle;
use crate::prompt::build_developer_prompt;
use crate::types::{MutationRequest, OracleMessage, OracleRequest, OracleResponse};
use crate::usage::UsageLedger;

const API_VERSION: &str = "2023-06-01";

/// Developer oracle backed by a messages-API endpoint
pub struct HttpOracle {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: usize,
    api_key: String,
    circuit_breaker: CircuitBreaker,
    usage: Arc<UsageLedger>,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            max_tokens: 16000,
            api_key,
            circuit_breaker: CircuitBreaker::default(),
            usage: Arc::new(UsageLedger::new()),
        }
    }

    /// Build from config, reading the API key from the configured env var
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&config.api_key_env)?;
        Ok(Self::new(config.endpoint.clone(), config.model.clone(), api_key)
            .with_max_tokens(config.max_tokens))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Token ledger for every call made through this oracle
    pub fn usage(&self) -> Arc<UsageLedger> {
        Arc::clone(&self.usage)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &MutationRequest) -> OracleRequest {
        let prompt = build_developer_prompt(request);
        OracleRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(prompt.system),
            messages: vec![OracleMessage {
                role: "user".to_string(),
                content: prompt.user,
            }],
        }
    }
}

#[async_trait]
impl MutationOracle for HttpOracle {
    async fn propose(&self, request: &MutationRequest) -> Result<String> {
        if !self.circuit_breaker.can_execute() {
            return Err(DgmError::OracleUnavailable(format!(
                "Circuit breaker is OPEN after {} failures. Wait {} seconds before retry.",
                self.circuit_breaker.failure_count(),
                self.circuit_breaker.time_until_retry() / 1000
            )));
        }

        info!(
            "Requesting mutation of {} from {} (attempt {})",
            request.parent_id, self.model, request.attempt
        );

        let body = self.build_request(request);
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                DgmError::OracleUnavailable(format!("Failed to send request: {}", e))
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            warn!("Oracle rate limited (429), retry-after: {:?}", retry_after);
            return Err(DgmError::rate_limited(
                "Rate limited by oracle",
                retry_after,
            ));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(DgmError::Auth(format!(
                    "Oracle rejected credentials ({}): {}",
                    status, error_text
                )));
            }

            self.circuit_breaker.record_failure();
            error!(
                "Oracle error {} (circuit breaker failures: {})",
                status,
                self.circuit_breaker.failure_count()
            );
            return Err(DgmError::OracleUnavailable(format!(
                "Oracle API error {}: {}",
                status, error_text
            )));
        }

        let parsed: OracleResponse = response.json().await.map_err(|e| {
            DgmError::OracleMalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        self.circuit_breaker.record_success();

        if let Some(usage) = &parsed.usage {
            let cost = self.usage.record(&self.model, usage);
            debug!(
                "Oracle usage: {} input, {} output tokens (${:.6})",
                usage.input_tokens, usage.output_tokens, cost
            );
        }

        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(DgmError::OracleMalformedResponse(
                "No text content in response".to_string(),
            ));
        }

        info!(
            "Oracle proposed {} chars for child of {}",
            text.len(),
            request.parent_id
        );
        Ok(text)
    }
}

/// `retry-after` in delay-seconds form; HTTP dates are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgm_core::{AgentCode, AgentId};

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after(" 12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    fn request() -> MutationRequest {
        MutationRequest {
            parent_id: AgentId(0),
            parent_code: AgentCode::new("def run_agent(q): return q"),
            failures: vec![],
            successes: vec![],
            task_model: "gpt-4o-mini".to_string(),
            attempt: 1,
        }
    }

    #[test]
    fn test_build_request_uses_model_and_system_prompt() {
        let oracle = HttpOracle::new("http://localhost:1", "claude-sonnet-4", "k".into())
            .with_max_tokens(8000);
        let body = oracle.build_request(&request());

        assert_eq!(body.model, "claude-sonnet-4");
        assert_eq!(body.max_tokens, 8000);
        assert!(body.system.unwrap().contains("gpt-4o-mini"));
        assert_eq!(body.messages.len(), 1);
        assert!(body.messages[0].content.contains("def run_agent"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        // Port 1 is reserved and refuses connections
        let oracle = HttpOracle::new("http://127.0.0.1:1/v1/messages", "m", "k".into());
        let err = oracle.propose(&request()).await.unwrap_err();
        assert!(matches!(err, DgmError::OracleUnavailable(_)));
        assert_eq!(oracle.circuit_breaker.failure_count(), 1);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = OracleConfig {
            api_key_env: "DGM_TEST_ORACLE_KEY_UNSET".to_string(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            HttpOracle::from_config(&config),
            Err(DgmError::Auth(_))
        ));
    }
}
