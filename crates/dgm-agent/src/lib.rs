//! # dgm-agent
//!
//! External capabilities used by the evolution engine.
//!
//! The engine never executes agent code or talks to a language model
//! directly. It goes through two narrow seams:
//!
//! - [`AgentRunner`]: `run(code, input) -> answer`
//! - [`MutationOracle`]: `propose(parent code, evidence) -> child code`
//!
//! This crate provides the production implementations (a subprocess runner
//! and an HTTP oracle) plus the plumbing around them: timeouts with bounded
//! exponential backoff, a circuit breaker, token accounting, answer scoring
//! and extraction of code from oracle replies.

mod auth;
mod circuit_breaker;
mod client;
mod extract;
mod oracle;
mod prompt;
mod retry;
mod runner;
mod scoring;
mod types;
mod usage;

pub use auth::get_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::HttpOracle;
pub use extract::extract_code;
pub use oracle::MutationOracle;
pub use prompt::{build_developer_prompt, DeveloperPrompt};
pub use retry::{retry_with_backoff, RetryPolicy, RetryingRunner};
pub use runner::{AgentRunner, CommandRunner};
pub use scoring::{extract_final_answer, ExactMatch, FinalAnswerMatch, Scorer};
pub use types::*;
pub use usage::{UsageLedger, UsageSummary};
