//! Configuration management for dgm
//!
//! A run is fully described by one [`RunConfig`]: generation count, sampling
//! sizes, selection tuning, retry policy, and how to reach the oracle and the
//! agent runner. It is threaded through the driver explicitly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{DgmError, Result};

/// Numerator of the default selection pressure.
///
/// With no explicit `lambda`, `lambda = 300 / iterations`: short runs exploit,
/// long runs explore.
pub const BASE_LAMBDA_PRODUCT: f64 = 300.0;

/// Run-level configuration
///
/// Loaded from `.dgm/config.toml` in the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of generational iterations
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Failures collected per parent before mutation
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    /// Successes sent alongside the failures
    #[serde(default = "default_max_successes")]
    pub max_successes: usize,

    /// Parents selected per iteration
    #[serde(default = "default_parents_per_iteration")]
    pub parents_per_iteration: usize,

    /// Concurrent agent-runner calls
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,

    /// Mutation proposals per parent before the iteration is skipped
    #[serde(default = "default_validation_retry_limit")]
    pub validation_retry_limit: usize,

    /// Seed for selection and training-order shuffles
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Run each candidate on one trivial example before scoring it
    #[serde(default = "default_true")]
    pub smoke_test: bool,

    /// Shuffle the training split (seeded) before failure sampling
    #[serde(default = "default_true")]
    pub shuffle_training: bool,

    /// Parent selection
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Timeouts and backoff for external calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Mutation oracle endpoint and models
    #[serde(default)]
    pub oracle: OracleConfig,

    /// How agent code is executed
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Structural checks applied by the validation gate
    #[serde(default)]
    pub checks: CheckConfig,
}

/// Selection strategy name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    SigmoidNovelty,
    FitnessProportional,
    Tournament,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigmoidNovelty => write!(f, "sigmoid_novelty"),
            Self::FitnessProportional => write!(f, "fitness_proportional"),
            Self::Tournament => write!(f, "tournament"),
        }
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "sigmoid_novelty" | "sigmoid" => Ok(Self::SigmoidNovelty),
            "fitness_proportional" | "fitness" => Ok(Self::FitnessProportional),
            "tournament" => Ok(Self::Tournament),
            _ => Err(format!("Invalid selection strategy: {}", s)),
        }
    }
}

/// Parent selection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,

    /// Sigmoid steepness; `None` derives it from the iteration count
    #[serde(default)]
    pub lambda: Option<f64>,

    /// Sigmoid midpoint
    #[serde(default = "default_alpha0")]
    pub alpha0: f64,

    /// Skip perfect-scoring agents unless all candidates are perfect
    #[serde(default = "default_true")]
    pub exclude_saturated: bool,

    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
}

/// Timeout and backoff policy for agent-runner and oracle calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Mutation oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model that rewrites agent code
    #[serde(default = "default_meta_model")]
    pub model: String,

    /// Model the evolved agents must call
    #[serde(default = "default_task_model")]
    pub task_model: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Agent execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interpreter used to run agent code
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the agent file
    #[serde(default)]
    pub args: Vec<String>,

    /// Extension for materialized agent files
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

/// Validation gate structural checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Substrings every candidate must contain
    #[serde(default = "default_required_symbols")]
    pub required_symbols: Vec<String>,

    /// Reject code that names a model other than `oracle.task_model`
    #[serde(default = "default_true")]
    pub pin_model: bool,

    /// External syntax check, `{file}` is replaced by the candidate path
    #[serde(default)]
    pub compile_command: Option<Vec<String>>,
}

// Default value providers
fn default_iterations() -> usize {
    10
}

fn default_max_failures() -> usize {
    5
}

fn default_max_successes() -> usize {
    3
}

fn default_parents_per_iteration() -> usize {
    1
}

fn default_concurrency_cap() -> usize {
    8
}

fn default_validation_retry_limit() -> usize {
    3
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

fn default_alpha0() -> f64 {
    0.5
}

fn default_tournament_size() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_meta_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_task_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_file_extension() -> String {
    "py".to_string()
}

fn default_required_symbols() -> Vec<String> {
    vec!["def run_agent".to_string()]
}

impl RunConfig {
    /// Load configuration from an explicit TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            DgmError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `.dgm/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".dgm/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.dgm/config.toml`
    pub fn write_default(root: &Path) -> Result<std::path::PathBuf> {
        let config_dir = root.join(".dgm");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| DgmError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_cap == 0 {
            return Err(DgmError::Config("concurrency_cap must be at least 1".into()));
        }
        if self.max_failures == 0 {
            return Err(DgmError::Config("max_failures must be at least 1".into()));
        }
        if self.parents_per_iteration == 0 {
            return Err(DgmError::Config(
                "parents_per_iteration must be at least 1".into(),
            ));
        }
        if let Some(lambda) = self.selection.lambda {
            if !lambda.is_finite() || lambda < 0.0 {
                return Err(DgmError::Config(format!(
                    "selection.lambda must be a non-negative number, got {}",
                    lambda
                )));
            }
        }
        if !self.selection.alpha0.is_finite() {
            return Err(DgmError::Config("selection.alpha0 must be finite".into()));
        }
        if self.selection.strategy == SelectionStrategy::Tournament
            && self.selection.tournament_size == 0
        {
            return Err(DgmError::Config(
                "selection.tournament_size must be at least 1".into(),
            ));
        }
        if self.runner.program.trim().is_empty() {
            return Err(DgmError::Config("runner.program must not be empty".into()));
        }
        Ok(())
    }

    /// Sigmoid steepness actually used by selection
    pub fn effective_lambda(&self) -> f64 {
        self.selection
            .lambda
            .unwrap_or_else(|| BASE_LAMBDA_PRODUCT / self.iterations.max(1) as f64)
    }

    /// Proposals per parent; a limit of zero still allows one attempt
    pub fn mutation_attempts(&self) -> usize {
        self.validation_retry_limit.max(1)
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            max_failures: default_max_failures(),
            max_successes: default_max_successes(),
            parents_per_iteration: default_parents_per_iteration(),
            concurrency_cap: default_concurrency_cap(),
            validation_retry_limit: default_validation_retry_limit(),
            seed: default_seed(),
            smoke_test: true,
            shuffle_training: true,
            selection: SelectionConfig::default(),
            retry: RetryConfig::default(),
            oracle: OracleConfig::default(),
            runner: RunnerConfig::default(),
            checks: CheckConfig::default(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            lambda: None,
            alpha0: default_alpha0(),
            exclude_saturated: true,
            tournament_size: default_tournament_size(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_meta_model(),
            task_model: default_task_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            file_extension: default_file_extension(),
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            required_symbols: default_required_symbols(),
            pin_model: true,
            compile_command: None,
        }
    }
}
