//! # dgm-core
//!
//! Core types for dgm, a Darwinian evolution engine for specialist agents.
//!
//! An agent is a program that answers dataset examples by calling a fixed
//! task model. dgm keeps every accepted variant in an append-only archive,
//! mutates promising parents using their own failures as evidence, and
//! finally scores the best variant once on a held-out split.
//!
//! This crate holds what every other crate agrees on:
//!
//! - Agent identifiers and content-addressed agent code
//! - Labeled examples and dataset splits
//! - Run configuration
//! - The unified error type

pub mod config;
pub mod dataset;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    CheckConfig, OracleConfig, RetryConfig, RunConfig, RunnerConfig, SelectionConfig,
    SelectionStrategy,
};
pub use dataset::{DatasetSplits, FieldNames, SplitSizes};
pub use error::{DgmError, Result};
pub use types::*;
