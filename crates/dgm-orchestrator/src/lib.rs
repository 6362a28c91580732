//! # dgm-orchestrator
//!
//! Runs the generational loop.
//!
//! This crate provides:
//! - [`EvolutionDriver`]: seeds the archive, iterates select / sample /
//!   mutate / validate / evaluate / insert, then scores the champion once on
//!   the held-out test split
//! - [`RunPhase`] and [`advance`]: the pure phase machine behind the driver
//! - [`ActivityLogger`]: fail-open run journal (`activity.md`, generation
//!   evidence and exported agent code)

mod activity_logger;
mod driver;
mod phase;

pub use activity_logger::{ActivityLogger, GenerationEvidence};
pub use driver::{EvolutionDriver, IterationReport, ParentOutcome, ParentReport, RunReport};
pub use phase::{advance, PhaseEvent, RunPhase};
