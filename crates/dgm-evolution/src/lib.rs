//! # dgm-evolution
//!
//! The evolutionary archive engine.
//!
//! This crate provides:
//! - [`Archive`]: append-only lineage forest of scored agents
//! - Selection policies balancing fitness against novelty
//! - [`FailureSampler`]: collects failure evidence on the training split
//! - [`MutationRequester`]: asks the oracle for a child program
//! - [`ValidationGate`]: non-identity, structural and smoke checks
//! - [`FitnessEvaluator`]: parallel scoring over a dataset split
//! - [`ArchiveLog`]: replayable JSONL persistence of the archive

mod archive;
mod evaluator;
mod gate;
mod mutation;
mod persistence;
mod record;
mod sampler;
mod selection;

pub use archive::Archive;
pub use evaluator::{Evaluation, ExampleOutcome, FitnessEvaluator};
pub use gate::{
    CodeChecker, CommandCheck, EntrypointCheck, GateVerdict, ModelPinCheck, Rejection,
    ValidationGate,
};
pub use mutation::MutationRequester;
pub use persistence::{ArchiveEntry, ArchiveLog};
pub use record::{AgentRecord, NewAgent};
pub use sampler::{training_order, FailureSample, FailureSampler, SampleLimits, SampleOutcome};
pub use selection::{
    eligible_candidates, policy_from_config, FitnessProportional, SelectionPolicy,
    SigmoidNovelty, TournamentSelection, WeightedSelection, Weighting,
};
