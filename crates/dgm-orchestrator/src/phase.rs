//! Pure phase machine for a run
//!
//! No I/O and no async: `advance(phase, event)` is deterministic and never
//! panics. Invalid transitions land in `Failed`.

use dgm_core::AgentId;

/// Where a run is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    /// Generation-0 agent being evaluated and archived
    Seeding,
    /// Generational loop, `completed` of `total` iterations done
    Iterating { completed: usize, total: usize },
    /// Picking the champion by validation score
    Finalizing,
    /// Champion chosen; the test split may now be consulted
    Done { champion: AgentId },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The archive holds at least one root and `iterations` are to run
    Seeded { iterations: usize },
    IterationFinished,
    ChampionChosen { champion: AgentId },
    Error { message: String },
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    /// The agent allowed to read the test split; only `Done` has one
    pub fn test_split_champion(&self) -> Option<AgentId> {
        match self {
            Self::Done { champion } => Some(*champion),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Seeding => "seeding",
            Self::Iterating { .. } => "iterating",
            Self::Finalizing => "finalizing",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

fn iterating_or_finalizing(completed: usize, total: usize) -> RunPhase {
    if completed >= total {
        RunPhase::Finalizing
    } else {
        RunPhase::Iterating { completed, total }
    }
}

/// Pure transition function
pub fn advance(phase: RunPhase, event: PhaseEvent) -> RunPhase {
    match (phase, event) {
        (RunPhase::Failed { error }, _) => RunPhase::Failed { error },

        (_, PhaseEvent::Error { message }) => RunPhase::Failed { error: message },

        (RunPhase::Seeding, PhaseEvent::Seeded { iterations }) => {
            iterating_or_finalizing(0, iterations)
        }

        (RunPhase::Iterating { completed, total }, PhaseEvent::IterationFinished) => {
            iterating_or_finalizing(completed + 1, total)
        }

        (RunPhase::Finalizing, PhaseEvent::ChampionChosen { champion }) => {
            RunPhase::Done { champion }
        }

        (phase, event) => RunPhase::Failed {
            error: format!("Invalid transition: {:?} in phase {}", event, phase.name()),
        },
    }
}
