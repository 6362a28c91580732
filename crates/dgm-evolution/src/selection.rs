//! Parent selection policies
//!
//! A policy turns an archive snapshot plus a seeded random source into a
//! list of parent ids. Only scored agents are candidates. Candidates are
//! considered in archive insertion order, so the same snapshot and the same
//! seed always produce the same parents.

use dgm_core::{AgentId, RunConfig, SelectionStrategy};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::archive::Archive;
use crate::record::AgentRecord;

/// Maps a candidate to a non-negative sampling weight
pub trait Weighting: Send + Sync {
    fn weight(&self, record: &AgentRecord) -> f64;

    fn name(&self) -> &'static str;
}

/// `sigmoid(lambda * (score - alpha0)) / (1 + children_count)`
///
/// The sigmoid concentrates mass on agents above the midpoint `alpha0`;
/// the divisor pushes selection away from heavily reproduced parents.
#[derive(Debug, Clone, Copy)]
pub struct SigmoidNovelty {
    pub lambda: f64,
    pub alpha0: f64,
}

impl SigmoidNovelty {
    pub fn new(lambda: f64, alpha0: f64) -> Self {
        Self { lambda, alpha0 }
    }
}

impl Weighting for SigmoidNovelty {
    fn weight(&self, record: &AgentRecord) -> f64 {
        let score = record.score().unwrap_or(0.0);
        let fitness = 1.0 / (1.0 + (-self.lambda * (score - self.alpha0)).exp());
        fitness / (1.0 + f64::from(record.children_count()))
    }

    fn name(&self) -> &'static str {
        "sigmoid_novelty"
    }
}

/// `score / (1 + children_count)`
#[derive(Debug, Clone, Copy, Default)]
pub struct FitnessProportional;

impl Weighting for FitnessProportional {
    fn weight(&self, record: &AgentRecord) -> f64 {
        record.score().unwrap_or(0.0) / (1.0 + f64::from(record.children_count()))
    }

    fn name(&self) -> &'static str {
        "fitness_proportional"
    }
}

/// Chooses parent ids from an archive snapshot
pub trait SelectionPolicy: Send + Sync {
    /// Select up to `count` distinct parents (fewer if the archive has fewer
    /// eligible candidates)
    fn select(&self, archive: &Archive, count: usize, rng: &mut dyn RngCore) -> Vec<AgentId>;

    fn name(&self) -> &str;
}

/// Scored agents in insertion order
///
/// With `exclude_saturated`, perfect scorers are dropped unless every scored
/// agent is perfect.
pub fn eligible_candidates(archive: &Archive, exclude_saturated: bool) -> Vec<&AgentRecord> {
    let scored: Vec<&AgentRecord> = archive.scored().collect();
    if !exclude_saturated {
        return scored;
    }

    let unsaturated: Vec<&AgentRecord> = scored
        .iter()
        .copied()
        .filter(|r| !r.is_saturated())
        .collect();
    if unsaturated.is_empty() {
        scored
    } else {
        unsaturated
    }
}

/// Weighted sampling without replacement over a pluggable [`Weighting`]
#[derive(Debug, Clone)]
pub struct WeightedSelection<W> {
    weighting: W,
    exclude_saturated: bool,
}

impl<W: Weighting> WeightedSelection<W> {
    pub fn new(weighting: W) -> Self {
        Self {
            weighting,
            exclude_saturated: true,
        }
    }

    pub fn with_exclude_saturated(mut self, exclude: bool) -> Self {
        self.exclude_saturated = exclude;
        self
    }

    pub fn weighting(&self) -> &W {
        &self.weighting
    }
}

impl<W: Weighting> SelectionPolicy for WeightedSelection<W> {
    fn select(&self, archive: &Archive, count: usize, rng: &mut dyn RngCore) -> Vec<AgentId> {
        let mut pool = eligible_candidates(archive, self.exclude_saturated);
        let mut selected = Vec::with_capacity(count.min(pool.len()));

        while selected.len() < count && !pool.is_empty() {
            let index = if pool.len() == 1 {
                0
            } else {
                let weights: Vec<f64> = pool.iter().map(|r| self.weighting.weight(r)).collect();
                match WeightedIndex::new(&weights) {
                    Ok(dist) => dist.sample(rng),
                    Err(e) => {
                        // All-zero (or unusable) weights: every candidate is equally good
                        debug!("{} weights degenerate ({}), sampling uniformly", self.name(), e);
                        rng.gen_range(0..pool.len())
                    }
                }
            };
            selected.push(pool.remove(index).id());
        }

        debug!(
            "{} selected {:?} from {} scored agents",
            self.name(),
            selected,
            archive.scored().count()
        );
        selected
    }

    fn name(&self) -> &str {
        self.weighting.name()
    }
}

/// Tournament selection without replacement
///
/// Each round draws `tournament_size` remaining candidates and keeps the
/// best: highest score, then fewest children, then earliest insertion.
#[derive(Debug, Clone)]
pub struct TournamentSelection {
    tournament_size: usize,
    exclude_saturated: bool,
}

impl TournamentSelection {
    pub fn new(tournament_size: usize) -> Self {
        Self {
            tournament_size: tournament_size.max(1),
            exclude_saturated: true,
        }
    }

    pub fn with_exclude_saturated(mut self, exclude: bool) -> Self {
        self.exclude_saturated = exclude;
        self
    }
}

impl SelectionPolicy for TournamentSelection {
    fn select(&self, archive: &Archive, count: usize, rng: &mut dyn RngCore) -> Vec<AgentId> {
        let mut pool = eligible_candidates(archive, self.exclude_saturated);
        let mut selected = Vec::with_capacity(count.min(pool.len()));

        while selected.len() < count && !pool.is_empty() {
            let positions: Vec<usize> = (0..pool.len()).collect();
            let entrants = positions.choose_multiple(rng, self.tournament_size.min(pool.len()));

            let mut winner: Option<usize> = None;
            for &pos in entrants {
                winner = match winner {
                    Some(best) if !beats(pool[pos], pool[best]) => Some(best),
                    _ => Some(pos),
                };
            }

            if let Some(pos) = winner {
                selected.push(pool.remove(pos).id());
            }
        }

        debug!("tournament selected {:?}", selected);
        selected
    }

    fn name(&self) -> &str {
        "tournament"
    }
}

fn beats(a: &AgentRecord, b: &AgentRecord) -> bool {
    let (sa, sb) = (a.score().unwrap_or(0.0), b.score().unwrap_or(0.0));
    if sa != sb {
        return sa > sb;
    }
    if a.children_count() != b.children_count() {
        return a.children_count() < b.children_count();
    }
    a.id() < b.id()
}

/// Build the configured policy
pub fn policy_from_config(config: &RunConfig) -> Box<dyn SelectionPolicy> {
    let exclude = config.selection.exclude_saturated;
    match config.selection.strategy {
        SelectionStrategy::SigmoidNovelty => Box::new(
            WeightedSelection::new(SigmoidNovelty::new(
                config.effective_lambda(),
                config.selection.alpha0,
            ))
            .with_exclude_saturated(exclude),
        ),
        SelectionStrategy::FitnessProportional => {
            Box::new(WeightedSelection::new(FitnessProportional).with_exclude_saturated(exclude))
        }
        SelectionStrategy::Tournament => Box::new(
            TournamentSelection::new(config.selection.tournament_size)
                .with_exclude_saturated(exclude),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewAgent;
    use dgm_core::AgentCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn archive_with(scores: &[f64]) -> Archive {
        let mut archive = Archive::new();
        for (i, score) in scores.iter().enumerate() {
            archive
                .insert(NewAgent::root(AgentCode::new(format!("agent {}", i)), *score))
                .unwrap();
        }
        archive
    }

    fn policies() -> Vec<Box<dyn SelectionPolicy>> {
        vec![
            Box::new(WeightedSelection::new(SigmoidNovelty::new(30.0, 0.5))),
            Box::new(WeightedSelection::new(FitnessProportional)),
            Box::new(TournamentSelection::new(3)),
        ]
    }

    #[test]
    fn test_single_candidate_always_selected() {
        let archive = archive_with(&[0.0]);
        for policy in policies() {
            let mut rng = StdRng::seed_from_u64(1);
            for _ in 0..10 {
                assert_eq!(policy.select(&archive, 1, &mut rng), vec![AgentId(0)]);
            }
        }
    }

    #[test]
    fn test_same_seed_same_parents() {
        let archive = archive_with(&[0.2, 0.4, 0.6, 0.8, 0.5, 0.1]);
        for policy in policies() {
            let first = policy.select(&archive, 3, &mut StdRng::seed_from_u64(42));
            let second = policy.select(&archive, 3, &mut StdRng::seed_from_u64(42));
            assert_eq!(first, second, "{} is not deterministic", policy.name());
        }
    }

    #[test]
    fn test_selection_is_without_replacement() {
        let archive = archive_with(&[0.2, 0.4, 0.6]);
        for policy in policies() {
            let mut picked = policy.select(&archive, 10, &mut StdRng::seed_from_u64(3));
            assert_eq!(picked.len(), 3);
            picked.sort();
            picked.dedup();
            assert_eq!(picked.len(), 3);
        }
    }

    #[test]
    fn test_unscored_agents_are_never_selected() {
        let mut archive = archive_with(&[0.3]);
        archive
            .insert(NewAgent::root(AgentCode::new("pending"), 0.9).unscored())
            .unwrap();

        for policy in policies() {
            let picked = policy.select(&archive, 2, &mut StdRng::seed_from_u64(5));
            assert_eq!(picked, vec![AgentId(0)]);
        }
    }

    #[test]
    fn test_empty_archive_selects_nothing() {
        let archive = Archive::new();
        for policy in policies() {
            assert!(policy.select(&archive, 1, &mut StdRng::seed_from_u64(0)).is_empty());
        }
    }

    #[test]
    fn test_saturated_agents_excluded_unless_all_saturated() {
        let archive = archive_with(&[1.0, 0.3]);
        let ids: Vec<_> = eligible_candidates(&archive, true).iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![AgentId(1)]);

        let all_perfect = archive_with(&[1.0, 1.0]);
        assert_eq!(eligible_candidates(&all_perfect, true).len(), 2);
        assert_eq!(eligible_candidates(&archive, false).len(), 2);
    }

    #[test]
    fn test_sigmoid_weight_monotonic() {
        let mut archive = archive_with(&[0.4, 0.6]);
        let weighting = SigmoidNovelty::new(30.0, 0.5);
        let low = weighting.weight(archive.get(AgentId(0)).unwrap());
        let high = weighting.weight(archive.get(AgentId(1)).unwrap());
        assert!(high > low);

        let before = weighting.weight(archive.get(AgentId(1)).unwrap());
        archive
            .insert(NewAgent::child(AgentCode::new("child"), AgentId(1), 0.2))
            .unwrap();
        let after = weighting.weight(archive.get(AgentId(1)).unwrap());
        assert!((after - before / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let archive = archive_with(&[0.0, 0.0, 0.0]);
        let policy = WeightedSelection::new(FitnessProportional);
        let mut rng = StdRng::seed_from_u64(9);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            seen.extend(policy.select(&archive, 1, &mut rng));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_high_fitness_dominates_under_steep_sigmoid() {
        let archive = archive_with(&[0.1, 0.9]);
        let policy = WeightedSelection::new(SigmoidNovelty::new(300.0, 0.5));
        let mut rng = StdRng::seed_from_u64(17);

        let hits = (0..100)
            .filter(|_| policy.select(&archive, 1, &mut rng) == vec![AgentId(1)])
            .count();
        assert!(hits >= 99);
    }

    #[test]
    fn test_full_tournament_picks_best() {
        let archive = archive_with(&[0.2, 0.7, 0.5]);
        let policy = TournamentSelection::new(3);
        let picked = policy.select(&archive, 1, &mut StdRng::seed_from_u64(0));
        assert_eq!(picked, vec![AgentId(1)]);
    }

    #[test]
    fn test_policy_from_config_matches_strategy() {
        let mut config = RunConfig::default();
        assert_eq!(policy_from_config(&config).name(), "sigmoid_novelty");

        config.selection.strategy = SelectionStrategy::Tournament;
        assert_eq!(policy_from_config(&config).name(), "tournament");

        config.selection.strategy = SelectionStrategy::FitnessProportional;
        assert_eq!(policy_from_config(&config).name(), "fitness_proportional");
    }
}
