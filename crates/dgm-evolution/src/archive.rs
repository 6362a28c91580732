//! Append-only lineage archive
//!
//! Every accepted agent lives here for the rest of the run. Ids are dense
//! (`v0`, `v1`, ...) and equal to insertion position, parents always precede
//! their children, and a record never changes after insertion except for its
//! `children_count`, which advances together with the child's insertion.
//!
//! The archive has a single writer (the driver); readers take `&Archive`.

use chrono::Utc;
use dgm_core::{AgentCode, AgentId, DgmError, Result};
use std::collections::HashMap;
use tracing::debug;

use crate::persistence::ArchiveEntry;
use crate::record::{AgentRecord, NewAgent};

/// Lineage forest of agent records in insertion order
#[derive(Debug, Clone, Default)]
pub struct Archive {
    records: Vec<AgentRecord>,
    /// parent id (None = roots) -> child ids in insertion order
    children: HashMap<Option<AgentId>, Vec<AgentId>>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id the next insertion will receive
    pub fn next_id(&self) -> AgentId {
        AgentId(self.records.len() as u64)
    }

    /// Insert a record, returning its new id
    ///
    /// Fails with `InvalidLineage` when the parent is unknown and with
    /// `DuplicateCode` when the code equals the parent's or a sibling's.
    /// On failure the archive is unchanged.
    pub fn insert(&mut self, agent: NewAgent) -> Result<AgentId> {
        self.check_insertable(&agent.code, agent.parent_id, agent.score)?;
        let id = self.next_id();
        let generation = self.generation_for(agent.parent_id);
        self.push(AgentRecord {
            id,
            code: agent.code,
            parent_id: agent.parent_id,
            score: agent.score,
            children_count: 0,
            generation,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Re-insert a persisted entry during replay
    ///
    /// The entry must carry exactly the id and generation a live insertion
    /// would have produced.
    pub fn restore(&mut self, entry: ArchiveEntry) -> Result<AgentId> {
        let expected = self.next_id();
        if entry.id != expected {
            return Err(DgmError::Persistence(format!(
                "Out-of-order archive entry: found {}, expected {}",
                entry.id, expected
            )));
        }
        self.check_insertable(&entry.code, entry.parent_id, entry.score)?;

        let generation = self.generation_for(entry.parent_id);
        if entry.generation != generation {
            return Err(DgmError::Persistence(format!(
                "Entry {} claims generation {} but its lineage implies {}",
                entry.id, entry.generation, generation
            )));
        }

        self.push(AgentRecord {
            id: entry.id,
            code: entry.code,
            parent_id: entry.parent_id,
            score: entry.score,
            children_count: 0,
            generation,
            created_at: entry.created_at,
        });
        Ok(expected)
    }

    pub fn get(&self, id: AgentId) -> Result<&AgentRecord> {
        self.records
            .get(id.index())
            .ok_or_else(|| DgmError::AgentNotFound(id.to_string()))
    }

    pub fn contains(&self, id: AgentId) -> bool {
        id.index() < self.records.len()
    }

    /// All records in insertion order
    pub fn all(&self) -> &[AgentRecord] {
        &self.records
    }

    /// Records with a defined score, in insertion order
    pub fn scored(&self) -> impl Iterator<Item = &AgentRecord> {
        self.records.iter().filter(|r| r.score.is_some())
    }

    /// Highest-scoring record; ties go to the earliest insertion
    pub fn best(&self) -> Option<&AgentRecord> {
        let mut best: Option<&AgentRecord> = None;
        for record in self.scored() {
            match best {
                Some(current) if record.score <= current.score => {}
                _ => best = Some(record),
            }
        }
        best
    }

    /// Generation-0 records
    pub fn roots(&self) -> impl Iterator<Item = &AgentRecord> {
        self.ids_under(None)
    }

    /// Direct children of `id`
    pub fn children_of(&self, id: AgentId) -> impl Iterator<Item = &AgentRecord> {
        self.ids_under(Some(id))
    }

    /// Ancestry from `id` up to its root, starting with `id` itself
    pub fn lineage(&self, id: AgentId) -> Result<Vec<AgentId>> {
        let mut path = vec![id];
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent_id {
            path.push(parent);
            current = self.get(parent)?;
        }
        Ok(path)
    }

    /// Codes an insertion under `parent` must differ from: the parent's own
    /// code and those of its existing children
    pub fn forbidden_codes(&self, parent: Option<AgentId>) -> Vec<&AgentCode> {
        let mut codes: Vec<&AgentCode> = Vec::new();
        if let Some(record) = parent.and_then(|p| self.records.get(p.index())) {
            codes.push(&record.code);
        }
        codes.extend(self.ids_under(parent).map(|r| &r.code));
        codes
    }

    fn ids_under(&self, parent: Option<AgentId>) -> impl Iterator<Item = &AgentRecord> {
        self.children
            .get(&parent)
            .into_iter()
            .flatten()
            .map(move |id| &self.records[id.index()])
    }

    fn generation_for(&self, parent: Option<AgentId>) -> u32 {
        parent
            .and_then(|p| self.records.get(p.index()))
            .map_or(0, |p| p.generation + 1)
    }

    fn check_insertable(
        &self,
        code: &AgentCode,
        parent: Option<AgentId>,
        score: Option<f64>,
    ) -> Result<()> {
        if let Some(parent_id) = parent {
            if !self.contains(parent_id) {
                return Err(DgmError::InvalidLineage(format!(
                    "parent {} does not exist (archive holds {} agents)",
                    parent_id,
                    self.len()
                )));
            }
        }

        if let Some(score) = score {
            if !(0.0..=1.0).contains(&score) {
                return Err(DgmError::Other(format!(
                    "score {} is outside [0, 1]",
                    score
                )));
            }
        }

        if let Some(existing) = self
            .forbidden_codes(parent)
            .into_iter()
            .find(|c| c.same_content(code))
        {
            let lineage = match parent {
                Some(p) => format!("under parent {}", p),
                None => "among roots".to_string(),
            };
            return Err(DgmError::DuplicateCode(format!(
                "code {} already present {}",
                existing.short_digest(),
                lineage
            )));
        }

        Ok(())
    }

    /// Insert a checked record and bump its parent's counter
    fn push(&mut self, record: AgentRecord) {
        let id = record.id;
        let parent = record.parent_id;

        if let Some(parent_id) = parent {
            self.records[parent_id.index()].children_count += 1;
        }
        self.children.entry(parent).or_default().push(id);
        self.records.push(record);

        debug!(
            "Archived {} (parent: {}, archive size: {})",
            id,
            parent.map_or_else(|| "root".to_string(), |p| p.to_string()),
            self.records.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn code(s: &str) -> AgentCode {
        AgentCode::new(s)
    }

    #[test]
    fn test_insert_assigns_dense_ids_and_generations() {
        let mut archive = Archive::new();
        let root = archive.insert(NewAgent::root(code("a"), 0.4)).unwrap();
        let child = archive.insert(NewAgent::child(code("b"), root, 0.5)).unwrap();
        let grandchild = archive.insert(NewAgent::child(code("c"), child, 0.6)).unwrap();

        assert_eq!(root, AgentId(0));
        assert_eq!(grandchild, AgentId(2));
        assert_eq!(archive.get(grandchild).unwrap().generation(), 2);
        assert_eq!(archive.lineage(grandchild).unwrap(), vec![AgentId(2), AgentId(1), AgentId(0)]);
    }

    #[test]
    fn test_insert_unknown_parent_is_invalid_lineage() {
        let mut archive = Archive::new();
        archive.insert(NewAgent::root(code("a"), 0.4)).unwrap();

        let err = archive
            .insert(NewAgent::child(code("b"), AgentId(5), 0.5))
            .unwrap_err();
        assert!(matches!(err, DgmError::InvalidLineage(_)));
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.get(AgentId(0)).unwrap().children_count(), 0);
    }

    #[test]
    fn test_children_count_advances_with_insertion() {
        let mut archive = Archive::new();
        let root = archive.insert(NewAgent::root(code("a"), 0.4)).unwrap();
        archive.insert(NewAgent::child(code("b"), root, 0.5)).unwrap();
        archive.insert(NewAgent::child(code("c"), root, 0.5)).unwrap();

        assert_eq!(archive.get(root).unwrap().children_count(), 2);
        assert_eq!(archive.children_of(root).count(), 2);
    }

    #[test]
    fn test_duplicate_of_parent_or_sibling_is_refused() {
        let mut archive = Archive::new();
        let root = archive.insert(NewAgent::root(code("a"), 0.4)).unwrap();
        archive.insert(NewAgent::child(code("b"), root, 0.5)).unwrap();

        let same_as_parent = archive.insert(NewAgent::child(code("a"), root, 0.5));
        let same_as_sibling = archive.insert(NewAgent::child(code("b"), root, 0.5));
        assert!(matches!(same_as_parent, Err(DgmError::DuplicateCode(_))));
        assert!(matches!(same_as_sibling, Err(DgmError::DuplicateCode(_))));
        assert_eq!(archive.get(root).unwrap().children_count(), 1);

        // v1 holds "b", so "b" is refused below it while "a" is not
        let other = archive.insert(NewAgent::child(code("b"), AgentId(1), 0.5));
        assert!(matches!(other, Err(DgmError::DuplicateCode(_))));
        archive.insert(NewAgent::child(code("a"), AgentId(1), 0.5)).unwrap();
    }

    #[test]
    fn test_best_breaks_ties_by_insertion_order() {
        let mut archive = Archive::new();
        let root = archive.insert(NewAgent::root(code("a"), 0.4)).unwrap();
        let first = archive.insert(NewAgent::child(code("b"), root, 0.7)).unwrap();
        archive.insert(NewAgent::child(code("c"), root, 0.7)).unwrap();
        archive
            .insert(NewAgent::child(code("d"), root, 0.9).unscored())
            .unwrap();

        assert_eq!(archive.best().unwrap().id(), first);
    }

    #[test]
    fn test_best_of_empty_archive() {
        assert!(Archive::new().best().is_none());
    }

    #[test]
    fn test_out_of_range_score_is_refused() {
        let mut archive = Archive::new();
        assert!(archive.insert(NewAgent::root(code("a"), 1.5)).is_err());
        assert!(archive.is_empty());
    }

    #[test]
    fn test_random_insertions_keep_lineage_invariants() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut archive = Archive::new();
        archive.insert(NewAgent::root(code("seed"), 0.5)).unwrap();

        for i in 0..200 {
            // Parents are drawn from a range that sometimes overshoots
            let parent = AgentId(rng.gen_range(0..archive.len() as u64 + 3));
            let text = format!("variant-{}", rng.gen_range(0..60));
            let score = rng.gen_range(0.0..=1.0);
            let _ = archive.insert(NewAgent::child(code(&text), parent, score));
            assert!(archive.len() <= i + 2);
        }

        for record in archive.all() {
            if let Some(parent) = record.parent_id() {
                assert!(parent < record.id(), "forward reference at {}", record.id());
            }

            let accepted_children = archive
                .all()
                .iter()
                .filter(|r| r.parent_id() == Some(record.id()))
                .count();
            assert_eq!(record.children_count() as usize, accepted_children);

            let siblings: Vec<_> = archive.children_of(record.id()).collect();
            for (i, a) in siblings.iter().enumerate() {
                for b in &siblings[i + 1..] {
                    assert_ne!(a.code().digest(), b.code().digest());
                }
            }
        }
    }
}
