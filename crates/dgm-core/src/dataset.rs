//! Dataset provider: three disjoint labeled splits
//!
//! Examples are read from JSON Lines. The test split is kept behind an
//! accessor so the driver can only reach it when finalizing.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use crate::{DgmError, Example, Result};

/// Seed used when partitioning a single file into splits
pub const DEFAULT_PARTITION_SEED: u64 = 42;

/// JSON field names holding the input and expected output
#[derive(Debug, Clone)]
pub struct FieldNames {
    pub input: String,
    pub expected: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            input: "question".to_string(),
            expected: "answer".to_string(),
        }
    }
}

/// Split sizes for [`DatasetSplits::partition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl SplitSizes {
    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }
}

impl std::str::FromStr for SplitSizes {
    type Err = String;

    /// Parses `train,validation,test`, e.g. `185,15,50`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!("Expected train,validation,test sizes, got: {}", s));
        }
        let parse = |p: &str| {
            p.parse::<usize>()
                .map_err(|_| format!("Invalid split size '{}' in: {}", p, s))
        };
        Ok(Self {
            train: parse(parts[0])?,
            validation: parse(parts[1])?,
            test: parse(parts[2])?,
        })
    }
}

/// Training, validation and test splits
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    train: Vec<Example>,
    validation: Vec<Example>,
    test: Vec<Example>,
}

impl DatasetSplits {
    pub fn new(train: Vec<Example>, validation: Vec<Example>, test: Vec<Example>) -> Self {
        Self {
            train,
            validation,
            test,
        }
    }

    /// Load one JSONL file per split
    pub fn from_files(
        train: &Path,
        validation: &Path,
        test: &Path,
        fields: &FieldNames,
    ) -> Result<Self> {
        let splits = Self::new(
            load_jsonl(train, fields)?,
            load_jsonl(validation, fields)?,
            load_jsonl(test, fields)?,
        );
        splits.validate()?;
        info!(
            "Loaded dataset: {} train, {} validation, {} test",
            splits.train.len(),
            splits.validation.len(),
            splits.test.len()
        );
        Ok(splits)
    }

    /// Shuffle with `seed` and carve consecutive, disjoint splits
    pub fn partition(mut examples: Vec<Example>, sizes: SplitSizes, seed: u64) -> Result<Self> {
        if sizes.total() > examples.len() {
            return Err(DgmError::Dataset(format!(
                "Requested {} examples ({} train, {} validation, {} test) but only {} available",
                sizes.total(),
                sizes.train,
                sizes.validation,
                sizes.test,
                examples.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        examples.shuffle(&mut rng);

        let mut rest = examples.into_iter();
        let train: Vec<Example> = rest.by_ref().take(sizes.train).collect();
        let validation: Vec<Example> = rest.by_ref().take(sizes.validation).collect();
        let test: Vec<Example> = rest.take(sizes.test).collect();

        let splits = Self::new(train, validation, test);
        splits.validate()?;
        Ok(splits)
    }

    /// Every split must be usable
    pub fn validate(&self) -> Result<()> {
        if self.train.is_empty() {
            return Err(DgmError::Dataset("Training split is empty".into()));
        }
        if self.validation.is_empty() {
            return Err(DgmError::Dataset("Validation split is empty".into()));
        }
        if self.test.is_empty() {
            return Err(DgmError::Dataset("Test split is empty".into()));
        }
        Ok(())
    }

    pub fn train(&self) -> &[Example] {
        &self.train
    }

    pub fn validation(&self) -> &[Example] {
        &self.validation
    }

    /// Held-out split; only the final champion evaluation may read it
    pub fn test(&self) -> &[Example] {
        &self.test
    }
}

/// Read labeled examples from a JSON Lines file
pub fn load_jsonl(path: &Path, fields: &FieldNames) -> Result<Vec<Example>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DgmError::Dataset(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_jsonl(&content, fields).map_err(|e| match e {
        DgmError::Dataset(msg) => DgmError::Dataset(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse labeled examples from JSON Lines text
pub fn parse_jsonl(content: &str, fields: &FieldNames) -> Result<Vec<Example>> {
    let mut examples = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(line)
            .map_err(|e| DgmError::Dataset(format!("line {}: {}", idx + 1, e)))?;

        let input = field_text(&value, &fields.input)
            .ok_or_else(|| missing_field(idx, &fields.input))?;
        let expected = field_text(&value, &fields.expected)
            .ok_or_else(|| missing_field(idx, &fields.expected))?;

        examples.push(Example { input, expected });
    }

    debug!("Parsed {} examples", examples.len());
    Ok(examples)
}

fn field_text(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn missing_field(idx: usize, field: &str) -> DgmError {
    DgmError::Dataset(format!(
        "line {}: missing string field '{}'",
        idx + 1,
        field
    ))
}
