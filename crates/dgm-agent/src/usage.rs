//! Token usage and cost accounting for oracle calls

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::Usage;

/// USD per token (prompt, completion) for known models
fn model_cost(model: &str) -> (f64, f64) {
    const PER_MILLION: f64 = 1_000_000.0;
    let (prompt, completion) = match model {
        m if m.starts_with("gpt-4o-mini") => (0.15, 0.6),
        m if m.starts_with("gpt-4o") => (5.0, 15.0),
        m if m.starts_with("gpt-4-turbo") => (10.0, 30.0),
        m if m.starts_with("claude-opus") => (15.0, 75.0),
        m if m.starts_with("claude-sonnet") => (3.0, 15.0),
        m if m.starts_with("claude-haiku") => (0.8, 4.0),
        _ => (0.0, 0.0),
    };
    (prompt / PER_MILLION, completion / PER_MILLION)
}

/// Totals for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub calls: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost_usd: f64,
}

impl UsageSummary {
    fn add(&mut self, other: &UsageSummary) {
        self.calls += other.calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Thread-safe per-model usage ledger
#[derive(Debug, Default)]
pub struct UsageLedger {
    by_model: Mutex<BTreeMap<String, UsageSummary>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return its estimated cost
    pub fn record(&self, model: &str, usage: &Usage) -> f64 {
        let (prompt_rate, completion_rate) = model_cost(model);
        let cost = usage.input_tokens as f64 * prompt_rate
            + usage.output_tokens as f64 * completion_rate;

        let mut by_model = self.by_model.lock().unwrap_or_else(|e| e.into_inner());
        by_model.entry(model.to_string()).or_default().add(&UsageSummary {
            calls: 1,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: cost,
        });
        cost
    }

    pub fn per_model(&self) -> BTreeMap<String, UsageSummary> {
        self.by_model
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn total(&self) -> UsageSummary {
        let mut total = UsageSummary::default();
        for summary in self.per_model().values() {
            total.add(summary);
        }
        total
    }

    /// Multi-line human-readable summary
    pub fn report(&self) -> String {
        let total = self.total();
        let mut out = String::from("--- Oracle API Usage ---\n");
        for (model, summary) in self.per_model() {
            out.push_str(&format!(
                "{}: {} calls, {} prompt / {} completion tokens, ${:.6}\n",
                model, summary.calls, summary.input_tokens, summary.output_tokens, summary.cost_usd
            ));
        }
        out.push_str(&format!(
            "Total: {} prompt / {} completion tokens, estimated ${:.6}",
            total.input_tokens, total.output_tokens, total.cost_usd
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_model() {
        let ledger = UsageLedger::new();
        ledger.record(
            "gpt-4o",
            &Usage {
                input_tokens: 1_000_000,
                output_tokens: 0,
            },
        );
        ledger.record(
            "gpt-4o",
            &Usage {
                input_tokens: 0,
                output_tokens: 1_000_000,
            },
        );

        let per_model = ledger.per_model();
        let gpt = &per_model["gpt-4o"];
        assert_eq!(gpt.calls, 2);
        assert!((gpt.cost_usd - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_mini_is_not_priced_as_full_model() {
        let (prompt, _) = model_cost("gpt-4o-mini");
        assert!((prompt * 1_000_000.0 - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_is_free_but_counted() {
        let ledger = UsageLedger::new();
        let cost = ledger.record(
            "local-model",
            &Usage {
                input_tokens: 10,
                output_tokens: 10,
            },
        );
        assert_eq!(cost, 0.0);
        assert_eq!(ledger.total().input_tokens, 10);
        assert!(ledger.report().contains("local-model: 1 calls"));
    }
}
