//! Commit Fuzzer - randomized transactions checked against a shadow model
//!
//! Checks:
//! - Committed values match the model after every transaction
//! - Derived sections equal their compute over committed inputs
//! - Each flush notifies exactly the keys changed since the previous flush,
//!   once each
//! - History holds one record per changing commit, up to its limit

use std::collections::{BTreeSet, HashMap};

use accord_core::{AccordResult, ShallowMerge, Value};
use accord_state::{DerivedSectionDefinition, Update};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map};
use tracing::debug;

use crate::{HarnessBuilder, ScenarioHarness};

const TOTAL_KEY: &str = "total";

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct CommitFuzzerConfig {
    /// Number of adapter-backed sections
    pub section_count: usize,
    /// Number of transactions to run
    pub transaction_count: usize,
    /// Maximum operations per transaction
    pub max_ops: usize,
    /// Probability that an operation is a patch (0.0 - 1.0)
    pub patch_prob: f64,
    /// Probability that an operation opens a nested transaction
    pub nested_prob: f64,
    /// Probability of draining notifications after a transaction
    pub flush_prob: f64,
    /// Range of generated numbers; small ranges produce many no-op writes
    pub value_range: i64,
    pub history_limit: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for CommitFuzzerConfig {
    fn default() -> Self {
        CommitFuzzerConfig {
            section_count: 6,
            transaction_count: 500,
            max_ops: 6,
            patch_prob: 0.4,
            nested_prob: 0.2,
            flush_prob: 0.3,
            value_range: 8,
            history_limit: 20,
            seed: 42,
        }
    }
}

impl CommitFuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        CommitFuzzerConfig {
            section_count: 3,
            transaction_count: 100,
            max_ops: 4,
            ..Self::default()
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        CommitFuzzerConfig {
            section_count: 20,
            transaction_count: 5_000,
            max_ops: 12,
            value_range: 4,
            ..Self::default()
        }
    }
}

/// Commit fuzzing result
#[derive(Debug, Default)]
pub struct CommitFuzzResult {
    pub transactions: usize,
    pub commits: usize,
    pub flushes: usize,
    /// Section keys whose committed value diverged from the model
    pub value_mismatches: Vec<String>,
    pub derived_violations: u32,
    pub notification_violations: u32,
    pub history_violations: u32,
    pub errors: Vec<String>,
}

impl CommitFuzzResult {
    pub fn is_valid(&self) -> bool {
        self.value_mismatches.is_empty()
            && self.derived_violations == 0
            && self.notification_violations == 0
            && self.history_violations == 0
            && self.errors.is_empty()
    }
}

/// Commit fuzzer
pub struct CommitFuzzer {
    config: CommitFuzzerConfig,
    rng: StdRng,
    keys: Vec<String>,
    harness: ScenarioHarness,
    /// Committed values as the model predicts them
    model: HashMap<String, Value>,
    /// Keys changed since the last drained flush
    unflushed: BTreeSet<String>,
}

impl CommitFuzzer {
    pub fn new(config: CommitFuzzerConfig) -> AccordResult<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        let keys: Vec<String> = (0..config.section_count)
            .map(|i| format!("s{}", i))
            .collect();

        let mut builder = HarnessBuilder::new().history_limit(config.history_limit);
        let mut model = HashMap::new();
        for key in &keys {
            let initial = json!({ "n": 0 });
            builder = builder.section(key, initial.clone());
            model.insert(key.clone(), initial);
        }
        builder = builder.derived(DerivedSectionDefinition::new(TOTAL_KEY, keys.clone(), total));
        model.insert(TOTAL_KEY.to_string(), json!(0));

        Ok(CommitFuzzer {
            config,
            rng,
            keys,
            harness: builder.build()?,
            model,
            unflushed: BTreeSet::new(),
        })
    }

    fn random_update(&mut self) -> Update {
        let n = self.rng.gen_range(-self.config.value_range..=self.config.value_range);
        if self.rng.gen::<f64>() < self.config.patch_prob {
            let field = if self.rng.gen_bool(0.5) { "n" } else { "extra" };
            let mut partial = Map::new();
            partial.insert(field.to_string(), json!(n));
            Update::Patch(Value::Object(partial))
        } else {
            Update::Set(json!({ "n": n }))
        }
    }

    /// Build one transaction's operations
    fn generate_ops(&mut self) -> Vec<(String, Update, bool)> {
        let count = self.rng.gen_range(1..=self.config.max_ops);
        (0..count)
            .map(|_| {
                let index = self.rng.gen_range(0..self.keys.len());
                let key = self.keys[index].clone();
                let update = self.random_update();
                let nested = self.rng.gen::<f64>() < self.config.nested_prob;
                (key, update, nested)
            })
            .collect()
    }

    fn stage(&self, key: &str, update: &Update) -> AccordResult<()> {
        let conductor = &self.harness.conductor;
        match update {
            Update::Set(value) => conductor.set(key, value.clone()),
            Update::Patch(partial) => conductor.patch(key, partial.clone()),
        }
    }

    /// Predict the commit: later updates to one key replace earlier ones
    fn apply_to_model(&mut self, ops: &[(String, Update, bool)]) -> BTreeSet<String> {
        let mut staged: HashMap<&str, &Update> = HashMap::new();
        for (key, update, _) in ops {
            staged.insert(key, update);
        }

        let mut changed = BTreeSet::new();
        for key in &self.keys {
            let Some(update) = staged.get(key.as_str()) else {
                continue;
            };
            let current = self.model.get(key).cloned().unwrap_or(Value::Null);
            let next = match update {
                Update::Set(value) => value.clone(),
                Update::Patch(partial) => current
                    .shallow_merge(partial)
                    .unwrap_or_else(|| current.clone()),
            };
            if next != current {
                changed.insert(key.clone());
                self.model.insert(key.clone(), next);
            }
        }

        let inputs: Vec<Value> = self
            .keys
            .iter()
            .map(|k| self.model.get(k).cloned().unwrap_or(Value::Null))
            .collect();
        let next_total = total(&inputs);
        if self.model.get(TOTAL_KEY) != Some(&next_total) {
            changed.insert(TOTAL_KEY.to_string());
            self.model.insert(TOTAL_KEY.to_string(), next_total);
        }
        changed
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> CommitFuzzResult {
        let mut result = CommitFuzzResult::default();

        for _ in 0..self.config.transaction_count {
            let ops = self.generate_ops();
            let conductor = self.harness.conductor.clone();

            let outcome = conductor.transaction(|| {
                for (key, update, nested) in &ops {
                    if *nested {
                        conductor.transaction(|| self.stage(key, update))?;
                    } else {
                        self.stage(key, update)?;
                    }
                }
                Ok(())
            });
            if let Err(err) = outcome {
                result.errors.push(err.to_string());
                continue;
            }
            result.transactions += 1;

            let changed = self.apply_to_model(&ops);
            if !changed.is_empty() {
                result.commits += 1;
            }
            self.unflushed.extend(changed);

            self.check_values(&mut result);

            if conductor.history().len() != result.commits.min(self.config.history_limit) {
                result.history_violations += 1;
            }

            if self.rng.gen::<f64>() < self.config.flush_prob {
                self.flush(&mut result);
            }
        }
        self.flush(&mut result);

        debug!(
            transactions = result.transactions,
            commits = result.commits,
            flushes = result.flushes,
            valid = result.is_valid(),
            "commit fuzz complete"
        );
        result
    }

    fn check_values(&self, result: &mut CommitFuzzResult) {
        let conductor = &self.harness.conductor;
        for key in self.keys.iter().map(String::as_str).chain([TOTAL_KEY]) {
            let committed = conductor.get(key).ok();
            if committed.as_ref() != self.model.get(key) {
                result.value_mismatches.push(key.to_string());
            }
        }

        let inputs: Vec<Value> = self
            .keys
            .iter()
            .filter_map(|k| conductor.get(k).ok())
            .collect();
        if conductor.get(TOTAL_KEY).ok() != Some(total(&inputs)) {
            result.derived_violations += 1;
        }
    }

    fn flush(&mut self, result: &mut CommitFuzzResult) {
        self.harness.reset_notifications();
        self.harness.drain();
        result.flushes += 1;

        let expected: Vec<String> = std::mem::take(&mut self.unflushed).into_iter().collect();
        let notified = self.harness.notified_keys();
        if notified != expected {
            result.notification_violations += 1;
        }
        if notified.iter().any(|k| self.harness.notifications(k) != 1) {
            result.notification_violations += 1;
        }
    }
}

/// Sum of every input's `n` field
fn total(inputs: &[Value]) -> Value {
    json!(inputs
        .iter()
        .filter_map(|v| v["n"].as_i64())
        .sum::<i64>())
}
