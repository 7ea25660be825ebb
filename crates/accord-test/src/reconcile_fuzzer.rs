//! Reconcile Fuzzer - randomized instrument updates against a reference model
//!
//! Each step advances the clock, then either updates one instrument's
//! backing atom or writes through the orchestrator. After every step the
//! resolved value and driver are compared with an independent model of the
//! priority/recency/staleness rules, and every notification must correspond
//! to a change of the resolved value.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use accord_adapters::AtomAdapter;
use accord_core::{AccordResult, Clock, ManualClock, SourceAdapter, Subscription, Timestamp};
use accord_orchestra::{InstrumentDefinition, OrchestratedAdapter, OrchestratorConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct ReconcileFuzzerConfig {
    pub instrument_count: usize,
    pub step_count: usize,
    /// Priorities are drawn from `0..priority_levels`; few levels force ties
    pub priority_levels: i32,
    /// Probability that an instrument has a freshness window
    pub stale_prob: f64,
    /// Largest clock advance per step in milliseconds
    pub max_advance_ms: u64,
    /// Probability that a step writes through the orchestrator
    pub write_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for ReconcileFuzzerConfig {
    fn default() -> Self {
        ReconcileFuzzerConfig {
            instrument_count: 4,
            step_count: 1_000,
            priority_levels: 3,
            stale_prob: 0.5,
            max_advance_ms: 40,
            write_prob: 0.1,
            seed: 42,
        }
    }
}

impl ReconcileFuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        ReconcileFuzzerConfig {
            instrument_count: 3,
            step_count: 200,
            ..Self::default()
        }
    }
}

/// Reconcile fuzzing result
#[derive(Debug, Default)]
pub struct ReconcileFuzzResult {
    pub steps: usize,
    pub driver_changes: usize,
    pub resolution_mismatches: u32,
    pub notification_mismatches: u32,
}

impl ReconcileFuzzResult {
    pub fn is_valid(&self) -> bool {
        self.resolution_mismatches == 0 && self.notification_mismatches == 0
    }
}

/// Model of one instrument
#[derive(Debug, Clone)]
struct ModelInstrument {
    id: String,
    value: u32,
    updated_at: Timestamp,
    priority: i32,
    stale_after: Option<Duration>,
}

impl ModelInstrument {
    fn is_stale(&self, now: Timestamp) -> bool {
        self.stale_after
            .is_some_and(|window| now.elapsed_since(self.updated_at) > window)
    }
}

/// Reconcile fuzzer
pub struct ReconcileFuzzer {
    config: ReconcileFuzzerConfig,
    rng: StdRng,
    clock: Rc<ManualClock>,
    atoms: Vec<AtomAdapter<u32>>,
    model: Vec<ModelInstrument>,
    /// Model of the last resolution: (driver index, value)
    resolved: (usize, u32),
    orchestra: OrchestratedAdapter<u32>,
    notifications: Rc<Cell<usize>>,
    _subscription: Subscription,
}

impl ReconcileFuzzer {
    pub fn new(config: ReconcileFuzzerConfig) -> AccordResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let clock = Rc::new(ManualClock::new(Timestamp::from_millis(10_000)));
        let now = clock.now();

        let mut atoms = Vec::with_capacity(config.instrument_count);
        let mut model = Vec::with_capacity(config.instrument_count);
        let mut orchestra_config = OrchestratorConfig::new().clock(clock.clone());
        for index in 0..config.instrument_count {
            let id = format!("i{}", index);
            let value = rng.gen_range(0..1_000);
            let priority = rng.gen_range(0..config.priority_levels.max(1));
            let stale_after = if rng.gen::<f64>() < config.stale_prob {
                Some(Duration::from_millis(rng.gen_range(20..200)))
            } else {
                None
            };

            let atom = AtomAdapter::new(value);
            let mut definition = InstrumentDefinition::new(id.clone(), atom.clone()).priority(priority);
            if let Some(window) = stale_after {
                definition = definition.stale_after(window);
            }
            orchestra_config = orchestra_config.instrument(definition);
            atoms.push(atom);
            model.push(ModelInstrument {
                id,
                value,
                updated_at: now,
                priority,
                stale_after,
            });
        }
        if let Some(first) = model.first() {
            orchestra_config = orchestra_config.write_to(first.id.clone());
        }

        let orchestra = OrchestratedAdapter::new(orchestra_config)?;
        let notifications = Rc::new(Cell::new(0));
        let counter = notifications.clone();
        let subscription = orchestra.subscribe(Rc::new(move || counter.set(counter.get() + 1)));

        let mut fuzzer = ReconcileFuzzer {
            config,
            rng,
            clock,
            atoms,
            model,
            resolved: (0, 0),
            orchestra,
            notifications,
            _subscription: subscription,
        };
        fuzzer.resolved = fuzzer.model_resolve(None);
        Ok(fuzzer)
    }

    /// Reference policy: fresh instruments only, highest priority, then most
    /// recent, then registration order
    fn model_resolve(&self, last: Option<(usize, u32)>) -> (usize, u32) {
        let now = self.clock.now();
        let mut best: Option<usize> = None;
        for (index, instrument) in self.model.iter().enumerate() {
            if instrument.is_stale(now) {
                continue;
            }
            best = match best {
                Some(current) => {
                    let held = &self.model[current];
                    if (instrument.priority, instrument.updated_at) > (held.priority, held.updated_at) {
                        Some(index)
                    } else {
                        Some(current)
                    }
                }
                None => Some(index),
            };
        }
        match (best, last) {
            (Some(index), _) => (index, self.model[index].value),
            (None, Some(last)) => last,
            (None, None) => (0, self.model.first().map(|i| i.value).unwrap_or_default()),
        }
    }

    fn update_instrument(&mut self, index: usize, value: u32) {
        // equal writes are swallowed by the atom and never reach the orchestrator
        if self.model[index].value == value {
            return;
        }
        let now = self.clock.now();
        self.model[index].value = value;
        self.model[index].updated_at = now;
        self.atoms[index].set(value);
        self.resolved = self.model_resolve(Some(self.resolved));
    }

    fn write_through(&mut self, value: u32) {
        self.orchestra.set(value);
        if self.model[0].value != value {
            self.model[0].value = value;
            self.model[0].updated_at = self.clock.now();
            self.resolved = self.model_resolve(Some(self.resolved));
        }
        // the write itself re-resolves after forwarding
        self.resolved = self.model_resolve(Some(self.resolved));
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> ReconcileFuzzResult {
        let mut result = ReconcileFuzzResult::default();
        let mut driver = self.orchestra.driver();

        for _ in 0..self.config.step_count {
            let advance = self.rng.gen_range(0..=self.config.max_advance_ms);
            self.clock.advance(Duration::from_millis(advance));

            let before_value = self.orchestra.get();
            let before_notifications = self.notifications.get();
            let value = self.rng.gen_range(0..1_000);

            if self.rng.gen::<f64>() < self.config.write_prob {
                self.write_through(value);
            } else {
                let index = self.rng.gen_range(0..self.atoms.len());
                self.update_instrument(index, value);
            }
            result.steps += 1;

            let (index, expected) = self.resolved;
            let actual = self.orchestra.resolution();
            if actual.value != expected || actual.source_id != self.model[index].id {
                result.resolution_mismatches += 1;
            }

            let notified = self.notifications.get() - before_notifications;
            let changed = self.orchestra.get() != before_value;
            if (notified > 0) != changed || notified > 1 {
                result.notification_mismatches += 1;
            }

            if actual.source_id != driver {
                result.driver_changes += 1;
                driver = actual.source_id;
            }
        }

        debug!(
            steps = result.steps,
            driver_changes = result.driver_changes,
            valid = result.is_valid(),
            "reconcile fuzz complete"
        );
        result
    }
}
