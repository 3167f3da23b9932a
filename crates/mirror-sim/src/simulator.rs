//! Mirror simulator
//!
//! Each step applies one random live tree operation and lets the engine drain
//! its event queue. Every `checkpoint_every` steps the simulator flushes
//! pending change records, runs a reconciliation pass and compares the
//! mirror against a fresh build of the live tree.

use mirror_model::{MirrorStore, NodeKey};
use mirror_sync::{LiveTree, SyncConfig, SyncError, SyncStats, TreeBuilder};
use mirror_testkit::{FakeBuilder, FakeDom, FakeElement, FakeEngine, InputType};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

const TAGS: [&str; 5] = ["div", "span", "section", "p", "script"];
const INPUTS: [InputType; 3] = [InputType::Text, InputType::Radio, InputType::Checkbox];
const ATTRIBUTES: [&str; 4] = ["class", "title", "name", "data-state"];
const WORDS: [&str; 6] = ["", "a", "b", "alpha", "beta", "on"];
const RADIO_GROUPS: [&str; 2] = ["size", "color"];

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Total steps, checkpoints included
    pub steps: u64,
    /// Run a checkpoint every this many steps (0 checks only at the end)
    pub checkpoint_every: u64,
    /// Stop conditions
    pub stop_on_first_violation: bool,
    /// Engine configuration
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 1000,
            checkpoint_every: 25,
            stop_on_first_violation: true,
            sync: SyncConfig::default(),
        }
    }
}

/// Live tree operations
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    /// Append a new element
    AppendElement {
        /// Parent key
        parent: NodeKey,
        /// Element tag
        tag: &'static str,
    },
    /// Append a new input, optionally in a radio group
    AppendInput {
        /// Parent key
        parent: NodeKey,
        /// Input flavour
        input: InputType,
        /// Value of the `name` attribute
        group: Option<&'static str>,
    },
    /// Move a connected element under another parent
    Move {
        /// Moved element
        node: NodeKey,
        /// New parent
        parent: NodeKey,
    },
    /// Detach an element, keeping it for a later reattach
    Remove {
        /// Detached element
        node: NodeKey,
    },
    /// Reattach a previously removed element
    Reattach {
        /// Reattached element
        node: NodeKey,
        /// New parent
        parent: NodeKey,
    },
    /// Forget a detached element for good
    Discard {
        /// Dropped element
        node: NodeKey,
    },
    /// Set an attribute
    SetAttribute {
        /// Target
        node: NodeKey,
        /// Attribute name
        name: &'static str,
        /// Attribute value
        value: &'static str,
    },
    /// Set text content
    SetText {
        /// Target
        node: NodeKey,
        /// New text
        text: &'static str,
    },
    /// Focus with events
    Focus {
        /// Target
        node: NodeKey,
    },
    /// Programmatic focus without events
    FocusSilently {
        /// Target
        node: NodeKey,
    },
    /// Drop focus
    Blur {
        /// Skip the blur event
        silent: bool,
    },
    /// Change a value and dispatch an input event
    TypeValue {
        /// Target
        node: NodeKey,
        /// New value
        value: &'static str,
    },
    /// Change a value silently
    SetValue {
        /// Target
        node: NodeKey,
        /// New value
        value: &'static str,
    },
    /// Change a checked flag silently
    SetChecked {
        /// Target
        node: NodeKey,
        /// New flag
        checked: bool,
    },
    /// Change a tri-state flag silently
    SetIndeterminate {
        /// Target
        node: NodeKey,
        /// New flag
        indeterminate: bool,
    },
    /// Dispatch a transition-end event
    FinishTransition {
        /// Target
        node: NodeKey,
    },
    /// Deliver queued change records
    Flush,
    /// Flush, reconcile and verify the mirror
    Checkpoint,
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    /// More than one mirror node flagged focused
    MultipleFocused {
        /// Step number
        step: u64,
        /// Flagged keys
        keys: Vec<NodeKey>,
    },
    /// Mirror differs from a fresh build after reconciliation
    MirrorDiverged {
        /// Step number
        step: u64,
        /// Operations applied since the previous checkpoint
        recent: Vec<String>,
    },
    /// Focus flag does not follow the active element
    WrongFocus {
        /// Step number
        step: u64,
        /// Active element, when it is a mirrored control
        expected: Option<NodeKey>,
        /// Flagged keys
        actual: Vec<NodeKey>,
    },
    /// Store parent/child links disagree
    InconsistentStore {
        /// Step number
        step: u64,
    },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    /// Steps executed
    pub steps: u64,
    /// Structural edits that produced change records
    pub structural: u64,
    /// Interaction events dispatched
    pub interactions: u64,
    /// Control state or focus changes made without notification
    pub silent_changes: u64,
    /// Explicit record flushes
    pub flushes: u64,
    /// Reconciliation checkpoints
    pub checkpoints: u64,
    /// Detached elements dropped
    pub discarded: u64,
    /// Largest connected tree seen
    pub peak_elements: usize,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Simulator counters
    pub stats: SimulatorStats,
    /// Engine counters at disconnect
    pub engine: SyncStats,
    /// Violations in detection order
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Mirror Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Steps: {}\n", self.stats.steps));
        report.push_str(&format!("Checkpoints: {}\n", self.stats.checkpoints));
        report.push_str(&format!("Structural Edits: {}\n", self.stats.structural));
        report.push_str(&format!("Interaction Events: {}\n", self.stats.interactions));
        report.push_str(&format!("Silent Changes: {}\n", self.stats.silent_changes));
        report.push_str(&format!("Peak Elements: {}\n", self.stats.peak_elements));
        report.push_str(&format!("Rebuilds: {}\n", self.engine.rebuilds));
        report.push_str(&format!("Reconcile Passes: {}\n", self.engine.reconcile_passes));
        report.push_str(&format!("Focus Changes: {}\n", self.engine.focus_changes));
        report.push_str(&format!("Resyncs: {}\n", self.engine.resyncs));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Outcome of a run over consecutive seeds
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    /// First seed
    pub start_seed: u64,
    /// Number of seeds run
    pub seeds: u64,
    /// Steps per seed
    pub steps: u64,
    /// Seeds that reported violations
    pub failed_seeds: Vec<u64>,
    /// Violations over all seeds
    pub violations: usize,
    /// Rebuilds over all seeds
    pub rebuilds: u64,
}

impl SoakReport {
    /// Whether every seed passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed_seeds.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Mirror Soak Report ===\n\n");
        report.push_str(&format!(
            "Seeds: {}..{}\n",
            self.start_seed,
            self.start_seed.saturating_add(self.seeds)
        ));
        report.push_str(&format!("Steps per Seed: {}\n", self.steps));
        report.push_str(&format!("Total Rebuilds: {}\n", self.rebuilds));
        report.push_str(&format!("Total Violations: {}\n", self.violations));
        if !self.failed_seeds.is_empty() {
            report.push_str(&format!("Failed Seeds: {:?}\n", self.failed_seeds));
        }
        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Let the engine's event pump drain the queue
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn pick<T: Clone>(rng: &mut StdRng, items: &[T]) -> T {
    items[rng.random_range(0..items.len())].clone()
}

struct Simulation {
    dom: Arc<FakeDom>,
    engine: FakeEngine,
    /// Detached elements available for reattachment
    pool: Vec<Arc<FakeElement>>,
    stats: SimulatorStats,
}

impl Simulation {
    fn resolve(&self, key: &NodeKey) -> Option<Arc<FakeElement>> {
        self.dom
            .find(key)
            .or_else(|| self.pool.iter().find(|node| node.key() == *key).cloned())
    }

    fn generate(&self, rng: &mut StdRng) -> SimulatedOperation {
        use SimulatedOperation as Op;

        let elements = self.dom.elements();
        let containers: Vec<NodeKey> = elements
            .iter()
            .filter(|node| node.input_type().is_none())
            .map(|node| node.key())
            .collect();
        let controls: Vec<NodeKey> = elements
            .iter()
            .filter(|node| node.input_type().is_some())
            .map(|node| node.key())
            .collect();
        let checkable: Vec<NodeKey> = elements
            .iter()
            .filter(|node| node.input_type().is_some_and(InputType::is_checkable))
            .map(|node| node.key())
            .collect();
        let checkboxes: Vec<NodeKey> = elements
            .iter()
            .filter(|node| node.input_type().is_some_and(InputType::has_mixed_state))
            .map(|node| node.key())
            .collect();
        // Root first; everything after it can be moved or removed.
        let movable: Vec<NodeKey> = elements.iter().skip(1).map(|node| node.key()).collect();
        let pooled: Vec<NodeKey> = self.pool.iter().map(|node| node.key()).collect();
        let any: Vec<NodeKey> = elements.iter().map(|node| node.key()).collect();

        let parent = pick(rng, &containers);
        let roll = rng.random_range(0..20u32);
        match roll {
            0..=2 => Op::AppendElement {
                parent,
                tag: pick(rng, &TAGS),
            },
            5 if !movable.is_empty() => Op::Move {
                node: pick(rng, &movable),
                parent,
            },
            6 if !movable.is_empty() => Op::Remove {
                node: pick(rng, &movable),
            },
            7 if !pooled.is_empty() => Op::Reattach {
                node: pick(rng, &pooled),
                parent,
            },
            8 if !pooled.is_empty() => Op::Discard {
                node: pick(rng, &pooled),
            },
            9 => Op::SetAttribute {
                node: pick(rng, &any),
                name: pick(rng, &ATTRIBUTES),
                value: pick(rng, &WORDS),
            },
            10 => Op::SetText {
                node: parent,
                text: pick(rng, &WORDS),
            },
            11 if !controls.is_empty() => Op::Focus {
                node: pick(rng, &controls),
            },
            12 => Op::FocusSilently {
                node: pick(rng, &any),
            },
            13 => Op::Blur {
                silent: rng.random_bool(0.5),
            },
            14 if !controls.is_empty() => Op::TypeValue {
                node: pick(rng, &controls),
                value: pick(rng, &WORDS),
            },
            15 if !controls.is_empty() => Op::SetValue {
                node: pick(rng, &controls),
                value: pick(rng, &WORDS),
            },
            16 if !checkable.is_empty() => Op::SetChecked {
                node: pick(rng, &checkable),
                checked: rng.random_bool(0.5),
            },
            17 if !checkboxes.is_empty() => Op::SetIndeterminate {
                node: pick(rng, &checkboxes),
                indeterminate: rng.random_bool(0.5),
            },
            18 => Op::FinishTransition {
                node: pick(rng, &any),
            },
            19 => Op::Flush,
            _ => {
                let input = pick(rng, &INPUTS);
                let group = (input == InputType::Radio).then(|| pick(rng, &RADIO_GROUPS));
                Op::AppendInput { parent, input, group }
            }
        }
    }

    fn apply(&mut self, operation: &SimulatedOperation) {
        use SimulatedOperation as Op;

        match operation {
            Op::AppendElement { parent, tag } => {
                if let Some(parent) = self.resolve(parent) {
                    let node = self.dom.create_element(tag);
                    self.dom.append_child(&parent, &node);
                    self.stats.structural += 1;
                }
            }
            Op::AppendInput { parent, input, group } => {
                if let Some(parent) = self.resolve(parent) {
                    let node = self.dom.create_input(*input);
                    if let Some(group) = group {
                        self.dom.set_attribute(&node, "name", group);
                    }
                    self.dom.append_child(&parent, &node);
                    self.stats.structural += 1;
                }
            }
            Op::Move { node, parent } => {
                if let (Some(node), Some(parent)) = (self.resolve(node), self.resolve(parent)) {
                    if self.dom.append_child(&parent, &node) {
                        self.stats.structural += 1;
                    }
                }
            }
            Op::Remove { node } => {
                let Some(node) = self.resolve(node) else {
                    return;
                };
                if let Some(parent) = node.parent() {
                    self.dom.remove_child(&parent, &node);
                    self.pool.push(node);
                    self.stats.structural += 1;
                }
            }
            Op::Reattach { node, parent } => {
                let Some(index) = self.pool.iter().position(|pooled| pooled.key() == *node) else {
                    return;
                };
                let node = self.pool.swap_remove(index);
                if let Some(parent) = self.resolve(parent) {
                    self.dom.append_child(&parent, &node);
                    self.stats.structural += 1;
                }
            }
            Op::Discard { node } => {
                let before = self.pool.len();
                self.pool.retain(|pooled| pooled.key() != *node);
                self.stats.discarded += (before - self.pool.len()) as u64;
            }
            Op::SetAttribute { node, name, value } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.set_attribute(&node, name, value);
                    self.stats.structural += 1;
                }
            }
            Op::SetText { node, text } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.set_text(&node, text);
                    self.stats.structural += 1;
                }
            }
            Op::Focus { node } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.focus(&node);
                    self.stats.interactions += 1;
                }
            }
            Op::FocusSilently { node } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.focus_silently(&node);
                    self.stats.silent_changes += 1;
                }
            }
            Op::Blur { silent } => {
                if *silent {
                    self.dom.blur_silently();
                    self.stats.silent_changes += 1;
                } else {
                    self.dom.blur();
                    self.stats.interactions += 1;
                }
            }
            Op::TypeValue { node, value } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.type_value(&node, value);
                    self.stats.interactions += 1;
                }
            }
            Op::SetValue { node, value } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.set_value(&node, value);
                    self.stats.silent_changes += 1;
                }
            }
            Op::SetChecked { node, checked } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.set_checked(&node, *checked);
                    self.stats.silent_changes += 1;
                }
            }
            Op::SetIndeterminate { node, indeterminate } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.set_indeterminate(&node, *indeterminate);
                    self.stats.silent_changes += 1;
                }
            }
            Op::FinishTransition { node } => {
                if let Some(node) = self.resolve(node) {
                    self.dom.finish_transition(&node);
                    self.stats.interactions += 1;
                }
            }
            Op::Flush => {
                self.dom.flush_mutations();
                self.stats.flushes += 1;
            }
            Op::Checkpoint => {}
        }
        self.stats.peak_elements = self.stats.peak_elements.max(self.dom.elements().len());
    }

    fn check_single_focus(&self, step: u64) -> Option<Violation> {
        let keys = self.engine.store().tree().focused_keys();
        (keys.len() > 1).then_some(Violation::MultipleFocused { step, keys })
    }

    async fn checkpoint(&mut self, step: u64, recent: &[String]) -> Vec<Violation> {
        self.dom.flush_mutations();
        settle().await;
        self.engine.reconcile();
        self.stats.checkpoints += 1;

        let mut violations = Vec::new();
        let tree = self.engine.store().tree();

        let expected = FakeBuilder
            .build(self.dom.as_ref(), self.dom.root())
            .map(|mirror| mirror.without_focus());
        let actual = tree.snapshot().map(|mirror| mirror.without_focus());
        if expected != actual {
            tracing::debug!("Mirror diverged at step {}: {:?} != {:?}", step, actual, expected);
            violations.push(Violation::MirrorDiverged {
                step,
                recent: recent.to_vec(),
            });
        }

        let active = self
            .dom
            .active_element()
            .map(|node| node.key())
            .filter(|key| tree.get_element(key).is_some_and(|element| element.is_interactive()));
        let focused = tree.focused_keys();
        if focused != active.iter().cloned().collect::<Vec<_>>() {
            violations.push(Violation::WrongFocus {
                step,
                expected: active,
                actual: focused,
            });
        }

        if !tree.is_consistent() {
            violations.push(Violation::InconsistentStore { step });
        }
        violations
    }
}

/// Run the mirror simulator
///
/// # Errors
/// Fails only if the engine cannot connect.
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SyncError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dom = FakeDom::new();
    let engine = mirror_testkit::connect(&dom, config.sync.clone())?;
    let mut sim = Simulation {
        dom,
        engine,
        pool: Vec::new(),
        stats: SimulatorStats::default(),
    };

    tracing::info!("Simulating {} steps with seed {}", config.steps, config.seed);

    let mut violations = Vec::new();
    let mut recent: Vec<String> = Vec::new();
    for step in 1..=config.steps {
        sim.stats.steps += 1;
        let operation = if config.checkpoint_every > 0 && step % config.checkpoint_every == 0 {
            SimulatedOperation::Checkpoint
        } else {
            sim.generate(&mut rng)
        };

        if let SimulatedOperation::Checkpoint = operation {
            violations.extend(sim.checkpoint(step, &recent).await);
            recent.clear();
        } else {
            sim.apply(&operation);
            settle().await;
            recent.push(format!("{operation:?}"));
        }
        violations.extend(sim.check_single_focus(step));

        if config.stop_on_first_violation && !violations.is_empty() {
            tracing::warn!("Stopping at step {} after {} violations", step, violations.len());
            break;
        }
    }

    if violations.is_empty() || !config.stop_on_first_violation {
        violations.extend(sim.checkpoint(config.steps, &recent).await);
    }

    sim.engine.disconnect();
    let engine = sim.engine.stats();

    Ok(SimulatorReport {
        config,
        stats: sim.stats,
        engine,
        violations,
    })
}

/// Run the simulator over `seeds` consecutive seeds starting at `base.seed`
///
/// # Errors
/// Fails only if an engine cannot connect.
pub async fn run_soak(base: SimulatorConfig, seeds: u64) -> Result<SoakReport, SyncError> {
    let mut report = SoakReport {
        start_seed: base.seed,
        seeds,
        steps: base.steps,
        failed_seeds: Vec::new(),
        violations: 0,
        rebuilds: 0,
    };

    for offset in 0..seeds {
        let seed = base.seed.wrapping_add(offset);
        let run = run_simulator(SimulatorConfig {
            seed,
            ..base.clone()
        })
        .await?;

        report.rebuilds += run.engine.rebuilds;
        report.violations += run.violations.len();
        if !run.passed() {
            tracing::warn!("Seed {} failed with {} violations", seed, run.violations.len());
            report.failed_seeds.push(seed);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet(seed: u64, steps: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            steps,
            checkpoint_every: 10,
            stop_on_first_violation: false,
            sync: SyncConfig::new().with_reconcile_interval(Duration::from_secs(3600)),
        }
    }

    #[tokio::test]
    async fn test_seeded_run_passes() {
        let report = run_simulator(quiet(42, 300)).await.unwrap();

        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.steps, 300);
        assert!(report.stats.checkpoints >= 30);
        assert!(report.engine.reconcile_passes >= 30);
        assert!(report.stats.structural > 0);
        assert!(report.generate_text().contains("=== Result: PASS ==="));
    }

    #[tokio::test]
    async fn test_checked_edits_only_target_checkable_inputs() {
        let dom = FakeDom::new();
        let engine = mirror_testkit::connect(&dom, quiet(3, 0).sync).unwrap();
        let mut sim = Simulation {
            dom,
            engine,
            pool: Vec::new(),
            stats: SimulatorStats::default(),
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let op = sim.generate(&mut rng);
            match &op {
                SimulatedOperation::SetIndeterminate { node, .. } => {
                    let input = sim.resolve(node).and_then(|node| node.input_type());
                    assert_eq!(input, Some(InputType::Checkbox));
                }
                SimulatedOperation::SetChecked { node, .. } => {
                    let input = sim.resolve(node).and_then(|node| node.input_type());
                    assert!(input.is_some_and(InputType::is_checkable));
                }
                _ => {}
            }
            sim.apply(&op);
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_operations() {
        let first = run_simulator(quiet(7, 120)).await.unwrap();
        let second = run_simulator(quiet(7, 120)).await.unwrap();
        assert_eq!(first.stats, second.stats);
    }

    #[tokio::test]
    async fn test_soak_covers_every_seed() {
        let report = run_soak(quiet(100, 60), 4).await.unwrap();
        assert_eq!(report.seeds, 4);
        assert!(report.passed(), "{}", report.generate_text());
    }

    #[tokio::test]
    async fn test_invalid_engine_config_fails_run() {
        let mut config = quiet(1, 10);
        config.sync = config.sync.with_event_queue_capacity(0);
        assert!(matches!(run_simulator(config).await, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_failed_report_rendering() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            engine: SyncStats::default(),
            violations: vec![Violation::WrongFocus {
                step: 3,
                expected: Some(NodeKey::new("n4")),
                actual: Vec::new(),
            }],
        };

        assert!(!report.passed());
        assert!(report.generate_text().contains("=== Result: FAIL ==="));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"type\": \"wrong_focus\""));
        assert!(json.contains("\"expected\": \"n4\""));
    }
}
