//! Synchronization engine
//!
//! Keeps a mirror store in step with a live tree through three channels:
//!
//! - **Structural batches**: rebuild every tracked target of the batch
//! - **Interaction events**: flip focus flags directly; rebuild on input and
//!   transition end
//! - **Idle reconciliation**: poll interactive controls for state changes that
//!   produce no event and recompute focus from the active element
//!
//! Every store mutation runs inside a named transaction so store observers
//! see one batch per handler invocation.

use crate::builder::TreeBuilder;
use crate::cache::{PreviousStateCache, TrackedState};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{self, EventQueue, HostEvent, QueueStats};
use crate::live::{InteractionEvent, InteractionKind, LiveNode, LiveTree, MutationRecord, SubscriptionId};
use crate::scheduler::{IdleDetector, IdleScheduler, YieldIdle};
use crate::stats::{StatCounters, SyncStats};
use mirror_model::{ControlKind, MirrorStore, NodeKey};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Transaction labels used by the engine
pub mod labels {
    /// Initial root registration
    pub const REGISTER: &str = "register";
    /// Structural batch
    pub const MUTATION: &str = "mutation";
    /// Input or transition-end rebuild
    pub const INPUT: &str = "input";
    /// Focus event
    pub const FOCUS: &str = "focus";
    /// Blur event
    pub const BLUR: &str = "blur";
    /// Idle reconciliation pass
    pub const RECONCILE: &str = "update side effects";
    /// Full rebuild after dropped host events
    pub const RESYNC: &str = "resync";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebuild {
    Applied,
    Untracked,
    Unbuildable,
    Rejected,
    Disconnected,
}

struct EngineState<E> {
    focused: Option<NodeKey>,
    cache: PreviousStateCache<E>,
}

struct EngineCore<T: LiveTree, B, S> {
    tree: Arc<T>,
    builder: B,
    store: Arc<S>,
    root: Weak<T::Element>,
    root_key: NodeKey,
    connected: AtomicBool,
    /// Held for the whole of every handler; the pump and the idle scheduler
    /// may run on different worker threads.
    handlers: Mutex<()>,
    state: Mutex<EngineState<T::Element>>,
    counters: StatCounters,
    queue: Arc<QueueStats>,
}

impl<T, B, S> EngineCore<T, B, S>
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Rebuild the subtree of `node` if it has a mirror counterpart
    fn rebuild(&self, node: &LiveNode<T>) -> Rebuild {
        if !self.is_connected() {
            return Rebuild::Disconnected;
        }
        let Some(key) = self.tree.stable_key(node) else {
            return Rebuild::Untracked;
        };
        if !self.store.contains(&key) {
            tracing::debug!("Skipping untracked node {}", key);
            return Rebuild::Untracked;
        }
        let Some(subtree) = self.builder.build(self.tree.as_ref(), node) else {
            tracing::debug!("Node {} has no mirror representation; keeping previous mirror", key);
            StatCounters::bump(&self.counters.empty_rebuilds);
            return Rebuild::Unbuildable;
        };

        let mut rebuilt = Vec::with_capacity(subtree.len());
        subtree.walk(&mut |mirror| rebuilt.push(mirror.key.clone()));

        match self.store.update(subtree) {
            Ok(()) => {
                StatCounters::bump(&self.counters.rebuilds);
                self.refresh_cache(&rebuilt);
                Rebuild::Applied
            }
            Err(err) if err.is_untracked() => {
                tracing::debug!("Node {} vanished before merge: {}", key, err);
                Rebuild::Untracked
            }
            Err(err) => {
                tracing::warn!("Store rejected rebuild of {}: {}", key, err);
                StatCounters::bump(&self.counters.rejected_rebuilds);
                Rebuild::Rejected
            }
        }
    }

    /// Align cached control state with what a rebuild just wrote
    fn refresh_cache(&self, keys: &[NodeKey]) {
        let nodes: Vec<LiveNode<T>> = {
            let state = self.state.lock();
            keys.iter().filter_map(|key| state.cache.node_for(key)).collect()
        };
        if nodes.is_empty() {
            return;
        }
        let current: Vec<_> = nodes.iter().map(|node| self.tree.control_state(node)).collect();
        let mut state = self.state.lock();
        for (node, control) in nodes.iter().zip(&current) {
            state.cache.refresh(node, control);
        }
    }

    fn set_focused(&self, key: &NodeKey, focused: bool) {
        if self.store.set_focused(key, focused) {
            StatCounters::bump(&self.counters.focus_changes);
        }
    }

    fn handle_mutations(&self, records: &[MutationRecord<T::Element>]) {
        let _serial = self.handlers.lock();
        if !self.is_connected() {
            return;
        }
        StatCounters::bump(&self.counters.mutation_batches);

        self.store.with_transaction(labels::MUTATION, || {
            // A target rebuilt once already reflects every record about it.
            let mut seen = HashSet::new();
            for record in records {
                if !seen.insert(Arc::as_ptr(&record.target)) {
                    continue;
                }
                match self.rebuild(&record.target) {
                    Rebuild::Untracked => StatCounters::bump(&self.counters.skipped_records),
                    Rebuild::Disconnected => break,
                    Rebuild::Applied | Rebuild::Unbuildable | Rebuild::Rejected => {
                        StatCounters::bump(&self.counters.mutation_records);
                    }
                }
            }
        });
    }

    fn handle_interaction(&self, event: &InteractionEvent<T::Element>) {
        let _serial = self.handlers.lock();
        if !self.is_connected() {
            return;
        }
        match event.kind {
            InteractionKind::Focus => self.focus(&event.target),
            InteractionKind::Blur => self.blur(&event.target),
            kind if kind.rebuilds() => {
                self.store.with_transaction(labels::INPUT, || {
                    self.rebuild(&event.target);
                });
            }
            _ => {}
        }
    }

    fn focus(&self, target: &LiveNode<T>) {
        let Some(key) = self.tree.stable_key(target) else {
            return;
        };
        self.store.with_transaction(labels::FOCUS, || {
            let previous = self.state.lock().focused.replace(key.clone());
            if let Some(previous) = previous.filter(|previous| *previous != key) {
                self.set_focused(&previous, false);
            }
            self.set_focused(&key, true);
        });
    }

    fn blur(&self, target: &LiveNode<T>) {
        let Some(key) = self.tree.stable_key(target) else {
            return;
        };
        self.store.with_transaction(labels::BLUR, || {
            {
                let mut state = self.state.lock();
                if state.focused.as_ref() == Some(&key) {
                    state.focused = None;
                }
            }
            self.set_focused(&key, false);
        });
    }

    /// Every polled control with its key and the facets its categories read
    fn observe_controls(&self) -> Vec<(LiveNode<T>, Option<NodeKey>, TrackedState)> {
        let mut index: HashMap<*const T::Element, usize> = HashMap::new();
        let mut controls: Vec<(LiveNode<T>, Vec<ControlKind>)> = Vec::new();
        for kind in ControlKind::ALL {
            for node in self.tree.query_controls(kind) {
                match index.entry(Arc::as_ptr(&node)) {
                    Entry::Occupied(slot) => controls[*slot.get()].1.push(kind),
                    Entry::Vacant(slot) => {
                        slot.insert(controls.len());
                        controls.push((node, vec![kind]));
                    }
                }
            }
        }

        controls
            .into_iter()
            .map(|(node, kinds)| {
                let state = TrackedState::observe(&self.tree.control_state(&node), &kinds);
                let key = self.tree.stable_key(&node);
                (node, key, state)
            })
            .collect()
    }

    /// Record the current state of every control without rebuilding
    fn prime_cache(&self) {
        let observed = self.observe_controls();
        let mut state = self.state.lock();
        for (node, key, tracked) in observed {
            state.cache.insert(&node, key, tracked);
        }
    }

    fn reconcile(&self) {
        let _serial = self.handlers.lock();
        if !self.is_connected() {
            return;
        }
        StatCounters::bump(&self.counters.reconcile_passes);

        let observed = self.observe_controls();
        let stale: Vec<LiveNode<T>> = {
            let mut state = self.state.lock();
            let pruned = state.cache.prune();
            StatCounters::add(&self.counters.pruned_entries, pruned);

            observed
                .into_iter()
                .filter_map(|(node, key, tracked)| {
                    let changed = state.cache.get(&node) != Some(&tracked);
                    state.cache.insert(&node, key, tracked);
                    changed.then_some(node)
                })
                .collect()
        };
        tracing::trace!("Reconciliation pass found {} changed controls", stale.len());

        self.store.with_transaction(labels::RECONCILE, || {
            for node in &stale {
                if self.rebuild(node) == Rebuild::Disconnected {
                    return;
                }
            }
            self.reconcile_focus();
        });
    }

    fn reconcile_focus(&self) {
        if !self.is_connected() {
            return;
        }
        let active = self
            .tree
            .active_element()
            .and_then(|node| self.tree.stable_key(&node));
        let previous = std::mem::replace(&mut self.state.lock().focused, active.clone());

        if let Some(previous) = previous.filter(|previous| active.as_ref() != Some(previous)) {
            self.set_focused(&previous, false);
        }
        // Also restores a flag lost when the node was rebuilt from scratch.
        if let Some(key) = &active {
            self.set_focused(key, true);
        }
    }

    fn resync(&self) {
        let _serial = self.handlers.lock();
        if !self.is_connected() {
            return;
        }
        let Some(root) = self.root.upgrade() else {
            tracing::warn!("Live root {} is gone; cannot resync", self.root_key);
            return;
        };
        tracing::warn!("Rebuilding mirror from root {} after dropped events", self.root_key);
        StatCounters::bump(&self.counters.resyncs);
        self.store.with_transaction(labels::RESYNC, || {
            self.rebuild(&root);
        });
    }
}

/// Drain host events into the engine until disconnect
async fn pump<T, B, S>(engine: Weak<EngineCore<T, B, S>>, mut queue: EventQueue<T::Element>)
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    while let Some(event) = queue.recv().await {
        let Some(core) = engine.upgrade() else {
            break;
        };
        match event {
            HostEvent::Mutations(records) => core.handle_mutations(&records),
            HostEvent::Interaction(event) => core.handle_interaction(&event),
        }
        if queue.is_drained() && queue.take_overflow() {
            core.resync();
        }
    }
    queue.close();
}

/// Configures and connects a [`SyncEngine`]
pub struct EngineBuilder<T: LiveTree, B, S> {
    tree: Arc<T>,
    builder: B,
    store: Arc<S>,
    config: SyncConfig,
    detector: Option<Arc<dyn IdleDetector>>,
}

impl<T, B, S> EngineBuilder<T, B, S>
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    /// Create builder with default configuration
    #[must_use]
    pub fn new(tree: Arc<T>, builder: B, store: Arc<S>) -> Self {
        Self {
            tree,
            builder,
            store,
            config: SyncConfig::default(),
            detector: None,
        }
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// With idle detector for the reconciliation pass
    ///
    /// Defaults to [`YieldIdle`] with the configured number of rounds.
    #[inline]
    #[must_use]
    pub fn idle_detector(mut self, detector: Arc<dyn IdleDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Register the mirror of `root` and begin mirroring
    ///
    /// Must be called from within a tokio runtime; the engine spawns its
    /// event pump and idle scheduler on it.
    ///
    /// # Errors
    /// - [`SyncError::Config`] for an invalid configuration
    /// - [`SyncError::NoRuntime`] outside a tokio runtime
    /// - [`SyncError::UnbuildableRoot`] if the builder produces nothing for `root`
    /// - [`SyncError::Store`] if the store rejects the root
    pub fn connect(self, root: &LiveNode<T>) -> Result<SyncEngine<T, B, S>, SyncError> {
        let Self {
            tree,
            builder,
            store,
            config,
            detector,
        } = self;

        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        let mirror = builder.build(tree.as_ref(), root).ok_or(SyncError::UnbuildableRoot)?;
        let root_key = mirror.key.clone();
        let node_count = mirror.len();
        store.with_transaction(labels::REGISTER, || store.register(mirror))?;

        let (sink, queue, queue_stats) = events::channel(config.event_queue_capacity);
        let core = Arc::new(EngineCore {
            tree: Arc::clone(&tree),
            builder,
            store,
            root: Arc::downgrade(root),
            root_key: root_key.clone(),
            connected: AtomicBool::new(true),
            handlers: Mutex::new(()),
            state: Mutex::new(EngineState {
                focused: None,
                cache: PreviousStateCache::new(),
            }),
            counters: StatCounters::default(),
            queue: queue_stats,
        });
        core.prime_cache();

        let subscriptions = vec![
            tree.observe_mutations(root, sink.clone()),
            tree.listen_interactions(sink),
        ];
        let pump = runtime.spawn(pump(Arc::downgrade(&core), queue));

        let detector = detector.unwrap_or_else(|| Arc::new(YieldIdle::new(config.idle_yield_rounds)));
        let weak = Arc::downgrade(&core);
        let scheduler = IdleScheduler::new(
            move || {
                if let Some(core) = weak.upgrade() {
                    core.reconcile();
                }
            },
            config.reconcile_interval(),
        )
        .with_max_idle_wait(config.max_idle_wait())
        .with_detector(detector)
        .start();

        tracing::info!("Mirroring live tree from root {} ({} nodes)", root_key, node_count);

        Ok(SyncEngine {
            core,
            scheduler: Mutex::new(Some(scheduler)),
            pump: Mutex::new(Some(pump)),
            subscriptions: Mutex::new(subscriptions),
        })
    }
}

/// Keeps a mirror store synchronized with a live tree
///
/// Created by [`EngineBuilder::connect`]. Dropping the engine disconnects it.
pub struct SyncEngine<T, B, S>
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    core: Arc<EngineCore<T, B, S>>,
    scheduler: Mutex<Option<IdleScheduler>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl<T, B, S> SyncEngine<T, B, S>
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    /// Handle one batch of structural change records
    ///
    /// Each tracked target is rebuilt once; untracked targets are skipped.
    pub fn handle_mutations(&self, records: &[MutationRecord<T::Element>]) {
        self.core.handle_mutations(records);
    }

    /// Handle one interaction event
    pub fn handle_interaction(&self, event: &InteractionEvent<T::Element>) {
        self.core.handle_interaction(event);
    }

    /// Run one reconciliation pass now
    pub fn reconcile(&self) {
        self.core.reconcile();
    }

    /// Stop mirroring
    ///
    /// Unsubscribes from the live tree and stops the idle scheduler. Later
    /// calls are no-ops.
    pub fn disconnect(&self) {
        if !self.core.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        for id in self.subscriptions.lock().drain(..) {
            self.core.tree.unsubscribe(id);
        }
        if let Some(scheduler) = self.scheduler.lock().as_mut() {
            scheduler.stop();
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        tracing::info!("Stopped mirroring root {}", self.core.root_key);
    }

    /// Whether the engine is still mirroring
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Get engine statistics
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        let cached = self.core.state.lock().cache.len();
        self.core.counters.snapshot(self.core.queue.dropped(), cached)
    }

    /// Mirror store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.core.store
    }

    /// Live tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &Arc<T> {
        &self.core.tree
    }

    /// Key of the mirrored root
    #[inline]
    #[must_use]
    pub fn root_key(&self) -> &NodeKey {
        &self.core.root_key
    }

    /// Key of the node the engine believes is focused
    #[must_use]
    pub fn focused_key(&self) -> Option<NodeKey> {
        self.core.state.lock().focused.clone()
    }

    /// Last observed state of a polled control
    #[must_use]
    pub fn cached_state(&self, node: &LiveNode<T>) -> Option<TrackedState> {
        self.core.state.lock().cache.get(node).cloned()
    }

    /// Number of idle scheduler invocations so far
    #[must_use]
    pub fn scheduler_invocations(&self) -> u64 {
        self.scheduler
            .lock()
            .as_ref()
            .map_or(0, IdleScheduler::invocations)
    }
}

impl<T, B, S> Drop for SyncEngine<T, B, S>
where
    T: LiveTree,
    B: TreeBuilder<T>,
    S: MirrorStore,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}
