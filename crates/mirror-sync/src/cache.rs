//! Previous control state cache
//!
//! Remembers, per polled control, the state the mirror last reflected, so the
//! reconciliation pass rebuilds only controls that changed since. Entries are
//! written by every poll and refreshed whenever a rebuild covers the control.
//! Entries hold a `Weak` to their node: the cache never keeps a live node
//! alive, and an entry whose node has been dropped is pruned on the next pass.
//!
//! Entries are keyed by allocation address. The `Weak` pins the allocation
//! (not the value), so an address cannot be reused by another node while its
//! entry exists.

use crate::live::ControlState;
use mirror_model::{ControlKind, NodeKey};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Facets of a control observed by a reconciliation pass
///
/// A facet is `None` when the control was not polled under a category that
/// reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedState {
    /// Checked flag (radio and checkbox)
    pub checked: Option<bool>,
    /// Tri-state flag (checkbox)
    pub indeterminate: Option<bool>,
    /// Value (every input)
    pub value: Option<String>,
}

impl TrackedState {
    /// Project `state` onto the facets read by `kinds`
    #[must_use]
    pub fn observe(state: &ControlState, kinds: &[ControlKind]) -> Self {
        let mut tracked = Self::default();
        for kind in kinds {
            match kind {
                ControlKind::Radio => tracked.checked = Some(state.checked),
                ControlKind::Checkbox => {
                    tracked.checked = Some(state.checked);
                    tracked.indeterminate = Some(state.indeterminate);
                }
                ControlKind::Value => tracked.value = Some(state.value.clone()),
            }
        }
        tracked
    }

    /// Overwrite the tracked facets with those of `state`
    pub fn refresh(&mut self, state: &ControlState) {
        if self.checked.is_some() {
            self.checked = Some(state.checked);
        }
        if self.indeterminate.is_some() {
            self.indeterminate = Some(state.indeterminate);
        }
        if self.value.is_some() {
            self.value = Some(state.value.clone());
        }
    }
}

struct CacheEntry<E> {
    node: Weak<E>,
    key: Option<NodeKey>,
    state: TrackedState,
}

/// Weakly keyed map from live controls to their last observed state
pub struct PreviousStateCache<E> {
    entries: HashMap<usize, CacheEntry<E>>,
    by_key: HashMap<NodeKey, usize>,
}

impl<E> PreviousStateCache<E> {
    /// Create empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    fn slot(node: &Arc<E>) -> usize {
        Arc::as_ptr(node).cast::<()>() as usize
    }

    /// Last observed state of `node`
    #[must_use]
    pub fn get(&self, node: &Arc<E>) -> Option<&TrackedState> {
        self.entries
            .get(&Self::slot(node))
            .filter(|entry| std::ptr::eq(entry.node.as_ptr(), Arc::as_ptr(node)))
            .map(|entry| &entry.state)
    }

    /// Store the state of `node`, returning the one it replaces
    pub fn insert(&mut self, node: &Arc<E>, key: Option<NodeKey>, state: TrackedState) -> Option<TrackedState> {
        let slot = Self::slot(node);
        if let Some(key) = &key {
            self.by_key.insert(key.clone(), slot);
        }
        let previous = self.entries.insert(
            slot,
            CacheEntry {
                node: Arc::downgrade(node),
                key: key.clone(),
                state,
            },
        )?;
        if let Some(old_key) = previous.key.filter(|old_key| Some(old_key) != key.as_ref()) {
            self.unindex(&old_key, slot);
        }
        Some(previous.state)
    }

    fn unindex(&mut self, key: &NodeKey, slot: usize) {
        if self.by_key.get(key) == Some(&slot) {
            self.by_key.remove(key);
        }
    }

    /// Live node cached under `key`
    #[must_use]
    pub fn node_for(&self, key: &NodeKey) -> Option<Arc<E>> {
        let slot = self.by_key.get(key)?;
        self.entries.get(slot)?.node.upgrade()
    }

    /// Overwrite the tracked facets of an existing entry
    ///
    /// Returns `false` if `node` has no entry.
    pub fn refresh(&mut self, node: &Arc<E>, state: &ControlState) -> bool {
        match self.entries.get_mut(&Self::slot(node)) {
            Some(entry) if std::ptr::eq(entry.node.as_ptr(), Arc::as_ptr(node)) => {
                entry.state.refresh(state);
                true
            }
            _ => false,
        }
    }

    /// Drop entries whose node no longer exists
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self) -> usize {
        let dead: Vec<(usize, Option<NodeKey>)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.node.strong_count() == 0)
            .map(|(slot, entry)| (*slot, entry.key.clone()))
            .collect();
        for (slot, key) in &dead {
            self.entries.remove(slot);
            if let Some(key) = key {
                self.unindex(key, *slot);
            }
        }
        dead.len()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for PreviousStateCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(checked: bool, indeterminate: bool, value: &str) -> ControlState {
        ControlState {
            checked,
            indeterminate,
            value: value.to_string(),
        }
    }

    #[test]
    fn observe_reads_only_polled_facets() {
        let live = state(true, true, "x");
        let radio = TrackedState::observe(&live, &[ControlKind::Radio]);
        assert_eq!(radio.checked, Some(true));
        assert_eq!(radio.indeterminate, None);
        assert_eq!(radio.value, None);

        let checkbox = TrackedState::observe(&live, &[ControlKind::Checkbox, ControlKind::Value]);
        assert_eq!(checkbox.indeterminate, Some(true));
        assert_eq!(checkbox.value.as_deref(), Some("x"));
    }

    #[test]
    fn entries_are_per_node() {
        let a = Arc::new(1u8);
        let b = Arc::new(2u8);
        let mut cache = PreviousStateCache::new();

        let tracked = TrackedState::observe(&state(true, false, ""), &[ControlKind::Radio]);
        assert!(cache.insert(&a, None, tracked.clone()).is_none());
        assert_eq!(cache.get(&a), Some(&tracked));
        assert_eq!(cache.get(&b), None);
    }

    #[test]
    fn cache_does_not_keep_nodes_alive() {
        let node = Arc::new(String::from("checkbox"));
        let mut cache = PreviousStateCache::new();
        cache.insert(&node, Some(NodeKey::new("c")), TrackedState::default());
        assert_eq!(Arc::strong_count(&node), 1);

        drop(node);
        assert!(cache.node_for(&NodeKey::new("c")).is_none());
        assert_eq!(cache.prune(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_keeps_live_entries() {
        let kept = Arc::new(0u32);
        let mut cache = PreviousStateCache::new();
        cache.insert(&kept, None, TrackedState::default());
        cache.insert(&Arc::new(1u32), None, TrackedState::default());

        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&kept).is_some());
    }

    #[test]
    fn refresh_updates_only_tracked_facets() {
        let node = Arc::new(());
        let mut cache = PreviousStateCache::new();
        let key = NodeKey::new("v");
        let tracked = TrackedState::observe(&state(false, false, "a"), &[ControlKind::Value]);
        cache.insert(&node, Some(key.clone()), tracked);

        let found = cache.node_for(&key).unwrap();
        assert!(cache.refresh(&found, &state(true, true, "b")));

        let refreshed = cache.get(&node).unwrap();
        assert_eq!(refreshed.value.as_deref(), Some("b"));
        assert_eq!(refreshed.checked, None);
        assert!(!cache.refresh(&Arc::new(()), &state(true, true, "c")));
    }
}
