//! Mirror store
//!
//! [`MirrorStore`] is the seam the synchronization engine writes through.
//! [`MirrorTree`] is the in-memory implementation: a flat key-indexed node
//! table with parent/child links, so there is never more than one node per
//! key.

use crate::error::StoreError;
use crate::key::NodeKey;
use crate::node::{MirrorKind, MirrorNode};
use crate::transaction::{Change, Observer, ObserverId, TransactionGuard, Transactions};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Owned snapshot of one stored node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorElement {
    /// Node key
    pub key: NodeKey,
    /// Node kind and data
    pub kind: MirrorKind,
    /// Parent key (`None` for the root)
    pub parent: Option<NodeKey>,
    /// Child keys in document order
    pub children: Vec<NodeKey>,
}

impl MirrorElement {
    /// Whether this node is an interactive control
    #[inline]
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        matches!(self.kind, MirrorKind::Interactive(_))
    }
}

/// Storage seam for mirror trees
pub trait MirrorStore: Send + Sync + 'static {
    /// Register the initial root subtree
    ///
    /// # Errors
    /// Fails if a root already exists or the subtree repeats a key.
    fn register(&self, root: MirrorNode) -> Result<(), StoreError>;

    /// Merge a rebuilt subtree at the position of `subtree.key`
    ///
    /// # Errors
    /// [`StoreError::UnknownKey`] when the key is not tracked.
    fn update(&self, subtree: MirrorNode) -> Result<(), StoreError>;

    /// Snapshot of the node stored under `key`
    fn get_element(&self, key: &NodeKey) -> Option<MirrorElement>;

    /// Whether `key` is tracked
    fn contains(&self, key: &NodeKey) -> bool {
        self.get_element(key).is_some()
    }

    /// Set the focus flag of an interactive node
    ///
    /// Returns `true` when the flag actually changed.
    fn set_focused(&self, key: &NodeKey, focused: bool) -> bool;

    /// Run `f` inside a named transaction
    fn with_transaction<R, F>(&self, label: &str, f: F) -> R
    where
        Self: Sized,
        F: FnOnce() -> R;
}

#[derive(Debug, Clone)]
struct StoredNode {
    kind: MirrorKind,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

#[derive(Debug, Default)]
struct TreeInner {
    root: Option<NodeKey>,
    nodes: HashMap<NodeKey, StoredNode>,
}

impl TreeInner {
    fn descendants(&self, key: &NodeKey, out: &mut HashSet<NodeKey>) {
        let mut stack: Vec<&NodeKey> = match self.nodes.get(key) {
            Some(node) => node.children.iter().collect(),
            None => return,
        };
        while let Some(next) = stack.pop() {
            if out.insert(next.clone()) {
                if let Some(node) = self.nodes.get(next) {
                    stack.extend(node.children.iter());
                }
            }
        }
    }

    fn ancestors(&self, key: &NodeKey) -> Vec<NodeKey> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(key).and_then(|n| n.parent.clone());
        while let Some(parent) = current {
            current = self.nodes.get(&parent).and_then(|n| n.parent.clone());
            chain.push(parent);
        }
        chain
    }

    fn build(&self, key: &NodeKey) -> Option<MirrorNode> {
        let node = self.nodes.get(key)?;
        Some(MirrorNode {
            key: key.clone(),
            kind: node.kind.clone(),
            children: node.children.iter().filter_map(|child| self.build(child)).collect(),
        })
    }

    /// Insert a subtree, preserving focus flags of nodes already present
    fn write(&mut self, node: MirrorNode, parent: Option<NodeKey>, changes: &mut Vec<Change>) {
        let MirrorNode { key, mut kind, children } = node;
        let child_keys: Vec<NodeKey> = children.iter().map(|c| c.key.clone()).collect();

        match self.nodes.get(&key) {
            Some(existing) => {
                if let (MirrorKind::Interactive(new), MirrorKind::Interactive(old)) = (&mut kind, &existing.kind) {
                    new.is_focused = old.is_focused;
                }
                let changed =
                    existing.kind != kind || existing.children != child_keys || existing.parent != parent;
                if changed {
                    changes.push(Change::Replaced(key.clone()));
                }
            }
            None => changes.push(Change::Inserted(key.clone())),
        }

        self.nodes.insert(
            key.clone(),
            StoredNode {
                kind,
                parent,
                children: child_keys,
            },
        );

        for child in children {
            self.write(child, Some(key.clone()), changes);
        }
    }
}

fn collect_keys(subtree: &MirrorNode) -> Result<HashSet<NodeKey>, StoreError> {
    let mut keys = HashSet::new();
    let mut duplicate = None;
    subtree.walk(&mut |node| {
        if !keys.insert(node.key.clone()) && duplicate.is_none() {
            duplicate = Some(node.key.clone());
        }
    });
    match duplicate {
        Some(key) => Err(StoreError::DuplicateKey(key)),
        None => Ok(keys),
    }
}

/// In-memory mirror tree with transactional change notification
#[derive(Debug, Default)]
pub struct MirrorTree {
    inner: RwLock<TreeInner>,
    txns: Transactions,
}

impl MirrorTree {
    /// Create empty tree
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Root key, once registered
    #[must_use]
    pub fn root(&self) -> Option<NodeKey> {
        self.inner.read().root.clone()
    }

    /// Number of stored nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Whether the tree holds no nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconstruct the owned subtree rooted at `key`
    #[must_use]
    pub fn subtree(&self, key: &NodeKey) -> Option<MirrorNode> {
        self.inner.read().build(key)
    }

    /// Reconstruct the whole tree
    #[must_use]
    pub fn snapshot(&self) -> Option<MirrorNode> {
        let inner = self.inner.read();
        inner.root.as_ref().and_then(|root| inner.build(root))
    }

    /// Keys of every node whose focus flag is set
    #[must_use]
    pub fn focused_keys(&self) -> Vec<NodeKey> {
        let inner = self.inner.read();
        let mut keys: Vec<NodeKey> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.kind.is_focused())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Check parent/child links and reachability from the root
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let Some(root) = inner.root.as_ref() else {
            return inner.nodes.is_empty();
        };

        let mut reachable = HashSet::from([root.clone()]);
        inner.descendants(root, &mut reachable);
        if reachable.len() != inner.nodes.len() {
            return false;
        }

        inner.nodes.iter().all(|(key, node)| {
            node.children.iter().all(|child| {
                inner
                    .nodes
                    .get(child)
                    .is_some_and(|c| c.parent.as_ref() == Some(key))
            })
        })
    }

    /// Open a transaction on this tree
    pub fn begin(&self, label: &str) -> TransactionGuard<'_> {
        self.txns.begin(label)
    }

    /// Number of change batches emitted so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.txns.revision()
    }

    /// Register observer for change batches
    pub fn observe(&self, observer: Observer) -> ObserverId {
        self.txns.observe(observer)
    }

    /// Remove observer
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.txns.unobserve(id)
    }
}

impl MirrorStore for MirrorTree {
    fn register(&self, root: MirrorNode) -> Result<(), StoreError> {
        collect_keys(&root)?;

        let mut changes = Vec::new();
        {
            let mut inner = self.inner.write();
            if let Some(existing) = &inner.root {
                return Err(StoreError::AlreadyRegistered(existing.clone()));
            }
            let root_key = root.key.clone();
            inner.root = Some(root_key.clone());
            inner.write(root, None, &mut changes);
            if let Some(first) = changes.first_mut() {
                *first = Change::Registered(root_key);
            }
        }

        tracing::debug!("Registered mirror root ({} nodes)", changes.len());
        self.txns.record(changes);
        Ok(())
    }

    fn update(&self, subtree: MirrorNode) -> Result<(), StoreError> {
        let new_keys = collect_keys(&subtree)?;
        let target = subtree.key.clone();

        let mut changes = Vec::new();
        {
            let mut inner = self.inner.write();
            let parent = match inner.nodes.get(&target) {
                Some(node) => node.parent.clone(),
                None => return Err(StoreError::UnknownKey(target)),
            };

            if let Some(ancestor) = inner.ancestors(&target).into_iter().find(|a| new_keys.contains(a)) {
                return Err(StoreError::AncestorCycle { target, ancestor });
            }

            let mut affected = HashSet::new();
            inner.descendants(&target, &mut affected);

            // Keys stored elsewhere in the tree move under the target.
            let moved_in: Vec<NodeKey> = new_keys
                .iter()
                .filter(|key| **key != target && !affected.contains(*key) && inner.nodes.contains_key(*key))
                .cloned()
                .collect();

            for key in &moved_in {
                let old_parent = inner.nodes.get(key).and_then(|n| n.parent.clone());
                if let Some(old_parent) = old_parent {
                    if let Some(node) = inner.nodes.get_mut(&old_parent) {
                        node.children.retain(|child| child != key);
                        changes.push(Change::Replaced(old_parent));
                    }
                }
                affected.insert(key.clone());
                inner.descendants(key, &mut affected);
            }

            let mut removed: Vec<NodeKey> = affected.difference(&new_keys).cloned().collect();
            removed.sort();
            for key in removed {
                inner.nodes.remove(&key);
                changes.push(Change::Removed(key));
            }

            inner.write(subtree, parent, &mut changes);
        }

        self.txns.record(changes);
        Ok(())
    }

    fn get_element(&self, key: &NodeKey) -> Option<MirrorElement> {
        let inner = self.inner.read();
        inner.nodes.get(key).map(|node| MirrorElement {
            key: key.clone(),
            kind: node.kind.clone(),
            parent: node.parent.clone(),
            children: node.children.clone(),
        })
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.inner.read().nodes.contains_key(key)
    }

    fn set_focused(&self, key: &NodeKey, focused: bool) -> bool {
        let changed = {
            let mut inner = self.inner.write();
            match inner.nodes.get_mut(key).map(|node| &mut node.kind) {
                Some(MirrorKind::Interactive(data)) if data.is_focused != focused => {
                    data.is_focused = focused;
                    true
                }
                _ => false,
            }
        };

        if changed {
            self.txns.record(vec![Change::Focus {
                key: key.clone(),
                focused,
            }]);
        }
        changed
    }

    fn with_transaction<R, F>(&self, label: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _txn = self.txns.begin(label);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ControlKind, ElementData, InteractiveData};
    use crate::transaction::ChangeBatch;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn el(key: &str, tag: &str) -> MirrorNode {
        MirrorNode::element(key, ElementData::new(tag))
    }

    fn input(key: &str, value: &str) -> MirrorNode {
        let mut data = InteractiveData::new(ElementData::new("input"), ControlKind::Value);
        data.value = value.to_string();
        MirrorNode::interactive(key, data)
    }

    fn sample_tree() -> MirrorTree {
        let tree = MirrorTree::new();
        tree.register(
            el("root", "div")
                .with_child(el("a", "section").with_child(input("k1", "a")))
                .with_child(el("b", "section").with_child(el("b1", "p"))),
        )
        .unwrap();
        tree
    }

    #[test]
    fn register_indexes_every_node() {
        let tree = sample_tree();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.root(), Some(NodeKey::new("root")));
        let k1 = tree.get_element(&"k1".into()).unwrap();
        assert_eq!(k1.parent, Some(NodeKey::new("a")));
        assert!(k1.is_interactive());
        assert!(tree.is_consistent());
    }

    #[test]
    fn register_twice_is_rejected() {
        let tree = sample_tree();
        let result = tree.register(el("other", "div"));
        assert_eq!(result, Err(StoreError::AlreadyRegistered("root".into())));
    }

    #[test]
    fn register_rejects_duplicate_keys() {
        let tree = MirrorTree::new();
        let result = tree.register(el("root", "div").with_child(el("x", "p")).with_child(el("x", "p")));
        assert_eq!(result, Err(StoreError::DuplicateKey("x".into())));
        assert!(tree.is_empty());
    }

    #[test]
    fn update_unknown_key_fails() {
        let tree = sample_tree();
        let result = tree.update(el("ghost", "div"));
        assert!(matches!(result, Err(ref e) if e.is_untracked()));
    }

    #[test]
    fn update_replaces_and_removes_descendants() {
        let tree = sample_tree();
        tree.update(el("b", "section").with_child(el("b2", "span"))).unwrap();

        assert!(!tree.contains(&"b1".into()));
        assert!(tree.contains(&"b2".into()));
        assert_eq!(
            tree.get_element(&"b".into()).unwrap().children,
            vec![NodeKey::new("b2")]
        );
        assert!(tree.is_consistent());
    }

    #[test]
    fn update_keeps_parent_link() {
        let tree = sample_tree();
        tree.update(input("k1", "changed")).unwrap();

        let k1 = tree.get_element(&"k1".into()).unwrap();
        assert_eq!(k1.parent, Some(NodeKey::new("a")));
        assert_eq!(k1.kind.as_interactive().unwrap().value, "changed");
    }

    #[test]
    fn update_moves_node_from_other_parent() {
        let tree = sample_tree();
        tree.update(el("b", "section").with_child(el("b1", "p")).with_child(input("k1", "a")))
            .unwrap();

        assert_eq!(tree.get_element(&"a".into()).unwrap().children, Vec::<NodeKey>::new());
        assert_eq!(tree.get_element(&"k1".into()).unwrap().parent, Some(NodeKey::new("b")));
        assert!(tree.is_consistent());
    }

    #[test]
    fn update_rejects_ancestor_inside_subtree() {
        let tree = sample_tree();
        let result = tree.update(el("a", "section").with_child(el("root", "div")));
        assert!(matches!(result, Err(StoreError::AncestorCycle { .. })));
        assert!(tree.is_consistent());
    }

    #[test]
    fn update_preserves_focus_flag() {
        let tree = sample_tree();
        assert!(tree.set_focused(&"k1".into(), true));

        tree.update(el("a", "section").with_child(input("k1", "typed"))).unwrap();

        let k1 = tree.get_element(&"k1".into()).unwrap();
        assert!(k1.kind.is_focused());
        assert_eq!(tree.focused_keys(), vec![NodeKey::new("k1")]);
    }

    #[test]
    fn set_focused_ignores_generic_elements() {
        let tree = sample_tree();
        assert!(!tree.set_focused(&"a".into(), true));
        assert!(!tree.set_focused(&"ghost".into(), true));
        assert!(tree.set_focused(&"k1".into(), true));
        assert!(!tree.set_focused(&"k1".into(), true));
    }

    #[test]
    fn identical_update_records_no_changes() {
        let tree = sample_tree();
        let revision = tree.revision();
        tree.update(el("b", "section").with_child(el("b1", "p"))).unwrap();
        assert_eq!(tree.revision(), revision);
    }

    #[test]
    fn transaction_batches_store_mutations() {
        let tree = sample_tree();
        let batches: Arc<Mutex<Vec<ChangeBatch>>> = Arc::default();
        let sink = Arc::clone(&batches);
        tree.observe(Arc::new(move |batch: &ChangeBatch| sink.lock().push(batch.clone())));

        tree.with_transaction("mutation", || {
            tree.update(input("k1", "x")).unwrap();
            tree.update(el("b", "section")).unwrap();
            tree.set_focused(&"k1".into(), true);
        });

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].label, "mutation");
        assert!(batches[0].changes.contains(&Change::Removed("b1".into())));
        assert!(batches[0].changes.contains(&Change::Focus {
            key: "k1".into(),
            focused: true
        }));
    }

    #[test]
    fn observers_can_read_the_store() {
        let tree = Arc::new(sample_tree());
        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (Arc::clone(&tree), Arc::clone(&seen));
        tree.observe(Arc::new(move |_: &ChangeBatch| {
            *sink.lock() = reader.get_element(&"k1".into());
        }));

        tree.update(input("k1", "seen")).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.as_ref().unwrap().kind.as_interactive().unwrap().value, "seen");
    }

    #[test]
    fn subtree_round_trips_registered_tree() {
        let original = el("root", "div").with_child(el("a", "p").with_child(input("k1", "v")));
        let tree = MirrorTree::new();
        tree.register(original.clone()).unwrap();
        assert_eq!(tree.snapshot(), Some(original));
    }

    proptest! {
        #[test]
        fn random_updates_keep_tree_consistent(ops in proptest::collection::vec((0usize..8, proptest::collection::vec(0usize..12, 0..4)), 1..40)) {
            let tree = MirrorTree::new();
            tree.register(el("n0", "div")).unwrap();

            for (target, children) in ops {
                let target_key = format!("n{target}");
                let mut subtree = el(&target_key, "div");
                for child in children {
                    subtree = subtree.with_child(el(&format!("n{child}"), "span"));
                }
                // Rejections are fine; they must just leave the tree intact.
                let _ = tree.update(subtree);
                prop_assert!(tree.is_consistent());
            }
        }
    }
}
