//! Call-recording mirror store

use mirror_model::{MirrorElement, MirrorNode, MirrorStore, MirrorTree, NodeKey, StoreError};
use parking_lot::Mutex;

/// Store call observed by a [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// Transaction opened with this label
    Transaction(String),
    /// Root registration
    Register(NodeKey),
    /// Subtree merge, whether or not it succeeded
    Update(NodeKey),
    /// Focus flag request
    SetFocused {
        /// Target key
        key: NodeKey,
        /// Requested flag
        focused: bool,
    },
}

/// [`MirrorTree`] wrapper recording every call made through [`MirrorStore`]
#[derive(Debug, Default)]
pub struct RecordingStore {
    tree: MirrorTree,
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &MirrorTree {
        &self.tree
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Keys passed to `update`, in order
    #[must_use]
    pub fn updates(&self) -> Vec<NodeKey> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Update(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Labels of the transactions opened so far
    #[must_use]
    pub fn transactions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Transaction(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn push(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }
}

impl MirrorStore for RecordingStore {
    fn register(&self, root: MirrorNode) -> Result<(), StoreError> {
        self.push(StoreCall::Register(root.key.clone()));
        self.tree.register(root)
    }

    fn update(&self, subtree: MirrorNode) -> Result<(), StoreError> {
        self.push(StoreCall::Update(subtree.key.clone()));
        self.tree.update(subtree)
    }

    fn get_element(&self, key: &NodeKey) -> Option<MirrorElement> {
        self.tree.get_element(key)
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.tree.contains(key)
    }

    fn set_focused(&self, key: &NodeKey, focused: bool) -> bool {
        self.push(StoreCall::SetFocused {
            key: key.clone(),
            focused,
        });
        self.tree.set_focused(key, focused)
    }

    fn with_transaction<R, F>(&self, label: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.push(StoreCall::Transaction(label.to_string()));
        self.tree.with_transaction(label, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_model::ElementData;

    #[test]
    fn records_calls_in_order() {
        let store = RecordingStore::new();
        store
            .with_transaction("register", || {
                store.register(MirrorNode::element("root", ElementData::new("body")))
            })
            .unwrap();
        assert!(store.update(MirrorNode::element("missing", ElementData::new("p"))).is_err());

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Transaction("register".to_string()),
                StoreCall::Register(NodeKey::new("root")),
                StoreCall::Update(NodeKey::new("missing")),
            ]
        );
        assert_eq!(store.updates(), vec![NodeKey::new("missing")]);

        store.clear();
        assert!(store.calls().is_empty());
        assert_eq!(store.tree().len(), 1);
    }
}
