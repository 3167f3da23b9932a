//! Error types for the mirror store

use crate::key::NodeKey;

/// Errors raised by [`MirrorStore`](crate::MirrorStore) operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A root has already been registered
    #[error("a root is already registered: {0}")]
    AlreadyRegistered(NodeKey),

    /// Update targets a key the store does not hold
    #[error("no mirror node for key: {0}")]
    UnknownKey(NodeKey),

    /// The same key appears twice within one subtree
    #[error("duplicate key in subtree: {0}")]
    DuplicateKey(NodeKey),

    /// A subtree contains the node it is being merged under
    #[error("subtree for {target} contains its own ancestor {ancestor}")]
    AncestorCycle {
        /// Key being updated
        target: NodeKey,
        /// Ancestor key found inside the replacement subtree
        ancestor: NodeKey,
    },
}

impl StoreError {
    /// Whether the error only means the target is not tracked
    ///
    /// Callers that mirror a live tree treat this as a benign skip.
    #[inline]
    #[must_use]
    pub fn is_untracked(&self) -> bool {
        matches!(self, Self::UnknownKey(_))
    }
}
