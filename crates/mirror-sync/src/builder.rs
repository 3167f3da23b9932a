//! Tree builder seam
//!
//! A tree builder converts a live node and its descendants into a mirror
//! subtree. It is a pure function of the live tree. Builders leave
//! `is_focused` unset; focus is owned by the engine.

use crate::live::{LiveNode, LiveTree};
use mirror_model::MirrorNode;

/// Converts live nodes into mirror subtrees
pub trait TreeBuilder<T: LiveTree>: Send + Sync + 'static {
    /// Build the subtree rooted at `node`, or `None` if it is not representable
    fn build(&self, tree: &T, node: &LiveNode<T>) -> Option<MirrorNode>;
}

impl<T, F> TreeBuilder<T> for F
where
    T: LiveTree,
    F: Fn(&T, &LiveNode<T>) -> Option<MirrorNode> + Send + Sync + 'static,
{
    fn build(&self, tree: &T, node: &LiveNode<T>) -> Option<MirrorNode> {
        self(tree, node)
    }
}
