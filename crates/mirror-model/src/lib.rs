//! Mirror Model
//!
//! The secondary, simplified tree kept in sync with a live tree.
//!
//! # Overview
//!
//! - **NodeKey**: stable key shared by a live node and its mirror node
//! - **MirrorNode**: tagged node kinds (generic element vs. interactive control)
//! - **MirrorStore / MirrorTree**: key-indexed store with subtree merge
//! - **Transactions**: scoped batching, one observer notification per batch
//!
//! # Example
//!
//! ```rust
//! use mirror_model::{ElementData, MirrorNode, MirrorStore, MirrorTree};
//!
//! let tree = MirrorTree::new();
//! tree.register(MirrorNode::element("root", ElementData::new("div"))).unwrap();
//!
//! tree.with_transaction("mutation", || {
//!     let rebuilt = MirrorNode::element("root", ElementData::new("div"))
//!         .with_child(MirrorNode::element("p1", ElementData::new("p")));
//!     tree.update(rebuilt).unwrap();
//! });
//!
//! assert!(tree.contains(&"p1".into()));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod node;
pub mod store;
pub mod transaction;

// Re-exports
pub use error::StoreError;
pub use key::NodeKey;
pub use node::{ControlKind, ElementData, InteractiveData, MirrorKind, MirrorNode};
pub use store::{MirrorElement, MirrorStore, MirrorTree};
pub use transaction::{Change, ChangeBatch, Observer, ObserverId, TransactionGuard, Transactions};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for mirror model operations
    pub use crate::{
        ControlKind, ElementData, InteractiveData, MirrorKind, MirrorNode, MirrorStore, MirrorTree, NodeKey,
        StoreError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
