//! Live tree interface
//!
//! The live tree is owned by the host. Nodes are shared as `Arc`s; the engine
//! only holds them transiently or through `Weak` references.

use crate::events::EventSink;
use mirror_model::{ControlKind, NodeKey};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a live node of tree `T`
pub type LiveNode<T> = Arc<<T as LiveTree>::Element>;

/// Subscription handle returned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Transient interactive state read from a live control
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    /// Checked flag
    pub checked: bool,
    /// Tri-state flag
    pub indeterminate: bool,
    /// Current value
    pub value: String,
}

/// What a structural change record reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// An attribute of the target changed
    Attributes {
        /// Attribute name
        name: String,
    },
    /// Children were added to or removed from the target
    ChildList,
    /// Text content of the target changed
    CharacterData,
}

/// Structural change record naming a live node
#[derive(Debug)]
pub struct MutationRecord<E> {
    /// Node whose subtree changed
    pub target: Arc<E>,
    /// Change kind
    pub kind: MutationKind,
}

impl<E> MutationRecord<E> {
    /// Create record
    #[inline]
    #[must_use]
    pub fn new(target: Arc<E>, kind: MutationKind) -> Self {
        Self { target, kind }
    }
}

impl<E> Clone for MutationRecord<E> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            kind: self.kind.clone(),
        }
    }
}

/// Discrete interaction signal kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// Target gained focus
    Focus,
    /// Target lost focus
    Blur,
    /// Target's value was committed
    Input,
    /// A transition on the target completed
    TransitionEnd,
}

impl InteractionKind {
    /// Whether the event requires rebuilding the target's subtree
    #[inline]
    #[must_use]
    pub fn rebuilds(self) -> bool {
        matches!(self, Self::Input | Self::TransitionEnd)
    }
}

/// Interaction event about a single live node
#[derive(Debug)]
pub struct InteractionEvent<E> {
    /// Event target
    pub target: Arc<E>,
    /// Event kind
    pub kind: InteractionKind,
}

impl<E> InteractionEvent<E> {
    /// Create event
    #[inline]
    #[must_use]
    pub fn new(target: Arc<E>, kind: InteractionKind) -> Self {
        Self { target, kind }
    }
}

impl<E> Clone for InteractionEvent<E> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            kind: self.kind,
        }
    }
}

/// Host-side live tree
///
/// Implementations deliver structural batches and interaction events through
/// the [`EventSink`]s handed to them until the matching [`unsubscribe`] call.
///
/// [`unsubscribe`]: LiveTree::unsubscribe
pub trait LiveTree: Send + Sync + 'static {
    /// Node payload; nodes are shared as `Arc<Element>`
    type Element: Send + Sync + 'static;

    /// Stable key of a live node
    fn stable_key(&self, node: &Arc<Self::Element>) -> Option<NodeKey>;

    /// Every control of `kind` currently present in the tree
    fn query_controls(&self, kind: ControlKind) -> Vec<Arc<Self::Element>>;

    /// Current interactive state of a control
    fn control_state(&self, node: &Arc<Self::Element>) -> ControlState;

    /// Node currently holding focus, if any
    fn active_element(&self) -> Option<Arc<Self::Element>>;

    /// Deliver structural change batches for the subtree under `root`
    fn observe_mutations(&self, root: &Arc<Self::Element>, sink: EventSink<Self::Element>) -> SubscriptionId;

    /// Deliver focus, blur, input and transition-end events
    fn listen_interactions(&self, sink: EventSink<Self::Element>) -> SubscriptionId;

    /// Stop delivering to the sink registered under `id`
    fn unsubscribe(&self, id: SubscriptionId);
}
