//! In-memory live tree
//!
//! [`FakeDom`] behaves like a small document: elements form a tree under a
//! `body` root, structural edits queue change records until
//! [`FakeDom::flush_mutations`], and interaction events are dispatched
//! immediately to every listener. Control state can be changed silently,
//! which is exactly what the idle reconciliation pass must catch.

use mirror_model::{ControlKind, NodeKey};
use mirror_sync::{
    ControlState, Delivery, EventSink, InteractionEvent, InteractionKind, LiveTree, MutationKind, MutationRecord,
    SubscriptionId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Input element flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    /// Free-text input
    Text,
    /// Radio button
    Radio,
    /// Checkbox with tri-state flag
    Checkbox,
}

impl InputType {
    /// Control category mirrored for this input
    #[must_use]
    pub fn control_kind(self) -> ControlKind {
        match self {
            Self::Text => ControlKind::Value,
            Self::Radio => ControlKind::Radio,
            Self::Checkbox => ControlKind::Checkbox,
        }
    }

    /// Value of the `type` attribute
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Radio => "radio",
            Self::Checkbox => "checkbox",
        }
    }

    /// Whether the input has a checked state
    #[must_use]
    pub fn is_checkable(self) -> bool {
        matches!(self, Self::Radio | Self::Checkbox)
    }

    /// Whether the input can show the mixed state
    #[must_use]
    pub fn has_mixed_state(self) -> bool {
        self == Self::Checkbox
    }

    /// Whether `kind` queries match this input
    fn matches(self, kind: ControlKind) -> bool {
        match kind {
            ControlKind::Value => true,
            ControlKind::Radio => self == Self::Radio,
            ControlKind::Checkbox => self == Self::Checkbox,
        }
    }
}

#[derive(Debug, Default)]
struct ElementState {
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    children: Vec<Arc<FakeElement>>,
    parent: Weak<FakeElement>,
    control: ControlState,
}

/// Element of a [`FakeDom`]
pub struct FakeElement {
    id: u64,
    tag: String,
    input: Option<InputType>,
    state: RwLock<ElementState>,
}

impl fmt::Debug for FakeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeElement")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl FakeElement {
    /// Element id; the stable key is `n{id}`
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stable key
    #[must_use]
    pub fn key(&self) -> NodeKey {
        NodeKey::new(format!("n{}", self.id))
    }

    /// Tag name
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Input flavour, for `input` elements
    #[inline]
    #[must_use]
    pub fn input_type(&self) -> Option<InputType> {
        self.input
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.read().attributes.get(name).cloned()
    }

    /// All attributes
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.state.read().attributes.clone()
    }

    /// Text content
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.state.read().text.clone()
    }

    /// Child elements in order
    #[must_use]
    pub fn children(&self) -> Vec<Arc<FakeElement>> {
        self.state.read().children.clone()
    }

    /// Parent element
    #[must_use]
    pub fn parent(&self) -> Option<Arc<FakeElement>> {
        self.state.read().parent.upgrade()
    }

    /// Current control state
    #[must_use]
    pub fn control(&self) -> ControlState {
        self.state.read().control.clone()
    }

    fn is_ancestor_of(self: &Arc<Self>, node: &Arc<FakeElement>) -> bool {
        let mut cursor = Some(Arc::clone(node));
        while let Some(current) = cursor {
            if Arc::ptr_eq(self, &current) {
                return true;
            }
            cursor = current.parent();
        }
        false
    }
}

struct Observer {
    id: SubscriptionId,
    root: Weak<FakeElement>,
    /// Sequence number of the first record this observer may see
    since: u64,
    sink: EventSink<FakeElement>,
}

/// In-memory live tree
pub struct FakeDom {
    root: Arc<FakeElement>,
    next_id: AtomicU64,
    next_subscription: AtomicU64,
    active: RwLock<Option<Weak<FakeElement>>>,
    next_record: AtomicU64,
    pending: Mutex<Vec<(u64, MutationRecord<FakeElement>)>>,
    observers: Mutex<Vec<Observer>>,
    listeners: Mutex<Vec<(SubscriptionId, EventSink<FakeElement>)>>,
}

impl fmt::Debug for FakeDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeDom")
            .field("elements", &self.elements().len())
            .field("pending", &self.pending.lock().len())
            .field("observers", &self.observers.lock().len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl FakeDom {
    /// Create document with an empty `body` root
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root: Arc::new(FakeElement {
                id: 0,
                tag: "body".to_string(),
                input: None,
                state: RwLock::new(ElementState::default()),
            }),
            next_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(0),
            active: RwLock::new(None),
            next_record: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Document root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Arc<FakeElement> {
        &self.root
    }

    fn allocate(&self, tag: &str, input: Option<InputType>) -> Arc<FakeElement> {
        let mut state = ElementState::default();
        if let Some(input) = input {
            state.attributes.insert("type".to_string(), input.as_str().to_string());
        }
        Arc::new(FakeElement {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tag: tag.to_string(),
            input,
            state: RwLock::new(state),
        })
    }

    /// Create detached element
    #[must_use]
    pub fn create_element(&self, tag: &str) -> Arc<FakeElement> {
        self.allocate(tag, None)
    }

    /// Create detached `input` element
    #[must_use]
    pub fn create_input(&self, input: InputType) -> Arc<FakeElement> {
        self.allocate("input", Some(input))
    }

    /// Whether `node` is attached under the root
    #[must_use]
    pub fn is_connected(&self, node: &Arc<FakeElement>) -> bool {
        self.root.is_ancestor_of(node)
    }

    fn record(&self, target: &Arc<FakeElement>, kind: MutationKind) {
        if self.is_connected(target) {
            let mut pending = self.pending.lock();
            let seq = self.next_record.fetch_add(1, Ordering::Relaxed);
            pending.push((seq, MutationRecord::new(Arc::clone(target), kind)));
        }
    }

    /// Append `child` to `parent`, moving it from its previous parent
    ///
    /// Returns `false` (and changes nothing) if `child` is `parent` or one of
    /// its ancestors.
    pub fn append_child(&self, parent: &Arc<FakeElement>, child: &Arc<FakeElement>) -> bool {
        if child.is_ancestor_of(parent) {
            return false;
        }
        if let Some(old_parent) = child.parent() {
            self.remove_child(&old_parent, child);
        }
        child.state.write().parent = Arc::downgrade(parent);
        parent.state.write().children.push(Arc::clone(child));
        self.record(parent, MutationKind::ChildList);
        true
    }

    /// Detach `child` from `parent`
    pub fn remove_child(&self, parent: &Arc<FakeElement>, child: &Arc<FakeElement>) -> bool {
        let removed = {
            let mut state = parent.state.write();
            let before = state.children.len();
            state.children.retain(|c| !Arc::ptr_eq(c, child));
            before != state.children.len()
        };
        if removed {
            child.state.write().parent = Weak::new();
            self.record(parent, MutationKind::ChildList);
        }
        removed
    }

    /// Set attribute
    pub fn set_attribute(&self, node: &Arc<FakeElement>, name: &str, value: &str) {
        node.state
            .write()
            .attributes
            .insert(name.to_string(), value.to_string());
        self.record(
            node,
            MutationKind::Attributes {
                name: name.to_string(),
            },
        );
    }

    /// Set text content
    pub fn set_text(&self, node: &Arc<FakeElement>, text: &str) {
        node.state.write().text = Some(text.to_string());
        self.record(node, MutationKind::CharacterData);
    }

    /// Change a control's value without any notification
    pub fn set_value(&self, node: &Arc<FakeElement>, value: &str) {
        node.state.write().control.value = value.to_string();
    }

    /// Change a control's value and dispatch an input event
    pub fn type_value(&self, node: &Arc<FakeElement>, value: &str) {
        self.set_value(node, value);
        self.dispatch(node, InteractionKind::Input);
    }

    /// Change a checked flag without any notification
    ///
    /// Checking a radio button unchecks the others of its `name` group.
    pub fn set_checked(&self, node: &Arc<FakeElement>, checked: bool) {
        node.state.write().control.checked = checked;
        if !checked || node.input != Some(InputType::Radio) {
            return;
        }
        let Some(group) = node.attribute("name") else {
            return;
        };
        for other in self.controls(ControlKind::Radio) {
            if !Arc::ptr_eq(&other, node) && other.attribute("name").as_ref() == Some(&group) {
                other.state.write().control.checked = false;
            }
        }
    }

    /// Change an indeterminate flag without any notification
    ///
    /// Only checkboxes have a mixed state; other nodes are left alone.
    pub fn set_indeterminate(&self, node: &Arc<FakeElement>, indeterminate: bool) {
        if node.input.is_some_and(InputType::has_mixed_state) {
            node.state.write().control.indeterminate = indeterminate;
        }
    }

    /// Move focus to `node`, dispatching blur and focus events
    pub fn focus(&self, node: &Arc<FakeElement>) {
        let previous = self.focus_silently(node);
        if let Some(previous) = previous.filter(|previous| !Arc::ptr_eq(previous, node)) {
            self.dispatch(&previous, InteractionKind::Blur);
        }
        self.dispatch(node, InteractionKind::Focus);
    }

    /// Move focus to `node` without events, returning the previous holder
    pub fn focus_silently(&self, node: &Arc<FakeElement>) -> Option<Arc<FakeElement>> {
        let previous = self.active.write().replace(Arc::downgrade(node));
        previous.and_then(|previous| previous.upgrade())
    }

    /// Drop focus, dispatching a blur event
    pub fn blur(&self) {
        if let Some(previous) = self.blur_silently() {
            self.dispatch(&previous, InteractionKind::Blur);
        }
    }

    /// Drop focus without events
    pub fn blur_silently(&self) -> Option<Arc<FakeElement>> {
        self.active.write().take().and_then(|previous| previous.upgrade())
    }

    /// Dispatch a transition-end event on `node`
    pub fn finish_transition(&self, node: &Arc<FakeElement>) {
        self.dispatch(node, InteractionKind::TransitionEnd);
    }

    /// Dispatch an interaction event to every listener
    pub fn dispatch(&self, node: &Arc<FakeElement>, kind: InteractionKind) -> usize {
        let listeners = self.listeners.lock();
        listeners
            .iter()
            .filter(|(_, sink)| {
                sink.deliver_interaction(InteractionEvent::new(Arc::clone(node), kind)) == Delivery::Queued
            })
            .count()
    }

    /// Deliver queued change records as one batch per observer
    ///
    /// Returns the number of records taken from the queue.
    pub fn flush_mutations(&self) -> usize {
        let records = std::mem::take(&mut *self.pending.lock());
        if records.is_empty() {
            return 0;
        }
        for observer in self.observers.lock().iter() {
            let Some(root) = observer.root.upgrade() else {
                continue;
            };
            let batch: Vec<_> = records
                .iter()
                .filter(|(seq, record)| *seq >= observer.since && root.is_ancestor_of(&record.target))
                .map(|(_, record)| record.clone())
                .collect();
            if batch.is_empty() {
                continue;
            }
            if observer.sink.deliver_mutations(batch) == Delivery::Dropped {
                tracing::debug!("Change batch for {} dropped", observer.id);
            }
        }
        records.len()
    }

    /// Number of records waiting for [`flush_mutations`](Self::flush_mutations)
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.observers.lock().len() + self.listeners.lock().len()
    }

    /// Every connected element in document order, root first
    #[must_use]
    pub fn elements(&self) -> Vec<Arc<FakeElement>> {
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(&self.root)];
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            out.push(node);
        }
        out
    }

    /// Connected element with the given key
    #[must_use]
    pub fn find(&self, key: &NodeKey) -> Option<Arc<FakeElement>> {
        self.elements().into_iter().find(|node| node.key() == *key)
    }

    fn controls(&self, kind: ControlKind) -> Vec<Arc<FakeElement>> {
        self.elements()
            .into_iter()
            .filter(|node| node.input.is_some_and(|input| input.matches(kind)))
            .collect()
    }
}

impl LiveTree for FakeDom {
    type Element = FakeElement;

    fn stable_key(&self, node: &Arc<FakeElement>) -> Option<NodeKey> {
        Some(node.key())
    }

    fn query_controls(&self, kind: ControlKind) -> Vec<Arc<FakeElement>> {
        self.controls(kind)
    }

    fn control_state(&self, node: &Arc<FakeElement>) -> ControlState {
        node.control()
    }

    fn active_element(&self) -> Option<Arc<FakeElement>> {
        let active = self.active.read().as_ref().and_then(Weak::upgrade)?;
        self.is_connected(&active).then_some(active)
    }

    fn observe_mutations(&self, root: &Arc<FakeElement>, sink: EventSink<FakeElement>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        // Changes made before subscribing are never reported.
        let since = {
            let _pending = self.pending.lock();
            self.next_record.load(Ordering::Relaxed)
        };
        self.observers.lock().push(Observer {
            id,
            root: Arc::downgrade(root),
            since,
            sink,
        });
        id
    }

    fn listen_interactions(&self, sink: EventSink<FakeElement>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, sink));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.lock().retain(|observer| observer.id != id);
        self.listeners.lock().retain(|(listener, _)| *listener != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_on_detached_nodes_are_not_recorded() {
        let dom = FakeDom::new();
        let div = dom.create_element("div");
        dom.set_attribute(&div, "class", "a");
        assert_eq!(dom.pending_mutations(), 0);

        dom.append_child(dom.root(), &div);
        dom.set_text(&div, "hello");
        assert_eq!(dom.pending_mutations(), 2);
    }

    #[test]
    fn append_moves_between_parents() {
        let dom = FakeDom::new();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        let leaf = dom.create_element("span");
        dom.append_child(dom.root(), &a);
        dom.append_child(dom.root(), &b);
        dom.append_child(&a, &leaf);

        assert!(dom.append_child(&b, &leaf));
        assert!(a.children().is_empty());
        assert!(Arc::ptr_eq(&leaf.parent().unwrap(), &b));
    }

    #[test]
    fn append_rejects_cycles() {
        let dom = FakeDom::new();
        let outer = dom.create_element("div");
        let inner = dom.create_element("div");
        dom.append_child(&outer, &inner);
        assert!(!dom.append_child(&inner, &outer));
        assert!(!dom.append_child(&outer, &outer));
    }

    #[test]
    fn value_queries_cover_every_input() {
        let dom = FakeDom::new();
        for input in [InputType::Text, InputType::Radio, InputType::Checkbox] {
            let node = dom.create_input(input);
            dom.append_child(dom.root(), &node);
        }
        assert_eq!(dom.query_controls(ControlKind::Value).len(), 3);
        assert_eq!(dom.query_controls(ControlKind::Radio).len(), 1);
        assert_eq!(dom.query_controls(ControlKind::Checkbox).len(), 1);
    }

    #[test]
    fn checking_a_radio_unchecks_its_group() {
        let dom = FakeDom::new();
        let first = dom.create_input(InputType::Radio);
        let second = dom.create_input(InputType::Radio);
        for radio in [&first, &second] {
            dom.append_child(dom.root(), radio);
            radio.state.write().attributes.insert("name".to_string(), "g".to_string());
        }

        dom.set_checked(&first, true);
        dom.set_checked(&second, true);
        assert!(!first.control().checked);
        assert!(second.control().checked);
    }

    #[test]
    fn only_checkboxes_take_the_mixed_state() {
        let dom = FakeDom::new();
        let checkbox = dom.create_input(InputType::Checkbox);
        let radio = dom.create_input(InputType::Radio);
        let text = dom.create_input(InputType::Text);
        for node in [&checkbox, &radio, &text] {
            dom.set_indeterminate(node, true);
        }
        assert!(checkbox.control().indeterminate);
        assert!(!radio.control().indeterminate);
        assert!(!text.control().indeterminate);
    }

    #[test]
    fn active_element_must_be_connected() {
        let dom = FakeDom::new();
        let input = dom.create_input(InputType::Text);
        dom.focus_silently(&input);
        assert!(dom.active_element().is_none());

        dom.append_child(dom.root(), &input);
        assert!(dom.active_element().is_some());
    }
}
