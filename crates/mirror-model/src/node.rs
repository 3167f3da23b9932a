//! Mirror node kinds
//!
//! A mirror node is either a generic element or an interactive control. The
//! interactive variant carries the focus flag plus whatever state the tree
//! builder copied from the live control.

use crate::key::NodeKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of interactive control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Radio-style toggle (tracked state: checked)
    Radio,
    /// Checkbox-style toggle with tri-state indeterminate flag
    Checkbox,
    /// Free-text or value input
    Value,
}

impl ControlKind {
    /// All control kinds, in scan order
    pub const ALL: [ControlKind; 3] = [ControlKind::Radio, ControlKind::Checkbox, ControlKind::Value];
}

/// Data carried by every mirror node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementData {
    /// Element tag
    pub tag: String,

    /// Attributes in deterministic order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    /// Direct text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ElementData {
    /// Create element data with tag only
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// With attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// With text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Interactive control data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveData {
    /// Shared element data
    pub element: ElementData,

    /// Control category
    pub control: ControlKind,

    /// Current value
    pub value: String,

    /// Checked state (radio / checkbox)
    pub checked: bool,

    /// Tri-state flag (checkbox)
    pub indeterminate: bool,

    /// Whether this control holds focus in the mirror
    pub is_focused: bool,
}

impl InteractiveData {
    /// Create interactive data for a control
    #[must_use]
    pub fn new(element: ElementData, control: ControlKind) -> Self {
        Self {
            element,
            control,
            value: String::new(),
            checked: false,
            indeterminate: false,
            is_focused: false,
        }
    }
}

/// Node kind: generic element or interactive control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MirrorKind {
    /// Generic element
    Element(ElementData),
    /// Interactive control
    Interactive(InteractiveData),
}

impl MirrorKind {
    /// Element data regardless of kind
    #[inline]
    #[must_use]
    pub fn element(&self) -> &ElementData {
        match self {
            Self::Element(data) => data,
            Self::Interactive(data) => &data.element,
        }
    }

    /// Interactive data, if any
    #[inline]
    #[must_use]
    pub fn as_interactive(&self) -> Option<&InteractiveData> {
        match self {
            Self::Interactive(data) => Some(data),
            Self::Element(_) => None,
        }
    }

    /// Focus flag; always false for generic elements
    #[inline]
    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.as_interactive().is_some_and(|data| data.is_focused)
    }
}

/// Mirror subtree as produced by a tree builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorNode {
    /// Stable key shared with the live node
    pub key: NodeKey,

    /// Node kind and data
    #[serde(flatten)]
    pub kind: MirrorKind,

    /// Child subtrees in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MirrorNode>,
}

impl MirrorNode {
    /// Create generic element node
    #[must_use]
    pub fn element(key: impl Into<NodeKey>, data: ElementData) -> Self {
        Self {
            key: key.into(),
            kind: MirrorKind::Element(data),
            children: Vec::new(),
        }
    }

    /// Create interactive node
    #[must_use]
    pub fn interactive(key: impl Into<NodeKey>, data: InteractiveData) -> Self {
        Self {
            key: key.into(),
            kind: MirrorKind::Interactive(data),
            children: Vec::new(),
        }
    }

    /// With child subtree
    #[must_use]
    pub fn with_child(mut self, child: MirrorNode) -> Self {
        self.children.push(child);
        self
    }

    /// Whether this is an interactive node
    #[inline]
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        matches!(self.kind, MirrorKind::Interactive(_))
    }

    /// Visit every node of the subtree in pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a MirrorNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Number of nodes in the subtree
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// A subtree always holds at least its root
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Copy of the subtree with every focus flag cleared
    #[must_use]
    pub fn without_focus(&self) -> MirrorNode {
        let mut copy = self.clone();
        copy.clear_focus();
        copy
    }

    fn clear_focus(&mut self) {
        if let MirrorKind::Interactive(data) = &mut self.kind {
            data.is_focused = false;
        }
        for child in &mut self.children {
            child.clear_focus();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MirrorNode {
        let mut input = InteractiveData::new(ElementData::new("input"), ControlKind::Value);
        input.is_focused = true;
        input.value = "hello".into();

        MirrorNode::element("root", ElementData::new("div").with_attribute("id", "app"))
            .with_child(MirrorNode::interactive("k1", input))
            .with_child(MirrorNode::element("p", ElementData::new("p").with_text("hi")))
    }

    #[test]
    fn walk_visits_preorder() {
        let node = sample();
        let mut keys = Vec::new();
        node.walk(&mut |n| keys.push(n.key.as_str().to_string()));
        assert_eq!(keys, vec!["root", "k1", "p"]);
        assert_eq!(node.len(), 3);
    }

    #[test]
    fn without_focus_clears_nested_flags() {
        let node = sample();
        assert!(node.children[0].kind.is_focused());

        let cleared = node.without_focus();
        assert!(!cleared.children[0].kind.is_focused());
        assert_eq!(cleared.children[1], node.children[1]);
    }

    #[test]
    fn element_kind_is_never_focused() {
        let node = MirrorNode::element("a", ElementData::new("a"));
        assert!(!node.is_interactive());
        assert!(!node.kind.is_focused());
        assert_eq!(node.kind.element().tag, "a");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["kind"], "element");
        assert_eq!(json["children"][0]["kind"], "interactive");
        assert_eq!(json["children"][0]["control"], "value");
    }
}
