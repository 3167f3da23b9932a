//! Reference tree builder for [`FakeDom`]

use crate::dom::{FakeDom, FakeElement};
use mirror_model::{ElementData, InteractiveData, MirrorNode};
use mirror_sync::TreeBuilder;
use std::sync::Arc;

/// Builds mirror subtrees from [`FakeDom`] elements
///
/// `script` elements have no mirror representation; `input` elements become
/// interactive nodes carrying their current control state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeBuilder;

impl FakeBuilder {
    fn element_data(node: &FakeElement) -> ElementData {
        let mut data = ElementData::new(node.tag());
        data.attributes = node.attributes();
        data.text = node.text();
        data
    }
}

impl TreeBuilder<FakeDom> for FakeBuilder {
    fn build(&self, tree: &FakeDom, node: &Arc<FakeElement>) -> Option<MirrorNode> {
        if node.tag() == "script" {
            return None;
        }

        let data = Self::element_data(node);
        let mut mirror = match node.input_type() {
            Some(input) => {
                let control = node.control();
                let mut interactive = InteractiveData::new(data, input.control_kind());
                interactive.value = control.value;
                interactive.checked = input.is_checkable() && control.checked;
                interactive.indeterminate = input.has_mixed_state() && control.indeterminate;
                MirrorNode::interactive(node.key(), interactive)
            }
            None => MirrorNode::element(node.key(), data),
        };

        mirror.children = node
            .children()
            .iter()
            .filter_map(|child| self.build(tree, child))
            .collect();
        Some(mirror)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::InputType;
    use mirror_model::MirrorKind;

    #[test]
    fn scripts_are_left_out() {
        let dom = FakeDom::new();
        let script = dom.create_element("script");
        let para = dom.create_element("p");
        dom.append_child(dom.root(), &script);
        dom.append_child(dom.root(), &para);

        let mirror = FakeBuilder.build(&dom, dom.root()).unwrap();
        assert_eq!(mirror.children.len(), 1);
        assert_eq!(mirror.children[0].key, para.key());
        assert!(FakeBuilder.build(&dom, &script).is_none());
    }

    #[test]
    fn inputs_carry_control_state() {
        let dom = FakeDom::new();
        let checkbox = dom.create_input(InputType::Checkbox);
        dom.set_indeterminate(&checkbox, true);
        dom.set_value(&checkbox, "on");

        let mirror = FakeBuilder.build(&dom, &checkbox).unwrap();
        let MirrorKind::Interactive(data) = &mirror.kind else {
            panic!("expected interactive node");
        };
        assert!(data.indeterminate);
        assert_eq!(data.value, "on");
        assert!(!data.is_focused);
        assert_eq!(data.element.attributes.get("type").map(String::as_str), Some("checkbox"));
    }

    #[test]
    fn only_checkable_inputs_mirror_checked_state() {
        let dom = FakeDom::new();
        let text = dom.create_input(InputType::Text);
        let radio = dom.create_input(InputType::Radio);
        dom.set_checked(&text, true);
        dom.set_checked(&radio, true);

        let interactive = |node: &Arc<FakeElement>| match FakeBuilder.build(&dom, node).unwrap().kind {
            MirrorKind::Interactive(data) => data,
            MirrorKind::Element(_) => panic!("expected interactive node"),
        };
        assert!(text.control().checked);
        assert!(!interactive(&text).checked);
        assert!(interactive(&radio).checked);
    }
}
