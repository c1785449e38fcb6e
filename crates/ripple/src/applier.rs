//! Pushes binding results onto render targets.
//!
//! | Result | No slot | `style` slot | `dataset` / `attributes` slot | Other slot |
//! |--------|---------|--------------|-------------------------------|------------|
//! | scalar | text | property | property | property |
//! | array | comma-joined text | property | property | property |
//! | object | spread per key | merged | merged | property |
//!
//! Spreading an object sends `style` and `dataset`/`attributes` entries
//! through the merge paths, `text` to the display text, and everything
//! else to properties.

use crate::render::{NodeId, RenderTree};
use crate::value::{Object, Value};

const STYLE: &str = "style";
const TEXT: &str = "text";

fn is_attribute_slot(slot: &str) -> bool {
    slot == "dataset" || slot == "attributes"
}

pub(crate) fn apply(tree: &dyn RenderTree, node: NodeId, slot: Option<&str>, value: &Value) {
    let value = value.raw();
    match (slot, &value) {
        (Some(STYLE), Value::Object(object)) => merge_style(tree, node, object),
        (Some(slot), Value::Object(object)) if is_attribute_slot(slot) => {
            merge_attributes(tree, node, object);
        }
        (Some(slot), _) => tree.set_property(node, slot, &value),
        (None, Value::Object(object)) => spread(tree, node, object),
        (None, _) => tree.set_text(node, &value.to_display_string()),
    }
}

fn merge_style(tree: &dyn RenderTree, node: NodeId, style: &Object) {
    for (name, value) in style.entries() {
        tree.merge_style(node, &name, &value.raw());
    }
}

fn merge_attributes(tree: &dyn RenderTree, node: NodeId, attributes: &Object) {
    for (name, value) in attributes.entries() {
        tree.set_attribute(node, &name, &value.raw());
    }
}

fn spread(tree: &dyn RenderTree, node: NodeId, object: &Object) {
    for (name, value) in object.entries() {
        let value = value.raw();
        match (name.as_str(), &value) {
            (STYLE, Value::Object(style)) => merge_style(tree, node, style),
            (slot, Value::Object(attributes)) if is_attribute_slot(slot) => {
                merge_attributes(tree, node, attributes);
            }
            (TEXT, _) => tree.set_text(node, &value.to_display_string()),
            (name, _) => tree.set_property(node, name, &value),
        }
    }
}
