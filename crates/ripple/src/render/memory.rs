//! Headless in-memory render tree.
//!
//! Node 0 is the document root. Nodes created with [`MemoryTree::element`]
//! start detached and join the document once appended under an attached
//! parent. [`MemoryTree::remove`] detaches a node and reports its whole
//! subtree to every `on_removed` listener.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::AHashMap;

use super::{NodeId, RemovalCallback, RenderTree, Selector};
use crate::value::Value;

#[derive(Debug, Default)]
struct Node {
    tag: String,
    dom_id: Option<String>,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
    properties: BTreeMap<String, Value>,
    style: BTreeMap<String, Value>,
    attributes: BTreeMap<String, Value>,
}

type Listener = Rc<dyn Fn(&[NodeId])>;

/// Render tree that keeps everything in memory, for tests, benches, and
/// embedders without a display.
pub struct MemoryTree {
    nodes: RefCell<AHashMap<NodeId, Node>>,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<Listener>>,
    writes: Cell<u64>,
    /// Preorder index of every attached node; dropped on structural change.
    positions: RefCell<Option<Rc<AHashMap<NodeId, usize>>>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTree")
            .field("nodes", &self.nodes.borrow().len())
            .field("listeners", &self.listeners.borrow().len())
            .field("writes", &self.writes.get())
            .finish()
    }
}

impl MemoryTree {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = AHashMap::new();
        nodes.insert(
            Self::ROOT,
            Node {
                tag: "#document".to_owned(),
                ..Node::default()
            },
        );
        Self {
            nodes: RefCell::new(nodes),
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
            writes: Cell::new(0),
            positions: RefCell::new(None),
        }
    }

    const ROOT: NodeId = NodeId::new(0);

    #[must_use]
    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    /// Create a detached node.
    pub fn create(&self, tag: &str) -> NodeId {
        let id = NodeId::new(self.next_id.get());
        self.next_id.set(id.get() + 1);
        self.nodes.borrow_mut().insert(
            id,
            Node {
                tag: tag.to_owned(),
                ..Node::default()
            },
        );
        id
    }

    /// Move `child` under `parent` as its last child. Returns `false` when
    /// either node is unknown or the move would create a cycle.
    pub fn append(&self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || self.is_ancestor(child, parent) {
            return false;
        }
        let mut nodes = self.nodes.borrow_mut();
        if !nodes.contains_key(&parent) || !nodes.contains_key(&child) {
            return false;
        }
        let old_parent = nodes.get(&child).and_then(|n| n.parent);
        if let Some(old) = old_parent.and_then(|p| nodes.get_mut(&p)) {
            old.children.retain(|c| *c != child);
        }
        if let Some(node) = nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = nodes.get_mut(&parent) {
            node.children.push(child);
        }
        self.positions.borrow_mut().take();
        true
    }

    /// Create a node and append it under `parent`.
    pub fn element(&self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.create(tag);
        self.append(parent, id);
        id
    }

    pub fn set_dom_id(&self, node: NodeId, dom_id: &str) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&node) {
            node.dom_id = Some(dom_id.to_owned());
        }
    }

    pub fn add_class(&self, node: NodeId, class: &str) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&node) {
            if !node.classes.iter().any(|c| c == class) {
                node.classes.push(class.to_owned());
            }
        }
    }

    /// Detach `node` and drop its subtree, notifying removal listeners.
    /// Returns the removed ids in preorder.
    pub fn remove(&self, node: NodeId) -> Vec<NodeId> {
        if node == Self::ROOT {
            return Vec::new();
        }
        let removed = {
            let mut nodes = self.nodes.borrow_mut();
            if !nodes.contains_key(&node) {
                return Vec::new();
            }
            let mut removed = Vec::new();
            collect_preorder(&nodes, node, &mut removed);
            let parent = nodes.get(&node).and_then(|n| n.parent);
            if let Some(parent) = parent.and_then(|p| nodes.get_mut(&p)) {
                parent.children.retain(|c| *c != node);
            }
            for id in &removed {
                nodes.remove(id);
            }
            removed
        };
        self.positions.borrow_mut().take();
        let listeners: Vec<Listener> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&removed);
        }
        removed
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow().get(&node).and_then(|n| n.parent)
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<String> {
        self.nodes.borrow().get(&node).map(|n| n.text.clone())
    }

    #[must_use]
    pub fn property(&self, node: NodeId, name: &str) -> Option<Value> {
        self.nodes
            .borrow()
            .get(&node)
            .and_then(|n| n.properties.get(name).cloned())
    }

    #[must_use]
    pub fn style(&self, node: NodeId, name: &str) -> Option<Value> {
        self.nodes
            .borrow()
            .get(&node)
            .and_then(|n| n.style.get(name).cloned())
    }

    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<Value> {
        self.nodes
            .borrow()
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    /// Total number of write calls received, across all nodes.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.get()
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let nodes = self.nodes.borrow();
        let mut cursor = nodes.get(&node).and_then(|n| n.parent);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn positions(&self) -> Rc<AHashMap<NodeId, usize>> {
        if let Some(positions) = self.positions.borrow().as_ref() {
            return Rc::clone(positions);
        }
        let mut order = Vec::new();
        collect_preorder(&self.nodes.borrow(), Self::ROOT, &mut order);
        let positions: Rc<AHashMap<NodeId, usize>> =
            Rc::new(order.into_iter().enumerate().map(|(i, id)| (id, i)).collect());
        *self.positions.borrow_mut() = Some(Rc::clone(&positions));
        positions
    }

    fn write(&self, node: NodeId, f: impl FnOnce(&mut Node)) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&node) {
            f(node);
            self.writes.set(self.writes.get() + 1);
        }
    }

    fn matches(node: &Node, selector: &Selector) -> bool {
        match selector {
            Selector::Id(id) => node.dom_id.as_deref() == Some(id.as_str()),
            Selector::Class(class) => node.classes.iter().any(|c| c == class),
            Selector::Tag(tag) => node.tag.eq_ignore_ascii_case(tag),
        }
    }
}

fn collect_preorder(nodes: &AHashMap<NodeId, Node>, from: NodeId, out: &mut Vec<NodeId>) {
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        out.push(id);
        if let Some(node) = nodes.get(&id) {
            stack.extend(node.children.iter().rev().copied());
        }
    }
}

fn merge_entry(map: &mut BTreeMap<String, Value>, name: &str, value: &Value) {
    if value.is_null() {
        map.remove(name);
    } else {
        map.insert(name.to_owned(), value.clone());
    }
}

impl RenderTree for MemoryTree {
    fn contains(&self, node: NodeId) -> bool {
        node == Self::ROOT || self.is_ancestor(Self::ROOT, node)
    }

    fn document_position(&self, node: NodeId) -> Option<usize> {
        self.positions().get(&node).copied()
    }

    fn set_text(&self, node: NodeId, text: &str) {
        self.write(node, |n| text.clone_into(&mut n.text));
    }

    fn set_property(&self, node: NodeId, name: &str, value: &Value) {
        self.write(node, |n| {
            n.properties.insert(name.to_owned(), value.clone());
        });
    }

    fn merge_style(&self, node: NodeId, name: &str, value: &Value) {
        self.write(node, |n| merge_entry(&mut n.style, name, value));
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &Value) {
        self.write(node, |n| merge_entry(&mut n.attributes, name, value));
    }

    fn resolve(&self, selector: &Selector) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        let mut order = Vec::new();
        collect_preorder(&nodes, Self::ROOT, &mut order);
        order
            .into_iter()
            .filter(|id| nodes.get(id).is_some_and(|n| Self::matches(n, selector)))
            .collect()
    }

    fn on_removed(&self, callback: RemovalCallback) {
        self.listeners.borrow_mut().push(Rc::from(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_until_appended() {
        let tree = MemoryTree::new();
        let div = tree.create("div");
        assert!(!tree.contains(div));
        assert!(tree.append(tree.root(), div));
        assert!(tree.contains(div));
        assert_eq!(tree.parent(div), Some(tree.root()));
    }

    #[test]
    fn append_rejects_cycles() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "div");
        let b = tree.element(a, "div");
        assert!(!tree.append(b, a));
        assert!(!tree.append(a, a));
    }

    #[test]
    fn document_position_is_preorder() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "div");
        let b = tree.element(tree.root(), "div");
        let a1 = tree.element(a, "span");
        assert_eq!(tree.document_position(a), Some(1));
        assert_eq!(tree.document_position(a1), Some(2));
        assert_eq!(tree.document_position(b), Some(3));
        assert_eq!(tree.document_position(tree.create("p")), None);
    }

    #[test]
    fn document_position_follows_moves_and_removals() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "div");
        let b = tree.element(tree.root(), "div");
        let c = tree.element(tree.root(), "div");
        assert_eq!(tree.document_position(c), Some(3));
        assert!(tree.append(b, a));
        assert_eq!(tree.document_position(b), Some(1));
        assert_eq!(tree.document_position(a), Some(2));
        tree.remove(b);
        assert_eq!(tree.document_position(a), None);
        assert_eq!(tree.document_position(c), Some(1));
    }

    #[test]
    fn resolve_by_id_class_and_tag() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "li");
        let b = tree.element(tree.root(), "li");
        tree.set_dom_id(a, "first");
        tree.add_class(b, "done");
        assert_eq!(tree.resolve(&Selector::parse("#first")), vec![a]);
        assert_eq!(tree.resolve(&Selector::parse(".done")), vec![b]);
        assert_eq!(tree.resolve(&Selector::parse("LI")), vec![a, b]);
        assert!(tree.resolve(&Selector::parse("#missing")).is_empty());
    }

    #[test]
    fn remove_reports_subtree_to_listeners() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "div");
        let a1 = tree.element(a, "span");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        tree.on_removed(Box::new(move |ids| sink.borrow_mut().extend_from_slice(ids)));
        assert_eq!(tree.remove(a), vec![a, a1]);
        assert_eq!(*seen.borrow(), vec![a, a1]);
        assert!(!tree.contains(a1));
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn style_and_attributes_merge_and_null_removes() {
        let tree = MemoryTree::new();
        let a = tree.element(tree.root(), "div");
        tree.merge_style(a, "color", &Value::from("red"));
        tree.merge_style(a, "width", &Value::from(3));
        tree.merge_style(a, "color", &Value::Null);
        assert_eq!(tree.style(a, "color"), None);
        assert_eq!(tree.style(a, "width"), Some(Value::from(3)));
        tree.set_attribute(a, "role", &Value::from("button"));
        assert_eq!(tree.attribute(a, "role"), Some(Value::from("button")));
        assert_eq!(tree.writes(), 4);
    }
}
