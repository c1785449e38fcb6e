//! Render collaborator interface.
//!
//! The engine never touches a display directly. Targeted bindings push their
//! results through a [`RenderTree`], which also tells the engine which nodes
//! are still attached, where they sit in document order, and when subtrees
//! are removed.

mod memory;

pub use memory::MemoryTree;

use std::fmt;

use crate::value::Value;

/// Opaque handle to a node in the render tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Minimal selector language understood by [`RenderTree::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// `#name`
    Id(String),
    /// `.name`
    Class(String),
    /// `name`
    Tag(String),
}

impl Selector {
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if let Some(id) = source.strip_prefix('#') {
            Self::Id(id.to_owned())
        } else if let Some(class) = source.strip_prefix('.') {
            Self::Class(class.to_owned())
        } else {
            Self::Tag(source.to_owned())
        }
    }
}

impl From<&str> for Selector {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Class(class) => write!(f, ".{class}"),
            Self::Tag(tag) => f.write_str(tag),
        }
    }
}

/// Callback invoked with every node of a removed subtree.
pub type RemovalCallback = Box<dyn Fn(&[NodeId])>;

/// Display surface consumed by the binding applier and lifecycle registry.
///
/// Methods take `&self`; implementations keep their state behind interior
/// mutability so the engine can hold the tree in an `Rc`. Removal callbacks
/// must run after the tree has released its internal borrows, since they
/// re-enter the engine.
pub trait RenderTree {
    /// Whether `node` is attached to the live document.
    fn contains(&self, node: NodeId) -> bool;

    /// Preorder position of `node`, or `None` when detached.
    fn document_position(&self, node: NodeId) -> Option<usize>;

    /// Replace the node's default display text.
    fn set_text(&self, node: NodeId, text: &str);

    /// Assign a named property wholesale.
    fn set_property(&self, node: NodeId, name: &str, value: &Value);

    /// Merge a single style declaration; `Null` removes it.
    fn merge_style(&self, node: NodeId, name: &str, value: &Value);

    /// Merge a single custom attribute; `Null` removes it.
    fn set_attribute(&self, node: NodeId, name: &str, value: &Value);

    /// Attached nodes matching `selector`, in document order.
    fn resolve(&self, selector: &Selector) -> Vec<NodeId>;

    /// Subscribe to subtree removals.
    fn on_removed(&self, callback: RemovalCallback);
}
