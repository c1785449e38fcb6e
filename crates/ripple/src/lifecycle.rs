//! Binding ownership and bulk teardown.
//!
//! The registry owns every targeted binding (grouped by target node) and
//! every effect. When the render tree reports removed nodes, all bindings on
//! those nodes lose their graph edges, leave the pending set, and are
//! dropped.

use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::AHashMap;

use crate::binding::{BindingId, BindingInner, BindingKind};
use crate::render::NodeId;
use crate::runtime::with_runtime;
use crate::scheduler;

#[derive(Default)]
pub(crate) struct Registry {
    targets: AHashMap<NodeId, Vec<Rc<BindingInner>>>,
    effects: BTreeMap<BindingId, Rc<BindingInner>>,
}

impl Registry {
    fn insert(&mut self, binding: &Rc<BindingInner>) {
        match &binding.kind {
            BindingKind::Target { node, .. } => {
                self.targets.entry(*node).or_default().push(Rc::clone(binding));
            }
            BindingKind::Effect => {
                self.effects.insert(binding.id, Rc::clone(binding));
            }
            BindingKind::Computed(_) => {}
        }
    }

    fn remove(&mut self, binding: &BindingInner) -> Option<Rc<BindingInner>> {
        match &binding.kind {
            BindingKind::Target { node, .. } => {
                let list = self.targets.get_mut(node)?;
                let index = list.iter().position(|b| b.id == binding.id)?;
                let removed = list.swap_remove(index);
                if list.is_empty() {
                    self.targets.remove(node);
                }
                Some(removed)
            }
            BindingKind::Effect => self.effects.remove(&binding.id),
            BindingKind::Computed(_) => None,
        }
    }

    pub(crate) fn live_bindings(&self) -> usize {
        self.targets.values().map(Vec::len).sum::<usize>() + self.effects.len()
    }

    pub(crate) fn tracked_targets(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn bindings_for(&self, node: NodeId) -> Vec<BindingId> {
        let mut ids: Vec<BindingId> = self
            .targets
            .get(&node)
            .map(|list| list.iter().map(|b| b.id).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every owned binding.
    pub(crate) fn drain(&mut self) -> Vec<Rc<BindingInner>> {
        let mut all: Vec<Rc<BindingInner>> =
            self.targets.drain().flat_map(|(_, list)| list).collect();
        all.extend(std::mem::take(&mut self.effects).into_values());
        all
    }
}

pub(crate) fn register(binding: &Rc<BindingInner>) {
    with_runtime(|rt| rt.registry.borrow_mut().insert(binding));
}

/// Tear down one binding. Returns `false` if it was not registered.
pub(crate) fn unregister(binding: &Rc<BindingInner>) -> bool {
    let removed = with_runtime(|rt| rt.registry.borrow_mut().remove(binding));
    match removed {
        Some(owned) => {
            teardown(&owned);
            true
        }
        None => false,
    }
}

fn teardown(binding: &BindingInner) {
    binding.dispose();
    scheduler::discard(binding.id);
}

/// Tear down every binding attached to `nodes`. Returns how many were
/// released.
///
/// Called automatically for removal notifications from the installed render
/// tree; embedders with their own removal tracking may call it directly.
pub fn release_targets(nodes: &[NodeId]) -> usize {
    let released: Vec<Rc<BindingInner>> = with_runtime(|rt| {
        let mut registry = rt.registry.borrow_mut();
        nodes
            .iter()
            .filter_map(|node| registry.targets.remove(node))
            .flatten()
            .collect()
    });
    for binding in &released {
        teardown(binding);
    }
    if !released.is_empty() {
        tracing::debug!(nodes = nodes.len(), bindings = released.len(), "released target bindings");
    }
    released.len()
}

pub(crate) fn release_target(node: NodeId) {
    release_targets(&[node]);
}
