//! Introspection for tests and tooling.

use crate::binding::BindingId;
use crate::reactive::Reactive;
use crate::render::NodeId;
use crate::runtime::with_runtime;
use crate::value::Key;

/// Snapshot of engine state on the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactiveStats {
    /// Bindings waiting for the next flush.
    pub pending: usize,
    pub batch_depth: usize,
    pub flushing: bool,
    pub paused: bool,
    /// Targeted bindings plus effects (computed properties excluded).
    pub live_bindings: usize,
    /// Render nodes with at least one binding.
    pub tracked_targets: usize,
    /// Binding executions since the last reset.
    pub executions: u64,
    /// Computed-property recomputations since the last reset.
    pub computations: u64,
    pub flushes: u64,
    pub warnings: u64,
    pub errors: u64,
}

/// Every key of `target` with live dependents, and who depends on it.
#[must_use]
pub fn dependencies(target: &Reactive) -> Vec<(Key, Vec<BindingId>)> {
    target.dependency_snapshot()
}

/// Bindings attached to `node`, in creation order.
#[must_use]
pub fn bindings_for(node: NodeId) -> Vec<BindingId> {
    with_runtime(|rt| rt.registry.borrow().bindings_for(node))
}

#[must_use]
pub fn stats() -> ReactiveStats {
    with_runtime(|rt| {
        let registry = rt.registry.borrow();
        ReactiveStats {
            pending: rt.pending.borrow().len(),
            batch_depth: rt.batch_depth.get(),
            flushing: rt.flushing.get(),
            paused: rt.paused.get(),
            live_bindings: registry.live_bindings(),
            tracked_targets: registry.tracked_targets(),
            executions: rt.counters.executions.get(),
            computations: rt.counters.computations.get(),
            flushes: rt.counters.flushes.get(),
            warnings: rt.counters.warnings.get(),
            errors: rt.counters.errors.get(),
        }
    })
}
