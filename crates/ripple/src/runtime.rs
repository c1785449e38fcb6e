//! Per-thread engine state.
//!
//! Every wrapper, binding, and queue lives on the thread that created it.
//! The state is a single `thread_local!` [`Runtime`]; each field sits behind
//! its own `Cell`/`RefCell` so that no borrow is ever held while user code,
//! the render tree, or the error handler runs.
//!
//! # Failure Modes
//!
//! - Accessing the engine while the thread is being torn down panics inside
//!   `LocalKey::with`; wrappers and bindings never touch the runtime from
//!   `Drop`, so this can only happen if user code does.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::AHashMap;

use crate::binding::{BindingId, BindingInner};
use crate::config::ReactiveConfig;
use crate::error::{ErrorHandler, ReactiveError};
use crate::lifecycle::{self, Registry};
use crate::reactive::Reactive;
use crate::render::RenderTree;
use crate::tracking::PausedTrigger;

pub(crate) const IDENTITY_PRUNE_FLOOR: usize = 64;

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) executions: Cell<u64>,
    pub(crate) computations: Cell<u64>,
    pub(crate) flushes: Cell<u64>,
    pub(crate) warnings: Cell<u64>,
    pub(crate) errors: Cell<u64>,
}

impl Counters {
    fn clear(&self) {
        self.executions.set(0);
        self.computations.set(0);
        self.flushes.set(0);
        self.warnings.set(0);
        self.errors.set(0);
    }
}

pub(crate) fn bump(counter: &Cell<u64>) {
    counter.set(counter.get().saturating_add(1));
}

pub(crate) struct Runtime {
    pub(crate) config: Cell<ReactiveConfig>,
    /// Tracking frames; `None` marks an untracked region.
    pub(crate) stack: RefCell<Vec<Option<Rc<BindingInner>>>>,
    pub(crate) batch_depth: Cell<usize>,
    pub(crate) flushing: Cell<bool>,
    pub(crate) pending: RefCell<BTreeMap<BindingId, Rc<BindingInner>>>,
    pub(crate) paused: Cell<bool>,
    pub(crate) paused_triggers: RefCell<Vec<PausedTrigger>>,
    pub(crate) trigger_depth: Cell<usize>,
    /// Raw container address -> its wrapper. Entries are strong; see
    /// `reactive::prune_identity` for when they go away.
    pub(crate) identity: RefCell<AHashMap<usize, Reactive>>,
    pub(crate) identity_prune_at: Cell<usize>,
    pub(crate) registry: RefCell<Registry>,
    pub(crate) tree: RefCell<Option<Rc<dyn RenderTree>>>,
    tree_generation: Cell<u64>,
    error_handler: RefCell<Option<Rc<ErrorHandler>>>,
    pub(crate) counters: Counters,
    next_binding_id: Cell<u64>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            config: Cell::new(ReactiveConfig::default()),
            stack: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            pending: RefCell::new(BTreeMap::new()),
            paused: Cell::new(false),
            paused_triggers: RefCell::new(Vec::new()),
            trigger_depth: Cell::new(0),
            identity: RefCell::new(AHashMap::new()),
            identity_prune_at: Cell::new(IDENTITY_PRUNE_FLOOR),
            registry: RefCell::new(Registry::default()),
            tree: RefCell::new(None),
            tree_generation: Cell::new(0),
            error_handler: RefCell::new(None),
            counters: Counters::default(),
            next_binding_id: Cell::new(1),
        }
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

pub(crate) fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

// ---------------------------------------------------------------------------
// Configuration and collaborators
// ---------------------------------------------------------------------------

/// Replace the limits used on this thread.
pub fn configure(config: ReactiveConfig) {
    with_runtime(|rt| rt.config.set(config));
}

/// Limits currently in force on this thread.
#[must_use]
pub fn config() -> ReactiveConfig {
    with_runtime(|rt| rt.config.get())
}

/// Route compute failures to `handler` instead of `tracing::error!`.
pub fn set_error_handler(handler: impl Fn(&ReactiveError) + 'static) {
    let handler: Rc<ErrorHandler> = Rc::new(handler);
    with_runtime(|rt| *rt.error_handler.borrow_mut() = Some(handler));
}

/// Restore the default `tracing::error!` reporting.
pub fn clear_error_handler() {
    let previous = with_runtime(|rt| rt.error_handler.borrow_mut().take());
    drop(previous);
}

/// Make `tree` the render collaborator for this thread.
///
/// The engine subscribes to the tree's removal notifications so bindings
/// attached to removed nodes are torn down. Installing a new tree detaches
/// the previous one; its later notifications are ignored.
pub fn install_render_tree(tree: Rc<dyn RenderTree>) {
    let generation = with_runtime(|rt| {
        let next = rt.tree_generation.get() + 1;
        rt.tree_generation.set(next);
        next
    });
    tree.on_removed(Box::new(move |nodes| {
        let current = with_runtime(|rt| rt.tree_generation.get());
        if current == generation {
            lifecycle::release_targets(nodes);
        }
    }));
    let previous = with_runtime(|rt| rt.tree.borrow_mut().replace(tree));
    drop(previous);
}

/// The installed render collaborator, if any.
#[must_use]
pub fn render_tree() -> Option<Rc<dyn RenderTree>> {
    with_runtime(|rt| rt.tree.borrow().clone())
}

/// Drop every binding, queue, cache, and collaborator on this thread and
/// restore the default configuration.
///
/// Wrappers still held by callers stay usable; they simply have no
/// dependents until new bindings read them.
pub fn reset() {
    let bindings = with_runtime(|rt| rt.registry.borrow_mut().drain());
    for binding in &bindings {
        binding.dispose();
    }
    let (pending, triggers, identity, tree, handler) = with_runtime(|rt| {
        rt.config.set(ReactiveConfig::default());
        rt.stack.borrow_mut().clear();
        rt.batch_depth.set(0);
        rt.flushing.set(false);
        rt.paused.set(false);
        rt.trigger_depth.set(0);
        rt.identity_prune_at.set(IDENTITY_PRUNE_FLOOR);
        rt.tree_generation.set(rt.tree_generation.get() + 1);
        rt.counters.clear();
        (
            std::mem::take(&mut *rt.pending.borrow_mut()),
            std::mem::take(&mut *rt.paused_triggers.borrow_mut()),
            std::mem::take(&mut *rt.identity.borrow_mut()),
            rt.tree.borrow_mut().take(),
            rt.error_handler.borrow_mut().take(),
        )
    });
    tracing::debug!(bindings = bindings.len(), "reactive runtime reset");
    drop((bindings, pending, triggers, identity, tree, handler));
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

pub(crate) fn report_warning(warning: ReactiveError) {
    with_runtime(|rt| bump(&rt.counters.warnings));
    tracing::warn!(kind = warning.kind(), "{warning}");
}

pub(crate) fn report_error(error: ReactiveError) {
    let handler = with_runtime(|rt| {
        bump(&rt.counters.errors);
        rt.error_handler.borrow().clone()
    });
    match handler {
        Some(handler) => handler(&error),
        None => tracing::error!(kind = error.kind(), "{error}"),
    }
}

pub(crate) fn next_binding_id() -> BindingId {
    with_runtime(|rt| {
        let id = rt.next_binding_id.get();
        rt.next_binding_id.set(id + 1);
        BindingId::from_raw(id)
    })
}

pub(crate) fn count(counter: impl FnOnce(&Counters) -> &Cell<u64>) {
    with_runtime(|rt| bump(counter(&rt.counters)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MemoryTree;
    use crate::value::Value;
    use crate::{ComputeError, bind, debug, reactive, try_effect};
    use serde_json::json;

    #[test]
    fn configure_round_trips_and_reset_restores_defaults() {
        reset();
        configure(ReactiveConfig::default().with_max_depth(3));
        assert_eq!(config().max_depth, 3);
        reset();
        assert_eq!(config(), ReactiveConfig::default());
    }

    #[test]
    fn binding_ids_are_unique_across_resets() {
        let a = next_binding_id();
        reset();
        let b = next_binding_id();
        assert!(b > a);
    }

    #[test]
    fn reset_drops_bindings_and_tree() {
        reset();
        let tree = Rc::new(MemoryTree::new());
        install_render_tree(tree.clone());
        let node = tree.element(tree.root(), "span");
        let state = reactive(json!({ "n": 1 })).expect("object wraps");
        let handle = bind(node, {
            let state = state.clone();
            move || state.get("n")
        });
        assert!(handle.is_active());
        reset();
        assert!(!handle.is_active());
        assert!(render_tree().is_none());
        assert_eq!(debug::stats().live_bindings, 0);
        state.set("n", 2);
        assert_eq!(tree.text(node).as_deref(), Some("1"));
    }

    #[test]
    fn replaced_tree_notifications_are_ignored() {
        reset();
        let old = Rc::new(MemoryTree::new());
        install_render_tree(old.clone());
        let node = old.element(old.root(), "span");
        let fresh = Rc::new(MemoryTree::new());
        install_render_tree(fresh.clone());
        let same_id = fresh.element(fresh.root(), "span");
        assert_eq!(node, same_id);
        let handle = bind(same_id, || "x");
        old.remove(node);
        assert!(handle.is_active());
    }

    #[test]
    fn error_handler_receives_compute_failures() {
        reset();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        set_error_handler(move |err| sink.borrow_mut().push(err.kind()));
        try_effect(|| Err::<Value, _>(ComputeError::msg("nope")));
        assert_eq!(*seen.borrow(), vec!["compute"]);
        assert_eq!(debug::stats().errors, 1);
        clear_error_handler();
    }
}
