//! Bindings: units of reactive work.
//!
//! A binding pairs a compute function with an optional render target. Each
//! execution clears the binding's dependencies, re-runs the function under a
//! tracking frame (so dependencies reflect exactly the latest run), and hands
//! a changed result to the applier.
//!
//! # Ownership
//!
//! Targeted bindings and effects are owned by the lifecycle registry;
//! computed bindings are owned by the wrapper that defines them. Graph
//! entries and [`Unbind`] handles only hold `Weak` references.
//!
//! A binding's own dependency list holds the wrappers it read strongly, so a
//! wrapper outlives every handle the caller dropped for as long as something
//! depends on it. Computed bindings are the exception: their owner holds
//! them, so their edges stay weak.
//!
//! # Failure Modes
//!
//! - A compute function returning `Err` or panicking is reported through the
//!   error handler; the last applied value stays in place and the flush
//!   continues.
//! - A binding whose target has left the tree is released instead of run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::applier;
use crate::error::{ComputeError, ReactiveError, Result};
use crate::lifecycle;
use crate::reactive::{Reactive, WeakReactive};
use crate::render::{NodeId, Selector};
use crate::runtime::{self, render_tree};
use crate::tracking;
use crate::value::{Key, Value};

/// Creation-ordered binding identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type ComputeFn = Box<dyn Fn() -> Result<Value>>;

/// Cache state of a computed property.
pub(crate) struct ComputedState {
    pub(crate) owner: WeakReactive,
    pub(crate) key: String,
    pub(crate) dirty: Cell<bool>,
    pub(crate) cached: RefCell<Option<Value>>,
    pub(crate) version: Cell<u64>,
}

impl ComputedState {
    pub(crate) fn new(owner: WeakReactive, key: String) -> Self {
        Self {
            owner,
            key,
            dirty: Cell::new(true),
            cached: RefCell::new(None),
            version: Cell::new(0),
        }
    }
}

pub(crate) enum BindingKind {
    Effect,
    Target { node: NodeId, slot: Option<String> },
    Computed(ComputedState),
}

enum DependencyTarget {
    Strong(Reactive),
    Weak(WeakReactive),
}

pub(crate) struct Dependency {
    target: DependencyTarget,
    key: Key,
}

impl Dependency {
    fn upgrade(&self) -> Option<Reactive> {
        match &self.target {
            DependencyTarget::Strong(target) => Some(target.clone()),
            DependencyTarget::Weak(target) => target.upgrade(),
        }
    }
}

pub(crate) struct BindingInner {
    pub(crate) id: BindingId,
    pub(crate) kind: BindingKind,
    compute: ComputeFn,
    last: RefCell<Option<Value>>,
    deps: RefCell<SmallVec<[Dependency; 4]>>,
    disposed: Cell<bool>,
    runs: Cell<u64>,
}

impl BindingInner {
    pub(crate) fn new(id: BindingId, kind: BindingKind, compute: ComputeFn) -> Self {
        Self {
            id,
            kind,
            compute,
            last: RefCell::new(None),
            deps: RefCell::new(SmallVec::new()),
            disposed: Cell::new(false),
            runs: Cell::new(0),
        }
    }

    pub(crate) fn target(&self) -> Option<NodeId> {
        match &self.kind {
            BindingKind::Target { node, .. } => Some(*node),
            _ => None,
        }
    }

    pub(crate) fn computed(&self) -> Option<&ComputedState> {
        match &self.kind {
            BindingKind::Computed(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn is_computed(&self) -> bool {
        matches!(self.kind, BindingKind::Computed(_))
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn add_dependency(&self, target: &Reactive, key: Key) {
        let target = if self.is_computed() {
            DependencyTarget::Weak(target.downgrade())
        } else {
            DependencyTarget::Strong(target.clone())
        };
        self.deps.borrow_mut().push(Dependency { target, key });
    }

    /// Remove every edge this binding holds, on both sides.
    pub(crate) fn clear_dependencies(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in deps {
            if let Some(target) = dep.upgrade() {
                target.remove_dependent(&dep.key, self.id);
            }
        }
    }

    /// Live `(wrapper path, key)` pairs, in read order.
    pub(crate) fn dependencies(&self) -> Vec<(String, Key)> {
        self.deps
            .borrow()
            .iter()
            .filter_map(|dep| {
                dep.upgrade()
                    .map(|target| (target.path().to_owned(), dep.key.clone()))
            })
            .collect()
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.clear_dependencies();
        if let Some(state) = self.computed() {
            let cached = state.cached.borrow_mut().take();
            drop(cached);
        }
    }

    pub(crate) fn last_value(&self) -> Option<Value> {
        self.last.borrow().clone()
    }

    /// Human-readable context for error reports.
    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            BindingKind::Effect => "effect".to_owned(),
            BindingKind::Target { node, slot: None } => format!("{node}.text"),
            BindingKind::Target {
                node,
                slot: Some(slot),
            } => format!("{node}.{slot}"),
            BindingKind::Computed(state) => match state.owner.upgrade() {
                Some(owner) => format!("computed {}.{}", owner.path(), state.key),
                None => format!("computed {}", state.key),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Invoke the compute function with `binding` as the tracking context.
///
/// A wrapper result is walked before the frame closes, so edits made in
/// place to the returned container re-run the binding.
pub(crate) fn run(binding: &Rc<BindingInner>) -> Result<Value> {
    let _frame = tracking::enter(Some(Rc::clone(binding)));
    binding.runs.set(binding.runs.get() + 1);
    let compute = || -> Result<Value> {
        let value = (binding.compute)()?;
        if let Value::Reactive(result) = &value {
            observe_contents(result, runtime::config().deep_compare_depth);
        }
        Ok(value)
    };
    match panic::catch_unwind(AssertUnwindSafe(compute)) {
        Ok(result) => result,
        Err(payload) => Err(ComputeError::from_panic(&*payload)),
    }
}

fn observe_contents(target: &Reactive, depth: usize) {
    if depth == 0 {
        return;
    }
    for key in target.keys() {
        if let Value::Reactive(child) = target.get(key) {
            observe_contents(&child, depth - 1);
        }
    }
}

pub(crate) fn execute(binding: &Rc<BindingInner>) {
    if binding.is_disposed() {
        return;
    }
    if let Some(node) = binding.target() {
        let attached = render_tree().is_some_and(|tree| tree.contains(node));
        if !attached {
            lifecycle::release_target(node);
            return;
        }
    }
    if tracking::is_executing(binding.id) {
        runtime::report_warning(ReactiveError::CircularBinding {
            binding: binding.id,
        });
        return;
    }

    let _span = tracing::trace_span!("ripple.binding", id = %binding.id).entered();
    binding.clear_dependencies();
    runtime::count(|c| &c.executions);

    let value = match run(binding) {
        Ok(value) => value,
        Err(source) => {
            runtime::report_error(ReactiveError::Compute {
                binding: binding.id,
                context: binding.describe(),
                source,
            });
            return;
        }
    };

    let depth = runtime::config().deep_compare_depth;
    let unchanged = binding
        .last
        .borrow()
        .as_ref()
        .is_some_and(|last| last.deep_eq_within(&value, depth));
    if unchanged {
        tracing::trace!(id = %binding.id, "result unchanged");
        return;
    }
    *binding.last.borrow_mut() = Some(value.deep_clone_within(depth));

    if let BindingKind::Target { node, slot } = &binding.kind {
        if let Some(tree) = render_tree() {
            applier::apply(tree.as_ref(), *node, slot.as_deref(), &value);
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Handle returned by the binding APIs.
///
/// Dropping the handle does **not** unbind; bindings live until
/// [`Unbind::unbind`] is called or their target leaves the tree.
#[derive(Clone)]
pub struct Unbind {
    id: Option<BindingId>,
    binding: Weak<BindingInner>,
}

impl Unbind {
    fn new(binding: &Rc<BindingInner>) -> Self {
        Self {
            id: Some(binding.id),
            binding: Rc::downgrade(binding),
        }
    }

    /// Handle for a registration that was rejected.
    fn inert() -> Self {
        Self {
            id: None,
            binding: Weak::new(),
        }
    }

    /// `None` when the registration was rejected.
    #[must_use]
    pub fn id(&self) -> Option<BindingId> {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.binding
            .upgrade()
            .is_some_and(|binding| !binding.is_disposed())
    }

    /// Tear the binding down. Returns `false` if it was already gone.
    pub fn unbind(&self) -> bool {
        match self.binding.upgrade() {
            Some(binding) => lifecycle::unregister(&binding),
            None => false,
        }
    }

    /// Snapshot of the last value the binding produced.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.binding.upgrade().and_then(|b| b.last_value())
    }

    /// Number of times the compute function has been invoked.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.binding.upgrade().map_or(0, |b| b.runs.get())
    }

    /// `(wrapper path, key)` pairs read by the latest run.
    #[must_use]
    pub fn dependencies(&self) -> Vec<(String, Key)> {
        self.binding
            .upgrade()
            .map(|b| b.dependencies())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Unbind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unbind")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn attach(kind: BindingKind, compute: ComputeFn) -> Unbind {
    if let BindingKind::Target { node, .. } = &kind {
        let Some(tree) = render_tree() else {
            runtime::report_warning(ReactiveError::NoRenderTree {
                target: node.to_string(),
            });
            return Unbind::inert();
        };
        if !tree.contains(*node) {
            runtime::report_warning(ReactiveError::MissingTarget {
                selector: node.to_string(),
            });
            return Unbind::inert();
        }
    }
    let binding = Rc::new(BindingInner::new(runtime::next_binding_id(), kind, compute));
    lifecycle::register(&binding);
    execute(&binding);
    Unbind::new(&binding)
}

fn infallible<R: Into<Value>>(f: impl Fn() -> R + 'static) -> ComputeFn {
    Box::new(move || Ok(f().into()))
}

fn fallible<R: Into<Value>>(f: impl Fn() -> Result<R> + 'static) -> ComputeFn {
    Box::new(move || f().map(Into::into))
}

/// Bind `f` to the default display slot (text) of `target`.
pub fn bind<R: Into<Value>>(target: NodeId, f: impl Fn() -> R + 'static) -> Unbind {
    attach(
        BindingKind::Target {
            node: target,
            slot: None,
        },
        infallible(f),
    )
}

/// Bind `f` to a named slot of `target`: a property, or the merged
/// `style` / `dataset` / `attributes` maps.
pub fn bind_slot<R: Into<Value>>(
    target: NodeId,
    slot: impl Into<String>,
    f: impl Fn() -> R + 'static,
) -> Unbind {
    attach(
        BindingKind::Target {
            node: target,
            slot: Some(slot.into()),
        },
        infallible(f),
    )
}

/// [`bind`] / [`bind_slot`] with a fallible compute function.
pub fn try_bind<R: Into<Value>>(
    target: NodeId,
    slot: Option<&str>,
    f: impl Fn() -> Result<R> + 'static,
) -> Unbind {
    attach(
        BindingKind::Target {
            node: target,
            slot: slot.map(str::to_owned),
        },
        fallible(f),
    )
}

/// Run `f` now and again whenever anything it read changes.
pub fn effect<R: Into<Value>>(f: impl Fn() -> R + 'static) -> Unbind {
    attach(BindingKind::Effect, infallible(f))
}

/// [`effect`] with a fallible function.
pub fn try_effect<R: Into<Value>>(f: impl Fn() -> Result<R> + 'static) -> Unbind {
    attach(BindingKind::Effect, fallible(f))
}

/// Bind `f` to every node matching `selector`. `f` receives the node it is
/// computing for.
///
/// An unresolved selector is reported as a warning and binds nothing.
pub fn bind_selector<R: Into<Value>>(
    selector: &str,
    slot: Option<&str>,
    f: impl Fn(NodeId) -> R + 'static,
) -> Vec<Unbind> {
    let parsed = Selector::parse(selector);
    let Some(tree) = render_tree() else {
        runtime::report_warning(ReactiveError::NoRenderTree {
            target: parsed.to_string(),
        });
        return Vec::new();
    };
    let nodes = tree.resolve(&parsed);
    drop(tree);
    if nodes.is_empty() {
        runtime::report_warning(ReactiveError::MissingTarget {
            selector: parsed.to_string(),
        });
        return Vec::new();
    }
    let f = Rc::new(f);
    nodes
        .into_iter()
        .map(|node| {
            let f = Rc::clone(&f);
            attach(
                BindingKind::Target {
                    node,
                    slot: slot.map(str::to_owned),
                },
                infallible(move || f(node)),
            )
        })
        .collect()
}
