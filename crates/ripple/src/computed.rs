#![forbid(unsafe_code)]

//! Lazily cached derived properties on a wrapper.
//!
//! # Design
//!
//! [`define_computed`] installs a read-only accessor for `key` on a wrapper.
//! The accessor is backed by a computed binding whose cached value starts
//! dirty. Reading the key recomputes only while dirty; any trigger reaching
//! the binding just marks it dirty again (lazy pull) and, on the clean to
//! dirty transition, triggers the computed key itself so outer readers
//! re-run.
//!
//! # Invariants
//!
//! 1. The compute function is not invoked by [`define_computed`].
//! 2. A clean read returns the cached value without re-invoking.
//! 3. The version increments by exactly 1 per successful recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function fails or panics**: the previous cached value is
//!   returned and the property stays dirty so the next read retries.
//! - **Owner dropped**: the accessor goes with it; nothing else holds the
//!   computed binding.

use std::rc::Rc;

use crate::binding::{self, BindingInner, BindingKind, ComputeFn, ComputedState};
use crate::error::{ComputeError, ReactiveError, Result};
use crate::reactive::{Reactive, wrap};
use crate::runtime;
use crate::tracking;
use crate::value::{Key, Value};

/// Define `key` on `target` as a lazily cached property computed by `f`.
///
/// `f` receives the owning wrapper; reads it makes through the wrapper
/// become the property's dependencies. Redefining a key replaces the
/// previous definition.
pub fn define_computed<R: Into<Value>>(
    target: &Reactive,
    key: impl Into<String>,
    f: impl Fn(&Reactive) -> R + 'static,
) {
    install(target, key.into(), move |owner| Ok(f(owner).into()));
}

/// [`define_computed`] with a fallible function.
pub fn try_define_computed<R: Into<Value>>(
    target: &Reactive,
    key: impl Into<String>,
    f: impl Fn(&Reactive) -> Result<R> + 'static,
) {
    install(target, key.into(), move |owner| f(owner).map(Into::into));
}

/// Remove the computed property `key`. Returns `false` if none was defined.
pub fn remove_computed(target: &Reactive, key: &str) -> bool {
    let Some(binding) = target.take_computed(key) else {
        return false;
    };
    binding.dispose();
    drop(binding);
    tracking::trigger(target, &Key::field(key));
    true
}

fn install(target: &Reactive, key: String, f: impl Fn(&Reactive) -> Result<Value> + 'static) {
    let owner = target.downgrade();
    let weak = owner.clone();
    let compute: ComputeFn = Box::new(move || {
        let owner = weak
            .upgrade()
            .ok_or_else(|| ComputeError::msg("computed property owner was dropped"))?;
        f(&owner)
    });
    let binding = Rc::new(BindingInner::new(
        runtime::next_binding_id(),
        BindingKind::Computed(ComputedState::new(owner, key.clone())),
        compute,
    ));
    tracing::debug!(path = target.path(), key = %key, id = %binding.id, "defined computed property");
    if let Some(previous) = target.install_computed(key.clone(), binding) {
        previous.dispose();
    }
    tracking::trigger(target, &Key::Field(key));
}

/// Read through a computed accessor, recomputing if dirty.
pub(crate) fn read(owner: &Reactive, key: &str, binding: &Rc<BindingInner>) -> Value {
    tracking::track(owner, &Key::field(key));
    let Some(state) = binding.computed() else {
        return Value::Null;
    };
    if tracking::is_executing(binding.id) {
        runtime::report_warning(ReactiveError::CircularBinding {
            binding: binding.id,
        });
        return cached(binding);
    }
    if state.dirty.get() && !binding.is_disposed() {
        binding.clear_dependencies();
        // Cleared before running so writes made during the run re-dirty it.
        state.dirty.set(false);
        runtime::count(|c| &c.computations);
        match binding::run(binding) {
            Ok(value) => {
                *state.cached.borrow_mut() = Some(value.raw());
                state.version.set(state.version.get() + 1);
            }
            Err(source) => {
                state.dirty.set(true);
                runtime::report_error(ReactiveError::Compute {
                    binding: binding.id,
                    context: binding.describe(),
                    source,
                });
            }
        }
    }
    cached(binding)
}

fn cached(binding: &BindingInner) -> Value {
    binding
        .computed()
        .and_then(|state| state.cached.borrow().clone())
        .map_or(Value::Null, wrap)
}

/// Mark a computed binding dirty; on the clean to dirty transition, notify
/// readers of the computed key.
pub(crate) fn invalidate(binding: &Rc<BindingInner>) {
    let Some(state) = binding.computed() else {
        return;
    };
    if state.dirty.replace(true) {
        return;
    }
    if let Some(owner) = state.owner.upgrade() {
        tracking::trigger(&owner, &Key::Field(state.key.clone()));
    }
}

/// Number of successful recomputations of `key`, or `None` if `key` is not
/// computed.
#[must_use]
pub fn computed_version(target: &Reactive, key: &str) -> Option<u64> {
    let binding = target.computed_ref(key)?;
    binding.computed().map(|state| state.version.get())
}
