//! Dependency tracking and trigger dispatch.
//!
//! The runtime keeps a stack of tracking frames. A frame holding a binding
//! attributes every tracked read to that binding; an empty frame (pushed by
//! [`untrack`]) suppresses tracking for its extent.
//!
//! # Invariants
//!
//! 1. Edges are recorded in both directions or not at all.
//! 2. A trigger reaching a computed binding marks it dirty; it never
//!    recomputes eagerly.
//! 3. While paused, triggers are recorded (deduplicated) instead of
//!    scheduling work, but computed bindings are still marked dirty.

use std::rc::Rc;

use crate::binding::{BindingId, BindingInner};
use crate::computed;
use crate::error::ReactiveError;
use crate::reactive::{Reactive, WeakReactive};
use crate::runtime::{self, with_runtime};
use crate::scheduler;
use crate::value::Key;

/// A trigger recorded while tracking was paused.
pub(crate) struct PausedTrigger {
    source: WeakReactive,
    /// `None` triggers every key.
    key: Option<Key>,
}

impl PausedTrigger {
    fn matches(&self, source: &Reactive, key: Option<&Key>) -> bool {
        self.key.as_ref() == key
            && self
                .source
                .upgrade()
                .is_some_and(|existing| existing.ptr_eq(source))
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Pops its frame on drop, including during unwinding.
pub(crate) struct FrameGuard(());

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let popped = with_runtime(|rt| rt.stack.borrow_mut().pop());
        drop(popped);
    }
}

pub(crate) fn enter(frame: Option<Rc<BindingInner>>) -> FrameGuard {
    with_runtime(|rt| rt.stack.borrow_mut().push(frame));
    FrameGuard(())
}

/// The binding reads are currently attributed to.
pub(crate) fn current() -> Option<Rc<BindingInner>> {
    with_runtime(|rt| rt.stack.borrow().last().cloned().flatten())
}

pub(crate) fn is_executing(id: BindingId) -> bool {
    with_runtime(|rt| {
        rt.stack
            .borrow()
            .iter()
            .flatten()
            .any(|binding| binding.id == id)
    })
}

/// Run `f` without attributing its reads to the current binding.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _frame = enter(None);
    f()
}

/// Whether reads right now would be recorded as dependencies.
#[must_use]
pub fn is_tracking() -> bool {
    current().is_some()
}

// ---------------------------------------------------------------------------
// Track / trigger
// ---------------------------------------------------------------------------

pub(crate) fn track(target: &Reactive, key: &Key) {
    let Some(binding) = current() else { return };
    if binding.is_disposed() {
        return;
    }
    if target.add_dependent(key, &binding) {
        binding.add_dependency(target, key.clone());
    }
}

pub(crate) fn trigger(target: &Reactive, key: &Key) {
    dispatch(target, Some(key));
}

pub(crate) fn trigger_all(target: &Reactive) {
    dispatch(target, None);
}

fn dispatch(target: &Reactive, key: Option<&Key>) {
    let bindings = match key {
        Some(key) => target.dependents(key),
        None => target.all_dependents(),
    };
    if with_runtime(|rt| rt.paused.get()) {
        record_paused(target, key);
        for binding in bindings.iter().filter(|b| b.is_computed()) {
            computed::invalidate(binding);
        }
        return;
    }
    if bindings.is_empty() {
        return;
    }

    let limit = runtime::config().max_depth;
    let depth = with_runtime(|rt| rt.trigger_depth.get()) + 1;
    if depth > limit {
        runtime::report_warning(ReactiveError::DepthExceeded {
            path: target.path().to_owned(),
            depth,
            limit,
        });
        return;
    }
    let _depth = DepthGuard::enter(depth);
    for binding in bindings {
        if binding.is_disposed() {
            continue;
        }
        if binding.is_computed() {
            computed::invalidate(&binding);
        } else {
            scheduler::schedule_update(binding);
        }
    }
}

struct DepthGuard {
    previous: usize,
}

impl DepthGuard {
    fn enter(depth: usize) -> Self {
        let previous = with_runtime(|rt| rt.trigger_depth.replace(depth));
        Self { previous }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        with_runtime(|rt| rt.trigger_depth.set(previous));
    }
}

fn record_paused(target: &Reactive, key: Option<&Key>) {
    let seen = with_runtime(|rt| {
        rt.paused_triggers
            .borrow()
            .iter()
            .any(|recorded| recorded.matches(target, key))
    });
    if seen {
        return;
    }
    let recorded = PausedTrigger {
        source: target.downgrade(),
        key: key.cloned(),
    };
    with_runtime(|rt| rt.paused_triggers.borrow_mut().push(recorded));
}

// ---------------------------------------------------------------------------
// Manual notification and pausing
// ---------------------------------------------------------------------------

/// Trigger the dependents of `key` as if it had been written.
///
/// Use after mutating a raw container directly.
pub fn notify(target: &Reactive, key: impl Into<Key>) {
    let key = target.normalize_key(key.into());
    trigger(target, &key);
}

/// Trigger every dependent of `target`.
pub fn notify_all(target: &Reactive) {
    trigger_all(target);
}

/// Record triggers instead of running bindings until
/// [`resume_tracking`] is called.
pub fn pause_tracking() {
    with_runtime(|rt| rt.paused.set(true));
}

/// Stop recording triggers. With `flush`, the recorded triggers are replayed
/// inside one batch; otherwise they are discarded.
pub fn resume_tracking(flush: bool) {
    let recorded = with_runtime(|rt| {
        rt.paused.set(false);
        std::mem::take(&mut *rt.paused_triggers.borrow_mut())
    });
    tracing::debug!(recorded = recorded.len(), flush, "resumed tracking");
    if !flush {
        return;
    }
    scheduler::batch(|| {
        for PausedTrigger { source, key } in recorded {
            let Some(source) = source.upgrade() else { continue };
            match key {
                Some(key) => trigger(&source, &key),
                None => trigger_all(&source),
            }
        }
    });
}

#[must_use]
pub fn is_paused() -> bool {
    with_runtime(|rt| rt.paused.get())
}
