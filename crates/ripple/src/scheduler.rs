//! Batching and flush ordering.
//!
//! Outside a batch, a triggered binding executes immediately. Inside one,
//! it joins the pending set (keyed by id, so membership is idempotent) and
//! runs once when the outermost batch returns.
//!
//! # Flush order
//!
//! Untargeted bindings run first in creation order, then targeted bindings
//! in document order of their targets. Bindings triggered while a pass runs
//! land in a fresh pending set and are drained by a further pass of the same
//! flush, up to [`ReactiveConfig::max_flush_passes`](crate::ReactiveConfig).

use std::rc::Rc;

use crate::binding::{self, BindingId, BindingInner};
use crate::error::ReactiveError;
use crate::runtime::{self, with_runtime};
use crate::tracking;

struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let depth = with_runtime(|rt| {
            let depth = rt.batch_depth.get().saturating_sub(1);
            rt.batch_depth.set(depth);
            depth
        });
        if depth == 0 && !std::thread::panicking() {
            flush();
        }
    }
}

/// Run `f` with updates deferred; every binding triggered inside runs at
/// most once, after the outermost batch returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    with_runtime(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
    let _guard = BatchGuard;
    f()
}

/// Whether a batch is currently open.
#[must_use]
pub fn is_batching() -> bool {
    with_runtime(|rt| rt.batch_depth.get() > 0)
}

pub(crate) fn schedule_update(binding: Rc<BindingInner>) {
    if tracking::is_executing(binding.id) {
        runtime::report_warning(ReactiveError::CircularBinding {
            binding: binding.id,
        });
        return;
    }
    let deferred = with_runtime(|rt| {
        if rt.batch_depth.get() > 0 || rt.flushing.get() {
            rt.pending.borrow_mut().insert(binding.id, Rc::clone(&binding));
            true
        } else {
            false
        }
    });
    if !deferred {
        binding::execute(&binding);
    }
}

/// Drop `id` from the pending set.
pub(crate) fn discard(id: BindingId) {
    let removed = with_runtime(|rt| rt.pending.borrow_mut().remove(&id));
    drop(removed);
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_runtime(|rt| rt.flushing.set(false));
    }
}

fn flush() {
    if with_runtime(|rt| rt.flushing.replace(true)) {
        return;
    }
    let _guard = FlushGuard;
    let limit = runtime::config().max_flush_passes;
    let span = tracing::debug_span!(
        "ripple.flush",
        passes = tracing::field::Empty,
        executed = tracing::field::Empty
    );
    let _enter = span.enter();

    let mut passes = 0usize;
    let mut executed = 0usize;
    loop {
        let pass: Vec<Rc<BindingInner>> =
            with_runtime(|rt| std::mem::take(&mut *rt.pending.borrow_mut()))
                .into_values()
                .collect();
        if pass.is_empty() {
            break;
        }
        if passes == limit {
            runtime::report_warning(ReactiveError::FlushLimit {
                limit,
                dropped: pass.len(),
            });
            break;
        }
        passes += 1;
        for binding in in_document_order(pass) {
            binding::execute(&binding);
            executed += 1;
        }
    }

    span.record("passes", passes);
    span.record("executed", executed);
    runtime::count(|c| &c.flushes);
}

fn in_document_order(mut pass: Vec<Rc<BindingInner>>) -> Vec<Rc<BindingInner>> {
    let tree = runtime::render_tree();
    pass.sort_by_cached_key(|binding| match binding.target() {
        None => (0u8, 0usize, binding.id),
        Some(node) => (
            1,
            tree.as_ref()
                .and_then(|tree| tree.document_position(node))
                .unwrap_or(usize::MAX),
            binding.id,
        ),
    });
    pass
}
