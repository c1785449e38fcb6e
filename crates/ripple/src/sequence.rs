//! Mutating sequence methods on array wrappers.
//!
//! `push` and `pop` trigger precisely (the touched index plus
//! [`Key::Length`]). Methods that may move many positions (`shift`,
//! `insert`, `splice`, sorting, `reverse`, `fill`) trigger every dependent
//! of the wrapper and drop its nested-wrapper cache.
//!
//! Calling any of these on an object wrapper is a warned no-op.

use std::cmp::Ordering;

use crate::error::ReactiveError;
use crate::reactive::{Raw, Reactive, wrap};
use crate::runtime;
use crate::scheduler;
use crate::tracking;
use crate::value::{Key, Value};

impl Reactive {
    fn mutate_sequence<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Option<R> {
        let Raw::Array(array) = &self.inner.raw else {
            runtime::report_warning(ReactiveError::NotASequence {
                path: self.path().to_owned(),
                operation,
            });
            return None;
        };
        let result = f(&mut array.borrow_mut());
        Some(result)
    }

    /// Rewrite the whole sequence from a snapshot, so user callbacks can
    /// read the wrapper while they run. Triggers only if an element changed.
    fn rewrite_sequence(&self, operation: &'static str, f: impl FnOnce(&mut Vec<Value>)) {
        let Some(mut items) = self.mutate_sequence(operation, |items| items.clone()) else {
            return;
        };
        f(&mut items);
        let changed = self
            .mutate_sequence(operation, |current| {
                let changed = current.len() != items.len()
                    || current.iter().zip(items.iter()).any(|(a, b)| !a.same(b));
                if changed {
                    std::mem::swap(current, &mut items);
                }
                changed
            })
            .unwrap_or(false);
        drop(items);
        if changed {
            self.shifted();
        }
    }

    fn shifted(&self) {
        self.forget_children();
        tracking::trigger_all(self);
    }

    /// Append `value`. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into().raw();
        let Some(len) = self.mutate_sequence("push", |items| {
            items.push(value);
            items.len()
        }) else {
            return 0;
        };
        scheduler::batch(|| {
            tracking::trigger(self, &Key::Index(len - 1));
            tracking::trigger(self, &Key::Length);
        });
        len
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        let (value, len) = self.mutate_sequence("pop", |items| {
            let value = items.pop();
            (value, items.len())
        })?;
        let value = value?;
        let key = Key::Index(len);
        self.forget_child(&key);
        scheduler::batch(|| {
            tracking::trigger(self, &key);
            tracking::trigger(self, &Key::Length);
        });
        Some(wrap(value))
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let value = self
            .mutate_sequence("shift", |items| {
                if items.is_empty() {
                    None
                } else {
                    Some(items.remove(0))
                }
            })
            .flatten()?;
        self.shifted();
        Some(wrap(value))
    }

    /// Insert `value` at `index` (clamped to the length). Returns the new
    /// length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> usize {
        let value = value.into().raw();
        let Some(len) = self.mutate_sequence("insert", |items| {
            let index = index.min(items.len());
            items.insert(index, value);
            items.len()
        }) else {
            return 0;
        };
        self.shifted();
        len
    }

    /// Remove up to `delete_count` elements starting at `start` and insert
    /// `items` in their place. Returns the removed elements.
    pub fn splice<V: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = V>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = items.into_iter().map(|v| v.into().raw()).collect();
        let nothing_inserted = inserted.is_empty();
        let Some(removed) = self.mutate_sequence("splice", |current| {
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            current.splice(start..end, inserted).collect::<Vec<_>>()
        }) else {
            return Vec::new();
        };
        if !(removed.is_empty() && nothing_inserted) {
            self.shifted();
        }
        removed.into_iter().map(wrap).collect()
    }

    /// Stable sort with `compare`, which receives raw elements.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        self.rewrite_sequence("sort", |items| items.sort_by(|a, b| compare(a, b)));
    }

    /// Stable sort: numbers ascending before everything else, the rest by
    /// display string.
    pub fn sort(&self) {
        self.sort_by(|a, b| match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.to_display_string().cmp(&b.to_display_string()),
        });
    }

    pub fn reverse(&self) {
        self.rewrite_sequence("reverse", |items| items.reverse());
    }

    /// Overwrite every element with `value`.
    pub fn fill(&self, value: impl Into<Value>) {
        let value = value.into().raw();
        self.rewrite_sequence("fill", |items| items.fill(value));
    }
}

#[cfg(test)]
mod tests {
    use crate::{Key, Reactive, Value, effect, reactive, reset};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    fn list(json: serde_json::Value) -> Reactive {
        reset();
        reactive(json).expect("array")
    }

    fn watch(s: &Reactive, key: impl Into<Key>) -> Rc<Cell<u32>> {
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let reader = s.clone();
        let key = key.into();
        effect(move || {
            counter.set(counter.get() + 1);
            reader.get(key.clone());
        });
        runs
    }

    #[test]
    fn push_triggers_length_and_new_index_once() {
        let s = list(json!([1]));
        let len = watch(&s, Key::Length);
        let first = watch(&s, 0usize);
        assert_eq!(s.push(2), 2);
        assert_eq!((len.get(), first.get()), (2, 1));
        assert_eq!(s.to_json(), json!([1, 2]));
    }

    #[test]
    fn pop_returns_wrapped_value() {
        let s = list(json!([1, { "a": 1 }]));
        let len = watch(&s, Key::Length);
        let popped = s.pop().expect("non-empty");
        assert!(crate::is_reactive(&popped));
        assert_eq!(len.get(), 2);
        assert_eq!(s.pop(), Some(Value::from(1)));
        assert_eq!(s.pop(), None);
        assert_eq!(len.get(), 3);
    }

    #[test]
    fn shifting_operations_trigger_every_dependent() {
        let s = list(json!([3, 1, 2]));
        let last = watch(&s, 2usize);
        s.shift();
        assert_eq!(last.get(), 2);
        s.insert(0, 9);
        assert_eq!(last.get(), 3);
        assert_eq!(s.splice(1, 1, [7, 8]), vec![Value::from(1)]);
        assert_eq!(last.get(), 4);
        assert_eq!(s.to_json(), json!([9, 7, 8, 2]));
    }

    #[test]
    fn empty_splice_does_not_trigger() {
        let s = list(json!([1]));
        let len = watch(&s, Key::Length);
        assert!(s.splice(5, 3, Vec::<Value>::new()).is_empty());
        assert_eq!(len.get(), 1);
    }

    #[test]
    fn sort_reverse_fill() {
        let s = list(json!([3, "b", 1, "a"]));
        let len = watch(&s, Key::Length);
        s.sort();
        assert_eq!(s.to_json(), json!([1, 3, "a", "b"]));
        assert_eq!(len.get(), 2);
        s.sort();
        assert_eq!(len.get(), 2);
        s.reverse();
        assert_eq!(s.to_json(), json!(["b", "a", 3, 1]));
        s.fill(0);
        assert_eq!(s.to_json(), json!([0, 0, 0, 0]));
        s.fill(0);
        assert_eq!(len.get(), 4);
    }

    #[test]
    fn sort_comparator_may_read_the_wrapper() {
        let s = list(json!([2, 1]));
        let reader = s.clone();
        s.sort_by(|a, b| {
            assert_eq!(reader.len(), 2);
            a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(std::cmp::Ordering::Equal)
        });
        assert_eq!(s.to_json(), json!([1, 2]));
    }

    #[test]
    fn nested_wrappers_refresh_after_shift() {
        let s = list(json!([{ "n": 1 }, { "n": 2 }]));
        let before = s.get(0usize);
        s.shift();
        let after = s.get(0usize);
        assert!(!before.same(&after));
        assert_eq!(after.to_json(), json!({ "n": 2 }));
    }

    #[test]
    #[traced_test]
    fn sequence_methods_on_objects_are_ignored() {
        reset();
        let o = reactive(json!({})).expect("object");
        assert_eq!(o.push(1), 0);
        assert!(o.pop().is_none());
        assert!(logs_contain("push called on non-sequence"));
    }
}
