//! Property-based invariant tests for the reactive engine.
//!
//! These tests verify invariants that must hold for **any** sequence of
//! mutations:
//!
//! 1. Wrapping is idempotent and `unwrap` returns the identical raw value.
//! 2. Writing a field to its current value runs no binding.
//! 3. Inside one batch, each affected binding runs at most once and observes
//!    the final value.
//! 4. A binding's dependencies are exactly the keys read by its latest run.
//! 5. Clean computed reads never re-invoke the compute function.
//! 6. Sequence mutations leave the wrapper agreeing with a plain `Vec` model.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use ripple::{
    Array, Key, Object, Reactive, Value, batch, define_computed, effect, reactive, reset, unwrap,
    wrap,
};

// ── Helpers ─────────────────────────────────────────────────────────────

const FIELDS: [&str; 4] = ["a", "b", "c", "d"];

/// Object with every field in `FIELDS` set to 0.
fn fresh_state() -> Reactive {
    reset();
    reactive(Object::from_entries(FIELDS.iter().map(|f| (*f, 0)))).expect("object")
}

fn counted_effect(read: impl Fn() + 'static) -> Rc<Cell<u32>> {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    effect(move || {
        counter.set(counter.get() + 1);
        read();
    });
    runs
}

/// Writes as (field index, value) pairs.
fn writes() -> impl Strategy<Value = Vec<(usize, i32)>> {
    proptest::collection::vec((0..FIELDS.len(), -3i32..=3), 1..40)
}

#[derive(Debug, Clone)]
enum SeqOp {
    Push(i32),
    Pop,
    Shift,
    Insert(usize, i32),
    Splice(usize, usize, Vec<i32>),
    Reverse,
    Sort,
    SetIndex(usize, i32),
}

fn seq_op() -> impl Strategy<Value = SeqOp> {
    prop_oneof![
        (-50i32..50).prop_map(SeqOp::Push),
        Just(SeqOp::Pop),
        Just(SeqOp::Shift),
        (0usize..12, -50i32..50).prop_map(|(i, v)| SeqOp::Insert(i, v)),
        (0usize..12, 0usize..4, proptest::collection::vec(-50i32..50, 0..3))
            .prop_map(|(s, d, items)| SeqOp::Splice(s, d, items)),
        Just(SeqOp::Reverse),
        Just(SeqOp::Sort),
        (0usize..12, -50i32..50).prop_map(|(i, v)| SeqOp::SetIndex(i, v)),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Idempotent wrapping
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn wrap_is_idempotent(items in proptest::collection::vec(-100i32..100, 0..10)) {
        reset();
        let raw = Array::from_iter(items);
        let once = wrap(raw.clone());
        let twice = wrap(once.clone());
        prop_assert!(once.same(&twice));
        prop_assert!(once.as_reactive() == twice.as_reactive());
        prop_assert!(wrap(raw.clone()).as_reactive() == once.as_reactive());
        prop_assert!(unwrap(&once).same(&Value::from(raw)));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. No-op on equal write
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn equal_writes_run_nothing(value in -100i32..100) {
        let s = fresh_state();
        s.set("a", value);
        let reader = s.clone();
        let runs = counted_effect(move || { reader.get("a"); });
        prop_assert!(!s.set("a", value));
        prop_assert_eq!(runs.get(), 1);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Batch coalescing
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn batch_runs_each_binding_at_most_once(ops in writes()) {
        let s = fresh_state();
        let observed: Vec<Rc<RefCell<Value>>> = FIELDS
            .iter()
            .map(|_| Rc::new(RefCell::new(Value::Null)))
            .collect();
        let runs: Vec<Rc<Cell<u32>>> = FIELDS
            .iter()
            .zip(observed.iter())
            .map(|(field, slot)| {
                let field = *field;
                let reader = s.clone();
                let slot = Rc::clone(slot);
                counted_effect(move || *slot.borrow_mut() = reader.get(field))
            })
            .collect();

        batch(|| {
            for (field, value) in &ops {
                s.set(FIELDS[*field], *value);
            }
        });

        for (i, field) in FIELDS.iter().enumerate() {
            prop_assert!(runs[i].get() <= 2, "{} ran {} times", field, runs[i].get());
            prop_assert_eq!(&*observed[i].borrow(), &s.peek(*field));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Dependency freshness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn dependencies_match_latest_reads(flags in proptest::collection::vec(any::<bool>(), 1..10)) {
        let s = fresh_state();
        s.set("cond", true);
        let reader = s.clone();
        let handle = effect(move || {
            if reader.get("cond").as_bool() == Some(true) {
                reader.get("a")
            } else {
                reader.get("b")
            }
        });
        for flag in flags {
            s.set("cond", flag);
            let expected = if flag { "a" } else { "b" };
            let keys: Vec<Key> = handle.dependencies().into_iter().map(|(_, k)| k).collect();
            prop_assert_eq!(keys, vec![Key::from("cond"), Key::from(expected)]);

            let runs = handle.run_count();
            let untaken = if flag { "b" } else { "a" };
            let next = s.peek(untaken).as_f64().unwrap_or_default() + 1.0;
            s.set(untaken, next);
            prop_assert_eq!(handle.run_count(), runs);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Computed laziness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn clean_reads_do_not_recompute(ops in writes(), reads in 1usize..5) {
        let s = fresh_state();
        let calls = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&calls);
        define_computed(&s, "sum", move |s| {
            counter.set(counter.get() + 1);
            FIELDS.iter().map(|f| s.get(*f).as_f64().unwrap_or_default()).sum::<f64>()
        });
        prop_assert_eq!(calls.get(), 0);

        for (field, value) in ops {
            s.set(FIELDS[field], value);
            let before = calls.get();
            let expected: f64 = FIELDS.iter().map(|f| s.peek(*f).as_f64().unwrap_or_default()).sum();
            for _ in 0..reads {
                prop_assert_eq!(s.get("sum"), Value::from(expected));
            }
            prop_assert!(calls.get() <= before + 1);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Sequence methods agree with a Vec model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn sequence_ops_match_vec_model(ops in proptest::collection::vec(seq_op(), 0..30)) {
        reset();
        let s = reactive(Array::new()).expect("array");
        let mut model: Vec<Option<i32>> = Vec::new();
        let len_seen = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&len_seen);
        let reader = s.clone();
        effect(move || sink.set(reader.len()));

        for op in ops {
            match op {
                SeqOp::Push(v) => { s.push(v); model.push(Some(v)); }
                SeqOp::Pop => { s.pop(); model.pop(); }
                SeqOp::Shift => {
                    s.shift();
                    if !model.is_empty() { model.remove(0); }
                }
                SeqOp::Insert(i, v) => {
                    s.insert(i, v);
                    model.insert(i.min(model.len()), Some(v));
                }
                SeqOp::Splice(start, delete, items) => {
                    s.splice(start, delete, items.clone());
                    let start = start.min(model.len());
                    let end = (start + delete).min(model.len());
                    model.splice(start..end, items.into_iter().map(Some));
                }
                SeqOp::Reverse => { s.reverse(); model.reverse(); }
                SeqOp::Sort => {
                    s.sort();
                    // Numbers before nulls, numbers ascending; stable.
                    model.sort_by(|a, b| match (a, b) {
                        (Some(x), Some(y)) => x.cmp(y),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    });
                }
                SeqOp::SetIndex(i, v) => {
                    s.set(i, v);
                    if i >= model.len() { model.resize(i, None); model.push(Some(v)); }
                    else { model[i] = Some(v); }
                }
            }
            let expected: Vec<Value> = model.iter().map(|v| Value::from(*v)).collect();
            prop_assert_eq!(s.raw(), Value::from(expected));
            prop_assert_eq!(len_seen.get(), model.len());
        }
    }
}
