#![forbid(unsafe_code)]

//! Observable wrappers around plain structured data.
//!
//! A [`Reactive`] wraps exactly one raw [`Object`] or [`Array`]. Reads through
//! the wrapper record a dependency for the binding currently executing;
//! writes and deletes through the wrapper notify every binding that last read
//! the touched key.
//!
//! # Architecture
//!
//! Each wrapper owns its slice of the dependency graph: a map from [`Key`] to
//! the bindings that read it, held as `Weak` so the graph never keeps a
//! binding alive. Nested structured values are wrapped lazily on first read
//! and cached per key, so the parent keeps its children (and their graph
//! entries) alive for as long as the parent lives.
//!
//! # Invariants
//!
//! 1. One wrapper per raw container: wrapping a container that already has a
//!    wrapper returns that wrapper. A wrapper stays registered while its
//!    container, a handle to it, or a binding that read it is still alive.
//! 2. Writing a value identical to the current one is a no-op.
//! 3. A wrapper's graph entry contains a binding iff that binding's
//!    dependency list names `(wrapper, key)`.
//! 4. Computed keys are read-only through the wrapper.
//!
//! # Failure Modes
//!
//! - Nesting deeper than [`ReactiveConfig::max_depth`](crate::ReactiveConfig)
//!   yields raw, untracked values for the deeper branch (warned once per
//!   wrapper).
//! - Keys of the wrong shape (`"name"` on an array) are ignored with a
//!   warning.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::binding::{BindingId, BindingInner};
use crate::computed;
use crate::error::ReactiveError;
use crate::runtime::{self, with_runtime};
use crate::scheduler;
use crate::tracking;
use crate::value::{Array, Key, Object, Value};

// ---------------------------------------------------------------------------
// Raw
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) enum Raw {
    Object(Object),
    Array(Array),
}

impl Raw {
    pub(crate) fn addr(&self) -> usize {
        match self {
            Self::Object(object) => object.addr(),
            Self::Array(array) => array.addr(),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Self::Object(object) => object.strong_count(),
            Self::Array(array) => array.strong_count(),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Object(object) => Value::Object(object.clone()),
            Self::Array(array) => Value::Array(array.clone()),
        }
    }

    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(object) => Some(Self::Object(object.clone())),
            Value::Array(array) => Some(Self::Array(array.clone())),
            Value::Reactive(reactive) => Some(reactive.inner.raw.clone()),
            _ => None,
        }
    }
}

type Dependents = BTreeMap<BindingId, Weak<BindingInner>>;

pub(crate) struct ReactiveInner {
    pub(crate) raw: Raw,
    path: String,
    depth: usize,
    deps: RefCell<AHashMap<Key, Dependents>>,
    children: RefCell<AHashMap<Key, Reactive>>,
    computed: RefCell<AHashMap<String, Rc<BindingInner>>>,
    depth_warned: Cell<bool>,
}

// ---------------------------------------------------------------------------
// Reactive
// ---------------------------------------------------------------------------

/// Observable handle to a raw object or array.
///
/// Cloning the handle is cheap and yields the same wrapper.
#[derive(Clone)]
pub struct Reactive {
    pub(crate) inner: Rc<ReactiveInner>,
}

/// Non-owning handle to a [`Reactive`].
#[derive(Clone)]
pub struct WeakReactive {
    inner: Weak<ReactiveInner>,
}

impl WeakReactive {
    #[must_use]
    pub fn upgrade(&self) -> Option<Reactive> {
        self.inner.upgrade().map(|inner| Reactive { inner })
    }
}

impl fmt::Debug for WeakReactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakReactive")
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("path", &self.inner.path)
            .field("raw", &self.inner.raw.to_value())
            .finish()
    }
}

/// Wrap `value` so reads and writes through it are observed.
///
/// Objects and arrays become [`Value::Reactive`]; wrappers are returned
/// unchanged; scalars pass through untouched.
pub fn wrap(value: impl Into<Value>) -> Value {
    let value = value.into();
    match &value {
        Value::Object(_) | Value::Array(_) => match Raw::from_value(&value) {
            Some(raw) => Value::Reactive(wrap_raw(raw, || "$".to_owned(), 0)),
            None => value,
        },
        _ => value,
    }
}

/// Like [`wrap`], but returns the wrapper handle directly. `None` for
/// scalars.
pub fn reactive(value: impl Into<Value>) -> Option<Reactive> {
    match wrap(value) {
        Value::Reactive(reactive) => Some(reactive),
        _ => None,
    }
}

/// The raw form of `value`: wrappers yield the very container they wrap.
#[must_use]
pub fn unwrap(value: &Value) -> Value {
    value.raw()
}

#[must_use]
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

pub(crate) fn wrap_raw(raw: Raw, path: impl FnOnce() -> String, depth: usize) -> Reactive {
    let addr = raw.addr();
    let cached = with_runtime(|rt| rt.identity.borrow().get(&addr).cloned());
    if let Some(existing) = cached {
        return existing;
    }
    let reactive = Reactive {
        inner: Rc::new(ReactiveInner {
            raw,
            path: path(),
            depth,
            deps: RefCell::new(AHashMap::new()),
            children: RefCell::new(AHashMap::new()),
            computed: RefCell::new(AHashMap::new()),
            depth_warned: Cell::new(false),
        }),
    };
    let due = with_runtime(|rt| {
        let mut identity = rt.identity.borrow_mut();
        identity.insert(addr, reactive.clone());
        identity.len() >= rt.identity_prune_at.get()
    });
    if due {
        prune_identity();
    }
    reactive
}

/// Drop table entries whose wrapper and raw container are referenced by
/// nothing but the table itself.
///
/// Releasing a wrapper releases its cached children, which may in turn
/// become collectable, so this repeats until a pass removes nothing.
pub(crate) fn prune_identity() {
    let mut pruned = 0;
    loop {
        let released: Vec<Reactive> = with_runtime(|rt| {
            let mut identity = rt.identity.borrow_mut();
            let stale: Vec<usize> = identity
                .iter()
                .filter(|(_, wrapper)| wrapper.is_collectable())
                .map(|(addr, _)| *addr)
                .collect();
            stale
                .iter()
                .filter_map(|addr| identity.remove(addr))
                .collect()
        });
        if released.is_empty() {
            break;
        }
        pruned += released.len();
        drop(released);
    }
    let live = with_runtime(|rt| {
        let live = rt.identity.borrow().len();
        rt.identity_prune_at.set((live * 2).max(runtime::IDENTITY_PRUNE_FLOOR));
        live
    });
    if pruned > 0 {
        tracing::trace!(pruned, live, "pruned wrapper identity table");
    }
}

fn child_path(parent: &str, key: &Key) -> String {
    match key {
        Key::Index(index) => format!("{parent}[{index}]"),
        other => format!("{parent}.{other}"),
    }
}

impl Reactive {
    /// Non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakReactive {
        WeakReactive {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Held only by the identity table, over a container held only by this
    /// wrapper.
    fn is_collectable(&self) -> bool {
        Rc::strong_count(&self.inner) == 1 && self.inner.raw.strong_count() == 1
    }

    /// The wrapped container as a plain value.
    #[must_use]
    pub fn raw(&self) -> Value {
        self.inner.raw.to_value()
    }

    /// Key path from the root wrapper, e.g. `$.user.tags[2]`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.inner.raw, Raw::Array(_))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self.inner.raw, Raw::Object(_))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn normalize(&self, key: Key) -> Key {
        match (&self.inner.raw, key) {
            (Raw::Array(_), Key::Field(name)) => {
                if name == "length" {
                    Key::Length
                } else {
                    match name.parse::<usize>() {
                        Ok(index) => Key::Index(index),
                        Err(_) => Key::Field(name),
                    }
                }
            }
            (Raw::Object(_), Key::Index(index)) => Key::Field(index.to_string()),
            (_, key) => key,
        }
    }

    fn computed_binding(&self, key: &Key) -> Option<(String, Rc<BindingInner>)> {
        let Key::Field(name) = key else { return None };
        let binding = self.inner.computed.borrow().get(name).cloned()?;
        Some((name.clone(), binding))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Tracked read. Structured values come back wrapped; reading the same
    /// key twice yields the same nested wrapper.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.normalize(key.into());
        if let Some((name, binding)) = self.computed_binding(&key) {
            return computed::read(self, &name, &binding);
        }
        tracking::track(self, &key);
        self.read_raw(&key)
    }

    /// Untracked read.
    pub fn peek(&self, key: impl Into<Key>) -> Value {
        tracking::untrack(|| self.get(key))
    }

    /// Whether `key` is present. Tracks the key and the key set.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = self.normalize(key.into());
        tracking::track(self, &key);
        tracking::track(self, &Key::Length);
        if self.computed_binding(&key).is_some() {
            return true;
        }
        match (&self.inner.raw, &key) {
            (Raw::Object(object), Key::Field(name)) => object.contains(name),
            (Raw::Array(array), Key::Index(index)) => *index < array.len(),
            (_, Key::Length) => true,
            _ => false,
        }
    }

    /// Number of fields or elements. Tracks the key set.
    pub fn len(&self) -> usize {
        tracking::track(self, &Key::Length);
        self.raw_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names or indices, in order. Tracks the key set.
    pub fn keys(&self) -> Vec<Key> {
        tracking::track(self, &Key::Length);
        match &self.inner.raw {
            Raw::Object(object) => object.keys().into_iter().map(Key::Field).collect(),
            Raw::Array(array) => (0..array.len()).map(Key::Index).collect(),
        }
    }

    /// Tracked read of every value, in key order.
    pub fn values(&self) -> Vec<Value> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Tracked read of every `(key, value)` pair, in key order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.clone());
                (key, value)
            })
            .collect()
    }

    /// Untracked JSON snapshot of the raw container.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.raw().to_json()
    }

    pub(crate) fn raw_len(&self) -> usize {
        match &self.inner.raw {
            Raw::Object(object) => object.len(),
            Raw::Array(array) => array.len(),
        }
    }

    fn read_raw(&self, key: &Key) -> Value {
        let value = match (&self.inner.raw, key) {
            (Raw::Object(object), Key::Field(name)) => object.get(name).unwrap_or_default(),
            (Raw::Array(array), Key::Index(index)) => array.get(*index).unwrap_or_default(),
            (_, Key::Length) => Value::from(self.raw_len()),
            _ => Value::Null,
        };
        self.wrap_child(key, value)
    }

    fn wrap_child(&self, key: &Key, value: Value) -> Value {
        let Some(raw) = Raw::from_value(&value) else {
            return value;
        };
        if raw.addr() == self.inner.raw.addr() {
            return Value::Reactive(self.clone());
        }
        if let Some(child) = self.inner.children.borrow().get(key) {
            if child.inner.raw.addr() == raw.addr() {
                return Value::Reactive(child.clone());
            }
        }
        let depth = self.inner.depth + 1;
        let limit = runtime::config().max_depth;
        if depth > limit {
            if !self.inner.depth_warned.replace(true) {
                runtime::report_warning(ReactiveError::DepthExceeded {
                    path: child_path(&self.inner.path, key),
                    depth,
                    limit,
                });
            }
            return raw.to_value();
        }
        let child = wrap_raw(raw, || child_path(&self.inner.path, key), depth);
        let previous = self
            .inner
            .children
            .borrow_mut()
            .insert(key.clone(), child.clone());
        drop(previous);
        Value::Reactive(child)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `key`. Returns `true` when the stored value changed.
    ///
    /// Wrappers are stored in raw form. Identical values are ignored; on
    /// arrays an index past the end pads with `Null`, and writing
    /// [`Key::Length`] truncates or pads.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = self.normalize(key.into());
        let value = value.into().raw();
        if let Some((name, _)) = self.computed_binding(&key) {
            self.warn_read_only(name);
            return false;
        }
        match (&self.inner.raw, key) {
            (Raw::Object(object), Key::Field(name)) => {
                let old = object.get(&name);
                if old.as_ref().is_some_and(|old| old.same(&value)) {
                    return false;
                }
                let key = Key::Field(name.clone());
                let previous = object.insert(name, value);
                drop(previous);
                self.forget_child(&key);
                if old.is_none() {
                    scheduler::batch(|| {
                        tracking::trigger(self, &key);
                        tracking::trigger(self, &Key::Length);
                    });
                } else {
                    tracking::trigger(self, &key);
                }
                true
            }
            (Raw::Array(array), Key::Index(index)) => self.set_index(array, index, value),
            (Raw::Array(array), Key::Length) => self.set_length(array, &value),
            (_, key) => {
                runtime::report_warning(ReactiveError::InvalidKey {
                    path: self.inner.path.clone(),
                    key,
                });
                false
            }
        }
    }

    fn set_index(&self, array: &Array, index: usize, value: Value) -> bool {
        let len = array.len();
        if index >= len && index >= runtime::config().max_sequence_len {
            runtime::report_warning(ReactiveError::InvalidKey {
                path: self.inner.path.clone(),
                key: Key::Index(index),
            });
            return false;
        }
        if index < len {
            let unchanged = array.get(index).is_some_and(|old| old.same(&value));
            if unchanged {
                return false;
            }
            let previous = std::mem::replace(&mut array.borrow_mut()[index], value);
            drop(previous);
            let key = Key::Index(index);
            self.forget_child(&key);
            tracking::trigger(self, &key);
        } else if index == len {
            array.borrow_mut().push(value);
            scheduler::batch(|| {
                tracking::trigger(self, &Key::Index(index));
                tracking::trigger(self, &Key::Length);
            });
        } else {
            {
                let mut items = array.borrow_mut();
                items.resize(index, Value::Null);
                items.push(value);
            }
            tracking::trigger_all(self);
        }
        true
    }

    fn set_length(&self, array: &Array, value: &Value) -> bool {
        let new_len = match value.as_f64() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n < usize::MAX as f64 => n as usize,
            _ => {
                runtime::report_warning(ReactiveError::InvalidKey {
                    path: self.inner.path.clone(),
                    key: Key::Length,
                });
                return false;
            }
        };
        let len = array.len();
        if new_len == len {
            return false;
        }
        if new_len > len && new_len > runtime::config().max_sequence_len {
            runtime::report_warning(ReactiveError::InvalidKey {
                path: self.inner.path.clone(),
                key: Key::Length,
            });
            return false;
        }
        let removed: Vec<Value> = {
            let mut items = array.borrow_mut();
            if new_len < items.len() {
                items.split_off(new_len)
            } else {
                items.resize(new_len, Value::Null);
                Vec::new()
            }
        };
        drop(removed);
        self.forget_children();
        tracking::trigger_all(self);
        true
    }

    /// Remove `key`. Returns `true` when something was removed.
    ///
    /// Object fields are removed outright; array elements become `Null` so
    /// later indices keep their positions.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = self.normalize(key.into());
        if let Some((name, _)) = self.computed_binding(&key) {
            self.warn_read_only(name);
            return false;
        }
        match (&self.inner.raw, &key) {
            (Raw::Object(object), Key::Field(name)) => {
                let Some(removed) = object.remove(name) else {
                    return false;
                };
                drop(removed);
                self.forget_child(&key);
                scheduler::batch(|| {
                    tracking::trigger(self, &key);
                    tracking::trigger(self, &Key::Length);
                });
                true
            }
            (Raw::Array(array), Key::Index(index)) if *index < array.len() => {
                let previous = std::mem::take(&mut array.borrow_mut()[*index]);
                drop(previous);
                self.forget_child(&key);
                tracking::trigger(self, &key);
                true
            }
            _ => false,
        }
    }

    fn warn_read_only(&self, key: String) {
        runtime::report_warning(ReactiveError::ReadOnlyComputed {
            path: self.inner.path.clone(),
            key,
        });
    }

    // -----------------------------------------------------------------------
    // Graph bookkeeping
    // -----------------------------------------------------------------------

    /// Record `binding` as a dependent of `key`. Returns `false` if the edge
    /// already existed.
    pub(crate) fn add_dependent(&self, key: &Key, binding: &Rc<BindingInner>) -> bool {
        let mut deps = self.inner.deps.borrow_mut();
        let entry = deps.entry(key.clone()).or_default();
        if entry.contains_key(&binding.id) {
            return false;
        }
        entry.insert(binding.id, Rc::downgrade(binding));
        true
    }

    pub(crate) fn remove_dependent(&self, key: &Key, id: BindingId) {
        let mut deps = self.inner.deps.borrow_mut();
        if let Some(entry) = deps.get_mut(key) {
            entry.remove(&id);
            if entry.is_empty() {
                deps.remove(key);
            }
        }
    }

    /// Live dependents of `key`, in creation order. Dead entries are pruned.
    pub(crate) fn dependents(&self, key: &Key) -> Vec<Rc<BindingInner>> {
        let mut deps = self.inner.deps.borrow_mut();
        let Some(entry) = deps.get_mut(key) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(entry.len());
        entry.retain(|_, weak| match weak.upgrade() {
            Some(binding) => {
                live.push(binding);
                true
            }
            None => false,
        });
        if entry.is_empty() {
            deps.remove(key);
        }
        live
    }

    /// Live dependents of every key, deduplicated, in creation order.
    pub(crate) fn all_dependents(&self) -> Vec<Rc<BindingInner>> {
        let deps = self.inner.deps.borrow();
        let mut all: BTreeMap<BindingId, Rc<BindingInner>> = BTreeMap::new();
        for entry in deps.values() {
            for (id, weak) in entry {
                if let Some(binding) = weak.upgrade() {
                    all.entry(*id).or_insert(binding);
                }
            }
        }
        all.into_values().collect()
    }

    /// `(key, binding ids)` for every key with live dependents, sorted by key.
    pub(crate) fn dependency_snapshot(&self) -> Vec<(Key, Vec<BindingId>)> {
        let deps = self.inner.deps.borrow();
        let mut snapshot: Vec<(Key, Vec<BindingId>)> = deps
            .iter()
            .map(|(key, entry)| {
                let ids = entry
                    .iter()
                    .filter(|(_, weak)| weak.strong_count() > 0)
                    .map(|(id, _)| *id)
                    .collect::<Vec<_>>();
                (key.clone(), ids)
            })
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub(crate) fn forget_child(&self, key: &Key) {
        let removed = self.inner.children.borrow_mut().remove(key);
        drop(removed);
    }

    pub(crate) fn forget_children(&self) {
        let removed = std::mem::take(&mut *self.inner.children.borrow_mut());
        drop(removed);
    }

    /// Install a computed accessor, returning the one it replaces.
    pub(crate) fn install_computed(
        &self,
        key: String,
        binding: Rc<BindingInner>,
    ) -> Option<Rc<BindingInner>> {
        self.inner.computed.borrow_mut().insert(key, binding)
    }

    pub(crate) fn take_computed(&self, key: &str) -> Option<Rc<BindingInner>> {
        self.inner.computed.borrow_mut().remove(key)
    }

    pub(crate) fn computed_ref(&self, key: &str) -> Option<Rc<BindingInner>> {
        self.inner.computed.borrow().get(key).cloned()
    }

    pub(crate) fn normalize_key(&self, key: Key) -> Key {
        self.normalize(key)
    }
}
