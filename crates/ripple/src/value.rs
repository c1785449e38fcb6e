#![forbid(unsafe_code)]

//! Plain data managed by the engine.
//!
//! [`Value`] is the dynamic value every reactive read returns and every write
//! accepts. Scalars are compared by value; [`Object`] and [`Array`] are shared,
//! interior-mutable containers compared by *identity*, which is what lets the
//! wrapper layer cache one [`Reactive`] per raw container.
//!
//! # Invariants
//!
//! 1. `a.same(&b)` is identity for structured values and value equality for
//!    scalars (`NaN` is never the same as itself).
//! 2. `deep_eq` is structural and bounded; exceeding the bound reports
//!    "not equal" so callers err on the side of pushing an update.
//! 3. A `Value::Reactive` always wraps an `Object` or `Array`, never another
//!    wrapper.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::reactive::Reactive;

/// Nesting bound used by [`Value::deep_eq`] and [`Value::deep_clone`].
pub const DEFAULT_DEEP_COMPARE_DEPTH: usize = 64;

const DEBUG_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Address of a field inside a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// A named object field.
    Field(String),
    /// A sequence position.
    Index(usize),
    /// Sequence length, or the key set of an object.
    Length,
}

impl Key {
    /// Named field key.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// The field name, if this is a named field.
    #[must_use]
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self::Field(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
            Self::Length => f.write_str("length"),
        }
    }
}

// ---------------------------------------------------------------------------
// Object / Array
// ---------------------------------------------------------------------------

/// Shared, ordered map of named fields.
///
/// Cloning an `Object` creates a new handle to the **same** map.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<BTreeMap<String, Value>>>);

impl Object {
    /// Create an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from `(name, value)` pairs.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let map = entries
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Self(Rc::new(RefCell::new(map)))
    }

    /// Raw (untracked) field read.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    /// Raw (untracked) field write. Bypasses every binding; follow up with
    /// [`notify`](crate::notify) if the object is wrapped.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.borrow_mut().insert(name.into(), value.into())
    }

    /// Raw (untracked) field removal.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Field names in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of `(name, value)` pairs in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Whether both handles point at the same map.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn borrow(&self) -> Ref<'_, BTreeMap<String, Value>> {
        self.0.borrow()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugValue::new(&Value::Object(self.clone()), DEBUG_DEPTH).fmt(f)
    }
}

/// Shared, ordered sequence of values.
///
/// Cloning an `Array` creates a new handle to the **same** sequence.
#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Value>>>);

impl Array {
    /// Create an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    /// Raw (untracked) element read.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    /// Raw (untracked) append.
    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Snapshot of the elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    /// Whether both handles point at the same sequence.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.0.borrow_mut()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugValue::new(&Value::Array(self.clone()), DEBUG_DEPTH).fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamic value: scalar, raw container, or reactive wrapper.
///
/// `PartialEq` is structural ([`Value::deep_eq`]); use [`Value::same`] for
/// identity.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
    /// A wrapped container whose reads and writes are observed.
    Reactive(Reactive),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The unwrapped form: wrappers yield their raw container, everything
    /// else is returned as is.
    #[must_use]
    pub fn raw(&self) -> Value {
        match self {
            Self::Reactive(reactive) => reactive.raw(),
            other => other.clone(),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Self::Reactive(reactive) => Some(reactive),
            _ => None,
        }
    }

    /// The raw object behind this value, looking through wrappers.
    #[must_use]
    pub fn as_object(&self) -> Option<Object> {
        match self.raw() {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The raw array behind this value, looking through wrappers.
    #[must_use]
    pub fn as_array(&self) -> Option<Array> {
        match self.raw() {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Identity comparison used to decide whether a write is a no-op.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self.raw(), other.raw()) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(&b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(&b),
            _ => false,
        }
    }

    /// Structural equality down to [`DEFAULT_DEEP_COMPARE_DEPTH`].
    #[must_use]
    pub fn deep_eq(&self, other: &Value) -> bool {
        self.deep_eq_within(other, DEFAULT_DEEP_COMPARE_DEPTH)
    }

    /// Structural equality down to `max_depth` levels of nesting.
    #[must_use]
    pub fn deep_eq_within(&self, other: &Value, max_depth: usize) -> bool {
        deep_eq(self, other, max_depth)
    }

    /// Copy every nested container so later in-place mutation of the original
    /// cannot alter the copy.
    #[must_use]
    pub fn deep_clone(&self) -> Value {
        self.deep_clone_within(DEFAULT_DEEP_COMPARE_DEPTH)
    }

    /// [`deep_clone`](Self::deep_clone) with an explicit nesting bound; below
    /// the bound containers are shared rather than copied.
    #[must_use]
    pub fn deep_clone_within(&self, max_depth: usize) -> Value {
        deep_clone(self, max_depth)
    }

    /// Text shown when the value lands in a default display slot.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        display(self, DEFAULT_DEEP_COMPARE_DEPTH)
    }

    #[must_use]
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Self::String(s.into()),
            JsonValue::Array(items) => {
                Self::Array(items.into_iter().map(Value::from_json).collect())
            }
            JsonValue::Object(map) => Self::Object(Object::from_entries(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    /// Snapshot as JSON. Non-finite numbers become `null`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        to_json(self, DEFAULT_DEEP_COMPARE_DEPTH)
    }
}

fn deep_eq(a: &Value, b: &Value, depth: usize) -> bool {
    match (a, b) {
        (Value::Reactive(_), _) | (_, Value::Reactive(_)) => deep_eq(&a.raw(), &b.raw(), depth),
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if depth == 0 {
                return false;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && deep_eq(va, vb, depth - 1))
        }
        (Value::Array(x), Value::Array(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if depth == 0 {
                return false;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(va, vb)| deep_eq(va, vb, depth - 1))
        }
        _ => false,
    }
}

fn deep_clone(value: &Value, depth: usize) -> Value {
    match value {
        Value::Reactive(reactive) => deep_clone(&reactive.raw(), depth),
        Value::Object(object) if depth > 0 => {
            let copy = Object::from_entries(
                object
                    .borrow()
                    .iter()
                    .map(|(name, v)| (name.clone(), deep_clone(v, depth - 1))),
            );
            Value::Object(copy)
        }
        Value::Array(array) if depth > 0 => {
            let copy = array
                .borrow()
                .iter()
                .map(|v| deep_clone(v, depth - 1))
                .collect::<Vec<_>>();
            Value::Array(Array::from_vec(copy))
        }
        other => other.clone(),
    }
}

fn display(value: &Value, depth: usize) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string(),
        Value::Array(_) if depth == 0 => String::new(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|item| display(item, depth - 1))
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => to_json(value, depth).to_string(),
        Value::Reactive(reactive) => display(&reactive.raw(), depth),
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn to_json(value: &Value, depth: usize) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => JsonValue::String(s.to_string()),
        Value::Object(object) if depth > 0 => JsonValue::Object(
            object
                .borrow()
                .iter()
                .map(|(name, v)| (name.clone(), to_json(v, depth - 1)))
                .collect(),
        ),
        Value::Array(items) if depth > 0 => {
            JsonValue::Array(items.borrow().iter().map(|v| to_json(v, depth - 1)).collect())
        }
        Value::Object(_) | Value::Array(_) => JsonValue::Null,
        Value::Reactive(reactive) => to_json(&reactive.raw(), depth),
    }
}

fn number_to_json(n: f64) -> JsonValue {
    // Integral values within the exactly-representable range serialize
    // without a fractional part.
    if n.is_finite() && n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugValue::new(self, DEBUG_DEPTH).fmt(f)
    }
}

/// Depth-limited debug view; raw containers may be cyclic.
struct DebugValue<'a> {
    value: &'a Value,
    depth: usize,
}

impl<'a> DebugValue<'a> {
    fn new(value: &'a Value, depth: usize) -> Self {
        Self { value, depth }
    }
}

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(_) | Value::Array(_) if self.depth == 0 => f.write_str("..."),
            Value::Object(object) => f
                .debug_map()
                .entries(
                    object
                        .borrow()
                        .iter()
                        .map(|(name, v)| (name, DebugValue::new(v, self.depth - 1))),
                )
                .finish(),
            Value::Array(items) => f
                .debug_list()
                .entries(items.borrow().iter().map(|v| DebugValue::new(v, self.depth - 1)))
                .finish(),
            Value::Reactive(reactive) => {
                let raw = reactive.raw();
                write!(f, "Reactive({:?})", DebugValue::new(&raw, self.depth))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(Rc::from(s.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::String(s)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Self::Object(object)
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Self::Array(array)
    }
}

impl From<Reactive> for Value {
    fn from(reactive: Reactive) -> Self {
        Self::Reactive(reactive)
    }
}

impl From<&Reactive> for Value {
    fn from(reactive: &Reactive) -> Self {
        Self::Reactive(reactive.clone())
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Self::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_compare_by_value() {
        assert!(Value::from(5).same(&Value::from(5.0)));
        assert!(Value::from("a").same(&Value::from("a".to_string())));
        assert!(!Value::from(1).same(&Value::from("1")));
        assert!(!Value::from(f64::NAN).same(&Value::from(f64::NAN)));
        assert!(Value::Null.same(&Value::from(())));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Array::from_iter([1, 2, 3]);
        let b = Array::from_iter([1, 2, 3]);
        assert!(Value::from(a.clone()).same(&Value::from(a.clone())));
        assert!(!Value::from(a.clone()).same(&Value::from(b.clone())));
        // ...but are structurally equal.
        assert_eq!(Value::from(a), Value::from(b));
    }

    #[test]
    fn deep_eq_is_structural() {
        let a = Value::from(json!({ "user": { "name": "Ada", "tags": [1, 2] } }));
        let b = Value::from(json!({ "user": { "name": "Ada", "tags": [1, 2] } }));
        let c = Value::from(json!({ "user": { "name": "Ada", "tags": [1, 3] } }));
        assert!(a.deep_eq(&b));
        assert!(!a.deep_eq(&c));
        assert!(Value::from(f64::NAN).deep_eq(&Value::from(f64::NAN)));
    }

    #[test]
    fn deep_eq_bound_reports_unequal() {
        let a = Value::from(json!([[[1]]]));
        let b = Value::from(json!([[[1]]]));
        assert!(a.deep_eq_within(&b, 3));
        assert!(!a.deep_eq_within(&b, 2));
    }

    #[test]
    fn deep_clone_detaches_nested_containers() {
        let inner = Array::from_iter(["x"]);
        let outer = Value::from(Object::from_entries([("items", inner.clone())]));
        let copy = outer.deep_clone();
        inner.push("y");
        assert!(!outer.deep_eq(&copy));
        assert_eq!(copy.to_json(), json!({ "items": ["x"] }));
    }

    #[test]
    fn deep_clone_of_cycle_terminates() {
        let array = Array::new();
        array.push(array.clone());
        let copy = Value::from(array).deep_clone_within(4);
        assert!(copy.as_array().is_some());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::from(3.0).to_display_string(), "3");
        assert_eq!(Value::from(-0.0).to_display_string(), "0");
        assert_eq!(Value::from(2.5).to_display_string(), "2.5");
        assert_eq!(Value::from(f64::INFINITY).to_display_string(), "Infinity");
        assert_eq!(Value::from(vec!["a", "b"]).to_display_string(), "a,b");
        assert_eq!(
            Value::from(json!({ "a": 1 })).to_display_string(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn json_round_trip_preserves_integers() {
        let json = json!({ "count": 3, "ratio": 0.5, "tags": ["a"], "none": null });
        assert_eq!(Value::from_json(json.clone()).to_json(), json);
    }

    #[test]
    fn option_and_unit_conversions() {
        assert!(Value::from(None::<i32>).is_null());
        assert_eq!(Value::from(Some("x")).as_str(), Some("x"));
        assert!(Value::from(()).is_null());
    }

    #[test]
    fn key_conversions_and_display() {
        assert_eq!(Key::from("name"), Key::Field("name".into()));
        assert_eq!(Key::from(3usize), Key::Index(3));
        assert_eq!(Key::Length.to_string(), "length");
        assert_eq!(Key::field("x").as_field(), Some("x"));
        assert_eq!(Key::Index(0).as_field(), None);
    }

    #[test]
    fn debug_output_is_bounded_for_cycles() {
        let object = Object::new();
        object.insert("me", object.clone());
        let dbg = format!("{object:?}");
        assert!(dbg.contains("..."));
        object.remove("me");
    }
}
