use crate::observe::{Array, Object};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// A dynamically typed value as held in an observable shadow store.
///
/// `Object` and `Array` are handles: cloning one aliases the same underlying object, the way
/// a reference would. Equality is identity for handles and strict sameness for primitives:
/// `NaN` equals `NaN` and `0.0` does not equal `-0.0`. Setters skip writes of a same value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
    Opaque(Opaque),
}

/// How the observation layer treats a value, decided once per value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Primitive,
    PlainObject,
    PlainArray,
    Opaque,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Kind::Primitive,
            Value::Object(_) => Kind::PlainObject,
            Value::Array(_) => Kind::PlainArray,
            Value::Opaque(_) => Kind::Opaque,
        }
    }

    /// Identity for handles, value equality for primitives
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, if it has no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Untracked deep snapshot. Opaque values and cyclic references become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.snapshot(&mut visiting)
    }

    fn snapshot(&self, visiting: &mut HashSet<usize>) -> serde_json::Value {
        match self {
            Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => match self.as_i64() {
                Some(i) => serde_json::Value::from(i),
                None => serde_json::Number::from_f64(*n).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
            },
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Object(object) => {
                if !visiting.insert(object.addr()) {
                    return serde_json::Value::Null;
                }
                let map = object.peek_entries().into_iter().map(|(member, value)| (member.to_string(), value.snapshot(visiting))).collect();
                visiting.remove(&object.addr());
                serde_json::Value::Object(map)
            }
            Value::Array(array) => {
                if !visiting.insert(array.addr()) {
                    return serde_json::Value::Null;
                }
                let items = array.peek_all().iter().map(|value| value.snapshot(visiting)).collect();
                visiting.remove(&array.addr());
                serde_json::Value::Array(items)
            }
        }
    }
}

/// Shallow structural equality: identity first, then one level of own members for
/// plain objects and arrays. Reads are untracked.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    if a.same(b) {
        return true;
    }
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            let a = a.peek_entries();
            let b = b.peek_entries();
            a.len() == b.len() && a.iter().all(|(member, value)| b.iter().any(|(other, theirs)| member == other && value.same(theirs)))
        }
        (Value::Array(a), Value::Array(b)) => {
            let a = a.peek_all();
            let b = b.peek_all();
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same(y))
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.same(other) }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({:?})", &**s),
            Value::Object(o) => o.fmt(f),
            Value::Array(a) => a.fmt(f),
            Value::Opaque(o) => o.fmt(f),
        }
    }
}

/// A value the observation layer never looks into, such as a timestamp or a foreign handle.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub fn new<T: Any>(value: T) -> Self { Self(Rc::new(value)) }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.0.downcast_ref() }

    pub fn ptr_eq(&self, other: &Opaque) -> bool { Rc::ptr_eq(&self.0, &other.0) }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Opaque(..)") }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Value::Number(n as f64) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Value::Number(n as f64) }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self { Value::Number(n as f64) }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self { Value::Number(n as f64) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(Rc::from(s)) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(Rc::from(s)) }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self { Value::Object(o) }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self { Value::Array(a) }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self { Value::Opaque(o) }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Value::Array(Array::from(items)) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self { value.map(Into::into).unwrap_or_default() }
}

/// Builds fresh, not yet observed objects and arrays
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or_default(),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_primitives() {
        assert!(Value::from(1).same(&Value::from(1.0)));
        assert!(Value::from(f64::NAN).same(&Value::from(f64::NAN)));
        assert!(!Value::from(0.0).same(&Value::from(-0.0)));
        assert!(!Value::from("1").same(&Value::from(1)));
        assert!(Value::Null.same(&Value::Null));
    }

    #[test]
    fn test_same_handles_by_identity() {
        let a = Value::from(json!({ "x": 1 }));
        let b = Value::from(json!({ "x": 1 }));
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(shallow_equal(&a, &b));
    }

    #[test]
    fn test_shallow_equal_is_one_level() {
        let a = Value::from(json!({ "inner": { "x": 1 } }));
        let b = Value::from(json!({ "inner": { "x": 1 } }));
        assert!(!shallow_equal(&a, &b));

        let a = Value::from(json!([1, "two", null]));
        let b = Value::from(json!([1, "two", null]));
        assert!(shallow_equal(&a, &b));
        assert!(!shallow_equal(&a, &Value::from(json!([1, "two"]))));
    }

    #[test]
    fn test_json_snapshot() {
        let json = json!({ "name": "Buffy", "age": 29, "tags": ["a", "b"], "ratio": 0.5 });
        assert_eq!(Value::from(json.clone()).to_json(), json);
    }

    #[test]
    fn test_cyclic_snapshot_terminates() {
        let object = Object::new();
        object.set("me", object.clone()).unwrap();
        assert_eq!(Value::from(object).to_json(), json!({ "me": null }));
    }

    #[test]
    fn test_opaque_passthrough() {
        let stamp = Opaque::new(std::time::Duration::from_secs(5));
        let value = Value::from(stamp.clone());
        assert_eq!(value.kind(), Kind::Opaque);
        assert_eq!(value.as_opaque().and_then(|o| o.downcast_ref::<std::time::Duration>()), Some(&std::time::Duration::from_secs(5)));
        assert!(value.same(&Value::from(stamp)));
    }
}
