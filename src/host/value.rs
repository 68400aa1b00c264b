//! Dynamic values exposed by the host application
//!
//! Patches operate on named properties of live host objects, so the host is
//! modelled as a small dynamic object graph: reference-counted property bags
//! ([`ObjectRef`]) whose properties may hold native callables ([`Function`]).
//! Objects and functions compare by identity, everything else by value.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::error::{PatchworkError, Result};

/// Signature of a native host function: `(this, args) -> return value`
pub type NativeFn = dyn Fn(&Value, Vec<Value>) -> Result<Value> + Send + Sync;

/// A value living in the host object graph
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(ObjectRef),
    Function(Function),
}

impl Value {
    /// Short type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(o) => write!(f, "[object #{:x}]", o.id()),
            Value::Function(func) => write!(f, "[function {}]", func.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

struct FunctionInner {
    name: String,
    body: Box<NativeFn>,
}

/// A named native callable with reference identity
#[derive(Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FunctionInner {
                name: name.into(),
                body: Box::new(body),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke with an explicit receiver
    pub fn call(&self, this: &Value, args: Vec<Value>) -> Result<Value> {
        (self.inner.body)(this, args)
    }

    /// Invoke as a free function (`this` is undefined)
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self.call(&Value::Undefined, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[function {}]", self.inner.name)
    }
}

/// Shared, interior-mutable property bag
#[derive(Clone, Default)]
pub struct ObjectRef {
    props: Arc<RwLock<HashMap<String, Value>>>,
}

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from `(key, value)` pairs
    pub fn with_props<K, I>(props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            props: Arc::new(RwLock::new(map)),
        }
    }

    /// Stable identity of this object, usable as a map key while it is alive
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.props) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.props, &other.props)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Set a property, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.props
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.props
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Look up `key` and call it with this object as the receiver.
    ///
    /// The property lock is released before the call so the callee may
    /// freely read or mutate this object.
    pub fn call_method(&self, key: &str, args: Vec<Value>) -> Result<Value> {
        let func = match self.get(key) {
            Some(Value::Function(f)) => f,
            _ => return Err(PatchworkError::NotCallable(key.to_string())),
        };
        func.call(&Value::Object(self.clone()), args)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("keys", &self.keys())
            .finish()
    }
}
