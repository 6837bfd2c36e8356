use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::runner::ds::function::Function;
use crate::runner::ds::scope::{CopyMap, Scope, ScopeRef};

pub const TYPE_STR_NULL: &str = "null";

/// A runtime value. Structs share their backing [`Scope`], so cloning a
/// `Value::Struct` aliases it; use [`Value::duplicate`] for a detached copy.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Struct(ScopeRef),
    Function(Arc<Function>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&ScopeRef> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// A copy that shares no mutable state with `self`. Structs are copied
    /// recursively; functions stay shared since they are immutable.
    pub fn duplicate(&self) -> Value {
        self.duplicate_with(&mut CopyMap::new())
    }

    /// Like [`Value::duplicate`], reusing the copies already in `copies`.
    pub fn duplicate_with(&self, copies: &mut CopyMap) -> Value {
        match self {
            Value::Struct(s) => Value::Struct(s.duplicate_with(copies)),
            other => other.clone(),
        }
    }

    pub fn new_struct(name: &str) -> Value {
        Value::Struct(Scope::new(name))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "{}", TYPE_STR_NULL),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Struct(s) => write!(f, "struct[{}]({} keys)", s.name(), s.len()),
            Value::Function(func) => write!(f, "function {}", func.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Value::Null"),
            Value::Boolean(b) => write!(f, "Value::Boolean({})", b),
            Value::Integer(n) => write!(f, "Value::Integer({})", n),
            Value::Float(n) => write!(f, "Value::Float({})", n),
            Value::String(s) => write!(f, "Value::String({:?})", s),
            Value::DateTime(d) => write!(f, "Value::DateTime({})", d.to_rfc3339()),
            Value::Struct(s) => write!(f, "Value::Struct({:?})", s),
            Value::Function(func) => write!(f, "Value::Function({})", func.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
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

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::DateTime(d)
    }
}

impl From<ScopeRef> for Value {
    fn from(s: ScopeRef) -> Self {
        Value::Struct(s)
    }
}

impl From<Arc<Function>> for Value {
    fn from(f: Arc<Function>) -> Self {
        Value::Function(f)
    }
}
