//! Dynamic values held by state variables and attributes

use crate::identity::ComponentIdx;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamic value of a state variable, attribute or action argument
///
/// The shape is declared by the component type, not enforced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    ComponentRef(ComponentIdx),
    /// Whole arrays, picks and effective-children values
    List(Vec<Value>),
    Map(ValueMap),
    /// Sentinel for values downstream of an error or an exhausted budget
    Unresolved,
}

/// Attribute and argument map, kept in authored order
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Value::Unresolved)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; ints widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_component_ref(&self) -> Option<ComponentIdx> {
        match self {
            Value::ComponentRef(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Non-negative index; floats with an exact integral value are accepted
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Int(i) if *i >= 0 => Some(*i as usize),
            Value::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as usize),
            _ => None,
        }
    }

    /// Name used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::ComponentRef(_) => "component_ref",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Unresolved => "unresolved",
        }
    }

    /// Truthiness for conditions; `Unresolved` is false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Unresolved => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::ComponentRef(_) => true,
            Value::List(list) => !list.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Equality used by `Eq`/`Ne` expressions: ints and floats compare
    /// numerically within a relative tolerance, lists element-wise
    pub fn same_as(&self, other: &Value) -> bool {
        fn close(x: f64, y: f64) -> bool {
            x == y || (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs())
        }
        match (self, other) {
            (Value::Float(x), Value::Float(y)) => close(*x, *y),
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                close(*x as f64, *y)
            }
            (Value::List(x), Value::List(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| p.same_as(q))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::ComponentRef(idx) => write!(f, "{}", idx),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Unresolved => f.write_str("<unresolved>"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from($v: $ty) -> Self {
                $body
            }
        })*
    };
}

value_from! {
    bool => |b| Value::Bool(b),
    i64 => |i| Value::Int(i),
    usize => |i| Value::Int(i as i64),
    f64 => |x| Value::Float(x),
    String => |s| Value::String(s),
    &str => |s| Value::String(s.to_string()),
    ComponentIdx => |idx| Value::ComponentRef(idx),
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}
