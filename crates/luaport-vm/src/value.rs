//! Dynamic values held on the stack, in tables and in upvalues

use std::fmt;
use std::rc::Rc;

use crate::heap::{FunctionId, TableId, UserdataId};

/// Script-visible type of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// The slot does not exist
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// An opaque pointer-sized key
    LightUserdata,
    /// Integer or float
    Number,
    /// Byte string
    String,
    /// Table
    Table,
    /// Native closure
    Function,
    /// Collector-managed opaque block
    Userdata,
}

impl Type {
    /// Name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::LightUserdata | Type::Userdata => "userdata",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A VM value. Collectable variants hold arena handles that stay valid while
/// the value is reachable from a root.
#[derive(Clone, Debug)]
pub(crate) enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<[u8]>),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    LightUserdata(usize),
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) | Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::Userdata(_) => Type::Userdata,
            Value::LightUserdata(_) => Type::LightUserdata,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn str(s: &[u8]) -> Value {
        Value::String(Rc::from(s))
    }

    /// Primitive equality, without metamethods
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_integer(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Userdata(a), Value::Userdata(b)) => a == b,
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            _ => false,
        }
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s).map(|v| match v {
                Value::Integer(i) => i as f64,
                Value::Number(n) => n,
                _ => f64::NAN,
            }),
            _ => None,
        }
    }

    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => match parse_number(s)? {
                Value::Integer(i) => Some(i),
                Value::Number(n) => float_to_integer(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// String form of strings and numbers
    pub fn to_bytes(&self) -> Option<Rc<[u8]>> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(Rc::from(i.to_string().as_bytes())),
            Value::Number(n) => Some(Rc::from(format_number(*n).as_bytes())),
            _ => None,
        }
    }
}

/// Exact float to integer conversion
pub(crate) fn float_to_integer(n: f64) -> Option<i64> {
    // i64::MAX is not representable; 2^63 is the first float out of range
    if n.fract() == 0.0 && n >= -9_223_372_036_854_775_808.0 && n < 9_223_372_036_854_775_808.0 {
        Some(n as i64)
    } else {
        None
    }
}

fn parse_number(s: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(s).ok()?.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|u| Value::Integer(u as i64));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>().ok().map(Value::Number)
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else if n.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", n)
    }
}

/// Hashable table key. Floats with an exact integer value are normalized to
/// integers so `t[1]` and `t[1.0]` address the same slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Rc<[u8]>),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    LightUserdata(usize),
}

impl Key {
    /// `None` for nil and NaN, which can never be stored
    pub fn from_value(v: &Value) -> Option<Key> {
        Some(match v {
            Value::Nil => return None,
            Value::Boolean(b) => Key::Boolean(*b),
            Value::Integer(i) => Key::Integer(*i),
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match float_to_integer(*n) {
                    Some(i) => Key::Integer(i),
                    None => Key::Float(n.to_bits()),
                }
            }
            Value::String(s) => Key::String(s.clone()),
            Value::Table(id) => Key::Table(*id),
            Value::Function(id) => Key::Function(*id),
            Value::Userdata(id) => Key::Userdata(*id),
            Value::LightUserdata(p) => Key::LightUserdata(*p),
        })
    }

    pub fn str(s: &str) -> Key {
        Key::String(Rc::from(s.as_bytes()))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Boolean(b) => Value::Boolean(*b),
            Key::Integer(i) => Value::Integer(*i),
            Key::Float(bits) => Value::Number(f64::from_bits(*bits)),
            Key::String(s) => Value::String(s.clone()),
            Key::Table(id) => Value::Table(*id),
            Key::Function(id) => Value::Function(*id),
            Key::Userdata(id) => Value::Userdata(*id),
            Key::LightUserdata(p) => Value::LightUserdata(*p),
        }
    }
}
