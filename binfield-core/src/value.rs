//! The dynamic value domain that flows through the runtime.
//!
//! Field variants are statically distinct in Rust, but the values they
//! parse/emit are not: a thunk evaluating `f.length + 4` doesn't know at
//! compile time whether `length` came from an `IntegerField` or a
//! `VariableLengthIntegerField`. `Value` is the common currency.

use crate::error::{BinFieldError, ErrorKind, FieldError, Result};
use crate::structure::StructureValue;
use bytes::Bytes;

/// A member name matched or an OR-combination of bitflag member names,
/// resolved by `EnumField` against its declared enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub raw: i128,
    /// Set when `raw` matches exactly one declared member.
    pub label: Option<String>,
    /// Set (possibly to more than one entry) when the enum is a bitflag
    /// enum and `raw` decomposes into named flags.
    pub flags: Vec<String>,
}

impl EnumValue {
    pub fn named(raw: i128, label: impl Into<String>) -> Self {
        Self {
            raw,
            label: Some(label.into()),
            flags: Vec::new(),
        }
    }

    pub fn flags(raw: i128, flags: Vec<String>) -> Self {
        Self {
            raw,
            label: None,
            flags,
        }
    }

    pub fn unknown(raw: i128) -> Self {
        Self {
            raw,
            label: None,
            flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Bytes(Bytes),
    Str(String),
    Array(Vec<Value>),
    Struct(StructureValue),
    Enum(EnumValue),
}

impl Value {
    pub fn as_int(&self) -> Result<i128> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(b) => Ok(*b as i128),
            Value::Enum(e) => Ok(e.raw),
            other => Err(type_error("integer", other)),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(type_error("float", other)),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        let v = self.as_int()?;
        u64::try_from(v).map_err(|_| {
            FieldError::new("", None, ErrorKind::ParseError("value out of u64 range".into())).into()
        })
    }

    pub fn as_bytes(&self) -> Result<&Bytes> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(type_error("bytes", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(type_error("string", other)),
        }
    }

    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(v) => Ok(v),
            other => Err(type_error("array", other)),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> Result<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Bytes(b) => !b.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Enum(e) => e.raw != 0,
            Value::Struct(_) => true,
        })
    }

    /// The `len_` thunk operator: byte length (or element count) of a value.
    pub fn len_(&self) -> Result<u64> {
        Ok(match self {
            Value::Bytes(b) => b.len() as u64,
            Value::Str(s) => s.len() as u64,
            Value::Array(a) => a.len() as u64,
            other => return Err(type_error("bytes, string, or array", other)),
        })
    }
}

fn type_error(expected: &str, got: &Value) -> BinFieldError {
    FieldError::new(
        "",
        None,
        ErrorKind::ParseError(format!("expected {expected}, found {got:?}")),
    )
    .into()
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i128)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
