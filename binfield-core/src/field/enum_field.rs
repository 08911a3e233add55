//! `EnumField`: interprets a base field's integer value as
//! an enum member, or a bitflag combination for flag-style enums.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::{Field, FieldBase};
use crate::stream::StreamHandle;
use crate::value::{EnumValue, Value};
use std::rc::Rc;

/// The enum type an `EnumField` interprets its base value against: either a
/// closed set of named members, or a `bitflags`-style flag set where any
/// combination (including unknown bits) is representable.
#[derive(Clone)]
pub enum EnumType {
    Members(Vec<(String, i128)>),
    Flags(Vec<(String, i128)>),
}

impl EnumType {
    fn decode(&self, raw: i128) -> EnumValue {
        match self {
            EnumType::Members(members) => match members.iter().find(|(_, v)| *v == raw) {
                Some((name, _)) => EnumValue::named(raw, name.clone()),
                None => EnumValue::unknown(raw),
            },
            EnumType::Flags(flags) => {
                let mut remaining = raw;
                let mut names = Vec::new();
                for (name, bit) in flags {
                    if *bit != 0 && (remaining & bit) == *bit {
                        names.push(name.clone());
                        remaining &= !bit;
                    }
                }
                EnumValue::flags(raw, names)
            }
        }
    }

    fn encode_name(&self, name: &str) -> Option<i128> {
        let members = match self {
            EnumType::Members(m) | EnumType::Flags(m) => m,
        };
        members.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[derive(Clone)]
pub struct EnumField {
    pub base: FieldBase,
    pub base_field: Rc<Field>,
    pub enum_type: EnumType,
}

impl EnumField {
    pub fn new(base_field: Rc<Field>, enum_type: EnumType) -> Self {
        Self {
            base: FieldBase::default(),
            base_field,
            enum_type,
        }
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let (raw, n) = crate::field::read_raw(&self.base_field, stream, ctx, path)?;
        let decoded = crate::field::decode_value(&self.base_field, raw, path)?;
        let enum_value = self.enum_type.decode(decoded.as_int()?);
        Ok((Value::Enum(enum_value), n))
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let raw = match value {
            Value::Enum(e) => e.raw,
            Value::Str(name) => self.enum_type.encode_name(name).ok_or_else(|| {
                BinFieldError::check_error(path, None, format!("unknown enum member `{name}`"))
            })?,
            other => other.as_int()?,
        };
        let encoded = crate::field::encode_value(&self.base_field, Value::Int(raw))?;
        crate::field::write_raw(&self.base_field, stream, ctx, &encoded, path)
    }
}
