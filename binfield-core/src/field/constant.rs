//! `ConstantField`: wraps a `base_field`, enforcing that the
//! parsed/written value equals a fixed constant.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::{Field, FieldBase};
use crate::stream::StreamHandle;
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone)]
pub struct ConstantField {
    pub base: FieldBase,
    pub value: Value,
    pub base_field: Rc<Field>,
}

impl ConstantField {
    /// `base_field` defaults to a `FixedLengthField` sized to `len(value)`
    /// when `value` is bytes.
    pub fn new(value: Value, base_field: Option<Rc<Field>>) -> Result<Self> {
        let base_field = match base_field {
            Some(f) => f,
            None => {
                let bytes = value.as_bytes()?;
                Rc::new(Field::Bytes(super::bytes::BytesField::fixed(bytes.len() as i128)))
            }
        };
        Ok(Self {
            base: FieldBase::default().with_default(value.clone()),
            value,
            base_field,
        })
    }

    pub fn static_len(&self) -> Option<u64> {
        self.base_field.static_len()
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let (raw, n) = crate::field::read_raw(&self.base_field, stream, ctx, path)?;
        let decoded = crate::field::decode_value(&self.base_field, raw, path)?;
        if !values_equal(&decoded, &self.value) {
            return Err(BinFieldError::check_error(
                path,
                None,
                format!("expected constant {:?}, found {decoded:?}", self.value),
            ));
        }
        Ok((decoded, n))
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        if !values_equal(value, &self.value) {
            return Err(BinFieldError::check_error(
                path,
                None,
                format!("expected constant {:?}, found {value:?}", self.value),
            ));
        }
        let encoded = crate::field::encode_value(&self.base_field, value.clone())?;
        crate::field::write_raw(&self.base_field, stream, ctx, &encoded, path)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a == b,
    }
}
