//! `SwitchField`: evaluates a `switch` spec, looks up the
//! matching case, and delegates to it.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::{Field, FieldBase};
use crate::stream::StreamHandle;
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use std::rc::Rc;

/// A case key: switches commonly dispatch on small integers or short
/// strings (a type tag, a magic byte), so both are supported directly
/// rather than routing every key through `Value`'s general equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseKey {
    Int(i128),
    Str(String),
}

impl From<i128> for CaseKey {
    fn from(v: i128) -> Self {
        CaseKey::Int(v)
    }
}

impl From<&str> for CaseKey {
    fn from(v: &str) -> Self {
        CaseKey::Str(v.to_string())
    }
}

fn value_to_key(v: &Value) -> Result<CaseKey> {
    Ok(match v {
        Value::Str(s) => CaseKey::Str(s.clone()),
        other => CaseKey::Int(other.as_int()?),
    })
}

#[derive(Clone)]
pub struct SwitchField {
    pub base: FieldBase,
    pub switch: Spec,
    pub cases: Vec<(CaseKey, Rc<Field>)>,
    pub other: Option<Rc<Field>>,
}

impl SwitchField {
    pub fn new(switch: impl Into<Spec>) -> Self {
        Self {
            base: FieldBase::default(),
            switch: switch.into(),
            cases: Vec::new(),
            other: None,
        }
    }

    pub fn with_case(mut self, key: impl Into<CaseKey>, field: Rc<Field>) -> Self {
        self.cases.push((key.into(), field));
        self
    }

    pub fn with_other(mut self, field: Rc<Field>) -> Self {
        self.other = Some(field);
        self
    }

    fn resolve_field(&self, ctx: &ContextHandle, path: &str) -> Result<&Rc<Field>> {
        let key_value = self.switch.resolve(&Facade::new(ctx.clone()), None)?;
        let key = value_to_key(&key_value)?;
        if let Some((_, field)) = self.cases.iter().find(|(k, _)| *k == key) {
            return Ok(field);
        }
        self.other
            .as_ref()
            .ok_or_else(|| BinFieldError::check_error(path, None, format!("no case matches switch value {key:?}")))
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let field = self.resolve_field(ctx, path)?.clone();
        let (raw, n) = crate::field::read_raw(&field, stream, ctx, path)?;
        let decoded = crate::field::decode_value(&field, raw, path)?;
        Ok((decoded, n))
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let field = self.resolve_field(ctx, path)?.clone();
        let encoded = crate::field::encode_value(&field, value.clone())?;
        crate::field::write_raw(&field, stream, ctx, &encoded, path)
    }
}
