//! `ConditionalField`: delegates to `base_field` when a
//! condition spec is truthy, otherwise yields `fallback` and consumes
//! nothing.

use crate::context::ContextHandle;
use crate::error::Result;
use crate::field::{Field, FieldBase};
use crate::stream::StreamHandle;
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone)]
pub struct ConditionalField {
    pub base: FieldBase,
    pub base_field: Rc<Field>,
    pub condition: Spec,
    pub fallback: Value,
}

impl ConditionalField {
    pub fn new(base_field: Rc<Field>, condition: impl Into<Spec>) -> Self {
        Self {
            base: FieldBase::default(),
            base_field,
            condition: condition.into(),
            fallback: Value::None,
        }
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = fallback;
        self
    }

    fn truthy(&self, ctx: &ContextHandle) -> Result<bool> {
        self.condition.resolve(&Facade::new(ctx.clone()), None)?.truthy()
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        if self.truthy(ctx)? {
            let (raw, n) = crate::field::read_raw(&self.base_field, stream, ctx, path)?;
            let decoded = crate::field::decode_value(&self.base_field, raw, path)?;
            Ok((decoded, n))
        } else {
            Ok((self.fallback.clone(), 0))
        }
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        if self.truthy(ctx)? {
            let encoded = crate::field::encode_value(&self.base_field, value.clone())?;
            crate::field::write_raw(&self.base_field, stream, ctx, &encoded, path)
        } else {
            Ok(0)
        }
    }
}
