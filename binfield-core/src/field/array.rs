//! `ArrayField`: repeats a `base_field`, either a fixed
//! `count` times, until `length` bytes are consumed, or (negative length)
//! until end-of-stream / the base field signals exhaustion.

use crate::context::ContextHandle;
use crate::error::{join_index, BinFieldError, Result};
use crate::field::{Field, FieldBase};
use crate::stream::{StreamHandle, Whence};
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone)]
pub enum ArrayMode {
    Count(Spec),
    Length(Spec),
}

#[derive(Clone)]
pub struct ArrayField {
    pub base: FieldBase,
    pub base_field: Rc<Field>,
    pub mode: ArrayMode,
}

impl ArrayField {
    pub fn with_count(base_field: Rc<Field>, count: impl Into<Spec>) -> Self {
        Self {
            base: FieldBase::default(),
            base_field,
            mode: ArrayMode::Count(count.into()),
        }
    }

    pub fn with_length(base_field: Rc<Field>, length: impl Into<Spec>) -> Self {
        Self {
            base: FieldBase::default(),
            base_field,
            mode: ArrayMode::Length(length.into()),
        }
    }

    pub fn static_len(&self) -> Option<u64> {
        match &self.mode {
            ArrayMode::Count(Spec::Const(v)) => {
                let n = v.as_int().ok()?.max(0) as u64;
                self.base_field.static_len().map(|elem| elem * n)
            }
            ArrayMode::Length(Spec::Const(v)) => v.as_int().ok().filter(|&n| n >= 0).map(|n| n as u64),
            _ => None,
        }
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        match &self.mode {
            ArrayMode::Count(spec) => {
                let n = spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?;
                let mut items = Vec::new();
                let mut consumed = 0u64;
                for i in 0..n.max(0) {
                    let elem_path = join_index(path, i as usize);
                    let (raw, len) = crate::field::read_raw(&self.base_field, stream, ctx, &elem_path)?;
                    let decoded = crate::field::decode_value(&self.base_field, raw, &elem_path)?;
                    items.push(decoded);
                    consumed += len;
                }
                Ok((Value::Array(items), consumed))
            }
            ArrayMode::Length(spec) => {
                let length = spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?;
                if length < 0 {
                    return self.read_unbounded(stream, ctx, path);
                }
                let start = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
                let end = start + length as u64;
                let mut items = Vec::new();
                let mut i = 0usize;
                while stream.borrow_mut().tell().map_err(BinFieldError::Io)? < end {
                    let elem_path = join_index(path, i);
                    let (raw, _len) = crate::field::read_raw(&self.base_field, stream, ctx, &elem_path)?;
                    let decoded = crate::field::decode_value(&self.base_field, raw, &elem_path)?;
                    items.push(decoded);
                    i += 1;
                }
                Ok((Value::Array(items), length as u64))
            }
        }
    }

    fn read_unbounded(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let start = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
        let mut items = Vec::new();
        let mut i = 0usize;
        loop {
            let elem_path = join_index(path, i);
            match crate::field::read_raw(&self.base_field, stream, ctx, &elem_path) {
                Ok((raw, _len)) => {
                    let decoded = crate::field::decode_value(&self.base_field, raw, &elem_path)?;
                    items.push(decoded);
                    i += 1;
                }
                Err(e) if e.is_stream_exhausted() => break,
                Err(e) => return Err(e),
            }
        }
        let end = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
        Ok((Value::Array(items), end - start))
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let items = value.as_array()?;
        let mut written = 0u64;
        for (i, item) in items.iter().enumerate() {
            let elem_path = join_index(path, i);
            let encoded = crate::field::encode_value(&self.base_field, item.clone())?;
            written += crate::field::write_raw(&self.base_field, stream, ctx, &encoded, &elem_path)?;
        }
        Ok(written)
    }

    pub fn seek_end(&self, stream: &StreamHandle, ctx: &ContextHandle, start: u64, path: &str) -> Result<u64> {
        if let Some(n) = self.static_len() {
            return stream
                .borrow_mut()
                .seek((start + n) as i64, Whence::Set)
                .map_err(BinFieldError::Io);
        }
        match &self.mode {
            ArrayMode::Length(spec) => {
                let length = spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?;
                if length >= 0 {
                    return stream
                        .borrow_mut()
                        .seek((start + length as u64) as i64, Whence::Set)
                        .map_err(BinFieldError::Io);
                }
                Err(BinFieldError::impossible_length(path))
            }
            ArrayMode::Count(_) => Err(BinFieldError::impossible_length(path)),
        }
    }
}
