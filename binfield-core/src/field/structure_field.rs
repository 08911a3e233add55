//! `StructureField`: parses/emits a nested `Structure`,
//! optionally bounding it to a fixed byte `length` via a `Substream`.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::FieldBase;
use crate::stream::{StreamHandle, Substream, Whence};
use crate::structure::StructureDef;
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone)]
pub struct StructureField {
    pub base: FieldBase,
    pub structure: Rc<StructureDef>,
    pub length: Option<Spec>,
}

impl StructureField {
    pub fn new(structure: Rc<StructureDef>) -> Self {
        Self {
            base: FieldBase::default(),
            structure,
            length: None,
        }
    }

    pub fn with_length(mut self, length: impl Into<Spec>) -> Self {
        self.length = Some(length.into());
        self
    }

    pub fn static_len(&self) -> Option<u64> {
        match &self.length {
            Some(Spec::Const(v)) => v.as_int().ok().filter(|&n| n >= 0).map(|n| n as u64),
            _ => self.structure.static_len(),
        }
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let start = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
        match &self.length {
            Some(spec) => {
                let n = spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?.max(0) as u64;
                let sub = crate::stream::handle(Substream::new(stream.clone(), start, Some(n)));
                let (value, _child_ctx) =
                    crate::structure::parse(&self.structure, sub, Some((ctx.clone(), path.to_string())), false, path.to_string())?;
                stream
                    .borrow_mut()
                    .seek((start + n) as i64, Whence::Set)
                    .map_err(BinFieldError::Io)?;
                Ok((Value::Struct(value), n))
            }
            None => {
                let (value, _child_ctx) = crate::structure::parse(
                    &self.structure,
                    stream.clone(),
                    Some((ctx.clone(), path.to_string())),
                    false,
                    path.to_string(),
                )?;
                let end = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
                Ok((Value::Struct(value), end - start))
            }
        }
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let inner = match value {
            Value::Struct(s) => s.clone(),
            other => {
                return Err(BinFieldError::write_error(
                    path,
                    None,
                    format!("expected a structure value, found {other:?}"),
                ))
            }
        };
        let start = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
        match &self.length {
            Some(spec) => {
                let n = spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?.max(0) as u64;
                let sub = crate::stream::handle(Substream::new(stream.clone(), start, Some(n)));
                crate::structure::emit(&self.structure, &inner, sub, Some((ctx.clone(), path.to_string())), false, path.to_string())?;
                stream
                    .borrow_mut()
                    .seek((start + n) as i64, Whence::Set)
                    .map_err(BinFieldError::Io)?;
                Ok(n)
            }
            None => {
                crate::structure::emit(
                    &self.structure,
                    &inner,
                    stream.clone(),
                    Some((ctx.clone(), path.to_string())),
                    false,
                    path.to_string(),
                )?;
                let end = stream.borrow_mut().tell().map_err(BinFieldError::Io)?;
                Ok(end - start)
            }
        }
    }
}
