//! Deferred field values.
//!
//! Rather than a transparent wrapper intercepted at the language level, a
//! lazy value here is a first-class cell with an explicit `force()`. The
//! containing value is a sum `Resolved(v) | Lazy(cell)` (see
//! [`crate::context::FieldValue`]); accessors force transparently through
//! [`crate::context::ParsingContext::lookup`].

use crate::context::ContextHandle;
use crate::error::Result;
use crate::field::Field;
use crate::stream::{StreamHandle, Whence};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

struct LazyCellInner {
    stream: StreamHandle,
    offset: u64,
    field: Rc<Field>,
    ctx: ContextHandle,
    path: String,
    cached: RefCell<Option<Value>>,
}

/// A deferred value resolving against a retained stream + offset on first
/// use. Cheaply `Clone`-able (reference counted) so it can be copied into a
/// [`crate::context::FieldValue::Lazy`] and forced independently of the
/// `FieldContext` that introduced it.
#[derive(Clone)]
pub struct LazyCell(Rc<LazyCellInner>);

impl LazyCell {
    pub fn new(stream: StreamHandle, offset: u64, field: Rc<Field>, ctx: ContextHandle, path: String) -> Self {
        Self(Rc::new(LazyCellInner {
            stream,
            offset,
            field,
            ctx,
            path,
            cached: RefCell::new(None),
        }))
    }

    /// Force the proxy, reading its value from the retained stream at its
    /// retained offset. Caching happens in the cell itself, not in the
    /// `FieldContext` — forcing a proxy belonging to a `done` context must
    /// not mutate that context's state, but the cell may still remember the
    /// value for repeated forces.
    ///
    /// The shared stream is restored to its pre-force position afterward:
    /// forcing a proxy is a side read that must not displace whatever
    /// sequential field is mid-parse on the same stream (this is what makes
    /// forward references safe).
    pub fn force(&self) -> Result<Value> {
        if let Some(v) = self.0.cached.borrow().as_ref() {
            return Ok(v.clone());
        }

        let saved = self
            .0
            .stream
            .borrow_mut()
            .tell()
            .map_err(crate::error::BinFieldError::Io)?;

        self.0
            .stream
            .borrow_mut()
            .seek(self.0.offset as i64, Whence::Set)
            .map_err(crate::error::BinFieldError::Io)?;

        let (raw, _len) =
            crate::field::read_raw(&self.0.field, &self.0.stream, &self.0.ctx, &self.0.path)?;
        let decoded = crate::field::decode_value(&self.0.field, raw, &self.0.path)?;

        self.0
            .stream
            .borrow_mut()
            .seek(saved as i64, Whence::Set)
            .map_err(crate::error::BinFieldError::Io)?;

        *self.0.cached.borrow_mut() = Some(decoded.clone());
        Ok(decoded)
    }
}
