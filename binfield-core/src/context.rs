//! Per-operation parsing/emitting state.

use crate::error::{BinFieldError, Result};
use crate::field::Field;
use crate::lazy::LazyCell;
use crate::stream::{BitCursor, StreamHandle};
use crate::structure::StructureDef;
use crate::value::Value;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type ContextHandle = Rc<RefCell<ParsingContext>>;

/// A field's value, possibly still deferred.
#[derive(Clone)]
pub enum FieldValue {
    Empty,
    Resolved(Value),
    Lazy(LazyCell),
}

/// Per-field parse record inside a [`ParsingContext`].
///
/// Flag semantics: `parsed` is true once the field has either
/// been read/written or its laziness was committed. `has_value` is true
/// when a value (possibly a proxy) is available. `resolved` is true iff
/// `parsed && !lazy`. `lazy` transitions from true to false at most once,
/// and only while `ctx.done` is false.
#[derive(Clone)]
pub struct FieldContext {
    pub field: Rc<Field>,
    pub field_name: Option<String>,
    pub value: FieldValue,
    pub has_value: bool,
    pub parsed: bool,
    pub resolved: bool,
    pub lazy: bool,
    pub offset: Option<u64>,
    pub absolute_offset: Option<u64>,
    pub length: Option<u64>,
    pub raw: Option<Bytes>,
    pub subcontext: Option<ContextHandle>,
}

impl FieldContext {
    pub fn new(field: Rc<Field>) -> Self {
        Self {
            field,
            field_name: None,
            value: FieldValue::Empty,
            has_value: false,
            parsed: false,
            resolved: false,
            lazy: false,
            offset: None,
            absolute_offset: None,
            length: None,
            raw: None,
            subcontext: None,
        }
    }

    pub fn set_resolved(&mut self, value: Value) {
        self.value = FieldValue::Resolved(value);
        self.has_value = true;
        self.parsed = true;
        self.lazy = false;
        self.resolved = true;
    }

    pub fn set_lazy(&mut self, cell: LazyCell) {
        self.value = FieldValue::Lazy(cell);
        self.has_value = true;
        self.parsed = true;
        self.lazy = true;
        self.resolved = false;
    }
}

/// Per-operation state: an ordered map of field name to [`FieldContext`],
/// parent/root links, flatness, and the shared stream.
pub struct ParsingContext {
    pub fields: Vec<(String, FieldContext)>,
    index: HashMap<String, usize>,
    pub parent: Option<ContextHandle>,
    pub parent_field_name: Option<String>,
    pub stream: StreamHandle,
    pub capture_raw: bool,
    /// When true, name lookups that miss locally fall through to `parent`.
    pub flat: bool,
    /// Becomes true once the structure engine finishes; lazy fields cannot
    /// be upgraded to non-lazy after that.
    pub done: bool,
    pub bit_cursor: BitCursor,
    /// Logical path prefix used when building field errors, e.g. `outer` or
    /// `outer.inner[3]`.
    pub path: String,
}

impl ParsingContext {
    pub fn new_root(stream: StreamHandle, capture_raw: bool) -> ContextHandle {
        Rc::new(RefCell::new(Self {
            fields: Vec::new(),
            index: HashMap::new(),
            parent: None,
            parent_field_name: None,
            stream,
            capture_raw,
            flat: false,
            done: false,
            bit_cursor: BitCursor::new(),
            path: String::new(),
        }))
    }

    pub fn new_child(
        parent: &ContextHandle,
        parent_field_name: &str,
        stream: StreamHandle,
        flat: bool,
        path: String,
    ) -> ContextHandle {
        let capture_raw = parent.borrow().capture_raw;
        Rc::new(RefCell::new(Self {
            fields: Vec::new(),
            index: HashMap::new(),
            parent: Some(parent.clone()),
            parent_field_name: Some(parent_field_name.to_string()),
            stream,
            capture_raw,
            flat,
            done: false,
            bit_cursor: BitCursor::new(),
            path,
        }))
    }

    /// Populates `fields` with a fresh [`FieldContext`] per declared field.
    pub fn initialize_from_meta(&mut self, def: &StructureDef) {
        self.fields.clear();
        self.index.clear();
        for (i, (name, field)) in def.fields.iter().enumerate() {
            self.index.insert(name.clone(), i);
            self.fields.push((name.clone(), FieldContext::new(field.clone())));
        }
    }

    pub fn get_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The topmost ancestor of `ctx`.
    pub fn root(ctx: &ContextHandle) -> ContextHandle {
        let mut current = ctx.clone();
        loop {
            let next = current.borrow().parent.clone();
            match next {
                Some(p) => current = p,
                None => return current,
            }
        }
    }

    /// `ctx[name]`: resolves against `fields[name].value`, forcing a lazy
    /// proxy transparently. Falls through to `parent` when `flat` and the
    /// name isn't bound locally.
    pub fn lookup(ctx: &ContextHandle, name: &str) -> Result<Value> {
        let idx = ctx.borrow().index.get(name).copied();
        if let Some(i) = idx {
            return Self::resolve_field_value(ctx, i);
        }

        let (flat, parent) = {
            let b = ctx.borrow();
            (b.flat, b.parent.clone())
        };
        if flat {
            if let Some(parent) = parent {
                return Self::lookup(&parent, name);
            }
        }
        Err(BinFieldError::FieldNotFound(name.to_string()))
    }

    fn resolve_field_value(ctx: &ContextHandle, i: usize) -> Result<Value> {
        let lazy_cell = {
            let b = ctx.borrow();
            match &b.fields[i].1.value {
                FieldValue::Lazy(cell) => Some(cell.clone()),
                _ => None,
            }
        };

        if let Some(cell) = lazy_cell {
            let forced = cell.force()?;
            let done = ctx.borrow().done;
            if !done {
                let mut b = ctx.borrow_mut();
                b.fields[i].1.set_resolved(forced.clone());
            }
            return Ok(forced);
        }

        let b = ctx.borrow();
        let fc = &b.fields[i].1;
        match &fc.value {
            FieldValue::Resolved(v) => Ok(v.clone()),
            FieldValue::Empty => Err(BinFieldError::FieldNotFound(b.fields[i].0.clone())),
            FieldValue::Lazy(_) => unreachable!("handled above"),
        }
    }
}
