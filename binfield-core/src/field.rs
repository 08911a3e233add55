//! Field runtime: the base contract shared by every built-in variant,
//! plus the tagged-variant composition that stands in for subclassing.

pub mod array;
pub mod bit;
pub mod bytes;
pub mod conditional;
pub mod constant;
pub mod enum_field;
pub mod integer;
pub mod struct_format;
pub mod structure_field;
pub mod switch;

pub use self::array::{ArrayField, ArrayMode};
pub use self::bit::BitField;
pub use self::bytes::{string_field, BytesField, StringErrors, TerminatorHandler};
pub use self::conditional::ConditionalField;
pub use self::constant::ConstantField;
pub use self::enum_field::{EnumField, EnumType};
pub use self::integer::{ByteOrder, IntegerField, VarIntField};
pub use self::struct_format::StructFormatField;
pub use self::structure_field::StructureField;
pub use self::switch::SwitchField;

use crate::context::ContextHandle;
use crate::error::Result;
use crate::stream::StreamHandle;
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use std::rc::Rc;

/// A pure transformer between stream-form and domain-form values. Unlike
/// `default`/`override`, decoder/encoder never consult the context — they
/// are one-argument functions of the raw value alone.
pub type Transform = Rc<dyn Fn(Value) -> Result<Value>>;

/// Attributes shared by every field variant: default/override providers,
/// decoder/encoder transforms, offset/skip specs, and the lazy flag.
#[derive(Clone, Default)]
pub struct FieldBase {
    pub default: Option<Spec>,
    pub override_: Option<Spec>,
    pub decoder: Option<Transform>,
    pub encoder: Option<Transform>,
    pub offset: Option<Spec>,
    pub skip: Option<Spec>,
    pub lazy: bool,
}

impl FieldBase {
    pub fn with_default(mut self, spec: impl Into<Spec>) -> Self {
        self.default = Some(spec.into());
        self
    }

    pub fn with_override(mut self, spec: impl Into<Spec>) -> Self {
        self.override_ = Some(spec.into());
        self
    }

    pub fn with_offset(mut self, spec: impl Into<Spec>) -> Self {
        self.offset = Some(spec.into());
        self
    }

    pub fn with_skip(mut self, spec: impl Into<Spec>) -> Self {
        self.skip = Some(spec.into());
        self
    }

    pub fn make_lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}

/// The built-in field taxonomy. Each variant embeds a `FieldBase` plus its
/// own attributes; `Conditional`/`Switch`/`Array`/`Structure` are the
/// composition forms that wrap a sub-field or sub-structure rather than
/// parsing bytes themselves.
pub enum Field {
    Bytes(BytesField),
    Integer(IntegerField),
    VarInt(VarIntField),
    Bit(BitField),
    StructFormat(StructFormatField),
    Constant(ConstantField),
    Structure(StructureField),
    Array(ArrayField),
    Conditional(ConditionalField),
    Switch(SwitchField),
    Enum(EnumField),
}

impl Field {
    pub fn base(&self) -> &FieldBase {
        match self {
            Field::Bytes(f) => &f.base,
            Field::Integer(f) => &f.base,
            Field::VarInt(f) => &f.base,
            Field::Bit(f) => &f.base,
            Field::StructFormat(f) => &f.base,
            Field::Constant(f) => &f.base,
            Field::Structure(f) => &f.base,
            Field::Array(f) => &f.base,
            Field::Conditional(f) => &f.base,
            Field::Switch(f) => &f.base,
            Field::Enum(f) => &f.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut FieldBase {
        match self {
            Field::Bytes(f) => &mut f.base,
            Field::Integer(f) => &mut f.base,
            Field::VarInt(f) => &mut f.base,
            Field::Bit(f) => &mut f.base,
            Field::StructFormat(f) => &mut f.base,
            Field::Constant(f) => &mut f.base,
            Field::Structure(f) => &mut f.base,
            Field::Array(f) => &mut f.base,
            Field::Conditional(f) => &mut f.base,
            Field::Switch(f) => &mut f.base,
            Field::Enum(f) => &mut f.base,
        }
    }

    /// Installs `spec` as this field's override, unless one is already
    /// present. Used by the structure engine's auto-override pass: a
    /// `FieldRef` length/count spec implies an override on the
    /// *referenced* field, but an explicit user override always wins.
    pub fn set_override_if_absent(&mut self, spec: Spec) {
        if self.base().override_.is_none() {
            self.base_mut().override_ = Some(spec);
        }
    }

    pub fn is_lazy(&self) -> bool {
        self.base().lazy
    }

    pub fn is_bit_field(&self) -> bool {
        matches!(self, Field::Bit(_))
    }

    /// `field.len()`: a byte count determinable without a context, or
    /// `None` when it depends on sibling/ancestor state (e.g. a `FieldRef`
    /// length) or is fundamentally unknowable (a terminator scan).
    ///
    /// `BitField` is deliberately excluded: its natural unit is bits, not
    /// bytes, so it is never reported here (see `BitField::len_bits`).
    pub fn static_len(&self) -> Option<u64> {
        match self {
            Field::Bytes(f) => f.static_len(),
            Field::Integer(f) => Some(f.length as u64),
            Field::VarInt(_) => None,
            Field::Bit(_) => None,
            Field::StructFormat(f) => Some(f.byte_len()),
            Field::Constant(f) => f.static_len(),
            Field::Structure(f) => f.static_len(),
            Field::Array(f) => f.static_len(),
            Field::Conditional(_) => None,
            Field::Switch(_) => None,
            Field::Enum(f) => f.base_field.static_len(),
        }
    }
}

/// Step 2 of the parse pipeline: variant-specific byte consumption,
/// returning `(raw_value, bytes_consumed)`.
pub fn read_raw(
    field: &Rc<Field>,
    stream: &StreamHandle,
    ctx: &ContextHandle,
    path: &str,
) -> Result<(Value, u64)> {
    match field.as_ref() {
        Field::Bytes(f) => f.read_raw(stream, ctx, path),
        Field::Integer(f) => f.read_raw(stream, ctx, path),
        Field::VarInt(f) => f.read_raw(stream, ctx, path),
        Field::Bit(f) => f.read_raw(stream, ctx, path),
        Field::StructFormat(f) => f.read_raw(stream, ctx, path),
        Field::Constant(f) => f.read_raw(stream, ctx, path),
        Field::Structure(f) => f.read_raw(stream, ctx, path),
        Field::Array(f) => f.read_raw(stream, ctx, path),
        Field::Conditional(f) => f.read_raw(stream, ctx, path),
        Field::Switch(f) => f.read_raw(stream, ctx, path),
        Field::Enum(f) => f.read_raw(stream, ctx, path),
    }
}

/// Step 4 of the emit pipeline (`to_stream`): variant-specific byte
/// production from an already-encoded value.
pub fn write_raw(
    field: &Rc<Field>,
    stream: &StreamHandle,
    ctx: &ContextHandle,
    value: &Value,
    path: &str,
) -> Result<u64> {
    match field.as_ref() {
        Field::Bytes(f) => f.write_raw(stream, ctx, value, path),
        Field::Integer(f) => f.write_raw(stream, ctx, value, path),
        Field::VarInt(f) => f.write_raw(stream, ctx, value, path),
        Field::Bit(f) => f.write_raw(stream, ctx, value, path),
        Field::StructFormat(f) => f.write_raw(stream, ctx, value, path),
        Field::Constant(f) => f.write_raw(stream, ctx, value, path),
        Field::Structure(f) => f.write_raw(stream, ctx, value, path),
        Field::Array(f) => f.write_raw(stream, ctx, value, path),
        Field::Conditional(f) => f.write_raw(stream, ctx, value, path),
        Field::Switch(f) => f.write_raw(stream, ctx, value, path),
        Field::Enum(f) => f.write_raw(stream, ctx, value, path),
    }
}

/// Step 3 of the parse pipeline: apply the decoder transform, if any.
pub fn decode_value(field: &Rc<Field>, raw: Value, _path: &str) -> Result<Value> {
    match &field.base().decoder {
        Some(t) => t(raw),
        None => Ok(raw),
    }
}

/// Step 2 of the emit pipeline: apply the encoder transform, if any.
pub fn encode_value(field: &Rc<Field>, value: Value) -> Result<Value> {
    match &field.base().encoder {
        Some(t) => t(value),
        None => Ok(value),
    }
}

/// `seek_end`: advance the stream to the end of this field without parsing
/// it. Default behavior resolves a known length (static or context-derived)
/// and seeks by it; `BytesField` with a terminator-only spec can scan ahead
/// for the terminator instead.
pub fn seek_end(
    field: &Rc<Field>,
    stream: &StreamHandle,
    ctx: &ContextHandle,
    start: u64,
    path: &str,
) -> Result<u64> {
    if let Some(n) = field.static_len() {
        return stream
            .borrow_mut()
            .seek((start + n) as i64, crate::stream::Whence::Set)
            .map_err(crate::error::BinFieldError::Io);
    }
    match field.as_ref() {
        Field::Bytes(f) => f.seek_end(stream, ctx, start, path),
        Field::Array(f) => f.seek_end(stream, ctx, start, path),
        _ => Err(crate::error::BinFieldError::impossible_length(path)),
    }
}

/// Resolves the default value for a field whose current value is absent,
/// falling back to the variant's intrinsic default.
pub fn resolve_default(field: &Rc<Field>, ctx: &ContextHandle) -> Result<Value> {
    match &field.base().default {
        Some(spec) => spec.resolve(&Facade::new(ctx.clone()), None),
        None => Ok(intrinsic_default(field)),
    }
}

/// Step 1 of the emit pipeline: resolve the final domain value to encode.
///
/// `existing` is the value the caller actually supplied (`None` if the
/// field was left unset), *not* defaulted — an override, when present, sees
/// the raw presence/absence so it can tell "untouched" apart from
/// "explicitly set", which is what the auto-override rule
/// keys off of. When there is no override, an absent value falls back to
/// the default (explicit or intrinsic).
pub fn get_final_value(field: &Rc<Field>, ctx: &ContextHandle, existing: Option<Value>) -> Result<Value> {
    if let Some(ov) = &field.base().override_ {
        let facade = Facade::new(ctx.clone());
        return ov.resolve(&facade, existing.as_ref());
    }
    match existing {
        Some(v) => Ok(v),
        None => resolve_default(field, ctx),
    }
}

/// The total encoded byte length of an array's elements, used by the
/// structure engine's auto-override pass for `ArrayMode::Length` (element
/// *count* is not the same quantity as encoded byte length once elements are
/// anything other than 1 byte wide). Encodes each element through its base
/// field into a scratch in-memory stream and sums the bytes written.
pub fn array_encoded_len(base_field: &Rc<Field>, ctx: &ContextHandle, items: &[Value]) -> Result<u64> {
    let scratch = crate::stream::memory(Vec::new());
    let mut total = 0u64;
    for (i, item) in items.iter().enumerate() {
        let path = crate::error::join_index("<auto-override>", i);
        let encoded = encode_value(base_field, item.clone())?;
        total += write_raw(base_field, &scratch, ctx, &encoded, &path)?;
    }
    Ok(total)
}

fn intrinsic_default(field: &Field) -> Value {
    match field {
        Field::Bytes(_) => Value::Bytes(::bytes::Bytes::new()),
        Field::Integer(_) => Value::Int(0),
        Field::VarInt(_) => Value::Int(0),
        Field::Bit(_) => Value::Int(0),
        Field::StructFormat(_) => Value::Int(0),
        Field::Constant(f) => f.value.clone(),
        Field::Structure(_) => Value::None,
        Field::Array(_) => Value::Array(Vec::new()),
        Field::Conditional(f) => f.fallback.clone(),
        Field::Switch(_) => Value::None,
        Field::Enum(_) => Value::None,
    }
}
