//! `StructField`: a classic packed-struct format string.
//!
//! On-disk data is treated as fixed-width little/big-endian scalars, the
//! same way `*Raw` structs over `repr(C)` field types do; here the format
//! letters stand in for those field types.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::FieldBase;
use crate::stream::StreamHandle;
use crate::value::Value;

/// One parsed format letter, independent of byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Char,
    SignedByte,
    UnsignedByte,
    Bool,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Half,
    Float,
    Double,
}

impl FormatKind {
    fn size(self) -> usize {
        match self {
            FormatKind::Char | FormatKind::SignedByte | FormatKind::UnsignedByte | FormatKind::Bool => 1,
            FormatKind::Short | FormatKind::UnsignedShort | FormatKind::Half => 2,
            FormatKind::Int | FormatKind::UnsignedInt | FormatKind::Float => 4,
            FormatKind::Long | FormatKind::UnsignedLong => 4,
            FormatKind::LongLong | FormatKind::UnsignedLongLong | FormatKind::Double => 8,
        }
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            FormatKind::SignedByte | FormatKind::Short | FormatKind::Int | FormatKind::Long | FormatKind::LongLong
        )
    }

    fn is_float(self) -> bool {
        matches!(self, FormatKind::Half | FormatKind::Float | FormatKind::Double)
    }

    fn from_letter(c: char) -> Option<FormatKind> {
        Some(match c {
            'c' => FormatKind::Char,
            'b' => FormatKind::SignedByte,
            'B' => FormatKind::UnsignedByte,
            '?' => FormatKind::Bool,
            'h' => FormatKind::Short,
            'H' => FormatKind::UnsignedShort,
            'i' => FormatKind::Int,
            'I' => FormatKind::UnsignedInt,
            'l' => FormatKind::Long,
            'L' => FormatKind::UnsignedLong,
            'q' => FormatKind::LongLong,
            'Q' => FormatKind::UnsignedLongLong,
            'n' => FormatKind::LongLong,
            'N' => FormatKind::UnsignedLongLong,
            'e' => FormatKind::Half,
            'f' => FormatKind::Float,
            'd' => FormatKind::Double,
            _ => return None,
        })
    }
}

use super::integer::ByteOrder;

/// A `StructField` (or one of its fixed-letter aliases: `CharField`,
/// `UnsignedByteField`, `ShortField`, `IntField`, ...). Parses a single
/// scalar per the documented format grammar; `multibyte` only matters for
/// the single-byte letters, where it's meaningless and ignored.
#[derive(Clone)]
pub struct StructFormatField {
    pub base: FieldBase,
    pub kind: FormatKind,
    pub byte_order: ByteOrder,
}

impl StructFormatField {
    /// Parses a format string of the documented grammar: an optional
    /// byte-order prefix (`<` little, `>`/`!` big, `=`/`@` native-as-big)
    /// followed by exactly one format letter. Structures compose one
    /// `StructFormatField` per letter; a multi-letter format string is the
    /// declaration layer's job to expand into separate fields.
    pub fn parse_format(format: &str, default_order: ByteOrder) -> Result<Self> {
        let mut chars = format.chars();
        let mut byte_order = default_order;
        let mut letter = chars.next().ok_or_else(|| {
            BinFieldError::parse_error("<struct-format>", None, "empty format string")
        })?;

        match letter {
            '<' => {
                byte_order = ByteOrder::Little;
                letter = chars
                    .next()
                    .ok_or_else(|| BinFieldError::parse_error("<struct-format>", None, "missing format letter"))?;
            }
            '>' | '!' => {
                byte_order = ByteOrder::Big;
                letter = chars
                    .next()
                    .ok_or_else(|| BinFieldError::parse_error("<struct-format>", None, "missing format letter"))?;
            }
            '=' | '@' => {
                letter = chars
                    .next()
                    .ok_or_else(|| BinFieldError::parse_error("<struct-format>", None, "missing format letter"))?;
            }
            _ => {}
        }

        let kind = FormatKind::from_letter(letter)
            .ok_or_else(|| BinFieldError::parse_error("<struct-format>", None, format!("unknown format letter `{letter}`")))?;

        Ok(Self {
            base: FieldBase::default(),
            kind,
            byte_order,
        })
    }

    pub fn with_kind(kind: FormatKind, byte_order: ByteOrder) -> Self {
        Self {
            base: FieldBase::default(),
            kind,
            byte_order,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.kind.size() as u64
    }

    fn order_bytes(&self, raw: &[u8]) -> Vec<u8> {
        match self.byte_order {
            ByteOrder::Big => raw.to_vec(),
            ByteOrder::Little => raw.iter().rev().copied().collect(),
        }
    }

    pub fn read_raw(&self, stream: &StreamHandle, _ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let n = self.kind.size();
        let raw = stream
            .borrow_mut()
            .read(n as i64)
            .map_err(|_| BinFieldError::stream_exhausted(path, None))?;

        if self.kind == FormatKind::Bool {
            return Ok((Value::Bool(raw[0] != 0), 1));
        }
        if self.kind == FormatKind::Char {
            return Ok((Value::Int(raw[0] as i128), 1));
        }

        let ordered = self.order_bytes(&raw);

        if self.kind.is_float() {
            let v = match self.kind {
                FormatKind::Float => f32::from_be_bytes(ordered.try_into().unwrap()) as f64,
                FormatKind::Double => f64::from_be_bytes(ordered.try_into().unwrap()),
                FormatKind::Half => half_to_f64(u16::from_be_bytes([ordered[0], ordered[1]])),
                _ => unreachable!(),
            };
            return Ok((Value::Float(v), n as u64));
        }

        let mut value: u128 = 0;
        for b in &ordered {
            value = (value << 8) | *b as u128;
        }
        let bits = n as u32 * 8;
        let value = if self.kind.is_signed() {
            let sign_bit = 1u128 << (bits - 1);
            if value & sign_bit != 0 {
                (value as i128) - (1i128 << bits)
            } else {
                value as i128
            }
        } else {
            value as i128
        };
        Ok((Value::Int(value), n as u64))
    }

    pub fn write_raw(&self, stream: &StreamHandle, _ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let n = self.kind.size();
        let out: Vec<u8> = if self.kind == FormatKind::Bool {
            vec![if value.truthy()? { 1 } else { 0 }]
        } else if self.kind == FormatKind::Char {
            vec![(value.as_int()? & 0xff) as u8]
        } else if self.kind.is_float() {
            let f = value.as_float()?;
            let be = match self.kind {
                FormatKind::Float => (f as f32).to_be_bytes().to_vec(),
                FormatKind::Double => f.to_be_bytes().to_vec(),
                FormatKind::Half => f64_to_half(f).to_be_bytes().to_vec(),
                _ => unreachable!(),
            };
            self.order_bytes(&be)
        } else {
            let v = value.as_int()?;
            let bits = n as u32 * 8;
            if self.kind.is_signed() {
                let (min, max) = ((-(1i128 << (bits - 1))), (1i128 << (bits - 1)) - 1);
                if v < min || v > max {
                    return Err(BinFieldError::overflow(path, None));
                }
            } else if v < 0 || v > (1i128 << bits) - 1 {
                return Err(BinFieldError::overflow(path, None));
            }
            let unsigned = if v < 0 { v + (1i128 << bits) } else { v } as u128;
            let mut be = Vec::with_capacity(n);
            for i in (0..n).rev() {
                be.push(((unsigned >> (i * 8)) & 0xff) as u8);
            }
            self.order_bytes(&be)
        };

        let written = stream.borrow_mut().write(&out).map_err(BinFieldError::Io)?;
        Ok(written as u64)
    }
}

/// IEEE 754 binary16 -> f64, used for the `e` format letter.
fn half_to_f64(bits: u16) -> f64 {
    let sign = (bits >> 15) & 1;
    let exp = (bits >> 10) & 0x1f;
    let frac = bits & 0x3ff;
    let value = if exp == 0 {
        (frac as f64) * 2f64.powi(-24)
    } else if exp == 0x1f {
        if frac == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + frac as f64 / 1024.0) * 2f64.powi(exp as i32 - 15)
    };
    if sign == 1 {
        -value
    } else {
        value
    }
}

fn f64_to_half(v: f64) -> u16 {
    let sign: u16 = if v.is_sign_negative() { 1 } else { 0 };
    let v = v.abs();
    if v == 0.0 {
        return sign << 15;
    }
    if v.is_infinite() {
        return (sign << 15) | (0x1f << 10);
    }
    let exp = v.log2().floor() as i32;
    let mantissa = v / 2f64.powi(exp) - 1.0;
    let biased = exp + 15;
    if biased <= 0 || biased >= 0x1f {
        return (sign << 15) | (0x1f << 10);
    }
    let frac = (mantissa * 1024.0).round() as u16;
    (sign << 15) | ((biased as u16) << 10) | (frac & 0x3ff)
}

/// Fixed-letter constructors matching the documented aliases.
impl StructFormatField {
    pub fn char_field(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::Char, byte_order)
    }

    pub fn unsigned_byte(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::UnsignedByte, byte_order)
    }

    pub fn signed_byte(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::SignedByte, byte_order)
    }

    pub fn short(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::Short, byte_order)
    }

    pub fn unsigned_short(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::UnsignedShort, byte_order)
    }

    pub fn int(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::Int, byte_order)
    }

    pub fn unsigned_int(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::UnsignedInt, byte_order)
    }

    pub fn float(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::Float, byte_order)
    }

    pub fn double(byte_order: ByteOrder) -> Self {
        Self::with_kind(FormatKind::Double, byte_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_byte_order_prefix() {
        let f = StructFormatField::parse_format("<I", ByteOrder::Big).unwrap();
        assert_eq!(f.byte_order, ByteOrder::Little);
        assert_eq!(f.kind, FormatKind::UnsignedInt);
    }

    #[test]
    fn falls_back_to_default_order() {
        let f = StructFormatField::parse_format("H", ByteOrder::Little).unwrap();
        assert_eq!(f.byte_order, ByteOrder::Little);
        assert_eq!(f.kind, FormatKind::UnsignedShort);
    }

    #[test]
    fn rejects_unknown_letter() {
        assert!(StructFormatField::parse_format("z", ByteOrder::Big).is_err());
    }

    #[test]
    fn long_and_unsigned_long_are_four_bytes() {
        let l = StructFormatField::parse_format("l", ByteOrder::Big).unwrap();
        let upper_l = StructFormatField::parse_format("L", ByteOrder::Big).unwrap();
        assert_eq!(l.byte_len(), 4);
        assert_eq!(upper_l.byte_len(), 4);
    }

    #[test]
    fn long_long_and_native_long_are_eight_bytes() {
        let q = StructFormatField::parse_format("q", ByteOrder::Big).unwrap();
        let upper_q = StructFormatField::parse_format("Q", ByteOrder::Big).unwrap();
        let n = StructFormatField::parse_format("n", ByteOrder::Big).unwrap();
        let upper_n = StructFormatField::parse_format("N", ByteOrder::Big).unwrap();
        assert_eq!(q.byte_len(), 8);
        assert_eq!(upper_q.byte_len(), 8);
        assert_eq!(n.byte_len(), 8);
        assert_eq!(upper_n.byte_len(), 8);
    }

    #[test]
    fn long_round_trips_a_value_distinct_from_long_long() {
        let stream = crate::stream::memory(Vec::new());
        let ctx = crate::context::ParsingContext::new_root(stream.clone(), false);
        let l = StructFormatField::with_kind(FormatKind::Long, ByteOrder::Big);
        l.write_raw(&stream, &ctx, &Value::Int(-1), "l").unwrap();
        assert_eq!(stream.borrow_mut().tell().unwrap(), 4);
        stream.borrow_mut().seek(0, crate::stream::Whence::Set).unwrap();
        let (v, n) = l.read_raw(&stream, &ctx, "l").unwrap();
        assert_eq!(n, 4);
        assert_eq!(v.as_int().unwrap(), -1);
    }
}
