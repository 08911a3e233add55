//! `IntegerField` and `VariableLengthIntegerField`.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::FieldBase;
use crate::stream::StreamHandle;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Clone)]
pub struct IntegerField {
    pub base: FieldBase,
    pub length: u32,
    pub byte_order: ByteOrder,
    pub signed: bool,
}

impl IntegerField {
    pub fn new(length: u32, byte_order: ByteOrder, signed: bool) -> Self {
        Self {
            base: FieldBase::default(),
            length,
            byte_order,
            signed,
        }
    }

    fn range(&self) -> (i128, i128) {
        let bits = self.length as u32 * 8;
        if self.signed {
            let max = (1i128 << (bits - 1)) - 1;
            let min = -(1i128 << (bits - 1));
            (min, max)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    pub fn read_raw(
        &self,
        stream: &StreamHandle,
        _ctx: &ContextHandle,
        path: &str,
    ) -> Result<(Value, u64)> {
        let raw = stream
            .borrow_mut()
            .read(self.length as i64)
            .map_err(|_| BinFieldError::stream_exhausted(path, None))?;
        let ordered: Vec<u8> = match self.byte_order {
            ByteOrder::Big => raw.to_vec(),
            ByteOrder::Little => raw.iter().rev().copied().collect(),
        };
        let mut value: u128 = 0;
        for b in &ordered {
            value = (value << 8) | *b as u128;
        }
        let signed_value = if self.signed && self.length > 0 {
            let bits = self.length * 8;
            let sign_bit = 1u128 << (bits - 1);
            if value & sign_bit != 0 {
                (value as i128) - (1i128 << bits)
            } else {
                value as i128
            }
        } else {
            value as i128
        };
        Ok((Value::Int(signed_value), self.length as u64))
    }

    pub fn write_raw(
        &self,
        stream: &StreamHandle,
        _ctx: &ContextHandle,
        value: &Value,
        path: &str,
    ) -> Result<u64> {
        let v = value.as_int()?;
        let (min, max) = self.range();
        if v < min || v > max {
            return Err(BinFieldError::overflow(path, None));
        }
        let unsigned = if v < 0 { v + (1i128 << (self.length * 8)) } else { v } as u128;
        let mut be = Vec::with_capacity(self.length as usize);
        for i in (0..self.length).rev() {
            be.push(((unsigned >> (i * 8)) & 0xff) as u8);
        }
        let out = match self.byte_order {
            ByteOrder::Big => be,
            ByteOrder::Little => be.into_iter().rev().collect(),
        };
        let written = stream.borrow_mut().write(&out).map_err(BinFieldError::Io)?;
        Ok(written as u64)
    }
}

/// Base-128 varint: each byte carries 7 value bits, MSB-first across the
/// whole sequence, with the high bit set on every byte but the last.
#[derive(Clone, Default)]
pub struct VarIntField {
    pub base: FieldBase,
}

impl VarIntField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_raw(
        &self,
        stream: &StreamHandle,
        _ctx: &ContextHandle,
        path: &str,
    ) -> Result<(Value, u64)> {
        let mut value: u128 = 0;
        let mut consumed: u64 = 0;
        loop {
            let byte = stream
                .borrow_mut()
                .read(1)
                .map_err(|_| BinFieldError::stream_exhausted(path, None))?;
            let b = byte[0];
            value = (value << 7) | (b & 0x7f) as u128;
            consumed += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok((Value::Int(value as i128), consumed))
    }

    pub fn write_raw(
        &self,
        stream: &StreamHandle,
        _ctx: &ContextHandle,
        value: &Value,
        path: &str,
    ) -> Result<u64> {
        let v = value.as_int()?;
        if v < 0 {
            return Err(BinFieldError::overflow(path, None));
        }
        let mut v = v as u128;
        let mut groups = vec![(v & 0x7f) as u8];
        v >>= 7;
        while v > 0 {
            groups.push((v & 0x7f) as u8);
            v >>= 7;
        }
        groups.reverse();
        let last = groups.len() - 1;
        let out: Vec<u8> = groups
            .into_iter()
            .enumerate()
            .map(|(i, g)| if i < last { g | 0x80 } else { g })
            .collect();
        let written = stream.borrow_mut().write(&out).map_err(BinFieldError::Io)?;
        Ok(written as u64)
    }
}
