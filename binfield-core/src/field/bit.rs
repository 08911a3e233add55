//! `BitField`: sub-byte fields sharing a `BitCursor`.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::FieldBase;
use crate::stream::StreamHandle;
use crate::value::Value;

#[derive(Clone)]
pub struct BitField {
    pub base: FieldBase,
    /// Width in bits, not bytes — `BitField` is the one variant whose
    /// natural unit isn't a byte count.
    pub length: u32,
    /// When set, the remaining partial byte is discarded/zero-padded and
    /// the cursor advances to the next byte boundary after this field,
    /// even if the next field is itself a `BitField`.
    pub realign: bool,
}

impl BitField {
    pub fn new(length: u32) -> Self {
        Self {
            base: FieldBase::default(),
            length,
            realign: false,
        }
    }

    pub fn with_realign(mut self, realign: bool) -> Self {
        self.realign = realign;
        self
    }

    pub fn len_bits(&self) -> u32 {
        self.length
    }

    pub fn read_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, path: &str) -> Result<(Value, u64)> {
        let bits = {
            let mut c = ctx.borrow_mut();
            c.bit_cursor
                .read_bits(stream, self.length)
                .map_err(|_| BinFieldError::stream_exhausted(path, None))?
        };
        if self.realign {
            ctx.borrow_mut().bit_cursor.realign_read();
        }
        Ok((Value::Int(bits as i128), 0))
    }

    pub fn write_raw(&self, stream: &StreamHandle, ctx: &ContextHandle, value: &Value, path: &str) -> Result<u64> {
        let v = value.as_int()?;
        if v < 0 {
            return Err(BinFieldError::overflow(path, None));
        }
        {
            let mut c = ctx.borrow_mut();
            c.bit_cursor.write_bits(stream, v as u64, self.length)?;
        }
        if self.realign {
            ctx.borrow_mut().bit_cursor.realign_write(stream)?;
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ParsingContext;
    use crate::stream;

    #[test]
    fn consecutive_bit_fields_share_a_byte() {
        let stream = stream::memory(vec![0b1011_0010]);
        let ctx = ParsingContext::new_root(stream.clone(), false);

        let high = BitField::new(4);
        let low = BitField::new(4).with_realign(true);

        let (v1, _) = high.read_raw(&stream, &ctx, "a").unwrap();
        let (v2, _) = low.read_raw(&stream, &ctx, "b").unwrap();

        assert_eq!(v1.as_int().unwrap(), 0b1011);
        assert_eq!(v2.as_int().unwrap(), 0b0010);
        assert_eq!(stream.borrow_mut().tell().unwrap(), 1);
    }
}
