//! Stream abstraction.
//!
//! Grounded in `apfs-core::block::BlockReader`'s contract: implementations
//! must leave the underlying source in a well-defined position and must not
//! perform partial reads silently. Here the contract is generalized to
//! arbitrary seekable byte sources/sinks rather than fixed-size disk blocks.

use crate::error::{BinFieldError, Result};
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// Anchor for a [`Stream::seek`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// A seekable byte source/sink. This is the sole externally-mutable
/// resource a parse or emit operation touches.
pub trait Stream {
    fn tell(&mut self) -> io::Result<u64>;

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64>;

    /// Read `n` bytes. `n < 0` means "read until EOF". Implementations must
    /// not return a short read except at EOF with `n < 0`.
    fn read(&mut self, n: i64) -> io::Result<Bytes>;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// A handle to a stream shared across a [`crate::context::ParsingContext`]
/// tree: sub-structures, lazy proxies, and the raw-capture wrapper all see
/// the same underlying cursor.
pub type StreamHandle = Rc<RefCell<dyn Stream>>;

pub fn handle(stream: impl Stream + 'static) -> StreamHandle {
    Rc::new(RefCell::new(stream))
}

/// Adapts any [`Read`] + [`Write`] + [`Seek`] type (e.g. `Cursor<Vec<u8>>`,
/// `std::fs::File`) into a [`Stream`].
pub struct IoStream<T>(pub T);

impl<T> IoStream<T> {
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Read + Write + Seek> Stream for IoStream<T> {
    fn tell(&mut self) -> io::Result<u64> {
        self.0.stream_position()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let from = match whence {
            Whence::Set => {
                if offset < 0 {
                    SeekFrom::End(offset)
                } else {
                    SeekFrom::Start(offset as u64)
                }
            }
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        self.0.seek(from)
    }

    fn read(&mut self, n: i64) -> io::Result<Bytes> {
        if n < 0 {
            let mut buf = Vec::new();
            self.0.read_to_end(&mut buf)?;
            Ok(Bytes::from(buf))
        } else {
            let mut buf = vec![0u8; n as usize];
            self.0.read_exact(&mut buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "stream exhausted")
                } else {
                    e
                }
            })?;
            Ok(Bytes::from(buf))
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.write_all(data)?;
        Ok(data.len())
    }
}

/// Convenience constructor for an in-memory read/write stream.
pub fn memory(data: Vec<u8>) -> StreamHandle {
    handle(IoStream::new(Cursor::new(data)))
}

/// A windowed view of a parent stream with a base offset and optional
/// length limit. Used by `StructureField::length` and `ArrayField::length`
/// to bound a sub-parse without letting it run past its declared extent.
pub struct Substream {
    parent: StreamHandle,
    base: u64,
    limit: Option<u64>,
}

impl Substream {
    pub fn new(parent: StreamHandle, base: u64, limit: Option<u64>) -> Self {
        Self {
            parent,
            base,
            limit,
        }
    }

    fn remaining(&mut self) -> io::Result<Option<u64>> {
        match self.limit {
            None => Ok(None),
            Some(limit) => {
                let pos = self.tell()?;
                Ok(Some(limit.saturating_sub(pos)))
            }
        }
    }
}

impl Stream for Substream {
    fn tell(&mut self) -> io::Result<u64> {
        let abs = self.parent.borrow_mut().tell()?;
        Ok(abs.saturating_sub(self.base))
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let target: i64 = match whence {
            Whence::Set => {
                if offset < 0 {
                    let limit = self.limit.ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, "unbounded substream")
                    })?;
                    limit as i64 + offset
                } else {
                    offset
                }
            }
            Whence::Cur => self.tell()? as i64 + offset,
            Whence::End => {
                let limit = self.limit.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "unbounded substream")
                })?;
                limit as i64 + offset
            }
        };
        let abs = self.base as i64 + target;
        self.parent
            .borrow_mut()
            .seek(abs, Whence::Set)
            .map(|p| p.saturating_sub(self.base))
    }

    fn read(&mut self, n: i64) -> io::Result<Bytes> {
        let remaining = self.remaining()?;
        let want = if n < 0 {
            remaining
        } else {
            Some(match remaining {
                Some(r) => r.min(n as u64),
                None => n as u64,
            })
        };
        match want {
            Some(w) if (n >= 0 && w < n as u64) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream exhausted",
            )),
            Some(w) => self.parent.borrow_mut().read(w as i64),
            None => self.parent.borrow_mut().read(-1),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(remaining) = self.remaining()? {
            if data.len() as u64 > remaining {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write exceeds substream bound",
                ));
            }
        }
        self.parent.borrow_mut().write(data)
    }
}

/// Transparently records every byte read/written between a
/// [`CaptureStream::begin_capture`] / [`CaptureStream::take_capture`] pair.
/// Installed whenever `Structure::capture_raw` is set.
pub struct CaptureStream {
    inner: StreamHandle,
    buffer: RefCell<Vec<u8>>,
    capturing: Cell<bool>,
}

impl CaptureStream {
    pub fn new(inner: StreamHandle) -> Self {
        Self {
            inner,
            buffer: RefCell::new(Vec::new()),
            capturing: Cell::new(false),
        }
    }

    pub fn begin_capture(&self) {
        self.buffer.borrow_mut().clear();
        self.capturing.set(true);
    }

    pub fn take_capture(&self) -> Bytes {
        self.capturing.set(false);
        Bytes::from(self.buffer.borrow_mut().drain(..).collect::<Vec<u8>>())
    }
}

impl Stream for CaptureStream {
    fn tell(&mut self) -> io::Result<u64> {
        self.inner.borrow_mut().tell()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        self.inner.borrow_mut().seek(offset, whence)
    }

    fn read(&mut self, n: i64) -> io::Result<Bytes> {
        let data = self.inner.borrow_mut().read(n)?;
        if self.capturing.get() {
            self.buffer.borrow_mut().extend_from_slice(&data);
        }
        Ok(data)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.inner.borrow_mut().write(data)?;
        if self.capturing.get() {
            self.buffer.borrow_mut().extend_from_slice(&data[..n]);
        }
        Ok(n)
    }
}

/// Sub-byte position tracker enabling consecutive `BitField`s to share a
/// partial byte. Bits are consumed/produced MSB-first within each byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitCursor {
    buffered_bits: u8,
    byte: u8,
}

impl BitCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aligned(&self) -> bool {
        self.buffered_bits == 0
    }

    pub fn read_bits(&mut self, stream: &StreamHandle, n: u32) -> Result<u64> {
        let mut result: u64 = 0;
        let mut remaining = n;
        while remaining > 0 {
            if self.buffered_bits == 0 {
                let b = stream
                    .borrow_mut()
                    .read(1)
                    .map_err(|_| BinFieldError::stream_exhausted("<bits>", None))?;
                self.byte = b[0];
                self.buffered_bits = 8;
            }
            let take = remaining.min(self.buffered_bits as u32);
            let shift = self.buffered_bits as u32 - take;
            let mask: u8 = if take >= 8 {
                0xff
            } else {
                ((1u16 << take) - 1) as u8
            };
            let bits = (self.byte >> shift) & mask;
            result = (result << take) | bits as u64;
            self.buffered_bits -= take as u8;
            remaining -= take;
        }
        Ok(result)
    }

    pub fn write_bits(&mut self, stream: &StreamHandle, value: u64, n: u32) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            let space = 8 - self.buffered_bits;
            let take = remaining.min(space as u32);
            let shift_val = remaining - take;
            let mask: u64 = if take >= 64 {
                u64::MAX
            } else {
                (1u64 << take) - 1
            };
            let bits = ((value >> shift_val) & mask) as u8;
            self.byte = (self.byte << take) | bits;
            self.buffered_bits += take as u8;
            remaining -= take;
            if self.buffered_bits == 8 {
                stream
                    .borrow_mut()
                    .write(&[self.byte])
                    .map_err(BinFieldError::Io)?;
                self.byte = 0;
                self.buffered_bits = 0;
            }
        }
        Ok(())
    }

    /// Discard the remaining partial byte on the read side.
    pub fn realign_read(&mut self) {
        self.buffered_bits = 0;
        self.byte = 0;
    }

    /// Zero-pad and flush the remaining partial byte on the write side.
    pub fn realign_write(&mut self, stream: &StreamHandle) -> Result<()> {
        if self.buffered_bits > 0 {
            let pad = 8 - self.buffered_bits;
            self.byte <<= pad;
            stream
                .borrow_mut()
                .write(&[self.byte])
                .map_err(BinFieldError::Io)?;
            self.byte = 0;
            self.buffered_bits = 0;
        }
        Ok(())
    }
}
