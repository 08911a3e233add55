//! `BytesField` and its `StringField` specialization.

use crate::context::ContextHandle;
use crate::error::{BinFieldError, Result};
use crate::field::{FieldBase, Transform};
use crate::stream::{StreamHandle, Whence};
use crate::thunk::{Facade, Spec};
use crate::value::Value;
use bytes::Bytes;
use std::rc::Rc;

/// How a found terminator is reflected in the parsed value and the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminatorHandler {
    /// Terminator is consumed from the stream but excluded from the value.
    #[default]
    Consume,
    /// Terminator is consumed from the stream and left in the value.
    Include,
    /// Terminator is located but not consumed; the next field starts at it.
    Until,
}

#[derive(Clone)]
pub struct BytesField {
    pub base: FieldBase,
    pub length: Option<Spec>,
    pub terminator: Option<Vec<u8>>,
    pub strict: bool,
    pub padding: Option<Vec<u8>>,
    pub step: usize,
    pub terminator_handler: TerminatorHandler,
}

impl Default for BytesField {
    fn default() -> Self {
        Self {
            base: FieldBase::default(),
            length: None,
            terminator: None,
            strict: true,
            padding: None,
            step: 1,
            terminator_handler: TerminatorHandler::default(),
        }
    }
}

impl BytesField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(mut self, length: impl Into<Spec>) -> Self {
        self.length = Some(length.into());
        self
    }

    pub fn with_terminator(mut self, term: impl Into<Vec<u8>>) -> Self {
        self.terminator = Some(term.into());
        self
    }

    pub fn with_padding(mut self, pad: impl Into<Vec<u8>>) -> Self {
        self.padding = Some(pad.into());
        self
    }

    /// `FixedLengthField(length)`.
    pub fn fixed(length: i128) -> Self {
        Self::new().with_length(Value::Int(length))
    }

    /// `TerminatedField(terminator)`, defaulting to a NUL byte.
    pub fn terminated(terminator: Option<Vec<u8>>) -> Self {
        Self::new().with_terminator(terminator.unwrap_or_else(|| vec![0]))
    }

    fn resolve_length(&self, ctx: &ContextHandle) -> Result<Option<i128>> {
        match &self.length {
            Some(spec) => Ok(Some(spec.resolve(&Facade::new(ctx.clone()), None)?.as_int()?)),
            None => Ok(None),
        }
    }

    pub fn static_len(&self) -> Option<u64> {
        match &self.length {
            Some(Spec::Const(v)) => v.as_int().ok().filter(|&n| n >= 0).map(|n| n as u64),
            _ => None,
        }
    }

    pub fn read_raw(
        &self,
        stream: &StreamHandle,
        ctx: &ContextHandle,
        path: &str,
    ) -> Result<(Value, u64)> {
        let length = self.resolve_length(ctx)?;

        match (length, &self.terminator) {
            (Some(n), _) if n >= 0 => {
                let raw = read_exact(stream, n as u64, self.strict, path)?;
                let trimmed = match &self.terminator {
                    Some(term) => strip_terminator_within(&raw, term, self.step, self.terminator_handler),
                    None => strip_padding(&raw, self.padding.as_deref()),
                };
                Ok((Value::Bytes(trimmed), n as u64))
            }
            (Some(_), _) | (None, None) => {
                let raw = stream
                    .borrow_mut()
                    .read(-1)
                    .map_err(|_| BinFieldError::stream_exhausted(path, None))?;
                let len = raw.len() as u64;
                Ok((Value::Bytes(raw), len))
            }
            (None, Some(term)) => {
                let (raw, found) = scan_for_terminator(stream, term, self.step.max(1))?;
                if !found && self.strict {
                    return Err(BinFieldError::stream_exhausted(path, None));
                }
                let value = match self.terminator_handler {
                    TerminatorHandler::Include => raw.clone(),
                    _ => raw[..raw.len().saturating_sub(term.len())].to_vec(),
                };
                if self.terminator_handler == TerminatorHandler::Until {
                    stream
                        .borrow_mut()
                        .seek(-(term.len() as i64), Whence::Cur)
                        .map_err(BinFieldError::Io)?;
                    let consumed = raw.len() as u64 - term.len() as u64;
                    return Ok((Value::Bytes(Bytes::from(value)), consumed));
                }
                let consumed = raw.len() as u64;
                Ok((Value::Bytes(Bytes::from(value)), consumed))
            }
        }
    }

    pub fn write_raw(
        &self,
        stream: &StreamHandle,
        ctx: &ContextHandle,
        value: &Value,
        path: &str,
    ) -> Result<u64> {
        let content = value.as_bytes()?.clone();
        let length = self.resolve_length(ctx)?;

        let mut out = content.to_vec();
        if let Some(term) = &self.terminator {
            match self.terminator_handler {
                TerminatorHandler::Include => {
                    if !out.ends_with(term.as_slice()) {
                        return Err(BinFieldError::write_error(
                            path,
                            None,
                            "value does not end with required terminator",
                        ));
                    }
                }
                TerminatorHandler::Consume | TerminatorHandler::Until => out.extend_from_slice(term),
            }
        }

        if let Some(n) = length {
            if n >= 0 {
                let n = n as usize;
                if out.len() > n {
                    return Err(BinFieldError::write_error(
                        path,
                        None,
                        format!("value of {} bytes exceeds field length {}", out.len(), n),
                    ));
                }
                if out.len() < n {
                    match &self.padding {
                        Some(pad) if !pad.is_empty() => {
                            while out.len() < n {
                                let remaining = n - out.len();
                                let take = remaining.min(pad.len());
                                out.extend_from_slice(&pad[..take]);
                            }
                        }
                        _ => {
                            return Err(BinFieldError::write_error(
                                path,
                                None,
                                format!("value of {} bytes is short for field length {} and no padding configured", out.len(), n),
                            ));
                        }
                    }
                }
            }
        }

        let written = stream.borrow_mut().write(&out).map_err(BinFieldError::Io)?;
        Ok(written as u64)
    }

    pub fn seek_end(
        &self,
        stream: &StreamHandle,
        ctx: &ContextHandle,
        start: u64,
        path: &str,
    ) -> Result<u64> {
        if let Some(n) = self.resolve_length(ctx)? {
            if n >= 0 {
                return stream
                    .borrow_mut()
                    .seek((start + n as u64) as i64, Whence::Set)
                    .map_err(BinFieldError::Io);
            }
        }
        if let Some(term) = &self.terminator {
            let (raw, found) = scan_for_terminator(stream, term, self.step.max(1))?;
            if !found && self.strict {
                return Err(BinFieldError::stream_exhausted(path, None));
            }
            if self.terminator_handler == TerminatorHandler::Until {
                stream
                    .borrow_mut()
                    .seek(-(term.len() as i64), Whence::Cur)
                    .map_err(BinFieldError::Io)?;
            }
            return Ok(start + raw.len() as u64);
        }
        stream.borrow_mut().seek(0, Whence::End).map_err(BinFieldError::Io)
    }
}

fn read_exact(stream: &StreamHandle, n: u64, strict: bool, path: &str) -> Result<Bytes> {
    match stream.borrow_mut().read(n as i64) {
        Ok(b) => Ok(b),
        Err(e) => {
            if strict {
                Err(BinFieldError::stream_exhausted(path, None))
            } else {
                Err(BinFieldError::Io(e))
            }
        }
    }
}

/// Scans `step`-sized chunks from the current stream position, checking
/// each step-aligned offset (`0, step, 2*step, ...`) for `term` the same
/// way `strip_terminator_within` does for the length-known case, until it
/// finds one or runs out of stream. Returns everything up to and including
/// the terminator (seeking back over any bytes read past it) and whether
/// it was actually found before EOF.
fn scan_for_terminator(stream: &StreamHandle, term: &[u8], step: usize) -> Result<(Vec<u8>, bool)> {
    let step = step.max(1);
    let mut buf = Vec::new();
    let mut checked = 0usize;
    loop {
        match stream.borrow_mut().read(step as i64) {
            Ok(chunk) => {
                if chunk.is_empty() {
                    return Ok((buf, false));
                }
                buf.extend_from_slice(&chunk);
                while checked + term.len() <= buf.len() {
                    if &buf[checked..checked + term.len()] == term {
                        let overrun = buf.len() - (checked + term.len());
                        if overrun > 0 {
                            stream
                                .borrow_mut()
                                .seek(-(overrun as i64), Whence::Cur)
                                .map_err(BinFieldError::Io)?;
                        }
                        buf.truncate(checked + term.len());
                        return Ok((buf, true));
                    }
                    checked += step;
                }
            }
            Err(_) => return Ok((buf, false)),
        }
    }
}

fn strip_terminator_within(raw: &Bytes, term: &[u8], step: usize, handler: TerminatorHandler) -> Bytes {
    let step = step.max(1);
    let mut pos = 0;
    while pos + term.len() <= raw.len() {
        if &raw[pos..pos + term.len()] == term {
            return match handler {
                TerminatorHandler::Include => raw.slice(..pos + term.len()),
                _ => raw.slice(..pos),
            };
        }
        pos += step;
    }
    raw.clone()
}

fn strip_padding(raw: &Bytes, padding: Option<&[u8]>) -> Bytes {
    let pad = match padding {
        Some(p) if !p.is_empty() => p,
        _ => return raw.clone(),
    };
    let mut end = raw.len();
    while end >= pad.len() && &raw[end - pad.len()..end] == pad {
        end -= pad.len();
    }
    raw.slice(..end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringErrors {
    pub lossy: bool,
}

impl Default for StringErrors {
    fn default() -> Self {
        Self { lossy: false }
    }
}

/// Builds a `StringField`: a `BytesField` with UTF-8 decode/encode
/// transforms installed as decoder/encoder.
pub fn string_field(base: BytesField, errors: StringErrors) -> BytesField {
    let mut f = base;
    f.base.decoder = Some(decoder(errors));
    f.base.encoder = Some(encoder());
    f
}

fn decoder(errors: StringErrors) -> Transform {
    Rc::new(move |v: Value| -> Result<Value> {
        let bytes = v.as_bytes()?.clone();
        let s = if errors.lossy {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            String::from_utf8(bytes.to_vec())
                .map_err(|e| BinFieldError::parse_error("", None, format!("invalid utf-8: {e}")))?
        };
        Ok(Value::Str(s))
    })
}

fn encoder() -> Transform {
    Rc::new(|v: Value| -> Result<Value> {
        let s = v.as_str()?.to_string();
        Ok(Value::Bytes(Bytes::from(s.into_bytes())))
    })
}
