//! Declarative parsing and emission of binary data structures.
//!
//! A `binfield` structure is a named sequence of fields, each a small
//! description of how to read/write some span of bytes and how to turn that
//! span into (and back from) a domain [`Value`]. Fields are composed rather
//! than subclassed (see [`field`]'s module doc), lengths and conditions are
//! expressed as [`thunk::Spec`] trees that can reference sibling fields, and
//! a field may defer its own decoding until first access (see [`lazy`]).
//!
//! The engine itself lives in [`structure`]; [`field`] holds the built-in
//! field taxonomy; [`stream`] is the I/O layer fields read from and write to.
//!
//! # Minimal by design
//!
//! This crate defines the parsing/emission engine and the built-in field
//! vocabulary. It does not include a declarative macro surface for writing
//! structures as plain Rust structs — that lives in the optional `derive`
//! feature, backed by the separate `binfield-derive` crate.
//!
//! # Typical use
//!
//! ```no_run
//! use binfield_core::{field, structure, thunk::Spec};
//!
//! let length = field::Field::Integer(field::IntegerField::new(1, field::ByteOrder::Big, false));
//! let content = field::Field::Bytes(field::BytesField::new().with_length(Spec::field("length")));
//! let def = structure::StructureDef::new(
//!     "greeting",
//!     vec![("length".to_string(), length), ("content".to_string(), content)],
//! );
//!
//! let parsed = structure::parse_bytes(&def, b"\x05hello".to_vec()).unwrap();
//! assert_eq!(parsed.get("content").unwrap().as_bytes().unwrap().as_ref(), b"hello");
//! ```
//!
//! # Note on laziness
//!
//! Fields marked `lazy` are not decoded during the main parse pass; their
//! value is a proxy that reads from the originating stream on first access.
//! This is what makes forward references possible: a field earlier in a
//! structure can reference (and force) a later field's lazy value, as long as
//! that later field's position is itself statically known (a constant
//! `offset`).

pub mod context;
pub mod error;
pub mod field;
pub mod lazy;
pub mod stream;
pub mod structure;
pub mod thunk;
pub mod value;

pub use error::{BinFieldError, ErrorKind, FieldError, Result};
pub use field::Field;
pub use stream::{memory, Stream, StreamHandle};
pub use structure::{emit, emit_bytes, parse, parse_bytes, StructureDef, StructureValue};
pub use thunk::Spec;
pub use value::{EnumValue, Value};

#[cfg(feature = "derive")]
pub use binfield_derive::BinStruct;
