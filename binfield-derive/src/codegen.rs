//! Builds the `structure_def`/`from_stream`/`to_stream` bodies from the
//! parsed field attributes.
//!
//! Every field's wire shape is either explicit (`kind = "..."`) or inferred
//! from its Rust type — `String` becomes a `string` field, `Vec<u8>` /
//! `bytes::Bytes` becomes `bytes`, and the integer primitives become
//! `integer` with their natural width and signedness, the same small set
//! of scalar Rust types on-disk struct definitions typically lean on to
//! stand in for C's wire types.

use crate::attrs::{ByteOrderAttr, FieldAttrs, FieldKind, LengthSpec, StructAttrs};
use indoc::formatdoc;
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Field, Ident, Type};

pub struct PreparedField {
    pub ident: Ident,
    pub name_str: String,
    pub kind: FieldKind,
    pub length: Option<LengthSpec>,
    pub byte_order: ByteOrderAttr,
    pub signed: bool,
    pub terminator: Option<Vec<u8>>,
    pub ty: Type,
}

/// Infers a field's `FieldKind` (and, for integers, its natural width and
/// signedness) from its Rust type when no explicit `kind` attribute is
/// given.
fn infer_kind(ty: &Type) -> syn::Result<(FieldKind, Option<u32>, Option<bool>)> {
    if let Type::Path(p) = ty {
        if let Some(seg) = p.path.segments.last() {
            let name = seg.ident.to_string();
            let signed = match name.as_str() {
                "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => Some(false),
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" => Some(true),
                _ => None,
            };
            if signed.is_some() {
                let width: u32 = match name.as_str() {
                    "u8" | "i8" => 1,
                    "u16" | "i16" => 2,
                    "u32" | "i32" => 4,
                    "u64" | "i64" => 8,
                    "u128" | "i128" => 16,
                    "usize" | "isize" => 8,
                    _ => unreachable!(),
                };
                return Ok((FieldKind::Integer, Some(width), signed));
            }
            if name == "String" {
                return Ok((FieldKind::String, None, None));
            }
            if name == "Vec" || name == "Bytes" {
                return Ok((FieldKind::Bytes, None, None));
            }
        }
    }
    Err(syn::Error::new_spanned(
        ty,
        formatdoc! {r#"
            cannot infer a binfield kind for this type

            annotate the field explicitly, e.g.:
                #[binfield(kind = "integer")]
                #[binfield(kind = "bytes")]
                #[binfield(kind = "string")]
        "#},
    ))
}

pub fn prepare_fields(fields: &[Field], struct_attrs: &StructAttrs) -> syn::Result<Vec<PreparedField>> {
    let default_order = struct_attrs.byte_order.unwrap_or(ByteOrderAttr::Big);
    let mut out = Vec::new();
    for field in fields {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new_spanned(field, "BinStruct does not support tuple structs"))?;
        let attrs: FieldAttrs = crate::attrs::parse_field_attrs(&field.attrs)?;
        let (inferred_kind, inferred_width, inferred_signed) = match infer_kind(&field.ty) {
            Ok(v) => v,
            Err(e) => match attrs.kind {
                Some(_) => (FieldKind::Bytes, None, None), // overridden below; placeholder never used
                None => return Err(e),
            },
        };
        let kind = attrs.kind.unwrap_or(inferred_kind);
        let length = attrs.length.clone().or_else(|| inferred_width.map(|w| LengthSpec::Const(w as i128)));
        let signed = attrs.signed.or(inferred_signed).unwrap_or(false);
        let byte_order = attrs.byte_order.unwrap_or(default_order);

        out.push(PreparedField {
            name_str: ident.to_string(),
            ident,
            kind,
            length,
            byte_order,
            signed,
            terminator: attrs.terminator.clone(),
            ty: field.ty.clone(),
        });
    }
    Ok(out)
}

fn byte_order_tokens(order: ByteOrderAttr) -> TokenStream {
    match order {
        ByteOrderAttr::Big => quote!(::binfield_core::field::ByteOrder::Big),
        ByteOrderAttr::Little => quote!(::binfield_core::field::ByteOrder::Little),
    }
}

fn length_tokens(length: &Option<LengthSpec>) -> TokenStream {
    match length {
        Some(LengthSpec::Const(n)) => {
            let n = *n;
            quote!(::binfield_core::Spec::from(::binfield_core::Value::Int(#n)))
        }
        Some(LengthSpec::FieldRef(name)) => quote!(::binfield_core::Spec::field(#name)),
        None => quote!(::binfield_core::Spec::from(::binfield_core::Value::Int(-1))),
    }
}

/// Builds the `BytesField::new()...` expression shared by the `bytes` and
/// `string` kinds: a length spec when one is given or inferred, a
/// `with_terminator(...)` call when `#[binfield(terminator = "...")]` is
/// present. A field with a terminator and no explicit length is left
/// length-less (not defaulted to the unbounded `-1` length), since the
/// unbounded length and a bare terminator scan are different read paths and
/// the former would shadow the latter.
fn bytes_field_tokens(f: &PreparedField) -> TokenStream {
    let term_tokens = f.terminator.as_ref().map(|term| {
        let bytes = term.iter().copied();
        quote! { vec![#(#bytes),*] }
    });
    match (&f.length, term_tokens) {
        (None, Some(term_tokens)) => quote! {
            ::binfield_core::field::BytesField::new().with_terminator(#term_tokens)
        },
        (Some(_), Some(term_tokens)) => {
            let len = length_tokens(&f.length);
            quote! {
                ::binfield_core::field::BytesField::new().with_length(#len).with_terminator(#term_tokens)
            }
        }
        (_, None) => {
            let len = length_tokens(&f.length);
            quote! {
                ::binfield_core::field::BytesField::new().with_length(#len)
            }
        }
    }
}

/// Builds one `(name, Field)` tuple expression per prepared field, for
/// `structure_def`'s field list.
pub fn field_tuple(f: &PreparedField) -> TokenStream {
    let name = &f.name_str;
    let order = byte_order_tokens(f.byte_order);
    match f.kind {
        FieldKind::Integer => {
            let len = match &f.length {
                Some(LengthSpec::Const(n)) => *n as u32,
                _ => 8,
            };
            let signed = f.signed;
            quote! {
                (#name.to_string(), ::binfield_core::Field::Integer(
                    ::binfield_core::field::IntegerField::new(#len, #order, #signed)
                ))
            }
        }
        FieldKind::VarInt => quote! {
            (#name.to_string(), ::binfield_core::Field::VarInt(::binfield_core::field::VarIntField::new()))
        },
        FieldKind::Bytes => {
            let bytes_field = bytes_field_tokens(f);
            quote! {
                (#name.to_string(), ::binfield_core::Field::Bytes(#bytes_field))
            }
        }
        FieldKind::String => {
            let bytes_field = bytes_field_tokens(f);
            quote! {
                (#name.to_string(), ::binfield_core::Field::Bytes(
                    ::binfield_core::field::string_field(
                        #bytes_field,
                        ::binfield_core::field::StringErrors::default(),
                    )
                ))
            }
        }
    }
}

/// Builds the expression reading field `f`'s value back out of a parsed
/// `StructureValue` into its native Rust type.
///
/// A `bytes` field is always read back as `Vec<u8>` — if the struct
/// declares it as `bytes::Bytes` instead, the generated code won't type
/// check; this is a deliberate limit of the sugar layer, not the runtime.
pub fn field_from_value(f: &PreparedField) -> TokenStream {
    let name = &f.name_str;
    let ty = &f.ty;
    let missing = format!("field `{}` missing from parsed structure", f.name_str);
    let get = quote! {
        value.get(#name).ok_or_else(|| ::binfield_core::BinFieldError::FieldNotFound(#missing.to_string()))?
    };
    match f.kind {
        FieldKind::Integer | FieldKind::VarInt => quote!((#get).as_int()? as #ty),
        FieldKind::Bytes => quote!((#get).as_bytes()?.to_vec()),
        FieldKind::String => quote!((#get).as_str()?.to_string()),
    }
}

/// Builds the `.set(name, ...)` call used by `to_stream` for field `f`.
pub fn field_to_value(f: &PreparedField) -> TokenStream {
    let name = &f.name_str;
    let ident = &f.ident;
    match f.kind {
        FieldKind::Integer | FieldKind::VarInt => quote! {
            value = value.set(#name, ::binfield_core::Value::Int(self.#ident as i128));
        },
        FieldKind::Bytes => quote! {
            value = value.set(#name, ::binfield_core::Value::from(self.#ident.clone()));
        },
        FieldKind::String => quote! {
            value = value.set(#name, ::binfield_core::Value::from(self.#ident.clone()));
        },
    }
}

pub fn struct_name_literal(ident: &Ident) -> String {
    ident.to_string()
}
