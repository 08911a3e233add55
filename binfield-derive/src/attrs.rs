//! Parsing of `#[binfield(...)]` attributes on struct fields and on the
//! struct item itself.

use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, Lit, Meta, MetaNameValue, Token};

/// The wire shape a field is declared to parse as. Defaults to an inference
/// from the field's Rust type when `kind` is omitted (see `infer_kind` in
/// `codegen.rs`); an explicit `kind = "..."` always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    VarInt,
    Bytes,
    String,
}

impl FieldKind {
    fn parse(s: &str) -> syn::Result<Self> {
        Ok(match s {
            "integer" => FieldKind::Integer,
            "varint" => FieldKind::VarInt,
            "bytes" => FieldKind::Bytes,
            "string" => FieldKind::String,
            other => {
                return Err(syn::Error::new(
                    proc_macro2::Span::call_site(),
                    format!("unknown binfield kind `{other}` (expected integer, varint, bytes, or string)"),
                ))
            }
        })
    }
}

/// `length = 4` (a constant byte count) or `length = "other_field"` (a
/// `FieldRef` onto a sibling field, auto-overridden per the core engine's
/// rule — see `binfield_core::structure`'s auto-override pass).
#[derive(Debug, Clone)]
pub enum LengthSpec {
    Const(i128),
    FieldRef(String),
}

/// `byte_order = "big"` / `"little"`, defaulting to big-endian network order
/// when neither the field nor the struct specifies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderAttr {
    Big,
    Little,
}

#[derive(Debug, Clone, Default)]
pub struct FieldAttrs {
    pub kind: Option<FieldKind>,
    pub length: Option<LengthSpec>,
    pub byte_order: Option<ByteOrderAttr>,
    pub signed: Option<bool>,
    pub terminator: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct StructAttrs {
    pub byte_order: Option<ByteOrderAttr>,
    pub alignment: Option<u64>,
}

fn name_value_pairs(attr: &Attribute) -> syn::Result<Vec<(String, Lit)>> {
    let list = match &attr.meta {
        Meta::List(list) => list,
        _ => return Ok(Vec::new()),
    };
    let parsed = list.parse_args_with(Punctuated::<MetaNameValue, Token![,]>::parse_terminated)?;
    let mut out = Vec::new();
    for nv in parsed {
        let key = nv
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected a plain identifier key"))?
            .to_string();
        let lit = match &nv.value {
            Expr::Lit(ExprLit { lit, .. }) => lit.clone(),
            other => return Err(syn::Error::new_spanned(other, "expected a literal value")),
        };
        out.push((key, lit));
    }
    Ok(out)
}

/// Collects every `#[binfield(...)]` attribute attached to a field (there's
/// normally exactly one) into a single `FieldAttrs`.
pub fn parse_field_attrs(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("binfield") {
            continue;
        }
        for (key, lit) in name_value_pairs(attr)? {
            match key.as_str() {
                "kind" => out.kind = Some(FieldKind::parse(&lit_str(&lit)?)?),
                "length" => out.length = Some(parse_length(&lit)?),
                "byte_order" => out.byte_order = Some(parse_byte_order(&lit_str(&lit)?)?),
                "signed" => out.signed = Some(lit_bool(&lit)?),
                "terminator" => out.terminator = Some(lit_str(&lit)?.into_bytes()),
                other => {
                    return Err(syn::Error::new_spanned(
                        &lit,
                        format!("unknown binfield field attribute `{other}`"),
                    ))
                }
            }
        }
    }
    Ok(out)
}

/// Collects every `#[binfield(...)]` attribute attached to the struct item.
pub fn parse_struct_attrs(attrs: &[Attribute]) -> syn::Result<StructAttrs> {
    let mut out = StructAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("binfield") {
            continue;
        }
        for (key, lit) in name_value_pairs(attr)? {
            match key.as_str() {
                "byte_order" => out.byte_order = Some(parse_byte_order(&lit_str(&lit)?)?),
                "alignment" => out.alignment = Some(lit_int(&lit)? as u64),
                other => {
                    return Err(syn::Error::new_spanned(
                        &lit,
                        format!("unknown binfield struct attribute `{other}`"),
                    ))
                }
            }
        }
    }
    Ok(out)
}

fn parse_length(lit: &Lit) -> syn::Result<LengthSpec> {
    match lit {
        Lit::Int(i) => Ok(LengthSpec::Const(i.base10_parse::<i128>()?)),
        Lit::Str(s) => Ok(LengthSpec::FieldRef(s.value())),
        other => Err(syn::Error::new_spanned(other, "expected an integer or a field name string for `length`")),
    }
}

fn parse_byte_order(s: &str) -> syn::Result<ByteOrderAttr> {
    match s {
        "big" => Ok(ByteOrderAttr::Big),
        "little" => Ok(ByteOrderAttr::Little),
        other => Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            format!("unknown byte order `{other}` (expected big or little)"),
        )),
    }
}

fn lit_str(lit: &Lit) -> syn::Result<String> {
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn lit_bool(lit: &Lit) -> syn::Result<bool> {
    match lit {
        Lit::Bool(b) => Ok(b.value()),
        other => Err(syn::Error::new_spanned(other, "expected a bool literal")),
    }
}

fn lit_int(lit: &Lit) -> syn::Result<i128> {
    match lit {
        Lit::Int(i) => i.base10_parse::<i128>(),
        other => Err(syn::Error::new_spanned(other, "expected an integer literal")),
    }
}
