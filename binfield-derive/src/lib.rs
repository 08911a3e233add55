//! Declaration sugar for `binfield-core`: `#[derive(BinStruct)]` reads
//! `#[binfield(...)]` attributes off an ordinary struct and emits the
//! ordered field list plus `from_stream`/`to_stream` glue a hand-written
//! `StructureDef` would otherwise require.
//!
//! This crate is sugar only — it owns no parsing/emission logic of its own,
//! just the translation from struct-and-attributes into calls against
//! `binfield-core`'s public API. The macro expands against `::binfield_core`
//! paths, so the deriving crate must depend on `binfield-core` under that
//! name (the common case: re-exported via its `derive` feature).

mod attrs;
mod codegen;

use attrs::parse_struct_attrs;
use codegen::{field_from_value, field_tuple, field_to_value, prepare_fields, struct_name_literal};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

#[proc_macro_derive(BinStruct, attributes(binfield))]
pub fn derive_bin_struct(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input).unwrap_or_else(|e| e.to_compile_error()).into()
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let ident = input.ident;
    let struct_attrs = parse_struct_attrs(&input.attrs)?;

    let data = match input.data {
        Data::Struct(s) => s,
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "BinStruct can only be derived for structs",
            ))
        }
    };
    let fields = match data.fields {
        Fields::Named(named) => named.named.into_iter().collect::<Vec<_>>(),
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "BinStruct requires named fields",
            ))
        }
    };

    let prepared = prepare_fields(&fields, &struct_attrs)?;

    let struct_name = struct_name_literal(&ident);
    let field_tuples = prepared.iter().map(field_tuple);
    let field_reads = prepared.iter().map(|f| {
        let ident = &f.ident;
        let value_expr = field_from_value(f);
        quote! { #ident: #value_expr }
    });
    let field_writes = prepared.iter().map(field_to_value);

    let byte_order_setup = match struct_attrs.byte_order {
        Some(attrs::ByteOrderAttr::Big) => quote!(.with_byte_order(::binfield_core::field::ByteOrder::Big)),
        Some(attrs::ByteOrderAttr::Little) => quote!(.with_byte_order(::binfield_core::field::ByteOrder::Little)),
        None => quote!(),
    };
    let alignment_setup = match struct_attrs.alignment {
        Some(n) => quote!(.with_alignment(#n)),
        None => quote!(),
    };

    Ok(quote! {
        impl #ident {
            /// The ordered field list and structure metadata this struct
            /// declares, built fresh on every call (cheap: an `Rc` wrapping
            /// a handful of small field descriptors).
            pub fn structure_def() -> ::std::rc::Rc<::binfield_core::StructureDef> {
                ::binfield_core::StructureDef::new(
                    #struct_name,
                    vec![ #(#field_tuples),* ],
                )
                #byte_order_setup
                #alignment_setup
            }

            /// Parses `Self` from `stream`, starting at its current position.
            pub fn from_stream(stream: ::binfield_core::StreamHandle) -> ::binfield_core::Result<Self> {
                let def = Self::structure_def();
                let (value, _ctx) = ::binfield_core::structure::parse(&def, stream, None, false, ::std::string::String::new())?;
                Ok(Self {
                    #(#field_reads),*
                })
            }

            /// Emits `self` onto `stream` at its current position.
            pub fn to_stream(&self, stream: ::binfield_core::StreamHandle) -> ::binfield_core::Result<()> {
                let def = Self::structure_def();
                let mut value = ::binfield_core::StructureValue::new(def.clone());
                #(#field_writes)*
                ::binfield_core::structure::emit(&def, &value, stream, None, false, ::std::string::String::new())?;
                Ok(())
            }
        }
    })
}
