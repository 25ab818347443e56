//! Proc macros mapping Rust structs and enums onto HDF5 datatypes.
//!
//! * `#[derive(H5Struct)]` maps a struct with named fields onto a packed
//!   compound datatype whose members follow the field order. Values are
//!   read back by member name, so any compound holding the same member
//!   names in convertible types can be read.
//! * `#[derive(H5Enum)]` maps a fieldless enum onto an enumeration over
//!   its `#[repr]` integer type (`i32` when there is none). Values are
//!   read back by name.
//!
//! Both accept `#[h5(name = "...")]` on a field or variant to store it
//! under another name. `#[h5(dynamic)]` on a struct skips the
//! `StaticH5DType` impl, for structs with value-sized fields such as
//! `FLString`.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DeriveInput, Fields, GenericParam, Generics,
    Ident, LitStr,
};

/// Derive `H5DType`, `StaticH5DType`, `BufferWrite` and `BufferRead` for a
/// struct with named fields.
#[proc_macro_derive(H5Struct, attributes(h5))]
pub fn derive_h5_struct(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5_struct(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

/// Derive `H5Enum` and the buffer traits for a fieldless enum.
#[proc_macro_derive(H5Enum, attributes(h5))]
pub fn derive_h5_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5_enum(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

/// Options from `#[h5(...)]`.
#[derive(Default)]
struct H5Options {
    name: Option<String>,
    dynamic: bool,
}

fn h5_options(attrs: &[Attribute]) -> syn::Result<H5Options> {
    let mut options = H5Options::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("h5")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                options.name = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("dynamic") {
                options.dynamic = true;
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"` or `dynamic`"))
            }
        })?;
    }
    Ok(options)
}

fn add_bound(generics: &Generics, bound: TokenStream2) -> Generics {
    let mut generics = generics.clone();
    for param in &mut generics.params {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(parse_quote!(#bound));
        }
    }
    generics
}

fn impl_h5_struct(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "H5Struct can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "H5Struct can only be derived for structs",
            ))
        }
    };
    let container = h5_options(&input.attrs)?;

    let mut idents = Vec::new();
    let mut types = Vec::new();
    let mut member_names = Vec::new();
    for field in fields {
        let Some(ident) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };
        let options = h5_options(&field.attrs)?;
        member_names.push(options.name.unwrap_or_else(|| ident.to_string()));
        idents.push(ident);
        types.push(field.ty.clone());
    }
    let indices = 0..idents.len();
    let n_members = idents.len();

    let dtype_generics = add_bound(&input.generics, quote!(::h5composites::traits::H5DType));
    let static_generics = add_bound(
        &input.generics,
        quote!(::h5composites::traits::StaticH5DType),
    );
    let write_generics = add_bound(&input.generics, quote!(::h5composites::traits::BufferWrite));
    let read_generics = add_bound(&input.generics, quote!(::h5composites::traits::BufferRead));
    let (_, ty_generics, _) = input.generics.split_for_impl();
    let (dtype_impl, _, dtype_where) = dtype_generics.split_for_impl();
    let (static_impl, _, static_where) = static_generics.split_for_impl();
    let (write_impl, _, write_where) = write_generics.split_for_impl();
    let (read_impl, _, read_where) = read_generics.split_for_impl();

    let static_dtype = if container.dynamic {
        quote! {}
    } else {
        quote! {
            impl #static_impl ::h5composites::traits::StaticH5DType for #name #ty_generics #static_where {
                fn static_h5_dtype() -> ::h5composites::dtype::DType {
                    let members: [(&str, ::h5composites::dtype::DType); #n_members] = [
                        #((#member_names, <#types as ::h5composites::traits::StaticH5DType>::static_h5_dtype())),*
                    ];
                    ::h5composites::dtype::packed_compound(members)
                }
            }
        }
    };

    Ok(quote! {
        impl #dtype_impl ::h5composites::traits::H5DType for #name #ty_generics #dtype_where {
            fn h5_dtype(&self) -> ::h5composites::dtype::DType {
                let members: [(&str, ::h5composites::dtype::DType); #n_members] = [
                    #((#member_names, ::h5composites::traits::H5DType::h5_dtype(&self.#idents))),*
                ];
                ::h5composites::dtype::packed_compound(members)
            }
        }

        #static_dtype

        impl #write_impl ::h5composites::traits::BufferWrite for #name #ty_generics #write_where {
            fn write_native(
                &self,
                view: &mut ::h5composites::buffer::H5BufferView<'_>,
            ) -> ::h5composites::error::Result<()> {
                #(::h5composites::traits::BufferWrite::write_native(
                    &self.#idents,
                    &mut view.member_mut(#indices)?,
                )?;)*
                let _ = view;
                Ok(())
            }
        }

        impl #read_impl ::h5composites::traits::BufferRead for #name #ty_generics #read_where {
            fn read_buffer(
                view: &::h5composites::buffer::H5BufferConstView<'_>,
            ) -> ::h5composites::error::Result<Self> {
                Ok(Self {
                    #(#idents: view.member_named(#member_names)?.read()?,)*
                })
            }
        }
    })
}

const INT_REPRS: [&str; 8] = ["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64"];

fn enum_repr(attrs: &[Attribute]) -> syn::Result<Ident> {
    let mut repr = Ident::new("i32", Span::call_site());
    for attr in attrs.iter().filter(|a| a.path().is_ident("repr")) {
        attr.parse_nested_meta(|meta| {
            if let Some(ident) = meta.path.get_ident() {
                if INT_REPRS.contains(&ident.to_string().as_str()) {
                    repr = ident.clone();
                }
            }
            // align(N) and friends
            if meta.input.peek(syn::token::Paren) {
                let _args;
                syn::parenthesized!(_args in meta.input);
            }
            Ok(())
        })?;
    }
    Ok(repr)
}

fn impl_h5_enum(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            name,
            "H5Enum can only be derived for enums",
        ));
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "H5Enum cannot be derived for generic enums",
        ));
    }
    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(name, "H5Enum needs at least one variant"));
    }
    let repr = enum_repr(&input.attrs)?;

    let mut variants = Vec::new();
    let mut labels = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "H5Enum variants cannot hold fields",
            ));
        }
        let options = h5_options(&variant.attrs)?;
        labels.push(options.name.unwrap_or_else(|| variant.ident.to_string()));
        variants.push(variant.ident.clone());
    }

    Ok(quote! {
        impl ::h5composites::enum_utils::H5Enum for #name {
            fn static_h5_dtype() -> ::h5composites::dtype::DType {
                ::h5composites::EnumTypeBuilder::new(
                    <#repr as ::h5composites::traits::StaticH5DType>::static_h5_dtype(),
                )
                #(.value(#labels, #name::#variants as i64))*
                .build()
            }

            fn to_name(&self) -> &'static str {
                match self {
                    #(#name::#variants => #labels,)*
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    #(#labels => Some(#name::#variants),)*
                    _ => None,
                }
            }
        }

        impl ::h5composites::traits::H5DType for #name {
            fn h5_dtype(&self) -> ::h5composites::dtype::DType {
                <Self as ::h5composites::enum_utils::H5Enum>::static_h5_dtype()
            }
        }

        impl ::h5composites::traits::StaticH5DType for #name {
            fn static_h5_dtype() -> ::h5composites::dtype::DType {
                <Self as ::h5composites::enum_utils::H5Enum>::static_h5_dtype()
            }
        }

        impl ::h5composites::traits::BufferWrite for #name {
            fn write_native(
                &self,
                view: &mut ::h5composites::buffer::H5BufferView<'_>,
            ) -> ::h5composites::error::Result<()> {
                ::h5composites::enum_utils::write_enum(self, view)
            }
        }

        impl ::h5composites::traits::BufferRead for #name {
            fn read_buffer(
                view: &::h5composites::buffer::H5BufferConstView<'_>,
            ) -> ::h5composites::error::Result<Self> {
                ::h5composites::enum_utils::read_enum(view)
            }
        }
    })
}
