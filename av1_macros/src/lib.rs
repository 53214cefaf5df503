// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro_error2::{abort, proc_macro_error};
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

/// Attribute that leaves the annotated item untouched. Stands in for
/// `tracing::instrument` when tracing is disabled.
#[proc_macro_attribute]
pub fn noop(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

/// Derives `uniform()`, `reset_counters()` and `for_each_cdf()` for a struct
/// whose fields are (possibly nested) arrays of CDFs.
///
/// Every field must implement `crate::symbol_context::CdfArray`. Fields marked
/// with `#[cdf(skip)]` are ignored and built with `Default::default()`.
#[proc_macro_error]
#[proc_macro_derive(CdfContext, attributes(cdf))]
pub fn derive_cdf_context(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let data = match &input.data {
        syn::Data::Struct(data) => data,
        _ => abort!(input, "Only structs are supported"),
    };
    let fields = match &data.fields {
        syn::Fields::Named(fields) => &fields.named,
        _ => abort!(input, "Only structs with named fields are supported"),
    };

    let mut inits = vec![];
    let mut resets = vec![];
    let mut visits = vec![];
    for field in fields {
        let Some(ident) = &field.ident else {
            abort!(field, "Unnamed field");
        };
        if is_skipped(field) {
            inits.push(quote! { #ident: Default::default(), });
            continue;
        }
        inits.push(quote! {
            #ident: crate::symbol_context::CdfArray::uniform(),
        });
        resets.push(quote! {
            crate::symbol_context::CdfArray::reset_counter(&mut self.#ident);
        });
        visits.push(quote! {
            crate::symbol_context::CdfArray::for_each_cdf(&self.#ident, &mut f);
        });
    }

    quote! {
        impl #name {
            /// Every CDF set to the uniform distribution.
            pub fn uniform() -> Self {
                Self {
                    #(#inits)*
                }
            }

            /// Clears the adaptation counter of every CDF.
            pub fn reset_counters(&mut self) {
                #(#resets)*
            }

            /// Calls `f` on every CDF, in field declaration order.
            pub fn for_each_cdf(&self, mut f: impl FnMut(&[u16])) {
                #(#visits)*
            }
        }
    }
    .into()
}

fn is_skipped(field: &syn::Field) -> bool {
    let mut skip = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("cdf")) {
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unknown cdf attribute"))
            }
        });
        if let Err(err) = parsed {
            abort!(attr, "Invalid cdf attribute: {}", err);
        }
    }
    skip
}
