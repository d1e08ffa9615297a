//! Arguments derive macro implementation

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

use crate::attrs::named_fields;

pub fn derive_arguments_impl(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_configs = named_fields(&input)?;
    let bound: Vec<_> = field_configs.iter().filter(|c| !c.skip).collect();

    let parameter_names: Vec<&str> = bound.iter().map(|c| c.name.as_str()).collect();

    // name => field, for both parameter and attribute lookup
    let lookups: Vec<TokenStream> = bound
        .iter()
        .map(|config| {
            let field_ident = &config.ident;
            let param_name = &config.name;
            quote! {
                #param_name => Some(&self.#field_ident as &dyn dbind::Argument)
            }
        })
        .collect();

    let expanded = quote! {
        impl #impl_generics dbind::Argument for #name #ty_generics #where_clause {
            fn value(&self) -> dbind::Result<dbind::Value> {
                Err(dbind::Error::ArgumentResolution {
                    path: String::new(),
                    reason: "a record cannot be bound as a single value".to_string(),
                })
            }

            fn get_attr(&self, name: &str) -> Option<&dyn dbind::Argument> {
                match name {
                    #(#lookups,)*
                    _ => None,
                }
            }
        }

        impl #impl_generics dbind::Arguments for #name #ty_generics #where_clause {
            fn argument(&self, name: &str) -> Option<&dyn dbind::Argument> {
                dbind::Argument::get_attr(self, name)
            }
        }

        impl #impl_generics dbind::Signature for #name #ty_generics #where_clause {
            fn parameter_names() -> &'static [&'static str] {
                &[#(#parameter_names),*]
            }
        }
    };

    Ok(expanded)
}
