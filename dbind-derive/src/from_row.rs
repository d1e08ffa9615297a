//! FromRow derive macro implementation

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

use crate::attrs::named_fields;

pub fn derive_from_row_impl(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_configs = named_fields(&input)?;

    // Generate field extraction code
    let field_extractions: Vec<TokenStream> = field_configs
        .iter()
        .map(|config| {
            let field_ident = &config.ident;
            let column_name = &config.name;
            let ty = &config.ty;

            if config.skip {
                // For skipped fields, use Default
                quote! {
                    #field_ident: <#ty as std::default::Default>::default()
                }
            } else {
                quote! {
                    #field_ident: dbind::RowExt::get::<#ty>(row, #column_name)?
                }
            }
        })
        .collect();

    // A record is mapped by the record mapper and, returned alone, is a
    // required single row
    let expanded = quote! {
        impl #impl_generics dbind::FromRow for #name #ty_generics #where_clause {
            fn from_row<R: dbind::Row>(row: &R) -> dbind::Result<Self> {
                Ok(Self {
                    #(#field_extractions),*
                })
            }
        }

        impl #impl_generics dbind::mapping::RowShape for #name #ty_generics #where_clause {
            type Mapper = dbind::mapping::RecordMapper<Self>;
        }

        impl #impl_generics dbind::QueryReturn for #name #ty_generics #where_clause {
            const STRATEGY: dbind::ReturnStrategy =
                dbind::ReturnStrategy::OneRow { required: true };

            fn from_rows(
                rows: Vec<Vec<dbind::Value>>,
                columns: &[dbind::ColumnDescriptor],
            ) -> dbind::Result<Self> {
                dbind::mapping::single_row::<Self>(rows, columns)
            }
        }
    };

    Ok(expanded)
}
