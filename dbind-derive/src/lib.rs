//! Derive macros for dbind
//!
//! This crate provides the following derive macros:
//! - `FromRow` - Maps result rows to Rust structs and registers them as
//!   query return types
//! - `Arguments` - Exposes a struct's fields to SQL templates as named
//!   parameters
//!
//! These macros are re-exported from the `dbind` crate, so users typically
//! don't need to depend on this crate directly.

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod arguments;
mod attrs;
mod from_row;

/// Derive macro for mapping result rows to Rust structs.
///
/// Generates `FromRow`, plus the `RowShape` and `QueryReturn` impls that let
/// the struct be returned from a bound query: alone (exactly one row), in an
/// `Option` (at most one) or in a `Vec`.
///
/// # Attributes
///
/// - `#[dbind(rename = "column_name")]` - Use a different column name for this field
/// - `#[dbind(skip)]` - Skip this field when reading from the row
///
/// # Example
///
/// ```ignore
/// use dbind::FromRow;
///
/// #[derive(FromRow)]
/// pub struct User {
///     pub id: i64,
///     #[dbind(rename = "user_name")]
///     pub username: String,
///     pub email: String,
/// }
/// ```
#[proc_macro_derive(FromRow, attributes(dbind))]
pub fn derive_from_row(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    from_row::derive_from_row_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive macro for template arguments.
///
/// Generates `Arguments` and `Signature`, so each field is a parameter
/// templates can reference as `#{field}`, and `Argument`, so the struct can
/// be nested inside another argument and reached as `#{outer.field}`.
///
/// # Attributes
///
/// - `#[dbind(rename = "param")]` - Expose this field under a different name
/// - `#[dbind(skip)]` - Hide this field from templates
///
/// # Example
///
/// ```ignore
/// use dbind::Arguments;
///
/// #[derive(Arguments)]
/// pub struct Search {
///     pub name: String,
///     #[dbind(rename = "max")]
///     pub limit: i64,
/// }
/// ```
#[proc_macro_derive(Arguments, attributes(dbind))]
pub fn derive_arguments(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    arguments::derive_arguments_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
