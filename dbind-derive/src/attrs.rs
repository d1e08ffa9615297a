//! `#[dbind(...)]` field attributes

use syn::{spanned::Spanned, Data, DeriveInput, Error, Field, Fields, Ident, Result};

/// Per-field configuration shared by both derives
pub struct FieldConfig {
    /// The field identifier
    pub ident: Ident,
    /// Column or parameter name (may be renamed)
    pub name: String,
    /// Whether to leave this field out
    pub skip: bool,
    /// The field type
    pub ty: syn::Type,
}

fn parse_field_config(field: &Field) -> Result<FieldConfig> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| Error::new(field.span(), "tuple structs are not supported"))?;

    let mut name = ident.to_string();
    let mut skip = false;

    for attr in &field.attrs {
        if attr.path().is_ident("dbind") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    let value = meta.value()?;
                    let lit: syn::LitStr = value.parse()?;
                    name = lit.value();
                } else if meta.path.is_ident("skip") {
                    skip = true;
                } else {
                    return Err(meta.error(format!(
                        "unknown dbind attribute `{}`",
                        meta.path
                            .get_ident()
                            .map(|i| i.to_string())
                            .unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }
    }

    Ok(FieldConfig {
        ident,
        name,
        skip,
        ty: field.ty.clone(),
    })
}

/// Field configs of a struct with named fields
pub fn named_fields(input: &DeriveInput) -> Result<Vec<FieldConfig>> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => return Err(Error::new(input.span(), "only named fields are supported")),
        },
        _ => return Err(Error::new(input.span(), "only structs are supported")),
    };

    let configs = fields
        .iter()
        .map(parse_field_config)
        .collect::<Result<Vec<_>>>()?;

    for (i, config) in configs.iter().enumerate() {
        let duplicate = configs[..i]
            .iter()
            .any(|earlier| !earlier.skip && !config.skip && earlier.name == config.name);
        if duplicate {
            return Err(Error::new(
                config.ident.span(),
                format!("duplicate name `{}`", config.name),
            ));
        }
    }

    Ok(configs)
}
