//! World Macros - Derive macro for compile-time models
//!
//! This crate provides `#[derive(Model)]`, which turns a plain struct into a
//! schema model with automatic documentation extraction.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Fields, Lit, LitStr, Meta};

/// Parsed `#[model(...)]` attributes on the struct
#[derive(Default)]
struct ModelAttrs {
    namespace: Option<String>,
    name: Option<String>,
}

/// Parsed `#[model(...)]` attributes on a field
#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
}

fn parse_model_attrs(attrs: &[syn::Attribute]) -> syn::Result<ModelAttrs> {
    let mut parsed = ModelAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("model")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("namespace") {
                let lit: LitStr = meta.value()?.parse()?;
                parsed.namespace = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                parsed.name = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("unknown attribute, expected `namespace` or `name`"))
            }
        })?;
    }
    Ok(parsed)
}

fn parse_field_attrs(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
    let mut parsed = FieldAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("model")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                parsed.rename = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("unknown attribute, expected `rename`"))
            }
        })?;
    }
    Ok(parsed)
}

/// Extract doc comments from attributes
fn extract_doc_comment(attrs: &[syn::Attribute]) -> Option<String> {
    let docs: Vec<String> = attrs
        .iter()
        .filter_map(|attr| {
            if attr.path().is_ident("doc") {
                if let Meta::NameValue(meta) = &attr.meta {
                    if let Expr::Lit(expr_lit) = &meta.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Some(s.value().trim().to_string());
                        }
                    }
                }
            }
            None
        })
        .collect();

    if docs.is_empty() {
        None
    } else {
        Some(docs.join("\n"))
    }
}

fn option_tokens(value: Option<String>) -> TokenStream2 {
    match value {
        Some(s) => quote! { Some(#s.to_string()) },
        None => quote! { None },
    }
}

/// Derive macro for schema models.
///
/// Every struct gets `SchemaType` (a nested struct field type) and
/// `FromValue`. Adding `#[model(namespace = "...")]` also implements `Model`,
/// making the struct a top-level model that can be registered in a `Schema`
/// and extracted from query results.
///
/// # Attributes
///
/// - `namespace` (struct): namespace of the model; its presence makes it a model
/// - `name` (struct, optional): model name (defaults to the struct name)
/// - `rename` (field, optional): field name on the wire
///
/// # Example
///
/// ```ignore
/// /// A todo item.
/// #[derive(Model)]
/// #[model(namespace = "world", name = "todos")]
/// struct Todo {
///     id: String,
///     done: bool,
///     #[model(rename = "createdAt")]
///     created_at: u64,
/// }
/// ```
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_model(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let attrs = parse_model_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Model can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Model can only be derived for structs",
            ));
        }
    };

    let mut field_defs = Vec::new();
    let mut field_inits = Vec::new();
    for field in fields {
        let field_ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let ty = &field.ty;
        let wire_name = parse_field_attrs(&field.attrs)?
            .rename
            .unwrap_or_else(|| field_ident.to_string());
        let description = option_tokens(extract_doc_comment(&field.attrs));

        field_defs.push(quote! {
            ::world_types::FieldDef {
                name: #wire_name.to_string(),
                field_type: <#ty as ::world_types::SchemaType>::field_type(),
                optional: <#ty as ::world_types::SchemaType>::is_optional(),
                description: #description,
            }
        });
        field_inits.push(quote! {
            #field_ident: ::world_types::field_from::<#ty>(fields, #wire_name)?
        });
    }

    let construct = quote! {
        Ok(Self { #(#field_inits,)* })
    };

    let common = quote! {
        impl #impl_generics ::world_types::SchemaType for #ident #ty_generics #where_clause {
            fn field_type() -> ::world_types::FieldType {
                ::world_types::FieldType::Struct {
                    fields: vec![#(#field_defs),*],
                }
            }
        }

        impl #impl_generics ::world_types::FromValue for #ident #ty_generics #where_clause {
            fn from_value(
                value: &::world_types::Value,
            ) -> ::std::result::Result<Self, ::world_types::ValueError> {
                let fields = value.as_struct().ok_or(::world_types::ValueError::TypeMismatch {
                    expected: "struct",
                    actual: value.type_name(),
                })?;
                #construct
            }
        }
    };

    let Some(namespace) = attrs.namespace else {
        return Ok(common);
    };
    let model_name = attrs.name.unwrap_or_else(|| ident.to_string());
    let description = option_tokens(extract_doc_comment(&input.attrs));

    Ok(quote! {
        #common

        impl #impl_generics ::world_types::Model for #ident #ty_generics #where_clause {
            const NAMESPACE: &'static str = #namespace;
            const NAME: &'static str = #model_name;

            fn definition() -> ::world_types::ModelDef {
                ::world_types::ModelDef {
                    fields: vec![#(#field_defs),*],
                    description: #description,
                }
            }

            fn from_fields(
                fields: &::std::collections::BTreeMap<::std::string::String, ::world_types::Value>,
            ) -> ::std::result::Result<Self, ::world_types::ValueError> {
                #construct
            }
        }
    })
}
