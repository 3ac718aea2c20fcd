//! Procedural macros for the `activerecord` data access layer.
//!
//! `#[derive(Entity)]` inspects a struct with named fields and generates:
//! - an `EntityDefinition` impl: table, primary key, sequence, field map
//!   (only for renamed columns), format map and timestamp settings;
//! - a `Record` impl converting the struct to and from the property map an
//!   `EntityDao` works with.
//!
//! Struct attributes: `#[entity(table = "..", name = "..", sequence = "..",
//! timestamps, created = "..", updated = "..")]`. The hooks take a function
//! path: `#[entity(optimize_search_query = "path", computed_value = "path")]`.
//! Field attributes: `#[column(id)]`, `#[column(name = "..")]`,
//! `#[column(format = "..")]`, `#[column(skip)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, spanned::Spanned, Data, DeriveInput, Fields, Ident, LitStr, Type};

use inflections::Inflect;

/// Format codes accepted in `#[column(format = "..")]`, mapped to the variant name.
const FORMAT_CODES: &[(&str, &str)] = &[
    ("int", "Int"),
    ("float", "Float"),
    ("string", "String"),
    ("alphanumeric", "Alphanumeric"),
    ("serialized", "Serialized"),
    ("json", "Json"),
    ("csv", "Csv"),
    ("bool", "Bool"),
    ("H:i:s", "Time"),
    ("H:i:s.u", "TimeMicro"),
    ("H:i:sO", "TimeTz"),
    ("H:i:s.uO", "TimeMicroTz"),
    ("Y-m-d", "Date"),
    ("Y-m-d H:i:s", "DateTime"),
    ("Y-m-d H:i:s.u", "DateTimeMicro"),
    ("Y-m-d H:i:sO", "DateTimeTz"),
    ("Y-m-d H:i:s.uO", "DateTimeMicroTz"),
    ("U", "Timestamp"),
];

/// Helper to get the inner type of an `Option<T>`.
fn get_option_inner(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner_ty)) = args.args.first() {
                        return Some(inner_ty);
                    }
                }
            }
        }
    }
    None
}

/// Format implied by a field type when no explicit format is given.
fn inferred_format(ty: &Type) -> Option<&'static str> {
    let ty = get_option_inner(ty).unwrap_or(ty);
    let ty_str = ty.to_token_stream().to_string().replace(' ', "");
    match ty_str.as_str() {
        "bool" => Some("Bool"),
        "f64" | "f32" => Some("Float"),
        "Vec<String>" => Some("Csv"),
        s if s.ends_with("NaiveDateTime") || s.contains("DateTime<") => Some("DateTime"),
        s if s.ends_with("NaiveDate") => Some("Date"),
        s if s.ends_with("NaiveTime") => Some("Time"),
        "Value" | "serde_json::Value" | "::serde_json::Value" => Some("Json"),
        _ => None,
    }
}

fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

/// Holds parsed metadata about a single struct field.
struct FieldMetadata {
    ident: Ident,
    property: String,
    column_name: String,
    format: Option<&'static str>,
    is_id: bool,
    is_skipped: bool,
}

/// Struct level `#[entity(...)]` settings.
#[derive(Default)]
struct EntityAttrs {
    table: Option<String>,
    name: Option<String>,
    sequence: Option<String>,
    timestamps: bool,
    created: Option<String>,
    updated: Option<String>,
    optimize_search_query: Option<syn::Path>,
    computed_value: Option<syn::Path>,
}

fn parse_entity_attrs(input: &DeriveInput) -> syn::Result<EntityAttrs> {
    let mut attrs = EntityAttrs::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            let string_value = |meta: &syn::meta::ParseNestedMeta| -> syn::Result<String> {
                let s: LitStr = meta.value()?.parse()?;
                Ok(s.value())
            };
            if meta.path.is_ident("table") {
                attrs.table = Some(string_value(&meta)?);
            } else if meta.path.is_ident("name") {
                attrs.name = Some(string_value(&meta)?);
            } else if meta.path.is_ident("sequence") {
                attrs.sequence = Some(string_value(&meta)?);
            } else if meta.path.is_ident("timestamps") {
                attrs.timestamps = true;
            } else if meta.path.is_ident("created") {
                attrs.created = Some(string_value(&meta)?);
                attrs.timestamps = true;
            } else if meta.path.is_ident("updated") {
                attrs.updated = Some(string_value(&meta)?);
                attrs.timestamps = true;
            } else if meta.path.is_ident("optimize_search_query") {
                let s: LitStr = meta.value()?.parse()?;
                attrs.optimize_search_query = Some(s.parse()?);
            } else if meta.path.is_ident("computed_value") {
                let s: LitStr = meta.value()?.parse()?;
                attrs.computed_value = Some(s.parse()?);
            } else {
                return Err(meta.error("unknown #[entity(...)] key; expected table, name, sequence, timestamps, created, updated, optimize_search_query or computed_value"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

/// Parses all named fields from a `DeriveInput` struct.
fn parse_field_metadata(input: &DeriveInput) -> syn::Result<Vec<FieldMetadata>> {
    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "#[derive(Entity)] only supports structs with named fields.",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "#[derive(Entity)] can only be used on structs.",
            ))
        }
    };

    let mut out = Vec::with_capacity(fields.named.len());
    for field in &fields.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let property = ident.to_string().trim_start_matches("r#").to_string();
        let mut column_name = property.clone();
        let mut format = inferred_format(&field.ty);
        let mut is_id = false;
        let mut is_skipped = false;

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("column")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    is_id = true;
                } else if meta.path.is_ident("skip") {
                    is_skipped = true;
                } else if meta.path.is_ident("name") {
                    let s: LitStr = meta.value()?.parse()?;
                    column_name = s.value();
                } else if meta.path.is_ident("format") {
                    let s: LitStr = meta.value()?.parse()?;
                    let code = s.value();
                    format = if code.is_empty() {
                        None
                    } else {
                        let variant = FORMAT_CODES
                            .iter()
                            .find(|(c, _)| *c == code)
                            .map(|(_, v)| *v)
                            .ok_or_else(|| {
                                syn::Error::new(s.span(), format!("Unknown format: {}", code))
                            })?;
                        Some(variant)
                    };
                } else {
                    return Err(meta.error(
                        "unknown #[column(...)] key; expected id, name, format or skip",
                    ));
                }
                Ok(())
            })?;
        }

        if !is_skipped && !is_valid_ident(&column_name) {
            return Err(syn::Error::new(
                field.span(),
                format!("Invalid column name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", column_name),
            ));
        }
        out.push(FieldMetadata {
            ident,
            property,
            column_name,
            format,
            is_id,
            is_skipped,
        });
    }
    Ok(out)
}

// --- `Entity` derive macro ---

#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let attrs = parse_entity_attrs(input)?;
    let mut fields = parse_field_metadata(input)?;

    // `User` -> `users` unless overridden.
    let table_name = attrs
        .table
        .clone()
        .unwrap_or_else(|| format!("{}s", struct_name.to_string().to_snake_case()));
    if !is_valid_ident(&table_name) {
        return Err(syn::Error::new(
            struct_name.span(),
            format!("Invalid table name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", table_name),
        ));
    }
    let entity_name = attrs.name.clone().unwrap_or_else(|| struct_name.to_string());

    if fields.iter().filter(|f| f.is_skipped && f.is_id).count() > 0 {
        return Err(syn::Error::new(
            struct_name.span(),
            "a #[column(id)] field can not be skipped",
        ));
    }
    if !fields.iter().any(|f| f.is_id) {
        match fields.iter_mut().find(|f| f.property == "id" && !f.is_skipped) {
            Some(f) => f.is_id = true,
            None => {
                return Err(syn::Error::new(
                    struct_name.span(),
                    "An entity needs a primary key. Hint: mark your primary key field like `#[column(id)]` or name it `id`.",
                ))
            }
        }
    }

    let persisted: Vec<&FieldMetadata> = fields.iter().filter(|f| !f.is_skipped).collect();
    let primary_key: Vec<&String> = persisted
        .iter()
        .filter(|f| f.is_id)
        .map(|f| &f.column_name)
        .collect();
    let field_map: Vec<TokenStream2> = persisted
        .iter()
        .filter(|f| f.column_name != f.property)
        .map(|f| {
            let (col, prop) = (&f.column_name, &f.property);
            quote! { (#col, #prop) }
        })
        .collect();
    let format_map: Vec<TokenStream2> = persisted
        .iter()
        .filter_map(|f| {
            let variant = Ident::new(f.format?, f.ident.span());
            let col = &f.column_name;
            Some(quote! { (#col, ::activerecord::Format::#variant) })
        })
        .collect();
    let sequence = match &attrs.sequence {
        Some(s) => quote! { ::core::option::Option::Some(#s) },
        None => quote! { ::core::option::Option::None },
    };
    let timestamps = attrs.timestamps;
    let created = attrs.created.as_deref().unwrap_or("created");
    let updated = attrs.updated.as_deref().unwrap_or("updated");

    let optimize_hook = attrs.optimize_search_query.as_ref().map(|path| {
        quote! {
            fn optimize_search_query(
                query: ::activerecord::QueryBuilder,
                params: &::activerecord::SearchParams,
            ) -> ::activerecord::QueryBuilder {
                #path(query, params)
            }
        }
    });
    let computed_hook = attrs.computed_value.as_ref().map(|path| {
        quote! {
            fn computed_value(
                dao: &::activerecord::EntityDao<Self>,
                property: &str,
            ) -> ::core::option::Option<::activerecord::Native> {
                #path(dao, property)
            }
        }
    });

    let definition_impl = quote! {
        impl ::activerecord::EntityDefinition for #struct_name {
            const NAME: &'static str = #entity_name;
            const TABLE: &'static str = #table_name;
            const PRIMARY_KEY: &'static [&'static str] = &[#(#primary_key),*];
            const PRIMARY_KEY_SEQUENCE: ::core::option::Option<&'static str> = #sequence;
            const FIELD_MAP: &'static [(&'static str, &'static str)] = &[#(#field_map),*];
            const FORMAT_MAP: &'static [(&'static str, ::activerecord::Format)] = &[#(#format_map),*];
            const TIMESTAMPS: bool = #timestamps;
            const CREATED_COLUMN: &'static str = #created;
            const UPDATED_COLUMN: &'static str = #updated;
            #optimize_hook
            #computed_hook
        }
    };

    let from_mappings: Vec<TokenStream2> = fields
        .iter()
        .map(|f| {
            let ident = &f.ident;
            if f.is_skipped {
                return quote! { #ident: ::core::default::Default::default() };
            }
            let prop = &f.property;
            quote! {
                #ident: ::activerecord::FromNative::from_native(
                    props.get(#prop).cloned().unwrap_or(::activerecord::Native::Null),
                )?
            }
        })
        .collect();
    let to_mappings: Vec<TokenStream2> = persisted
        .iter()
        .map(|f| {
            let ident = &f.ident;
            let prop = &f.property;
            quote! {
                props.insert(
                    ::std::string::String::from(#prop),
                    ::activerecord::Native::from(::core::clone::Clone::clone(&self.#ident)),
                );
            }
        })
        .collect();

    let record_impl = quote! {
        impl ::activerecord::Record for #struct_name {
            fn from_properties(props: &::activerecord::Properties) -> ::activerecord::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#from_mappings),*
                })
            }

            fn to_properties(&self) -> ::activerecord::Properties {
                let mut props = ::activerecord::Properties::new();
                #(#to_mappings)*
                props
            }
        }
    };

    Ok(quote! {
        #definition_impl
        #record_impl
    })
}
