//! Procedural macros for the docmodel project.
//!
//! `#[derive(Introspect)]` describes a struct's fields to the model introspector: their
//! serialized names, their `db` annotations and which of them embed another entity.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Introspect)]
//! #[serde(rename_all = "camelCase")]
//! struct UserProfile {
//!     #[serde(rename = "_id")]
//!     id: String,
//!     #[db("unique=tenant_email")]
//!     tenant_id: String,
//!     #[db("unique=tenant_email,index")]
//!     email: String,
//!     #[db(embed)]
//!     #[serde(flatten)]
//!     audit: Audit,
//!     #[serde(skip)]
//!     cache: Option<String>,
//! }
//! ```
//!
//! Field attributes:
//!
//! - `#[db("...")]` - annotation string, e.g. `"pk"` or `"unique=group,index"`
//! - `#[db(embed)]` - the field holds an entity whose fields and indexes are merged in
//!
//! Serialized names follow `#[serde(rename = "...")]` and `#[serde(rename_all = "...")]`.
//! Fields marked `#[serde(skip)]` or `#[serde(skip_serializing)]` are described as skipped.

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Expr, Fields, Ident, LitStr, Token,
    ext::IdentExt,
    meta::ParseNestedMeta,
    parse::ParseStream,
    parse_macro_input,
    token::Paren,
};

/// Derives `docmodel::introspect::Introspect` for a struct with named fields.
#[proc_macro_derive(Introspect, attributes(db))]
pub fn derive_introspect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_introspect(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_introspect(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let type_name = name.unraw().to_string();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Introspect can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Introspect can only be derived for structs",
            ));
        }
    };

    let rename_all = container_rename_all(&input.attrs)?;

    let descriptors = fields
        .iter()
        .map(|field| {
            let Some(ident) = field.ident.as_ref() else {
                return Err(syn::Error::new_spanned(field, "expected a named field"));
            };
            let field_name = ident.unraw().to_string();

            let serde = SerdeField::parse(&field.attrs)?;
            let db = DbField::parse(&field.attrs)?;

            if serde.skip {
                return Ok(quote! {
                    ::docmodel::introspect::FieldDescriptor::skipped(#field_name)
                });
            }

            let serialized = serde
                .rename
                .unwrap_or_else(|| apply_rename_all(&field_name, rename_all.as_deref()));
            let tag = db.tag;

            Ok(if db.embed {
                quote! {
                    ::docmodel::introspect::FieldDescriptor::embedded(
                        #field_name,
                        ::std::option::Option::Some(#serialized),
                        #tag,
                        &self.#ident,
                    )
                }
            } else {
                quote! {
                    ::docmodel::introspect::FieldDescriptor::value(
                        #field_name,
                        ::std::option::Option::Some(#serialized),
                        #tag,
                        &self.#ident,
                    )
                }
            })
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::docmodel::introspect::Introspect for #name #ty_generics #where_clause {
            fn shape(&self) -> ::docmodel::introspect::Shape<'_> {
                ::docmodel::introspect::Shape::Struct {
                    type_name: #type_name,
                    fields: ::std::vec![#(#descriptors),*],
                }
            }
        }
    })
}

/// The `db` attributes of one field.
#[derive(Default)]
struct DbField {
    tag: String,
    embed: bool,
}

impl DbField {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut field = DbField::default();
        let mut tags = Vec::new();

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("db")) {
            attr.parse_args_with(|input: ParseStream| {
                while !input.is_empty() {
                    if input.peek(LitStr) {
                        tags.push(input.parse::<LitStr>()?.value());
                    } else {
                        let ident: Ident = input.parse()?;
                        if ident != "embed" {
                            return Err(syn::Error::new(
                                ident.span(),
                                "expected an annotation string or `embed`",
                            ));
                        }
                        field.embed = true;
                    }

                    if input.is_empty() {
                        break;
                    }
                    input.parse::<Token![,]>()?;
                }

                Ok(())
            })?;
        }

        field.tag = tags.join(",");
        Ok(field)
    }
}

/// The serde attributes of one field that change its stored form.
#[derive(Default)]
struct SerdeField {
    rename: Option<String>,
    skip: bool,
}

impl SerdeField {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut field = SerdeField::default();

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    if meta.input.peek(Token![=]) {
                        field.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else {
                        meta.parse_nested_meta(|inner| {
                            if inner.path.is_ident("serialize") {
                                field.rename = Some(inner.value()?.parse::<LitStr>()?.value());
                                Ok(())
                            } else {
                                skip_meta(inner)
                            }
                        })?;
                    }
                    Ok(())
                } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                    field.skip = true;
                    Ok(())
                } else {
                    skip_meta(meta)
                }
            })?;
        }

        Ok(field)
    }
}

fn container_rename_all(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut rename_all = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(Token![=]) {
                    rename_all = Some(meta.value()?.parse::<LitStr>()?.value());
                } else {
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("serialize") {
                            rename_all = Some(inner.value()?.parse::<LitStr>()?.value());
                            Ok(())
                        } else {
                            skip_meta(inner)
                        }
                    })?;
                }
                Ok(())
            } else {
                skip_meta(meta)
            }
        })?;
    }

    Ok(rename_all)
}

/// Consumes a serde option this macro does not interpret.
fn skip_meta(meta: ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<Expr>()?;
    } else if meta.input.peek(Paren) {
        meta.parse_nested_meta(skip_meta)?;
    }

    Ok(())
}

fn apply_rename_all(field: &str, rule: Option<&str>) -> String {
    match rule {
        Some("lowercase") => field.to_lowercase(),
        Some("UPPERCASE") => field.to_uppercase(),
        Some("PascalCase") => field.to_case(Case::Pascal),
        Some("camelCase") => field.to_case(Case::Camel),
        Some("snake_case") => field.to_case(Case::Snake),
        Some("SCREAMING_SNAKE_CASE") => field.to_case(Case::Snake).to_uppercase(),
        Some("kebab-case") => field.to_case(Case::Kebab),
        Some("SCREAMING-KEBAB-CASE") => field.to_case(Case::Kebab).to_uppercase(),
        _ => field.to_string(),
    }
}
