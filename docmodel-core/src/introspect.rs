//! Model introspection: collection names, primary keys and index specifications.
//!
//! Entities describe their own shape through the [`Introspect`] trait, usually generated with
//! `#[derive(Introspect)]`. The functions in this module walk that description:
//!
//! - [`get_model_name`] derives the collection name
//! - [`get_id`] resolves the primary key value
//! - [`parse_model_indexes`] collects single-field and compound index groups
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Introspect)]
//! struct UserProfile {
//!     #[serde(rename = "_id")]
//!     id: String,
//!     #[db("unique=tenant_email")]
//!     tenant: String,
//!     #[db("unique=tenant_email,index")]
//!     email: String,
//! }
//!
//! let profile = UserProfile { .. };
//! assert_eq!(get_model_name(&profile), "user_profile");
//! let (_, indexes) = parse_model_indexes(&profile);
//! assert!(indexes.get("tenant_email").unwrap().unique);
//! ```

use bson::{Bson, Document, serialize_to_bson};
use convert_case::{Case, Casing};
use serde::Serialize;
use std::{collections::BTreeMap, rc::Rc, sync::Arc};

use crate::{
    document::{ID_KEY, Map},
    error::DocumentStoreResult,
    tag::{TagInfo, parse_tag},
};

/// Serializes a borrowed field value on demand.
pub trait ToBsonValue {
    fn to_bson_value(&self) -> DocumentStoreResult<Bson>;
}

impl<T: Serialize + ?Sized> ToBsonValue for T {
    fn to_bson_value(&self) -> DocumentStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }
}

/// Access to the value of a described field.
pub enum FieldValue<'a> {
    /// A plain value.
    Value(&'a dyn ToBsonValue),
    /// A nested entity whose own fields take part in introspection.
    Embedded {
        schema: &'a dyn Introspect,
        value: &'a dyn ToBsonValue,
    },
    /// A field excluded from serialization. It has no stored name and no indexes.
    Skipped,
}

/// Description of one field of an entity, in declaration order.
pub struct FieldDescriptor<'a> {
    /// The field identifier as declared.
    pub name: &'static str,
    /// Explicit serialized name, if the field is renamed.
    pub rename: Option<&'static str>,
    /// The raw `db` annotation, empty when absent.
    pub tag: &'static str,
    /// The field value.
    pub value: FieldValue<'a>,
}

impl<'a> FieldDescriptor<'a> {
    /// Describes a plain field.
    pub fn value(
        name: &'static str,
        rename: Option<&'static str>,
        tag: &'static str,
        value: &'a dyn ToBsonValue,
    ) -> Self {
        Self { name, rename, tag, value: FieldValue::Value(value) }
    }

    /// Describes a nested entity field.
    pub fn embedded<T: Introspect + Serialize>(
        name: &'static str,
        rename: Option<&'static str>,
        tag: &'static str,
        value: &'a T,
    ) -> Self {
        Self {
            name,
            rename,
            tag,
            value: FieldValue::Embedded { schema: value, value },
        }
    }

    /// Describes a field excluded from serialization.
    pub fn skipped(name: &'static str) -> Self {
        Self { name, rename: None, tag: "", value: FieldValue::Skipped }
    }

    /// The name the field is stored under.
    pub fn serialized_name(&self) -> String {
        match self.rename {
            Some(rename) => rename.to_string(),
            None => to_snake(self.name.trim_start_matches("r#")),
        }
    }

    /// Parses the field annotation.
    pub fn tag_info(&self) -> TagInfo {
        parse_tag(self.tag)
    }

    fn bson(&self) -> Option<Bson> {
        match &self.value {
            FieldValue::Value(value) | FieldValue::Embedded { value, .. } => value.to_bson_value().ok(),
            FieldValue::Skipped => None,
        }
    }
}

/// The shape of a value as seen by the introspector.
pub enum Shape<'a> {
    /// A struct with named fields.
    Struct {
        type_name: &'static str,
        fields: Vec<FieldDescriptor<'a>>,
    },
    /// A scalar standing in for a collection name, e.g. `"user"`.
    Scalar(String),
    /// A key-value mapping.
    Mapping(&'a Document),
    /// An absent value (`None`).
    Nil,
}

/// Self-description used to derive collection names, IDs and indexes.
///
/// Implemented by `#[derive(Introspect)]` for structs, and provided here for strings, numbers,
/// [`Map`], [`Document`] and the pointer-like wrappers `&T`, `Box<T>`, `Rc<T>`, `Arc<T>` and
/// `Option<T>`.
pub trait Introspect {
    fn shape(&self) -> Shape<'_>;
}

impl<T: Introspect + ?Sized> Introspect for &T {
    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl<T: Introspect + ?Sized> Introspect for Box<T> {
    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl<T: Introspect + ?Sized> Introspect for Rc<T> {
    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl<T: Introspect + ?Sized> Introspect for Arc<T> {
    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl<T: Introspect> Introspect for Option<T> {
    fn shape(&self) -> Shape<'_> {
        match self {
            Some(inner) => inner.shape(),
            None => Shape::Nil,
        }
    }
}

impl Introspect for str {
    fn shape(&self) -> Shape<'_> {
        Shape::Scalar(self.to_string())
    }
}

impl Introspect for String {
    fn shape(&self) -> Shape<'_> {
        Shape::Scalar(self.clone())
    }
}

macro_rules! scalar_introspect {
    ($($ty:ty),*) => {
        $(
            impl Introspect for $ty {
                fn shape(&self) -> Shape<'_> {
                    Shape::Scalar(self.to_string())
                }
            }
        )*
    };
}

scalar_introspect!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl Introspect for Document {
    fn shape(&self) -> Shape<'_> {
        Shape::Mapping(self)
    }
}

impl Introspect for Map {
    fn shape(&self) -> Shape<'_> {
        Shape::Mapping(self.as_document())
    }
}

/// Converts text to snake_case, leaving dots untouched.
pub fn to_snake(text: &str) -> String {
    text.split('.')
        .map(|part| part.to_case(Case::Snake))
        .collect::<Vec<_>>()
        .join(".")
}

/// Derives the collection name of a value.
///
/// Structs map to the snake_cased type name and scalars to the snake_cased text of the value.
/// Mappings and `None` have no name and yield an empty string, which callers must treat as
/// [`DocumentStoreError::InvalidModelName`](crate::error::DocumentStoreError::InvalidModelName).
pub fn get_model_name<T: Introspect + ?Sized>(value: &T) -> String {
    match value.shape() {
        Shape::Struct { type_name, .. } => to_snake(type_name),
        Shape::Scalar(text) => to_snake(&text),
        Shape::Mapping(_) | Shape::Nil => String::new(),
    }
}

/// Resolves the primary key value of an entity.
///
/// Precedence on a struct: a field annotated `pk`, then a field serialized under a name
/// starting with `_id`, then the first embedded entity yielding a non-null ID, searched
/// depth-first in declaration order. On a mapping the `_id` key is read directly.
pub fn get_id<T: Introspect + ?Sized>(value: &T) -> Option<Bson> {
    match value.shape() {
        Shape::Struct { fields, .. } => {
            if let Some(field) = fields
                .iter()
                .find(|field| field.tag_info().primary_key)
            {
                return field.bson();
            }

            if let Some(field) = fields.iter().find(|field| {
                !matches!(field.value, FieldValue::Skipped)
                    && field.serialized_name().starts_with(ID_KEY)
            }) {
                return field.bson();
            }

            fields
                .iter()
                .filter_map(|field| match &field.value {
                    FieldValue::Embedded { schema, .. } => get_id(*schema),
                    _ => None,
                })
                .find(|id| !matches!(id, Bson::Null))
        }
        Shape::Mapping(document) => document.get(ID_KEY).cloned(),
        Shape::Scalar(_) | Shape::Nil => None,
    }
}

/// Fields and uniqueness of one index group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundIndex {
    /// Stored field names in declaration order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// Index groups of a model keyed by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSpec(BTreeMap<String, CompoundIndex>);

impl IndexSpec {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Appends a field to a group, creating the group if needed.
    ///
    /// A group becomes unique as soon as any of its fields is declared unique.
    pub fn add(&mut self, group: &str, field: impl Into<String>, unique: bool) {
        let entry = self
            .0
            .entry(group.to_string())
            .or_default();

        entry.fields.push(field.into());
        entry.unique |= unique;
    }

    /// Merges another specification into this one, group by group.
    pub fn merge(&mut self, other: IndexSpec) {
        for (group, index) in other.0 {
            let entry = self.0.entry(group).or_default();

            entry.fields.extend(index.fields);
            entry.unique |= index.unique;
        }
    }

    pub fn get(&self, group: &str) -> Option<&CompoundIndex> {
        self.0.get(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CompoundIndex)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for IndexSpec {
    type Item = (String, CompoundIndex);
    type IntoIter = std::collections::btree_map::IntoIter<String, CompoundIndex>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Collects the model name and index groups of an entity.
///
/// Fields without a recognized annotation that hold an embedded entity contribute that
/// entity's groups. Annotated fields join their unique and index groups, the field's own
/// stored name serving as the group name when none is given. Values that are not structs
/// yield an empty name.
pub fn parse_model_indexes<T: Introspect + ?Sized>(value: &T) -> (String, IndexSpec) {
    let mut indexes = IndexSpec::new();

    let Shape::Struct { type_name, fields } = value.shape() else {
        return (String::new(), indexes);
    };

    for field in &fields {
        if matches!(field.value, FieldValue::Skipped) {
            continue;
        }

        let stored_name = field.serialized_name();
        let info = field.tag_info();

        if info.is_empty() {
            if let FieldValue::Embedded { schema, .. } = &field.value {
                let (_, inner) = parse_model_indexes(*schema);
                indexes.merge(inner);
            }
            continue;
        }

        if info.unique {
            let group = if info.unique_name.is_empty() { &stored_name } else { &info.unique_name };
            indexes.add(group, stored_name.clone(), true);
        }

        if info.index {
            let group = if info.index_name.is_empty() { &stored_name } else { &info.index_name };
            indexes.add(group, stored_name.clone(), false);
        }
    }

    (to_snake(type_name), indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Serialize)]
    struct Account {
        #[serde(rename = "_id")]
        id: String,
        #[serde(rename = "accountName")]
        name: String,
        age: i64,
        secret: String,
    }

    impl Introspect for Account {
        fn shape(&self) -> Shape<'_> {
            Shape::Struct {
                type_name: "AccountHolder",
                fields: vec![
                    FieldDescriptor::value("id", Some("_id"), "", &self.id),
                    FieldDescriptor::value("name", Some("accountName"), "unique=name_age", &self.name),
                    FieldDescriptor::value("age", None, "index=name_age,index", &self.age),
                    FieldDescriptor::skipped("secret"),
                ],
            }
        }
    }

    #[derive(Serialize)]
    struct Outer {
        #[serde(rename = "_id")]
        id: Option<String>,
        code: String,
        inner: Option<Box<Account>>,
    }

    impl Introspect for Outer {
        fn shape(&self) -> Shape<'_> {
            Shape::Struct {
                type_name: "Outer",
                fields: vec![
                    FieldDescriptor::embedded("inner", None, "", &self.inner),
                    FieldDescriptor::value("id", Some("_id"), "", &self.id),
                    FieldDescriptor::value("code", None, "pk", &self.code),
                ],
            }
        }
    }

    #[derive(Serialize)]
    struct Wrapper {
        label: String,
        inner: Account,
    }

    impl Introspect for Wrapper {
        fn shape(&self) -> Shape<'_> {
            Shape::Struct {
                type_name: "Wrapper",
                fields: vec![
                    FieldDescriptor::value("label", None, "", &self.label),
                    FieldDescriptor::embedded("inner", None, "", &self.inner),
                ],
            }
        }
    }

    fn account() -> Account {
        Account {
            id: "acc-1".into(),
            name: "Ada".into(),
            age: 36,
            secret: "s".into(),
        }
    }

    #[test]
    fn model_names() {
        assert_eq!(get_model_name(&account()), "account_holder");
        assert_eq!(get_model_name("NameLL"), "name_ll");
        assert_eq!(get_model_name("user"), "user");
        assert_eq!(get_model_name(&42_i64), "42");
        assert_eq!(get_model_name(&Some(Box::new(account()))), "account_holder");
        assert_eq!(get_model_name(&None::<Account>), "");
        assert_eq!(get_model_name(&Map::new()), "");
    }

    #[test]
    fn snake_case_keeps_dots() {
        assert_eq!(to_snake("UserProfile.HomeAddress"), "user_profile.home_address");
    }

    #[test]
    fn id_from_id_named_field() {
        assert_eq!(get_id(&account()), Some(Bson::String("acc-1".into())));
    }

    #[test]
    fn pk_annotation_wins_over_id_field_and_embedded() {
        let outer = Outer {
            id: Some("outer-id".into()),
            code: "code-1".into(),
            inner: Some(Box::new(account())),
        };
        assert_eq!(get_id(&outer), Some(Bson::String("code-1".into())));
    }

    #[test]
    fn outer_fields_checked_before_embedded() {
        struct IdOverEmbedded(Outer);

        impl Introspect for IdOverEmbedded {
            fn shape(&self) -> Shape<'_> {
                Shape::Struct {
                    type_name: "IdOverEmbedded",
                    fields: vec![
                        FieldDescriptor::embedded("inner", None, "", &self.0.inner),
                        FieldDescriptor::value("id", Some("_id"), "", &self.0.id),
                    ],
                }
            }
        }

        let value = IdOverEmbedded(Outer {
            id: Some("outer-id".into()),
            code: String::new(),
            inner: Some(Box::new(account())),
        });
        assert_eq!(get_id(&value), Some(Bson::String("outer-id".into())));
    }

    #[test]
    fn id_found_in_embedded_entity() {
        let wrapper = Wrapper { label: "w".into(), inner: account() };
        assert_eq!(get_id(&wrapper), Some(Bson::String("acc-1".into())));
        assert_eq!(get_id(&Box::new(&wrapper)), Some(Bson::String("acc-1".into())));
    }

    #[test]
    fn id_from_mapping() {
        assert_eq!(get_id(&Map::new().set("_id", "1")), Some(Bson::String("1".into())));
        assert_eq!(get_id(&doc! { "name": "x" }), None);
        assert_eq!(get_id("user"), None);
        assert_eq!(get_id(&None::<Account>), None);
    }

    #[test]
    fn index_groups_merge_with_union_uniqueness() {
        let (name, indexes) = parse_model_indexes(&account());

        assert_eq!(name, "account_holder");
        assert_eq!(indexes.len(), 2);

        let compound = indexes.get("name_age").unwrap();
        assert_eq!(compound.fields, vec!["accountName", "age"]);
        assert!(compound.unique);

        let single = indexes.get("age").unwrap();
        assert_eq!(single.fields, vec!["age"]);
        assert!(!single.unique);
    }

    #[test]
    fn embedded_indexes_are_merged_into_parent() {
        let wrapper = Wrapper { label: "w".into(), inner: account() };
        let (name, indexes) = parse_model_indexes(&wrapper);

        assert_eq!(name, "wrapper");
        assert_eq!(indexes, parse_model_indexes(&account()).1);
    }

    #[test]
    fn absent_embedded_entity_contributes_nothing() {
        let outer = Outer { id: None, code: "c".into(), inner: None };
        let (name, indexes) = parse_model_indexes(&outer);

        assert_eq!(name, "outer");
        assert!(indexes.is_empty());
    }

    #[test]
    fn non_struct_values_have_no_indexes() {
        assert_eq!(parse_model_indexes("user"), (String::new(), IndexSpec::new()));
        assert_eq!(parse_model_indexes(&Map::new()).0, "");
    }

    #[test]
    fn merge_concatenates_fields() {
        let mut left = IndexSpec::new();
        left.add("g", "a", false);

        let mut right = IndexSpec::new();
        right.add("g", "b", true);
        right.add("h", "c", false);

        left.merge(right);

        assert_eq!(left.get("g").unwrap().fields, vec!["a", "b"]);
        assert!(left.get("g").unwrap().unique);
        assert_eq!(left.len(), 2);
    }
}
