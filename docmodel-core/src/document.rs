//! The generic document type and conversions between entities and documents.
//!
//! [`Map`] is the untyped representation every operation speaks: filters, projections, update
//! patches and query results are all maps. Typed entities travel through the store's native
//! serialization (BSON) when converted with [`to_document`] and [`to_entity`].

use bson::{Bson, Document, deserialize_from_document, serialize_to_document};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Key of the primary key inside a stored document.
pub const ID_KEY: &str = "_id";

/// An ordered, string-keyed document with fluent accessors.
///
/// Keys are case-sensitive. Insertion order is preserved but ignored by equality.
///
/// # Example
///
/// ```ignore
/// use docmodel::document::Map;
///
/// let filter = Map::new()
///     .set("age", Map::new().set("$gte", 18))
///     .set("status", "active");
///
/// assert_eq!(filter.get_value("status"), Some(&"active".into()));
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Map(Document);

impl Map {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self(Document::new())
    }

    /// Sets a field and returns the map for chaining.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets a field in place.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Removes a field and returns the map for chaining.
    pub fn del(mut self, key: &str) -> Self {
        self.0.remove(key);
        self
    }

    /// Returns the value of a field if present.
    pub fn get_value(&self, key: &str) -> Option<&Bson> {
        self.0.get(key)
    }

    /// Returns the `_id` value if present.
    pub fn id(&self) -> Option<&Bson> {
        self.0.get(ID_KEY)
    }

    /// Consumes the map and returns the underlying BSON document.
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Returns the underlying BSON document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Converts the map to a JSON value.
    pub fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(&self.0)?)
    }

    /// Creates a map from a JSON object.
    pub fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(Self(from_value(value)?))
    }
}

impl Deref for Map {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.0
    }
}

impl DerefMut for Map {
    fn deref_mut(&mut self) -> &mut Document {
        &mut self.0
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|(key, value)| other.0.get(key) == Some(value))
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl From<Document> for Map {
    fn from(document: Document) -> Self {
        Self(document)
    }
}

impl From<Map> for Document {
    fn from(map: Map) -> Self {
        map.0
    }
}

impl From<Map> for Bson {
    fn from(map: Map) -> Self {
        Bson::Document(map.0)
    }
}

impl TryFrom<Bson> for Map {
    type Error = DocumentStoreError;

    fn try_from(value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Document(document) => Ok(Self(document)),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a document, found {:?}",
                other.element_type()
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Serializes a value into a generic document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Serialization`] if the value does not serialize to a document.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> DocumentStoreResult<Map> {
    Ok(Map(serialize_to_document(value)?))
}

/// Converts a generic document into a typed entity.
///
/// The entity is never partially populated: any mismatch is returned as an error.
pub fn to_entity<T: DeserializeOwned>(map: Map) -> DocumentStoreResult<T> {
    Ok(deserialize_from_document(map.0)?)
}

/// Converts a list of generic documents into typed entities, failing on the first mismatch.
pub fn to_entities<T: DeserializeOwned>(maps: impl IntoIterator<Item = Map>) -> DocumentStoreResult<Vec<T>> {
    maps.into_iter()
        .map(to_entity)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        #[serde(rename = "_id")]
        id: String,
        name: String,
        age: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    }

    #[test]
    fn fluent_set_get_del() {
        let map = Map::new()
            .set("a", 1)
            .set("b", "two")
            .del("a");

        assert_eq!(map.get_value("a"), None);
        assert_eq!(map.get_value("b"), Some(&Bson::String("two".into())));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let map = Map::new().set("Name", 1).set("name", 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn equality_ignores_order() {
        let a = Map::new().set("x", 1).set("y", 2);
        let b = Map::new().set("y", 2).set("x", 1);
        assert_eq!(a, b);
        assert_ne!(a, b.set("z", 3));
    }

    #[test]
    fn entity_round_trip() {
        let user = User { id: "u1".into(), name: "Ada".into(), age: 36, nickname: None };

        let map = to_document(&user).unwrap();
        assert_eq!(map.id(), Some(&Bson::String("u1".into())));
        assert!(!map.contains_key("nickname"));

        let back: User = to_entity(map).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn mismatched_document_is_an_error() {
        let map = Map::from(doc! { "_id": "u1", "name": 5, "age": 1 });
        let err = to_entity::<User>(map).unwrap_err();
        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }

    #[test]
    fn entities_from_documents() {
        let maps = vec![
            Map::from(doc! { "_id": "a", "name": "A", "age": 1_i64 }),
            Map::from(doc! { "_id": "b", "name": "B", "age": 2_i64, "nickname": "bee" }),
        ];

        let users: Vec<User> = to_entities(maps).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].nickname.as_deref(), Some("bee"));
    }

    #[test]
    fn json_conversion() {
        let map = Map::from_json(serde_json::json!({ "_id": "x", "n": 1 })).unwrap();
        assert_eq!(map.to_json().unwrap()["_id"], "x");
    }
}
