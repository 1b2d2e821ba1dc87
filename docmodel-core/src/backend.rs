//! Storage backend abstraction.
//!
//! The [`StoreBackend`] trait is the narrow surface the model layer needs from a document
//! store: filtered finds with sort, skip, limit and projection, counts, single and multi
//! document updates, replace with upsert, delete, index listing and creation, and client
//! sessions carrying a multi-document transaction.
//!
//! Every data operation takes an optional session. Operations issued with a session run
//! inside that session's transaction; operations issued without one run directly.
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::StoreBackend;
//! use bson::doc;
//!
//! let backend = InMemoryStore::new();
//!
//! let mut session = backend.start_transaction().await?;
//! backend
//!     .replace_one(Some(&mut session), "user", &doc! { "_id": 1 }, doc! { "_id": 1 }, true)
//!     .await?;
//! backend.commit_transaction(&mut session).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{fmt::Debug, sync::Arc};

use crate::{
    error::DocumentStoreResult,
    query::{Query, SortDirection},
};

/// Result of an update or replace operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents matched by the filter.
    pub matched: u64,
    /// Number of documents actually changed.
    pub modified: u64,
    /// Whether an upsert inserted a new document.
    pub upserted: bool,
}

/// An index definition: ordered key fields, uniqueness and an optional name.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    /// Ordered keys mapped to their sort order (`1` or `-1`).
    pub keys: Document,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Explicit index name. Stores derive one from the keys when absent.
    pub name: Option<String>,
}

impl IndexModel {
    /// Creates an ascending index over `fields`, in order.
    pub fn ascending<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            keys: fields
                .iter()
                .map(|field| (field.as_ref().to_string(), Bson::Int32(SortDirection::Asc.as_order())))
                .collect(),
            unique: false,
            name: None,
        }
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Normalized signature of the key fields, e.g. `"tenant:1,email:1"`.
    ///
    /// Two indexes with the same signature cover the same keys in the same order.
    pub fn key_signature(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| {
                let order = match order {
                    Bson::Int32(n) => *n as i64,
                    Bson::Int64(n) => *n,
                    Bson::Double(n) => *n as i64,
                    other => return format!("{field}:{other}"),
                };
                format!("{field}:{}", SortDirection::from_order(order).as_order())
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The store's conventional name for the keys, e.g. `"tenant_1_email_1"`.
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| format!("{field}_{order}"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and support concurrent access from multiple async
/// tasks. A single session is never used by two operations at once; callers serialize
/// access to it.
///
/// # Error Handling
///
/// Store failures are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend), carrying the
/// store's numeric error code when it exposes one. Unique index violations must carry code
/// [`DUPLICATE_KEY_CODE`](crate::error::DUPLICATE_KEY_CODE) or a message recognized by
/// [`is_duplicate_key_message`](crate::error::is_duplicate_key_message).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Client session carrying an open transaction.
    type Session: Send;

    /// Starts a session and opens a multi-document transaction on it.
    async fn start_transaction(&self) -> DocumentStoreResult<Self::Session>;

    /// Commits the session's transaction.
    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Aborts the session's transaction, discarding its writes.
    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Returns the documents matching the query's filter, ordered, skipped, limited and
    /// projected as requested.
    async fn find(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching the query, if any.
    async fn find_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Option<Document>> {
        let query = Query { limit: Some(1), ..query.clone() };

        Ok(self
            .find(session, collection, &query)
            .await?
            .into_iter()
            .next())
    }

    /// Counts documents matching `filter`, stopping at `limit` when given.
    async fn count_documents(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        limit: Option<u64>,
    ) -> DocumentStoreResult<u64>;

    /// Returns the store's cheap estimate of the collection size.
    ///
    /// Estimates are not available inside transactions.
    async fn estimated_document_count(&self, collection: &str) -> DocumentStoreResult<u64>;

    /// Replaces the first document matching `filter`, inserting `replacement` when nothing
    /// matches and `upsert` is set.
    async fn replace_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to the first document matching `filter` and returns that document as
    /// it was before the update.
    async fn find_one_and_update(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first document matching `filter` and returns the number deleted.
    async fn delete_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
    ) -> DocumentStoreResult<u64>;

    /// Lists the indexes of a collection. A missing collection has no indexes.
    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexModel>>;

    /// Creates an index on a collection, creating the collection if needed.
    async fn create_index(&self, collection: &str, index: IndexModel) -> DocumentStoreResult<()>;

    /// Lists the names of all collections.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Drops a collection and its indexes.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Releases the backend's resources.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend,
{
    type Session = B::Session;

    async fn start_transaction(&self) -> DocumentStoreResult<Self::Session> {
        (**self).start_transaction().await
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        (**self).commit_transaction(session).await
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        (**self).abort_transaction(session).await
    }

    async fn find(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self)
            .find(session, collection, query)
            .await
    }

    async fn find_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self)
            .find_one(session, collection, query)
            .await
    }

    async fn count_documents(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        limit: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        (**self)
            .count_documents(session, collection, filter, limit)
            .await
    }

    async fn estimated_document_count(&self, collection: &str) -> DocumentStoreResult<u64> {
        (**self).estimated_document_count(collection).await
    }

    async fn replace_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self)
            .replace_one(session, collection, filter, replacement, upsert)
            .await
    }

    async fn find_one_and_update(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self)
            .find_one_and_update(session, collection, filter, update)
            .await
    }

    async fn update_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self)
            .update_one(session, collection, filter, update)
            .await
    }

    async fn update_many(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self)
            .update_many(session, collection, filter, update)
            .await
    }

    async fn delete_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
    ) -> DocumentStoreResult<u64> {
        (**self)
            .delete_one(session, collection, filter)
            .await
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexModel>> {
        (**self).list_indexes(collection).await
    }

    async fn create_index(&self, collection: &str, index: IndexModel) -> DocumentStoreResult<()> {
        (**self).create_index(collection, index).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }
}

/// Factory for backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn ascending_index_keys() {
        let index = IndexModel::ascending(&["tenant", "email"]).with_unique(true);

        assert_eq!(index.keys, doc! { "tenant": 1, "email": 1 });
        assert_eq!(index.key_signature(), "tenant:1,email:1");
        assert_eq!(index.default_name(), "tenant_1_email_1");
        assert!(index.unique);
    }

    #[test]
    fn signatures_normalize_numeric_orders() {
        let index = IndexModel {
            keys: doc! { "a": 1_i64, "b": -1.0 },
            unique: false,
            name: Some("a_1_b_-1".into()),
        };

        assert_eq!(index.key_signature(), "a:1,b:-1");
    }
}
