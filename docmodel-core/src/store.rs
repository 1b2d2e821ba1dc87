//! Database facade: transactions, one-shot operations and index management.
//!
//! [`Database`] owns a backend and the [`DatabaseOptions`] shared by all transactions.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let db = Database::new(InMemoryStore::new());
//!
//! db.indexes(&[&User::default()]).await?;
//! db.set(&user).await?;
//!
//! let total = db
//!     .txn(true, async |txn| {
//!         let users = txn.model(&user);
//!         users.inc(&user.id, Map::new().set("logins", 1)).await?;
//!         users.count(None).await
//!     })
//!     .await?;
//! ```

use bson::Bson;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashSet, future::Future};
use tracing::debug;

use crate::{
    backend::{IndexModel, StoreBackend},
    document::Map,
    error::{DocumentStoreError, DocumentStoreResult},
    introspect::{Introspect, parse_model_indexes},
    options::{DatabaseOptions, TxnOptions},
    page::{Page, PaginationParams},
    query::Query,
    txn::Txn,
};

/// A document database bound to a backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct Database<B: StoreBackend> {
    backend: B,
    options: DatabaseOptions,
}

impl<B: StoreBackend> Database<B> {
    /// Creates a database with default options.
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, DatabaseOptions::default())
    }

    /// Creates a database with the given options.
    pub fn with_options(backend: B, options: DatabaseOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `f` in a transaction.
    ///
    /// With `multi_doc` set, a session is started with a multi-document transaction and
    /// every model obtained from the [`Txn`] runs inside it. The transaction commits when
    /// `f` returns `Ok` and aborts when it returns an error, which is then returned as is.
    /// Without `multi_doc`, `f` runs directly against the store: nothing is rolled back and
    /// writes made before an error remain.
    ///
    /// `f` runs exactly once. Nothing is retried, including transactions the store aborts
    /// for exceeding its time limit.
    ///
    /// # Arguments
    ///
    /// * `options` - [`TxnOptions`] or a plain `bool` for `multi_doc`
    /// * `f` - The transaction body
    pub async fn txn<T, F>(&self, options: impl Into<TxnOptions>, f: F) -> DocumentStoreResult<T>
    where
        F: AsyncFnOnce(&Txn<'_, B>) -> DocumentStoreResult<T>,
    {
        let options = options.into();

        if !options.multi_doc {
            let txn = Txn::plain(&self.backend, &self.options);
            return f(&txn).await;
        }

        let session = self.backend.start_transaction().await?;
        debug!("transaction started");

        let txn = Txn::sessioned(&self.backend, &self.options, session);

        match f(&txn).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                txn.abort().await;
                Err(err)
            }
        }
    }

    async fn timed<T>(&self, operation: impl Future<Output = DocumentStoreResult<T>>) -> DocumentStoreResult<T> {
        let limit = self.options.operation_timeout;

        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| DocumentStoreError::Timeout(limit))?
    }

    /// Stores an entity in its model's collection. See [`Model::set`](crate::model::Model::set).
    pub async fn set<T: Serialize + Introspect + ?Sized>(&self, entity: &T) -> DocumentStoreResult<()> {
        self.timed(self.txn(false, async move |txn| txn.try_model(entity)?.set(entity).await))
            .await
    }

    /// Deletes a document by ID. See [`Model::del`](crate::model::Model::del).
    pub async fn delete<M: Introspect + ?Sized>(&self, model: &M, id: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let id = id.into();

        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.del(id).await))
            .await
    }

    /// Applies a partial update. See [`Model::update`](crate::model::Model::update).
    pub async fn update<T: Serialize + Introspect + ?Sized>(&self, patch: &T) -> DocumentStoreResult<Map> {
        self.timed(self.txn(false, async move |txn| txn.try_model(patch)?.update(patch).await))
            .await
    }

    /// Fetches one page. See [`Model::pagination`](crate::model::Model::pagination).
    pub async fn pagination<M: Introspect + ?Sized>(
        &self,
        model: &M,
        query: &Query,
        params: PaginationParams,
    ) -> DocumentStoreResult<Page<Map>> {
        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.pagination(query, params).await))
            .await
    }

    /// Fetches a document by ID as an entity. See [`Model::unmarshal`](crate::model::Model::unmarshal).
    pub async fn unmarshal<T: DeserializeOwned, M: Introspect + ?Sized>(
        &self,
        model: &M,
        id: impl Into<Bson>,
        projection: Option<Map>,
    ) -> DocumentStoreResult<T> {
        let id = id.into();

        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.unmarshal(id, projection).await))
            .await
    }

    /// Fetches the first match. See [`Model::first`](crate::model::Model::first).
    pub async fn first<M: Introspect + ?Sized>(&self, model: &M, query: &Query) -> DocumentStoreResult<Map> {
        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.first(query).await))
            .await
    }

    /// Counts documents. See [`Model::count`](crate::model::Model::count).
    pub async fn count<M: Introspect + ?Sized>(
        &self,
        model: &M,
        filter: impl Into<Option<Map>>,
    ) -> DocumentStoreResult<u64> {
        let filter = filter.into();

        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.count(filter).await))
            .await
    }

    /// Checks whether a document exists. See [`Model::has`](crate::model::Model::has).
    pub async fn has<M: Introspect + ?Sized>(&self, model: &M, id: impl Into<Bson>) -> DocumentStoreResult<bool> {
        let id = id.into();

        self.timed(self.txn(false, async move |txn| txn.try_model(model)?.has(id).await))
            .await
    }

    /// Iterates over matching documents. See [`Model::list`](crate::model::Model::list).
    ///
    /// Unlike the other one-shot operations, listing has no time limit.
    pub async fn list<M, F>(&self, model: &M, query: &Query, callback: F) -> DocumentStoreResult<()>
    where
        M: Introspect + ?Sized,
        F: FnMut(Map) -> DocumentStoreResult<bool>,
    {
        self.txn(false, async move |txn| txn.try_model(model)?.list(query, callback).await)
            .await
    }

    /// Creates the indexes declared by each model that do not exist yet.
    ///
    /// Existing indexes are compared by their ordered key fields. Compound indexes are named
    /// after their group; single-field indexes get the store's default name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidModelName`] if a value is not a struct.
    pub async fn indexes(&self, models: &[&dyn Introspect]) -> DocumentStoreResult<()> {
        for model in models {
            let (collection, spec) = parse_model_indexes(*model);

            if collection.is_empty() {
                return Err(DocumentStoreError::InvalidModelName);
            }

            let mut existing = self
                .backend
                .list_indexes(&collection)
                .await?
                .iter()
                .map(IndexModel::key_signature)
                .collect::<HashSet<_>>();

            for (group, compound) in spec {
                let mut index = IndexModel::ascending(compound.fields.as_slice()).with_unique(compound.unique);

                if compound.fields.len() > 1 {
                    index = index.with_name(group);
                }

                let signature = index.key_signature();

                if existing.contains(&signature) {
                    debug!(%collection, index = %signature, "index exists");
                    continue;
                }

                debug!(%collection, index = %signature, unique = index.unique, "creating index");

                self.backend
                    .create_index(&collection, index)
                    .await?;
                existing.insert(signature);
            }
        }

        Ok(())
    }

    /// Lists all collections in the store.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Drops a collection and its indexes.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_collection(name).await
    }

    /// Shuts down the database and releases the backend.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
