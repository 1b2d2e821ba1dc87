//! Collection accessor bound to one model and one transaction.
//!
//! A [`Model`] is obtained from [`Txn::model`] and runs every operation in that transaction's
//! context: inside its session when the transaction is multi-document, directly otherwise.
//!
//! # Example
//!
//! ```ignore
//! db.txn(false, async |txn| {
//!     let users = txn.model(&user);
//!
//!     users.set(&user).await?;
//!     let stored: User = users.unmarshal(&user.id, None).await?;
//!
//!     users
//!         .list(&Query::filter(Map::new().set("active", true)), |doc| {
//!             println!("{doc:?}");
//!             Ok(true)
//!         })
//!         .await
//! })
//! .await?;
//! ```
//!
//! # Cursor chaining
//!
//! [`Model::list_by_cursor`] walks a collection in bounded batches sorted on `_id`, resuming
//! each batch after the last `_id` seen. No server-side cursor is held between batches. IDs
//! must be totally ordered and unique. Iteration is not isolated from concurrent writes:
//! documents inserted ahead of the cursor are observed and documents deleted before being
//! reached are skipped.

use bson::{Bson, Document, doc};
use futures::{StreamExt, stream};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

use crate::{
    backend::StoreBackend,
    document::{ID_KEY, Map, to_document, to_entity},
    error::{DocumentStoreError, DocumentStoreResult},
    introspect::{Introspect, get_id},
    page::{Page, PaginationParams},
    query::{Query, Sort, SortDirection},
    txn::Txn,
};

/// Handle for the collection of one model within one transaction.
pub struct Model<'t, B: StoreBackend> {
    txn: &'t Txn<'t, B>,
    name: String,
}

impl<'t, B: StoreBackend> Model<'t, B> {
    pub(crate) fn new(txn: &'t Txn<'t, B>, name: String) -> Self {
        Self { txn, name }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores an entity, replacing any document with the same ID.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NoId`] if the entity has no ID or an empty one
    /// - [`DocumentStoreError::DuplicateKey`] if a unique index rejects the document
    pub async fn set<T: Serialize + Introspect + ?Sized>(&self, entity: &T) -> DocumentStoreResult<()> {
        let id = entity_id(entity)?;
        let document = to_document(entity)?;

        debug!(collection = %self.name, %id, "set");

        let mut session = self.txn.session().await;
        self.txn
            .backend()
            .replace_one(
                session.as_deref_mut(),
                &self.name,
                &doc! { ID_KEY: id },
                document.into_document(),
                true,
            )
            .await
            .map_err(DocumentStoreError::into_duplicate_key)?;

        Ok(())
    }

    /// Deletes the document with the given ID and returns the number deleted.
    ///
    /// Deleting a missing document is not an error.
    pub async fn del(&self, id: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let id = id.into();

        debug!(collection = %self.name, %id, "del");

        let mut session = self.txn.session().await;
        self.txn
            .backend()
            .delete_one(session.as_deref_mut(), &self.name, &doc! { ID_KEY: id })
            .await
    }

    /// Sets the fields of `patch` on the document with the patch's ID.
    ///
    /// Returns the document as it was before the update, overlaid with the patched fields.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NoId`] if the patch has no ID
    /// - [`DocumentStoreError::RecordNotFound`] if no document has that ID
    /// - [`DocumentStoreError::DuplicateKey`] if a unique index rejects the change
    pub async fn update<T: Serialize + Introspect + ?Sized>(&self, patch: &T) -> DocumentStoreResult<Map> {
        let id = entity_id(patch)?;
        let fields = without_id(to_document(patch)?);

        debug!(collection = %self.name, %id, fields = fields.len(), "update");

        let filter = doc! { ID_KEY: id };
        let mut session = self.txn.session().await;

        let previous = if fields.is_empty() {
            self.txn
                .backend()
                .find_one(session.as_deref_mut(), &self.name, &Query::filter(filter))
                .await?
        } else {
            self.txn
                .backend()
                .find_one_and_update(
                    session.as_deref_mut(),
                    &self.name,
                    &filter,
                    doc! { "$set": fields.clone() },
                )
                .await
                .map_err(DocumentStoreError::into_duplicate_key)?
        };

        let mut merged = Map::from(previous.ok_or(DocumentStoreError::RecordNotFound)?);
        for (key, value) in fields {
            merged.insert(key, value);
        }

        Ok(merged)
    }

    /// Sets the fields of `patch` on every document matching `filter`.
    ///
    /// Returns the number of documents actually modified.
    pub async fn update_many<T: Serialize + ?Sized>(
        &self,
        filter: impl Into<Map>,
        patch: &T,
    ) -> DocumentStoreResult<u64> {
        let fields = without_id(to_document(patch)?);
        let filter = filter.into();

        if fields.is_empty() {
            return Ok(0);
        }

        debug!(collection = %self.name, ?filter, "update_many");

        let mut session = self.txn.session().await;
        let outcome = self
            .txn
            .backend()
            .update_many(
                session.as_deref_mut(),
                &self.name,
                filter.as_document(),
                doc! { "$set": fields },
            )
            .await
            .map_err(DocumentStoreError::into_duplicate_key)?;

        Ok(outcome.modified)
    }

    /// Atomically adds signed deltas to numeric fields of the document with the given ID.
    ///
    /// ```ignore
    /// model.inc("user-1", Map::new().set("visits", 1).set("credits", -5)).await?;
    /// ```
    pub async fn inc(&self, id: impl Into<Bson>, deltas: impl Into<Map>) -> DocumentStoreResult<()> {
        let id = id.into();
        let deltas = deltas.into();

        if deltas.is_empty() {
            return Ok(());
        }

        debug!(collection = %self.name, %id, ?deltas, "inc");

        let mut session = self.txn.session().await;
        self.txn
            .backend()
            .update_one(
                session.as_deref_mut(),
                &self.name,
                &doc! { ID_KEY: id },
                doc! { "$inc": deltas.into_document() },
            )
            .await?;

        Ok(())
    }

    /// Fetches the document with the given ID, optionally projected.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::RecordNotFound`] if no document has that ID.
    pub async fn get(&self, id: impl Into<Bson>, projection: Option<Map>) -> DocumentStoreResult<Map> {
        let query = Query {
            filter: Some(Map::new().set(ID_KEY, id)),
            projection,
            ..Query::default()
        };

        self.first(&query).await
    }

    /// Fetches the document with the given ID and converts it into an entity.
    pub async fn unmarshal<T: DeserializeOwned>(
        &self,
        id: impl Into<Bson>,
        projection: Option<Map>,
    ) -> DocumentStoreResult<T> {
        to_entity(self.get(id, projection).await?)
    }

    /// Fetches the first document matching the query under its sort order.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::RecordNotFound`] if nothing matches.
    pub async fn first(&self, query: &Query) -> DocumentStoreResult<Map> {
        let mut session = self.txn.session().await;

        self.txn
            .backend()
            .find_one(session.as_deref_mut(), &self.name, query)
            .await?
            .map(Map::from)
            .ok_or(DocumentStoreError::RecordNotFound)
    }

    /// Counts documents matching `filter`.
    ///
    /// Without a filter (or with an empty one) the store's estimated collection size is used.
    /// Estimates are not available inside multi-document transactions, where an exact count
    /// is taken instead.
    pub async fn count(&self, filter: impl Into<Option<Map>>) -> DocumentStoreResult<u64> {
        let filter = filter
            .into()
            .filter(|filter| !filter.is_empty());

        let mut session = self.txn.session().await;

        match (filter, session.as_deref_mut()) {
            (None, None) => {
                self.txn
                    .backend()
                    .estimated_document_count(&self.name)
                    .await
            }
            (filter, session) => {
                let filter = filter.map(Map::into_document).unwrap_or_default();

                self.txn
                    .backend()
                    .count_documents(session, &self.name, &filter, None)
                    .await
            }
        }
    }

    /// Returns `true` if a document with the given ID exists.
    pub async fn has(&self, id: impl Into<Bson>) -> DocumentStoreResult<bool> {
        let id: Bson = id.into();
        let mut session = self.txn.session().await;

        let count = self
            .txn
            .backend()
            .count_documents(session.as_deref_mut(), &self.name, &doc! { ID_KEY: id }, Some(1))
            .await?;

        Ok(count > 0)
    }

    /// Fetches one page of the documents matching the query.
    ///
    /// The query's own skip and limit are replaced by the page window. The page count is
    /// the total number of matches. Cost grows with the page depth.
    pub async fn pagination(&self, query: &Query, params: PaginationParams) -> DocumentStoreResult<Page<Map>> {
        let params = PaginationParams::new(params.page, params.per_page);
        let total = self.count(query.filter.clone()).await?;

        if total < 1 {
            return Ok(Page::default());
        }

        let page_query = Query {
            skip: Some(params.offset()),
            limit: Some(params.per_page),
            ..query.clone()
        };

        let items = self.find(&page_query).await?;

        Ok(params.page_of(items, total))
    }

    /// Fetches the page following `last_id`, comparing with `$gt`.
    ///
    /// A null or empty `last_id` fetches the first page. The query's sort is used as given,
    /// so ascending `_id` order is what makes the pages line up. See
    /// [`Model::next_directional`] for descending walks. A `page_size` below 1 uses the
    /// configured default.
    pub async fn next(
        &self,
        query: &Query,
        last_id: impl Into<Bson>,
        page_size: u64,
    ) -> DocumentStoreResult<Vec<Map>> {
        let mut page_query = query.clone();

        if let Some(last_id) = cursor_id(last_id.into()) {
            page_query = page_query.and_where(ID_KEY, doc! { "$gt": last_id });
        }

        self.next_page(page_query, page_size).await
    }

    /// Fetches the page following `last_id` in the given `_id` direction.
    ///
    /// The comparison follows the direction (`$gt` ascending, `$lt` descending). The query's
    /// sort is used when present, otherwise the page is sorted on `_id` in that direction.
    pub async fn next_directional(
        &self,
        query: &Query,
        last_id: impl Into<Bson>,
        direction: SortDirection,
        page_size: u64,
    ) -> DocumentStoreResult<Vec<Map>> {
        let mut page_query = query.clone();

        if page_query.sort.is_empty() {
            page_query.sort.push(Sort { field: ID_KEY.to_string(), direction });
        }

        if let Some(last_id) = cursor_id(last_id.into()) {
            page_query = page_query.and_where(ID_KEY, doc! { direction.cursor_operator(): last_id });
        }

        self.next_page(page_query, page_size).await
    }

    async fn next_page(&self, mut query: Query, page_size: u64) -> DocumentStoreResult<Vec<Map>> {
        query.skip = None;
        query.limit = Some(match page_size {
            0 => self.txn.options().next_page_size,
            size => size,
        });

        self.find(&query).await
    }

    /// Calls `callback` for every document matching the query, in ascending `_id` order.
    ///
    /// Uses the configured list batch size. See [`Model::list_by_cursor`].
    pub async fn list<F>(&self, query: &Query, callback: F) -> DocumentStoreResult<()>
    where
        F: FnMut(Map) -> DocumentStoreResult<bool>,
    {
        self.list_by_cursor(query, false, self.txn.options().list_batch_size, callback)
            .await
    }

    /// Calls `callback` for every document matching the query, in descending `_id` order.
    pub async fn list_descending<F>(&self, query: &Query, callback: F) -> DocumentStoreResult<()>
    where
        F: FnMut(Map) -> DocumentStoreResult<bool>,
    {
        self.list_by_cursor(query, true, self.txn.options().list_batch_size, callback)
            .await
    }

    /// Calls `callback` for every document matching the query, fetched in batches of
    /// `batch_size` chained on `_id`.
    ///
    /// The query's filter and projection apply to every batch. Its sort, skip and limit are
    /// ignored: batches are always sorted on `_id`. The callback returns `Ok(true)` to
    /// continue, `Ok(false)` to stop cleanly, or an error, which stops iteration and is
    /// returned. Iteration also ends after a short batch or when a document lacks `_id`.
    /// A `batch_size` below 1 uses the configured default.
    pub async fn list_by_cursor<F>(
        &self,
        query: &Query,
        descending: bool,
        batch_size: u64,
        mut callback: F,
    ) -> DocumentStoreResult<()>
    where
        F: FnMut(Map) -> DocumentStoreResult<bool>,
    {
        let batch_size = match batch_size {
            0 => self.txn.options().list_batch_size,
            size => size,
        };
        let direction = if descending { SortDirection::Desc } else { SortDirection::Asc };

        let mut last_id: Option<Bson> = None;

        loop {
            let mut batch_query = Query {
                filter: query.filter.clone(),
                sort: vec![Sort { field: ID_KEY.to_string(), direction }],
                projection: query.projection.clone(),
                skip: None,
                limit: Some(batch_size),
            };

            if let Some(id) = last_id.take() {
                batch_query = batch_query.and_where(ID_KEY, doc! { direction.cursor_operator(): id });
            }

            let documents = self.find_documents(&batch_query).await?;
            let fetched = documents.len() as u64;

            trace!(collection = %self.name, fetched, batch_size, "cursor batch");

            for document in documents {
                let id = document.get(ID_KEY).cloned();

                if !callback(Map::from(document))? {
                    return Ok(());
                }

                last_id = id;
            }

            if fetched < batch_size || last_id.is_none() {
                return Ok(());
            }
        }
    }

    /// Calls `callback` for every document matching the query, fetching pages of `page_size`
    /// with up to `concurrency` pages in flight.
    ///
    /// Pages are taken by offset from a count made up front. Documents within a page keep the
    /// query's sort order (`_id` ascending when none is given), but pages may be delivered in
    /// any order. The first callback error or `Ok(false)` sets a shared stop flag: pages not
    /// yet started are skipped and running pages stop at their next document. Pages already
    /// in flight are not cancelled. The first error is returned.
    pub async fn list_concurrent<F>(
        &self,
        query: &Query,
        page_size: u64,
        concurrency: usize,
        callback: F,
    ) -> DocumentStoreResult<()>
    where
        F: Fn(Map) -> DocumentStoreResult<bool>,
    {
        let page_size = match page_size {
            0 => self.txn.options().list_batch_size,
            size => size,
        };
        let total = self.count(query.filter.clone()).await?;

        if total == 0 {
            return Ok(());
        }

        let mut base = query.clone();
        if base.sort.is_empty() {
            base.sort.push(Sort::asc(ID_KEY));
        }

        let stop = AtomicBool::new(false);
        let pages = total.div_ceil(page_size);

        debug!(collection = %self.name, total, pages, concurrency, "concurrent list");

        let results = stream::iter(0..pages)
            .map(|page| {
                let stop = &stop;
                let callback = &callback;
                let page_query = Query {
                    skip: Some(page * page_size),
                    limit: Some(page_size),
                    ..base.clone()
                };

                async move {
                    if stop.load(Ordering::SeqCst) {
                        return DocumentStoreResult::Ok(());
                    }

                    let documents = self
                        .find_documents(&page_query)
                        .await
                        .inspect_err(|_| stop.store(true, Ordering::SeqCst))?;

                    for document in documents {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }

                        match callback(Map::from(document)) {
                            Ok(true) => {}
                            Ok(false) => {
                                stop.store(true, Ordering::SeqCst);
                                break;
                            }
                            Err(err) => {
                                stop.store(true, Ordering::SeqCst);
                                return Err(err);
                            }
                        }
                    }

                    Ok(())
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<DocumentStoreResult<()>>>()
            .await;

        results
            .into_iter()
            .collect::<DocumentStoreResult<Vec<()>>>()
            .map(|_| ())
    }

    /// Runs a find and returns the documents as maps.
    pub async fn find(&self, query: &Query) -> DocumentStoreResult<Vec<Map>> {
        Ok(self
            .find_documents(query)
            .await?
            .into_iter()
            .map(Map::from)
            .collect())
    }

    async fn find_documents(&self, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        let mut session = self.txn.session().await;

        self.txn
            .backend()
            .find(session.as_deref_mut(), &self.name, query)
            .await
    }
}

/// Resolves the ID of an entity for writes. Null and empty-string IDs are missing.
fn entity_id<T: Introspect + ?Sized>(entity: &T) -> DocumentStoreResult<Bson> {
    match get_id(entity) {
        None | Some(Bson::Null) => Err(DocumentStoreError::NoId),
        Some(Bson::String(id)) if id.is_empty() => Err(DocumentStoreError::NoId),
        Some(id) => Ok(id),
    }
}

/// Null and empty-string cursors mean "start from the beginning".
fn cursor_id(id: Bson) -> Option<Bson> {
    match id {
        Bson::Null => None,
        Bson::String(ref s) if s.is_empty() => None,
        id => Some(id),
    }
}

fn without_id(mut map: Map) -> Document {
    map.remove(ID_KEY);
    map.into_document()
}
