//! In-memory storage implementation for document stores.
//!
//! Collections keep their documents in insertion order, which is the natural order reads
//! return without a sort. Unique indexes are enforced on every write, and the implicit
//! `_id_` index makes `_id` unique in every collection.
//!
//! Transactions run against a snapshot of the whole store taken when the session starts.
//! Committing replays the documents the session inserted, replaced or deleted, matched by
//! `_id`, onto the live collections. Writes made outside the session to other documents
//! survive, and unique indexes are checked again against the live data. Aborting discards
//! the snapshot.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, trace};

use docmodel_core::{
    backend::{IndexModel, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    document::ID_KEY,
    error::{DUPLICATE_KEY_CODE, DocumentStoreError, DocumentStoreResult},
    query::{Expr, Query},
};

use crate::{
    evaluator::{DocumentEvaluator, apply_sort, first_value, values_equal},
    update::{apply_projection, apply_update, replacement_with_id, validate_replacement},
};

/// Error code for operations on a session whose transaction has ended.
const NO_SUCH_TRANSACTION_CODE: i32 = 251;
/// Error code for an index whose name is taken by different keys.
const INDEX_KEY_SPECS_CONFLICT_CODE: i32 = 86;

const ID_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexModel>,
}

impl Collection {
    fn position(&self, expr: &Expr) -> DocumentStoreResult<Option<usize>> {
        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::matches(document, expr)? {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }

    fn positions(&self, expr: &Expr) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::matches(document, expr)? {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    /// Checks `candidate` against the unique indexes, ignoring the document at `skip`.
    ///
    /// Missing key fields index as `null`, so two documents lacking a unique field collide.
    fn check_unique(&self, name: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |&(position, _)| Some(position) != skip)
                .map(|(_, document)| document)
        };

        if let Some(id) = candidate.get(ID_KEY) {
            if others().any(|document| document.get(ID_KEY).is_some_and(|other| values_equal(id, other))) {
                let mut key = Document::new();
                key.insert(ID_KEY, id.clone());
                return Err(duplicate_key(name, ID_INDEX_NAME, &key));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index_key(index, candidate);

            if others().any(|document| {
                index_key(index, document)
                    .iter()
                    .zip(key.iter())
                    .all(|((_, a), (_, b))| values_equal(a, b))
            }) {
                return Err(duplicate_key(name, &index_name(index), &key));
            }
        }

        Ok(())
    }

    fn id_position(&self, id: &Bson) -> Option<usize> {
        self.documents
            .iter()
            .position(|document| document.get(ID_KEY).is_some_and(|other| values_equal(id, other)))
    }

    /// Removes the `deleted` IDs, then inserts or replaces each `written` document by `_id`.
    fn apply_changes(&mut self, name: &str, deleted: &[Bson], written: Vec<Document>) -> DocumentStoreResult<()> {
        self.documents.retain(|document| {
            !document
                .get(ID_KEY)
                .is_some_and(|id| deleted.iter().any(|gone| values_equal(gone, id)))
        });

        for document in written {
            let position = document.get(ID_KEY).and_then(|id| self.id_position(id));
            self.check_unique(name, &document, position)?;

            match position {
                Some(position) => self.documents[position] = document,
                None => self.documents.push(document),
            }
        }

        Ok(())
    }
}

/// Net changes between the documents a session started with and the ones it ends with:
/// the deleted IDs, and the documents that are new or differ.
fn diff_documents(base: &[Document], current: &[Document]) -> (Vec<Bson>, Vec<Document>) {
    let find = |documents: &[Document], id: &Bson| {
        documents
            .iter()
            .find(|document| document.get(ID_KEY).is_some_and(|other| values_equal(id, other)))
            .cloned()
    };

    let deleted = base
        .iter()
        .filter_map(|document| document.get(ID_KEY))
        .filter(|id| find(current, *id).is_none())
        .cloned()
        .collect();

    let written = current
        .iter()
        .filter(|document| match document.get(ID_KEY) {
            Some(id) => find(base, id).as_ref() != Some(*document),
            None => false,
        })
        .cloned()
        .collect();

    (deleted, written)
}

type StoreMap = BTreeMap<String, Collection>;

fn index_name(index: &IndexModel) -> String {
    index
        .name
        .clone()
        .unwrap_or_else(|| index.default_name())
}

fn index_key(index: &IndexModel, document: &Document) -> Document {
    index
        .keys
        .keys()
        .map(|field| (field.clone(), first_value(document, field).clone()))
        .collect()
}

fn duplicate_key(collection: &str, index: &str, key: &Document) -> DocumentStoreError {
    DocumentStoreError::backend_with_code(
        DUPLICATE_KEY_CODE,
        format!("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}"),
    )
}

fn parse_filter(filter: &Document) -> DocumentStoreResult<Expr> {
    Expr::parse(filter)
}

/// The `_id` an upsert inserts with: the filter's plain `_id` equality when present,
/// otherwise a fresh object ID.
fn upsert_id(filter: &Document) -> Bson {
    match filter.get(ID_KEY) {
        Some(Bson::Document(condition)) if condition.keys().any(|key| key.starts_with('$')) => {
            match condition.get("$eq") {
                Some(id) => id.clone(),
                None => Bson::ObjectId(ObjectId::new()),
            }
        }
        Some(id) => id.clone(),
        None => Bson::ObjectId(ObjectId::new()),
    }
}

fn find_in(store: &StoreMap, collection: &str, query: &Query) -> DocumentStoreResult<Vec<Document>> {
    let Some(coll) = store.get(collection) else {
        return Ok(Vec::new());
    };

    let expr = parse_filter(&query.filter_document())?;
    let mut documents = Vec::new();

    for document in &coll.documents {
        if DocumentEvaluator::matches(document, &expr)? {
            documents.push(document.clone());
        }
    }

    apply_sort(&mut documents, &query.sort);

    let skip = query.skip.unwrap_or(0) as usize;
    let limit = match query.limit {
        None | Some(0) => usize::MAX,
        Some(limit) => limit as usize,
    };

    let projection = query.projection.as_ref().map(|projection| projection.as_document());

    documents
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|document| match projection {
            Some(projection) => apply_projection(document, projection),
            None => Ok(document),
        })
        .collect()
}

fn count_in(store: &StoreMap, collection: &str, filter: &Document, limit: Option<u64>) -> DocumentStoreResult<u64> {
    let Some(coll) = store.get(collection) else {
        return Ok(0);
    };

    let expr = parse_filter(filter)?;
    let limit = match limit {
        None | Some(0) => u64::MAX,
        Some(limit) => limit,
    };

    let mut count = 0;

    for document in &coll.documents {
        if count >= limit {
            break;
        }
        if DocumentEvaluator::matches(document, &expr)? {
            count += 1;
        }
    }

    Ok(count)
}

fn replace_in(
    store: &mut StoreMap,
    collection: &str,
    filter: &Document,
    replacement: Document,
    upsert: bool,
) -> DocumentStoreResult<UpdateOutcome> {
    validate_replacement(&replacement)?;

    let expr = parse_filter(filter)?;

    if !upsert && !store.contains_key(collection) {
        return Ok(UpdateOutcome::default());
    }

    let coll = store.entry(collection.to_string()).or_default();

    match coll.position(&expr)? {
        Some(position) => {
            let stored = replacement_with_id(replacement, coll.documents[position].get(ID_KEY))?;
            coll.check_unique(collection, &stored, Some(position))?;

            let modified = coll.documents[position] != stored;
            coll.documents[position] = stored;

            Ok(UpdateOutcome { matched: 1, modified: modified as u64, upserted: false })
        }
        None if upsert => {
            let id = match replacement.get(ID_KEY) {
                Some(id) => id.clone(),
                None => upsert_id(filter),
            };
            let stored = replacement_with_id(replacement, Some(&id))?;
            coll.check_unique(collection, &stored, None)?;
            coll.documents.push(stored);

            Ok(UpdateOutcome { matched: 0, modified: 0, upserted: true })
        }
        None => Ok(UpdateOutcome::default()),
    }
}

/// Updates the document at `position`, returning whether it changed and its previous state.
fn update_at(
    coll: &mut Collection,
    collection: &str,
    position: usize,
    update: &Document,
) -> DocumentStoreResult<(bool, Document)> {
    let mut updated = coll.documents[position].clone();

    if !apply_update(&mut updated, update)? {
        return Ok((false, updated));
    }

    coll.check_unique(collection, &updated, Some(position))?;

    let previous = std::mem::replace(&mut coll.documents[position], updated);
    Ok((true, previous))
}

fn update_in(
    store: &mut StoreMap,
    collection: &str,
    filter: &Document,
    update: &Document,
    many: bool,
) -> DocumentStoreResult<(UpdateOutcome, Option<Document>)> {
    let expr = parse_filter(filter)?;

    let Some(coll) = store.get_mut(collection) else {
        return Ok((UpdateOutcome::default(), None));
    };

    let positions = if many {
        coll.positions(&expr)?
    } else {
        coll.position(&expr)?.into_iter().collect()
    };

    let mut outcome = UpdateOutcome::default();
    let mut first = None;

    for position in positions {
        let (modified, previous) = update_at(coll, collection, position, update)?;

        outcome.matched += 1;
        outcome.modified += modified as u64;
        first.get_or_insert(previous);
    }

    Ok((outcome, first))
}

fn delete_in(store: &mut StoreMap, collection: &str, filter: &Document) -> DocumentStoreResult<u64> {
    let expr = parse_filter(filter)?;

    let Some(coll) = store.get_mut(collection) else {
        return Ok(0);
    };

    match coll.position(&expr)? {
        Some(position) => {
            coll.documents.remove(position);
            Ok(1)
        }
        None => Ok(0),
    }
}

/// A client session holding a snapshot of the store for one transaction.
#[derive(Debug)]
pub struct InMemorySession {
    id: u64,
    snapshot: StoreMap,
    /// Documents of each written collection as they were before the session's first write.
    base: BTreeMap<String, Vec<Document>>,
    active: bool,
}

impl InMemorySession {
    /// The session's identifier, unique within its store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the session's transaction is still open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn ensure_active(&self) -> DocumentStoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(DocumentStoreError::backend_with_code(
                NO_SUCH_TRANSACTION_CODE,
                format!("Transaction for session {} is not in progress", self.id),
            ))
        }
    }
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones share
/// the same data and can be used from any number of async tasks.
///
/// Queries scan every document of a collection. Indexes only enforce uniqueness.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
///
/// store
///     .replace_one(None, "user", &doc! { "_id": "u1" }, doc! { "name": "Alice" }, true)
///     .await?;
///
/// assert_eq!(store.estimated_document_count("user").await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
    sessions: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for configuring an in-memory store.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    async fn read<T>(
        &self,
        session: Option<&mut InMemorySession>,
        f: impl FnOnce(&StoreMap) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        match session {
            Some(session) => {
                session.ensure_active()?;
                f(&session.snapshot)
            }
            None => {
                let store = self.store.read().await;
                f(&store)
            }
        }
    }

    async fn write<T>(
        &self,
        session: Option<&mut InMemorySession>,
        collection: &str,
        f: impl FnOnce(&mut StoreMap) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        match session {
            Some(session) => {
                session.ensure_active()?;
                session
                    .base
                    .entry(collection.to_string())
                    .or_insert_with(|| {
                        session
                            .snapshot
                            .get(collection)
                            .map(|coll| coll.documents.clone())
                            .unwrap_or_default()
                    });
                f(&mut session.snapshot)
            }
            None => {
                let mut store = self.store.write().await;
                f(&mut store)
            }
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Session = InMemorySession;

    async fn start_transaction(&self) -> DocumentStoreResult<Self::Session> {
        let id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = self.store.read().await.clone();

        debug!(session = id, "in-memory transaction started");

        Ok(InMemorySession {
            id,
            snapshot,
            base: BTreeMap::new(),
            active: true,
        })
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session.ensure_active()?;

        session.active = false;

        let base = std::mem::take(&mut session.base);
        let snapshot = std::mem::take(&mut session.snapshot);

        let mut store = self.store.write().await;
        let mut staged = Vec::with_capacity(base.len());

        for (name, base_documents) in base {
            let current = snapshot
                .get(&name)
                .map(|coll| coll.documents.as_slice())
                .unwrap_or_default();
            let (deleted, written) = diff_documents(&base_documents, current);

            if deleted.is_empty() && written.is_empty() {
                continue;
            }

            trace!(session = session.id, collection = %name, deleted = deleted.len(), written = written.len(), "replaying");

            let mut coll = store.get(&name).cloned().unwrap_or_default();
            coll.apply_changes(&name, &deleted, written)?;
            staged.push((name, coll));
        }

        store.extend(staged);

        debug!(session = session.id, "in-memory transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session.ensure_active()?;

        session.snapshot.clear();
        session.base.clear();
        session.active = false;

        debug!(session = session.id, "in-memory transaction aborted");
        Ok(())
    }

    async fn find(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        let documents = self
            .read(session, |store| find_in(store, collection, query))
            .await?;

        trace!(collection, found = documents.len(), "find");
        Ok(documents)
    }

    async fn count_documents(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        limit: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        self.read(session, |store| count_in(store, collection, filter, limit))
            .await
    }

    async fn estimated_document_count(&self, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        Ok(store
            .get(collection)
            .map_or(0, |coll| coll.documents.len() as u64))
    }

    async fn replace_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(session, collection, |store| {
            replace_in(store, collection, filter, replacement, upsert)
        })
        .await
    }

    async fn find_one_and_update(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<Option<Document>> {
        let (_, previous) = self
            .write(session, collection, |store| {
                update_in(store, collection, filter, &update, false)
            })
            .await?;

        Ok(previous)
    }

    async fn update_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let (outcome, _) = self
            .write(session, collection, |store| {
                update_in(store, collection, filter, &update, false)
            })
            .await?;

        Ok(outcome)
    }

    async fn update_many(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let (outcome, _) = self
            .write(session, collection, |store| {
                update_in(store, collection, filter, &update, true)
            })
            .await?;

        trace!(collection, matched = outcome.matched, modified = outcome.modified, "update_many");
        Ok(outcome)
    }

    async fn delete_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
    ) -> DocumentStoreResult<u64> {
        self.write(session, collection, |store| delete_in(store, collection, filter))
            .await
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexModel>> {
        let store = self.store.read().await;

        let Some(coll) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let id_index = IndexModel::ascending(&[ID_KEY]).with_name(ID_INDEX_NAME);

        Ok(std::iter::once(id_index)
            .chain(coll.indexes.iter().cloned())
            .collect())
    }

    async fn create_index(&self, collection: &str, index: IndexModel) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let coll = store.entry(collection.to_string()).or_default();

        let name = index_name(&index);
        let signature = index.key_signature();

        if let Some(existing) = coll.indexes.iter().find(|existing| index_name(existing) == name) {
            if existing.key_signature() == signature {
                return Ok(());
            }

            return Err(DocumentStoreError::backend_with_code(
                INDEX_KEY_SPECS_CONFLICT_CODE,
                format!("An existing index has the same name as the requested index: {name}"),
            ));
        }

        if index.unique {
            let mut seen: Vec<Document> = Vec::new();

            for document in &coll.documents {
                let key = index_key(&index, document);

                if seen.iter().any(|other| {
                    other
                        .iter()
                        .zip(key.iter())
                        .all(|((_, a), (_, b))| values_equal(a, b))
                }) {
                    return Err(duplicate_key(collection, &name, &key));
                }

                seen.push(key);
            }
        }

        debug!(collection, index = %name, unique = index.unique, "in-memory index created");

        coll.indexes.push(IndexModel { name: Some(name), ..index });
        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let store = self.store.read().await;
        Ok(store.keys().cloned().collect())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        store.remove(name);
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::query::{Filter, SortDirection};

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();

        for (id, name, age) in [("a", "ann", 30), ("b", "bob", 25), ("c", "cy", 35)] {
            store
                .replace_one(None, "user", &doc! { "_id": id }, doc! { "name": name, "age": age }, true)
                .await
                .unwrap();
        }

        store
    }

    fn ids(documents: &[Document]) -> Vec<&str> {
        documents
            .iter()
            .map(|document| document.get_str("_id").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn upsert_takes_id_from_filter() {
        let store = seeded().await;

        let documents = store.find(None, "user", &Query::default()).await.unwrap();

        assert_eq!(ids(&documents), vec!["a", "b", "c"]);
        assert_eq!(documents[0], doc! { "_id": "a", "name": "ann", "age": 30 });
    }

    #[tokio::test]
    async fn replace_keeps_position_and_reports_modification() {
        let store = seeded().await;

        let outcome = store
            .replace_one(None, "user", &doc! { "_id": "a" }, doc! { "_id": "a", "name": "ann", "age": 30 }, true)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0, upserted: false });

        let outcome = store
            .replace_one(None, "user", &doc! { "_id": "a" }, doc! { "name": "anna" }, false)
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);

        let first = store
            .find_one(None, "user", &Query::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, doc! { "_id": "a", "name": "anna" });
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let store = seeded().await;

        let query = Query::builder()
            .filter(Filter::gte("age", 30))
            .sort("age", SortDirection::Desc)
            .projection(doc! { "name": 1, "_id": 0 })
            .limit(1)
            .build();

        let documents = store.find(None, "user", &query).await.unwrap();
        assert_eq!(documents, vec![doc! { "name": "cy" }]);

        let query = Query::builder().sort("age", SortDirection::Asc).skip(1).build();
        let documents = store.find(None, "user", &query).await.unwrap();
        assert_eq!(ids(&documents), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn counts_respect_limit() {
        let store = seeded().await;

        assert_eq!(store.count_documents(None, "user", &doc! {}, None).await.unwrap(), 3);
        assert_eq!(store.count_documents(None, "user", &doc! {}, Some(1)).await.unwrap(), 1);
        assert_eq!(store.count_documents(None, "missing", &doc! {}, None).await.unwrap(), 0);
        assert_eq!(store.estimated_document_count("user").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn find_one_and_update_returns_previous_document() {
        let store = seeded().await;

        let previous = store
            .find_one_and_update(None, "user", &doc! { "_id": "b" }, doc! { "$set": { "name": "rob" } })
            .await
            .unwrap();
        assert_eq!(previous, Some(doc! { "_id": "b", "name": "bob", "age": 25 }));

        let missing = store
            .find_one_and_update(None, "user", &doc! { "_id": "z" }, doc! { "$set": { "name": "x" } })
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn update_many_and_delete() {
        let store = seeded().await;

        let outcome = store
            .update_many(None, "user", &doc! { "age": { "$lt": 35 } }, doc! { "$inc": { "age": 1 } })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 2, modified: 2, upserted: false });

        assert_eq!(store.delete_one(None, "user", &doc! { "_id": "a" }).await.unwrap(), 1);
        assert_eq!(store.delete_one(None, "user", &doc! { "_id": "a" }).await.unwrap(), 0);
        assert_eq!(store.estimated_document_count("user").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = seeded().await;

        store
            .create_index("user", IndexModel::ascending(&["name"]).with_unique(true))
            .await
            .unwrap();

        let err = store
            .replace_one(None, "user", &doc! { "_id": "d" }, doc! { "name": "ann" }, true)
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());

        let err = store
            .update_one(None, "user", &doc! { "_id": "b" }, doc! { "$set": { "name": "cy" } })
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());

        let err = store
            .create_index("user", IndexModel::ascending(&["age"]).with_unique(true).with_name("name_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Backend { code: Some(INDEX_KEY_SPECS_CONFLICT_CODE), .. }));
    }

    #[tokio::test]
    async fn indexes_include_id_and_defaults() {
        let store = seeded().await;

        store
            .create_index("user", IndexModel::ascending(&["name", "age"]))
            .await
            .unwrap();
        store
            .create_index("user", IndexModel::ascending(&["name", "age"]))
            .await
            .unwrap();

        let names = store
            .list_indexes("user")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|index| index.name)
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["_id_", "name_1_age_1"]);
        assert!(store.list_indexes("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transactions_commit_and_abort() {
        let store = seeded().await;

        let mut session = store.start_transaction().await.unwrap();
        store
            .delete_one(Some(&mut session), "user", &doc! { "_id": "a" })
            .await
            .unwrap();

        assert_eq!(store.count_documents(Some(&mut session), "user", &doc! {}, None).await.unwrap(), 2);
        assert_eq!(store.estimated_document_count("user").await.unwrap(), 3);

        store.abort_transaction(&mut session).await.unwrap();
        assert_eq!(store.estimated_document_count("user").await.unwrap(), 3);
        assert!(!session.is_active());

        let mut session = store.start_transaction().await.unwrap();
        store
            .replace_one(Some(&mut session), "audit", &doc! { "_id": 1 }, doc! { "event": "x" }, true)
            .await
            .unwrap();
        store.commit_transaction(&mut session).await.unwrap();

        assert_eq!(store.estimated_document_count("audit").await.unwrap(), 1);

        let err = store
            .find(Some(&mut session), "audit", &Query::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Backend { code: Some(NO_SUCH_TRANSACTION_CODE), .. }));
    }

    #[tokio::test]
    async fn commit_keeps_writes_made_outside_the_session() {
        let store = seeded().await;

        let mut session = store.start_transaction().await.unwrap();

        store
            .replace_one(None, "user", &doc! { "_id": "d" }, doc! { "name": "dee", "age": 40 }, true)
            .await
            .unwrap();
        store
            .update_one(None, "user", &doc! { "_id": "c" }, doc! { "$set": { "age": 36 } })
            .await
            .unwrap();

        store
            .replace_one(Some(&mut session), "user", &doc! { "_id": "e" }, doc! { "name": "eve", "age": 22 }, true)
            .await
            .unwrap();
        store
            .update_one(Some(&mut session), "user", &doc! { "_id": "a" }, doc! { "$inc": { "age": 1 } })
            .await
            .unwrap();
        store
            .delete_one(Some(&mut session), "user", &doc! { "_id": "b" })
            .await
            .unwrap();

        store.commit_transaction(&mut session).await.unwrap();

        let documents = store.find(None, "user", &Query::default()).await.unwrap();
        assert_eq!(ids(&documents), vec!["a", "c", "d", "e"]);

        let ages = documents
            .iter()
            .map(|document| document.get_i32("age").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ages, vec![31, 36, 40, 22]);
    }

    #[tokio::test]
    async fn commit_rechecks_unique_indexes_against_live_data() {
        let store = seeded().await;
        store
            .create_index("user", IndexModel::ascending(&["name"]).with_unique(true))
            .await
            .unwrap();

        let mut session = store.start_transaction().await.unwrap();
        store
            .replace_one(Some(&mut session), "user", &doc! { "_id": "x" }, doc! { "name": "zed" }, true)
            .await
            .unwrap();

        store
            .replace_one(None, "user", &doc! { "_id": "y" }, doc! { "name": "zed" }, true)
            .await
            .unwrap();

        let err = store.commit_transaction(&mut session).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert!(!session.is_active());

        let documents = store.find(None, "user", &Query::default()).await.unwrap();
        assert_eq!(ids(&documents), vec!["a", "b", "c", "y"]);
    }

    #[tokio::test]
    async fn large_integer_ids_are_distinct() {
        let store = InMemoryStore::new();

        for (id, n) in [(1_i64 << 53, 1), ((1_i64 << 53) + 1, 2)] {
            store
                .replace_one(None, "event", &doc! { "_id": id }, doc! { "n": n }, true)
                .await
                .unwrap();
        }

        assert_eq!(store.estimated_document_count("event").await.unwrap(), 2);

        let after = Query::filter(doc! { "_id": { "$gt": 1_i64 << 53 } });
        let documents = store.find(None, "event", &after).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].get_i32("n").unwrap(), 2);
    }

    #[tokio::test]
    async fn collections_can_be_listed_and_dropped() {
        let store = seeded().await;
        store
            .replace_one(None, "audit", &doc! { "_id": 1 }, doc! {}, true)
            .await
            .unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["audit", "user"]);

        store.drop_collection("audit").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["user"]);
    }
}
