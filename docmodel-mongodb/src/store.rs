//! MongoDB storage implementation.
//!
//! Every operation takes an optional [`ClientSession`]. When one is given the operation
//! is issued on it, so it joins the session's open transaction.

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    IndexModel as MongoIndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, CountOptions, FindOptions, IndexOptions, ReadPreference, SelectionCriteria},
};
use tracing::{debug, warn};

use docmodel_core::{
    backend::{IndexModel, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
};

/// Error code MongoDB reports for a missing collection.
const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Maps a driver error to a backend error, keeping the server's error code when present.
fn map_error(err: MongoError) -> DocumentStoreError {
    let code = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    };

    match code {
        Some(code) => DocumentStoreError::backend_with_code(code, err.to_string()),
        None => DocumentStoreError::backend(err.to_string()),
    }
}

fn find_options(query: &Query) -> FindOptions {
    let mut options = FindOptions::default();

    if !query.sort.is_empty() {
        options.sort = Some(query.sort_document());
    }
    if let Some(skip) = query.skip {
        options.skip = Some(skip);
    }
    if let Some(limit) = query.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(projection) = &query.projection {
        options.projection = Some(projection.as_document().clone());
    }

    options
}

fn to_index_model(index: &MongoIndexModel) -> IndexModel {
    let options = index.options.as_ref();

    IndexModel {
        keys: index.keys.clone(),
        unique: options
            .and_then(|options| options.unique)
            .unwrap_or(false),
        name: options.and_then(|options| options.name.clone()),
    }
}

/// MongoDB document storage backend.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Session = ClientSession;

    async fn start_transaction(&self) -> DocumentStoreResult<Self::Session> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(map_error)?;

        // Reads inside a transaction must go to the primary.
        session
            .start_transaction()
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(map_error)?;

        Ok(session)
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session
            .commit_transaction()
            .await
            .map_err(map_error)
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session
            .abort_transaction()
            .await
            .map_err(map_error)
    }

    async fn find(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        let coll = self.get_collection(collection);
        let action = coll
            .find(query.filter_document())
            .with_options(find_options(query));

        match session {
            Some(session) => {
                let mut cursor = action
                    .session(&mut *session)
                    .await
                    .map_err(map_error)?;

                cursor
                    .stream(session)
                    .try_collect()
                    .await
                    .map_err(map_error)
            }
            None => action
                .await
                .map_err(map_error)?
                .try_collect()
                .await
                .map_err(map_error),
        }
    }

    async fn count_documents(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        limit: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        let mut options = CountOptions::default();
        options.limit = limit;

        let coll = self.get_collection(collection);
        let action = coll
            .count_documents(filter.clone())
            .with_options(options);

        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)
    }

    async fn estimated_document_count(&self, collection: &str) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .estimated_document_count()
            .await
            .map_err(map_error)
    }

    async fn replace_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let coll = self.get_collection(collection);
        let action = coll
            .replace_one(filter.clone(), replacement)
            .upsert(upsert);

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn find_one_and_update(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<Option<Document>> {
        let coll = self.get_collection(collection);
        let action = coll
            .find_one_and_update(filter.clone(), update);

        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)
    }

    async fn update_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let coll = self.get_collection(collection);
        let action = coll
            .update_one(filter.clone(), update);

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn update_many(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let coll = self.get_collection(collection);
        let action = coll
            .update_many(filter.clone(), update);

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn delete_one(
        &self,
        session: Option<&mut Self::Session>,
        collection: &str,
        filter: &Document,
    ) -> DocumentStoreResult<u64> {
        let coll = self.get_collection(collection);
        let action = coll
            .delete_one(filter.clone());

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(result.deleted_count)
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexModel>> {
        let cursor = match self.get_collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(err) => {
                return match map_error(err) {
                    DocumentStoreError::Backend { code: Some(NAMESPACE_NOT_FOUND_CODE), .. } => Ok(Vec::new()),
                    err => Err(err),
                };
            }
        };

        Ok(cursor
            .try_collect::<Vec<MongoIndexModel>>()
            .await
            .map_err(map_error)?
            .iter()
            .map(to_index_model)
            .collect())
    }

    async fn create_index(&self, collection: &str, index: IndexModel) -> DocumentStoreResult<()> {
        let options = IndexOptions::builder()
            .unique(index.unique)
            .name(index.name)
            .build();

        let model = MongoIndexModel::builder()
            .keys(index.keys)
            .options(options)
            .build();

        let created = self
            .get_collection(collection)
            .create_index(model)
            .await
            .map_err(map_error)?;

        debug!(collection, index = %created.index_name, "index created");
        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(map_error)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(map_error)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Hook that adjusts the parsed client options before the client is created.
type ClientOptionsHook = Box<dyn FnOnce(&mut ClientOptions) + Send>;

/// Builder for [`MongoDbStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmodel::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
///
/// let store = MongoDbStore::builder("mongodb://localhost:27017", "app")
///     .with_client_options(|options| {
///         options.app_name = Some("billing".into());
///         options.max_pool_size = Some(20);
///     })
///     .build()
///     .await?;
/// ```
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    hooks: Vec<ClientOptionsHook>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            hooks: Vec::new(),
        }
    }

    /// Adds a hook that adjusts the client options parsed from the connection string.
    ///
    /// Hooks run in the order they were added.
    pub fn with_client_options(mut self, hook: impl FnOnce(&mut ClientOptions) + Send + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        if self.database.is_empty() {
            return Err(DocumentStoreError::Initialization("database name is empty".into()));
        }

        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        for hook in self.hooks {
            hook(&mut options);
        }

        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if let Err(err) = client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
        {
            warn!(error = %err, "mongodb ping failed, continuing with lazy connection");
        }

        debug!(database = %self.database, "mongodb store ready");
        Ok(MongoDbStore::new(client, self.database))
    }
}
