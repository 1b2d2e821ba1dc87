//! Execution context shared by the models of one transaction.
//!
//! A [`Txn`] is either plain, running every operation directly against the store, or
//! sessioned, carrying a store session with an open multi-document transaction. Transactions
//! are opened with [`Database::txn`](crate::store::Database::txn), which commits or aborts
//! the session once the callback returns.
//!
//! ```ignore
//! db.txn(true, async |txn| {
//!     txn.model("account").inc("alice", Map::new().set("balance", -10)).await?;
//!     txn.model("account").inc("bob", Map::new().set("balance", 10)).await?;
//!     Ok(())
//! })
//! .await?;
//! ```
//!
//! The store bounds the duration of multi-document transactions (60 seconds on MongoDB) and
//! aborts them when exceeded. Transactions are not retried and cannot be nested.

use mea::mutex::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    error::{DocumentStoreError, DocumentStoreResult},
    introspect::{Introspect, get_model_name},
    model::Model,
    options::DatabaseOptions,
};

/// The execution context handed to transaction callbacks.
pub struct Txn<'a, B: StoreBackend> {
    backend: &'a B,
    options: &'a DatabaseOptions,
    session: Option<Mutex<B::Session>>,
}

impl<'a, B: StoreBackend> Txn<'a, B> {
    pub(crate) fn plain(backend: &'a B, options: &'a DatabaseOptions) -> Self {
        Self { backend, options, session: None }
    }

    pub(crate) fn sessioned(backend: &'a B, options: &'a DatabaseOptions, session: B::Session) -> Self {
        Self { backend, options, session: Some(Mutex::new(session)) }
    }

    /// Returns `true` if operations run inside a multi-document transaction.
    pub fn is_multi_doc(&self) -> bool {
        self.session.is_some()
    }

    /// Returns a model handle bound to the collection of `value`.
    ///
    /// `value` is an entity, whose snake_cased type name is the collection, or a string
    /// naming the collection directly.
    ///
    /// # Panics
    ///
    /// Panics with [`DocumentStoreError::InvalidModelName`] if no collection name can be
    /// derived from `value`. Use [`Txn::try_model`] to get the error instead.
    pub fn model<M: Introspect + ?Sized>(&self, value: &M) -> Model<'_, B> {
        match self.try_model(value) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns a model handle bound to the collection of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidModelName`] if no collection name can be derived.
    pub fn try_model<M: Introspect + ?Sized>(&self, value: &M) -> DocumentStoreResult<Model<'_, B>> {
        let name = get_model_name(value);

        if name.is_empty() {
            return Err(DocumentStoreError::InvalidModelName);
        }

        Ok(Model::new(self, name))
    }

    pub(crate) fn backend(&self) -> &B {
        self.backend
    }

    pub(crate) fn options(&self) -> &DatabaseOptions {
        self.options
    }

    /// Locks the session for the duration of one store call.
    pub(crate) async fn session(&self) -> Option<MutexGuard<'_, B::Session>> {
        match &self.session {
            Some(session) => Some(session.lock().await),
            None => None,
        }
    }

    /// Commits a sessioned transaction. Plain transactions have nothing to commit.
    pub(crate) async fn commit(&self) -> DocumentStoreResult<()> {
        if let Some(mut session) = self.session().await {
            self.backend
                .commit_transaction(&mut session)
                .await?;
            debug!("transaction committed");
        }

        Ok(())
    }

    /// Aborts a sessioned transaction. A failed abort is logged, not returned: the store
    /// discards the transaction on its own once the session ends.
    pub(crate) async fn abort(&self) {
        if let Some(mut session) = self.session().await {
            match self.backend.abort_transaction(&mut session).await {
                Ok(()) => debug!("transaction aborted"),
                Err(err) => warn!(error = %err, "failed to abort transaction"),
            }
        }
    }
}
