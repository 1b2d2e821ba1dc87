//! Main docmodel crate: a typed, tag-driven model layer over document databases.
//!
//! This crate is the primary entry point for users of the docmodel project. It re-exports
//! the core types from the sub-crates, the `Introspect` derive macro and the storage
//! backends.
//!
//! # Features
//!
//! - **Tag-driven models** - Collection names, primary keys and indexes come from the entity type
//! - **Generic documents** - Entities convert to and from [`Map`](document::Map) documents
//! - **Transactions** - Plain or multi-document execution contexts with commit and abort
//! - **Pagination and listing** - Numbered pages, keyset pages and cursor-chained batches
//! - **Multiple backends** - In-memory storage and MongoDB behind one backend trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
//! #[serde(rename_all = "camelCase")]
//! pub struct AccountUser {
//!     #[serde(rename = "_id")]
//!     pub id: String,
//!     #[db("unique=account_email")]
//!     pub account_id: String,
//!     #[db("unique=account_email")]
//!     pub email: String,
//!     #[db("index")]
//!     pub age: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let db = Database::new(InMemoryStore::builder().build().await?);
//!
//!     // Creates the compound unique index "account_email" and the "age_1" index
//!     db.indexes(&[&AccountUser::default()]).await?;
//!
//!     let user = AccountUser {
//!         id: "u1".into(),
//!         account_id: "a1".into(),
//!         email: "alice@example.com".into(),
//!         age: 30,
//!     };
//!     db.set(&user).await?;
//!
//!     // Stored in the "account_user" collection
//!     let adults = db
//!         .pagination(&user, &Query::filter(Filter::gte("age", 18)), PaginationParams::new(1, 20))
//!         .await?;
//!
//!     db.txn(true, async |txn| {
//!         let users = txn.model(&user);
//!         users.inc("u1", Map::new().set("age", 1)).await?;
//!         users.del("u2").await?;
//!         Ok(())
//!     })
//!     .await?;
//!
//!     db.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docmodel;

pub mod prelude;

pub use docmodel_core::{backend, document, error, id, introspect, model, options, page, query, store, tag, txn};
pub use docmodel_macros::Introspect;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
