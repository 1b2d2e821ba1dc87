//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development,
//! tests and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes behind an async-aware RwLock
//! - **Query support** - Operator filters, multi-key sorts, skip, limit and projections
//! - **Update operators** - `$set`, `$inc` and `$unset`, including dotted paths
//! - **Unique indexes** - Violations fail with the duplicate key error code
//! - **Transactions** - Snapshot sessions that commit or discard their writes
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use docmodel::memory::InMemoryStore;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Introspect)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: String,
//!     pub name: String,
//! }
//!
//! let backend = InMemoryStore::builder().build().await?;
//! let db = Database::new(backend);
//!
//! db.set(&User { id: "u1".into(), name: "Alice".into() }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

mod evaluator;
pub mod store;
mod update;

pub use store::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
