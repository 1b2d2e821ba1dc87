//! A typed data-access layer over document databases.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Field annotations** ([`tag`]) - The `pk` / `unique` / `index` annotation grammar
//! - **Model introspection** ([`introspect`]) - Collection names, primary keys and index specifications
//! - **Documents** ([`document`]) - The generic [`Map`](document::Map) and entity conversions
//! - **Store backend abstraction** ([`backend`]) - The narrow interface backends implement
//! - **Queries** ([`query`]) - Filter documents, a typed filter AST, sorts and projections
//! - **Transactions** ([`txn`]) - Plain and multi-document execution contexts
//! - **Models** ([`model`]) - CRUD, pagination and cursor-chained listing for one collection
//! - **Database** ([`store`]) - Transactions, one-shot operations and index creation
//! - **Pagination** ([`page`]) - Page parameters and result pages
//! - **IDs** ([`id`]) - Time-ordered string identifiers
//! - **Configuration** ([`options`]) - Database and transaction options
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Introspect)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: String,
//!     #[db("unique")]
//!     pub email: String,
//! }
//!
//! let db = Database::new(InMemoryStore::new());
//! db.set(&User { id: "u1".into(), email: "a@example.com".into() }).await?;
//!
//! let user: User = db.unmarshal("user", "u1", None).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod document;
pub mod error;
pub mod id;
pub mod introspect;
pub mod model;
pub mod options;
pub mod page;
pub mod query;
pub mod store;
pub mod tag;
pub mod txn;
